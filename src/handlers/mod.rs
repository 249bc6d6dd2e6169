//! Reference task handlers.

pub mod data_ingestion;

pub use data_ingestion::{
    DataIngestionHandler, DataIngestionParams, DataIngestionResult, InMemoryKlineSink, Kline,
    KlineSink, KlineSource, SyntheticKlineSource,
};
