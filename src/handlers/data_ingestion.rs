//! Market data ingestion: pull klines for a symbol and interval, batch by batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;
use crate::core::handler::{HandlerError, TaskContext, TaskHandler, TaskParameters};
use crate::core::task::TaskType;

/// Largest batch a source is asked for.
pub const MAX_BATCH_SIZE: u32 = 1000;

const fn default_batch_size() -> u32 {
    500
}

/// Length of a kline interval such as `1m` or `4h`, in milliseconds.
#[must_use]
pub fn interval_ms(interval: &str) -> Option<u64> {
    let ms = match interval {
        "1m" => 60_000,
        "5m" => 5 * 60_000,
        "15m" => 15 * 60_000,
        "1h" => 3_600_000,
        "4h" => 4 * 3_600_000,
        "1d" => 24 * 3_600_000,
        _ => return None,
    };
    Some(ms)
}

/// Parameters of a DataIngestion task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIngestionParams {
    /// Trading pair, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Kline interval.
    pub interval: String,
    /// Window start, inclusive, ms since epoch.
    pub start_time_ms: u64,
    /// Window end, exclusive, ms since epoch.
    pub end_time_ms: u64,
    /// Klines per source request.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl TaskParameters for DataIngestionParams {
    fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() || !self.symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("invalid symbol `{}`", self.symbol));
        }
        let Some(step) = interval_ms(&self.interval) else {
            return Err(format!("unsupported interval `{}`", self.interval));
        };
        if self.start_time_ms >= self.end_time_ms {
            return Err("start_time_ms must be before end_time_ms".into());
        }
        if self.end_time_ms.checked_add(step).is_none() {
            return Err("end_time_ms is out of range".into());
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(format!("batch_size must be in 1..={MAX_BATCH_SIZE}"));
        }
        Ok(())
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Open time, ms since epoch.
    pub open_time_ms: u64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
    /// Close time, ms since epoch.
    pub close_time_ms: u64,
}

/// Exchange API seam.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// Up to `limit` klines with open time in `[start_ms, end_ms)`, oldest first.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: u64,
        end_ms: u64,
        limit: u32,
    ) -> AppResult<Vec<Kline>>;
}

/// Destination for ingested klines.
#[async_trait]
pub trait KlineSink: Send + Sync {
    /// Store a batch; returns the number of rows written.
    async fn store_klines(&self, symbol: &str, interval: &str, klines: &[Kline]) -> AppResult<usize>;
}

/// Deterministic source producing one kline per interval step.
#[derive(Debug, Clone, Default)]
pub struct SyntheticKlineSource {
    latency: Option<Duration>,
}

impl SyntheticKlineSource {
    /// Source answering instantly.
    #[must_use]
    pub const fn new() -> Self {
        Self { latency: None }
    }

    /// Sleep this long per request.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl KlineSource for SyntheticKlineSource {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: u64,
        end_ms: u64,
        limit: u32,
    ) -> AppResult<Vec<Kline>> {
        let step = interval_ms(interval)
            .ok_or_else(|| anyhow::anyhow!("unsupported interval `{interval}`"))?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let seed = symbol.bytes().fold(0_u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        #[allow(clippy::cast_precision_loss)]
        let base = 100.0 + (seed % 1000) as f64;
        let Some(mut open_time) = start_ms.div_ceil(step).checked_mul(step) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        while open_time < end_ms && out.len() < limit as usize {
            #[allow(clippy::cast_precision_loss)]
            let drift = ((open_time / step) % 50) as f64;
            let open = base + drift;
            out.push(Kline {
                open_time_ms: open_time,
                open,
                high: open + 1.5,
                low: open - 1.5,
                close: open + 0.5,
                volume: 10.0 + drift,
                close_time_ms: open_time.saturating_add(step - 1),
            });
            let Some(next) = open_time.checked_add(step) else {
                break;
            };
            open_time = next;
        }
        Ok(out)
    }
}

/// Sink keeping klines in memory, keyed by symbol and interval.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKlineSink {
    rows: Arc<Mutex<HashMap<(String, String), Vec<Kline>>>>,
}

impl InMemoryKlineSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored klines for a symbol and interval.
    #[must_use]
    pub fn klines(&self, symbol: &str, interval: &str) -> Vec<Kline> {
        self.rows
            .lock()
            .get(&(symbol.to_owned(), interval.to_owned()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl KlineSink for InMemoryKlineSink {
    async fn store_klines(&self, symbol: &str, interval: &str, klines: &[Kline]) -> AppResult<usize> {
        self.rows
            .lock()
            .entry((symbol.to_owned(), interval.to_owned()))
            .or_default()
            .extend_from_slice(klines);
        Ok(klines.len())
    }
}

/// Result record of a DataIngestion task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIngestionResult {
    /// Trading pair.
    pub symbol: String,
    /// Kline interval.
    pub interval: String,
    /// Klines written.
    pub total_records: u64,
    /// Source requests made.
    pub batches: u64,
    /// Window start, ms since epoch.
    pub start_time_ms: u64,
    /// Window end, ms since epoch.
    pub end_time_ms: u64,
    /// Wall time spent, in seconds.
    pub duration_secs: f64,
}

/// Handler for [`TaskType::DataIngestion`].
pub struct DataIngestionHandler {
    source: Arc<dyn KlineSource>,
    sink: Arc<dyn KlineSink>,
}

impl DataIngestionHandler {
    /// Handler pulling from `source` into `sink`.
    #[must_use]
    pub fn new(source: Arc<dyn KlineSource>, sink: Arc<dyn KlineSink>) -> Self {
        Self { source, sink }
    }
}

#[async_trait]
impl TaskHandler for DataIngestionHandler {
    type Params = DataIngestionParams;
    type Output = DataIngestionResult;

    fn task_type(&self) -> TaskType {
        TaskType::DataIngestion
    }

    async fn execute(
        &self,
        params: DataIngestionParams,
        ctx: &TaskContext,
    ) -> Result<DataIngestionResult, HandlerError> {
        let started = Instant::now();
        let step = interval_ms(&params.interval)
            .ok_or_else(|| HandlerError::InvalidParameters(format!("interval `{}`", params.interval)))?;
        let first = params
            .start_time_ms
            .div_ceil(step)
            .checked_mul(step)
            .ok_or_else(|| HandlerError::InvalidParameters("start_time_ms is out of range".into()))?;
        let expected = params.end_time_ms.saturating_sub(first).div_ceil(step);

        ctx.progress().report_counts(
            0,
            expected,
            format!("ingesting {} {} klines", params.symbol, params.interval),
        );

        let mut cursor = params.start_time_ms;
        let mut written = 0_u64;
        let mut batches = 0_u64;
        while cursor < params.end_time_ms {
            ctx.check_cancelled()?;
            let batch = self
                .source
                .fetch_klines(
                    &params.symbol,
                    &params.interval,
                    cursor,
                    params.end_time_ms,
                    params.batch_size,
                )
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.open_time_ms.saturating_add(step);
            let stored = self
                .sink
                .store_klines(&params.symbol, &params.interval, &batch)
                .await?;
            written += stored as u64;
            batches += 1;
            ctx.progress().report_counts(
                written,
                expected.max(written),
                format!("{written}/{expected} klines"),
            );
            tracing::debug!(task_id = %ctx.task_id(), written, expected, "kline batch stored");
        }

        Ok(DataIngestionResult {
            symbol: params.symbol,
            interval: params.interval,
            total_records: written,
            batches,
            start_time_ms: params.start_time_ms,
            end_time_ms: params.end_time_ms,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }
}
