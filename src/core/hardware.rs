//! Hardware detection used to size the default resource containers.

use std::process::Command;

use serde::{Deserialize, Serialize};

/// Read-only snapshot of the machine, taken once on first run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedHardware {
    /// Logical CPU cores.
    pub cpu_cores: u64,
    /// Number of GPU devices.
    pub gpu_count: u64,
    /// GPU device names.
    pub gpu_names: Vec<String>,
    /// Whether a CUDA driver answered.
    pub cuda_available: bool,
    /// Total RAM in bytes.
    pub total_ram_bytes: u64,
    /// Available RAM in bytes at detection time.
    pub available_ram_bytes: u64,
}

/// Source of hardware snapshots.
pub trait HardwareProbe: Send + Sync {
    /// Take a snapshot. Must not fail; unknown values are reported as zero.
    fn detect(&self) -> DetectedHardware;
}

/// Probe backed by the running system.
///
/// CPU cores come from `num_cpus`, memory from `/proc/meminfo` and GPUs from
/// `nvidia-smi`. Missing sources yield zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl HardwareProbe for SystemProbe {
    fn detect(&self) -> DetectedHardware {
        let (total_ram_bytes, available_ram_bytes) = read_meminfo().unwrap_or((0, 0));
        let gpu_names = query_nvidia_gpus();
        let hw = DetectedHardware {
            cpu_cores: num_cpus::get() as u64,
            gpu_count: gpu_names.len() as u64,
            cuda_available: !gpu_names.is_empty(),
            gpu_names,
            total_ram_bytes,
            available_ram_bytes,
        };
        tracing::info!(
            cpu_cores = hw.cpu_cores,
            gpu_count = hw.gpu_count,
            total_ram_bytes = hw.total_ram_bytes,
            "hardware detected"
        );
        hw
    }
}

fn read_meminfo() -> Option<(u64, u64)> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&text)
}

/// Parse `MemTotal` and `MemAvailable` (kB) into bytes.
fn parse_meminfo(text: &str) -> Option<(u64, u64)> {
    let field = |name: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:").unwrap_or(total);
    Some((total, available))
}

fn query_nvidia_gpus() -> Vec<String> {
    let output = match Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
    {
        Ok(o) if o.status.success() => o,
        Ok(_) | Err(_) => {
            tracing::debug!("nvidia-smi unavailable, assuming no GPUs");
            return Vec::new();
        }
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Probe returning a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe(pub DetectedHardware);

impl StaticProbe {
    /// Fixed CPU, GPU and RAM figures.
    #[must_use]
    pub fn new(cpu_cores: u64, gpu_count: u64, total_ram_bytes: u64) -> Self {
        Self(DetectedHardware {
            cpu_cores,
            gpu_count,
            gpu_names: (0..gpu_count).map(|i| format!("gpu-{i}")).collect(),
            cuda_available: gpu_count > 0,
            total_ram_bytes,
            available_ram_bytes: total_ram_bytes,
        })
    }
}

impl HardwareProbe for StaticProbe {
    fn detect(&self) -> DetectedHardware {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo() {
        let text = "MemTotal:       16384 kB\nMemFree:  100 kB\nMemAvailable:    8192 kB\n";
        assert_eq!(parse_meminfo(text), Some((16384 * 1024, 8192 * 1024)));
    }

    #[test]
    fn meminfo_without_total_is_none() {
        assert_eq!(parse_meminfo("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn static_probe_reports_fixed_values() {
        let hw = StaticProbe::new(8, 2, 1 << 30).detect();
        assert_eq!(hw.cpu_cores, 8);
        assert_eq!(hw.gpu_names.len(), 2);
        assert!(hw.cuda_available);
    }

    #[test]
    fn system_probe_sees_at_least_one_core() {
        assert!(SystemProbe.detect().cpu_cores >= 1);
    }
}
