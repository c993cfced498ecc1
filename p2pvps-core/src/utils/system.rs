use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::types::DeviceSpecs;
use crate::utils::get_timestamp;

const UNKNOWN: &str = "unknown";

/// Upper bound on `df`; a stale mount must not hold up registration.
const DF_TIMEOUT: Duration = Duration::from_secs(10);

impl DeviceSpecs {
    /// Probe the host for a fresh capability snapshot.
    ///
    /// `disk_path` selects the filesystem whose size is reported. Probes that
    /// fail report `"unknown"`; network speed is not measured.
    pub async fn snapshot(disk_path: &Path) -> Self {
        let memory = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .ok()
            .and_then(|raw| parse_mem_total(&raw))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let processor = tokio::fs::read_to_string("/proc/cpuinfo")
            .await
            .ok()
            .and_then(|raw| parse_processor(&raw))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let disk_space = disk_size(disk_path).await.unwrap_or_else(|| UNKNOWN.to_string());

        DeviceSpecs {
            memory,
            disk_space,
            processor,
            internet_speed: UNKNOWN.to_string(),
            checkin_time_stamp: get_timestamp(),
        }
    }
}

/// `MemTotal` from /proc/meminfo, rendered in MB.
fn parse_mem_total(meminfo: &str) -> Option<String> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(format!("{} MB", kb / 1024))
}

/// CPU model from /proc/cpuinfo. ARM boards report `Model` or `Hardware`
/// instead of `model name`.
fn parse_processor(cpuinfo: &str) -> Option<String> {
    let cores = cpuinfo.lines().filter(|l| l.starts_with("processor")).count();
    let model = ["model name", "Model", "Hardware"].iter().find_map(|key| {
        cpuinfo.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == *key && !v.trim().is_empty()).then(|| v.trim().to_string())
        })
    })?;
    if cores > 1 {
        Some(format!("{} x{}", model, cores))
    } else {
        Some(model)
    }
}

async fn disk_size(path: &Path) -> Option<String> {
    // The output directory may not exist before the first provisioning run.
    let mut probe = Path::new("/");
    for candidate in path.ancestors() {
        if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
            probe = candidate;
            break;
        }
    }
    let df = Command::new("df")
        .args(["-h", "--output=size"])
        .arg(probe)
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(DF_TIMEOUT, df).await.ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    parse_df_size(&String::from_utf8_lossy(&output.stdout))
}

fn parse_df_size(df_output: &str) -> Option<String> {
    df_output
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
