use serde::{Deserialize, Serialize};

/// Point-in-time heap-pressure snapshot exposed on the health surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub used_mb: f64,
    pub total_mb: f64,
    /// used/total; 0.0 when the platform gives us nothing.
    pub ratio: f64,
    pub threshold: f64,
    pub is_under_pressure: bool,
}

impl MemorySnapshot {
    pub fn sample(threshold: f64) -> Self {
        let (used_kb, total_kb) = read_rss_and_total();
        let used_mb = used_kb as f64 / 1024.0;
        let total_mb = total_kb as f64 / 1024.0;
        let ratio = if total_kb > 0 {
            used_kb as f64 / total_kb as f64
        } else {
            0.0
        };
        Self {
            used_mb,
            total_mb,
            ratio,
            threshold,
            is_under_pressure: ratio >= threshold,
        }
    }
}

/// (VmRSS kB, MemTotal kB). Linux: /proc/self/status and /proc/meminfo.
/// Other platforms report zeros, which never trips the pressure check.
#[cfg(target_os = "linux")]
fn read_rss_and_total() -> (u64, u64) {
    let rss = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| parse_kb_line(&s, "VmRSS:"))
        .unwrap_or(0);
    let total = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| parse_kb_line(&s, "MemTotal:"))
        .unwrap_or(0);
    (rss, total)
}

#[cfg(not(target_os = "linux"))]
fn read_rss_and_total() -> (u64, u64) {
    (0, 0)
}

#[allow(dead_code)]
fn parse_kb_line(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find(|l| l.starts_with(key))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u64>().ok())
}
