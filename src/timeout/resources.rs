//! Coarse resource usage sampling for supervised processes.
//!
//! Only Linux exposes the numbers cheaply (through `/proc`); on other
//! platforms sampling returns `None`.

use serde::{Deserialize, Serialize};

/// Point-in-time resource usage of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resident set size in KiB.
    pub rss_kib: Option<u64>,
    /// User + system CPU time in clock ticks.
    pub cpu_ticks: Option<u64>,
}

/// Samples resource usage for `pid`, if the platform allows it.
#[cfg(target_os = "linux")]
pub fn sample(pid: u32) -> Option<ResourceUsage> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok();
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok();

    let rss_kib = status.as_deref().and_then(parse_rss_kib);
    let cpu_ticks = stat.as_deref().and_then(parse_cpu_ticks);

    if rss_kib.is_none() && cpu_ticks.is_none() {
        return None;
    }
    Some(ResourceUsage { rss_kib, cpu_ticks })
}

#[cfg(not(target_os = "linux"))]
pub fn sample(_pid: u32) -> Option<ResourceUsage> {
    None
}

/// Extracts `VmRSS` from the contents of `/proc/<pid>/status`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_rss_kib(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

/// Sums `utime` and `stime` from the contents of `/proc/<pid>/stat`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    // The command name (field 2) may contain spaces; fields are counted from
    // the closing parenthesis, where field 3 (state) is at index 0.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}
