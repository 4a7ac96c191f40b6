//! OS-level statistics for supervised processes.
//!
//! CPU, memory and command line come from a shared `sysinfo` system handle.
//! Network counters are read from `/proc/<pid>/net/dev`; the active socket
//! count prefers `ss`, falls back to `netstat`, then to counting socket file
//! descriptors. Every probe degrades to zero instead of failing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::ProcessStats;

const TOOL_TIMEOUT: Duration = Duration::from_secs(3);

/// Collects process statistics against a shared system snapshot.
#[derive(Clone)]
pub struct ProcessStatsCollector {
    system: Arc<RwLock<System>>,
}

impl Default for ProcessStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStatsCollector {
    pub fn new() -> Self {
        Self {
            system: Arc::new(RwLock::new(System::new())),
        }
    }

    /// Stats for a pid; all fields default to zero when probing fails.
    pub async fn stats_for(&self, pid: u32) -> ProcessStats {
        let mut stats = ProcessStats {
            pid,
            ..ProcessStats::default()
        };

        {
            let mut system = self.system.write().await;
            system.refresh_memory();
            if system.refresh_process(Pid::from_u32(pid)) {
                if let Some(process) = system.process(Pid::from_u32(pid)) {
                    stats.elapsed_seconds = process.run_time();
                    stats.cpu_percent = process.cpu_usage();
                    let total = system.total_memory();
                    if total > 0 {
                        stats.memory_percent =
                            (process.memory() as f64 / total as f64 * 100.0) as f32;
                    }
                    stats.command = process.cmd().join(" ");
                }
            }
        }

        let (rx, tx) = net_counters(pid).await;
        stats.rx_bytes = rx;
        stats.tx_bytes = tx;
        stats.connections = connection_count(pid).await;

        stats
    }
}

/// Aggregate rx/tx byte counters over the process's network namespace,
/// excluding loopback.
async fn net_counters(pid: u32) -> (u64, u64) {
    let path = format!("/proc/{pid}/net/dev");
    let Ok(content) = tokio::fs::read_to_string(&path).await else {
        return (0, 0);
    };
    parse_net_dev(&content)
}

fn parse_net_dev(content: &str) -> (u64, u64) {
    let mut rx_total = 0u64;
    let mut tx_total = 0u64;

    for line in content.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // receive bytes is the first column, transmit bytes the ninth
        if fields.len() >= 9 {
            rx_total += fields[0].parse::<u64>().unwrap_or(0);
            tx_total += fields[8].parse::<u64>().unwrap_or(0);
        }
    }

    (rx_total, tx_total)
}

/// Count of sockets owned by the process. Prefers modern tooling and walks
/// down to fd enumeration when nothing else is present.
async fn connection_count(pid: u32) -> u32 {
    if let Some(output) = run_tool("ss", &["-tunp"]).await {
        let marker = format!("pid={pid},");
        return output.lines().filter(|l| l.contains(&marker)).count() as u32;
    }

    if let Some(output) = run_tool("netstat", &["-tunp"]).await {
        let marker = format!("{pid}/");
        return output.lines().filter(|l| l.contains(&marker)).count() as u32;
    }

    socket_fd_count(pid).await
}

async fn socket_fd_count(pid: u32) -> u32 {
    let path = format!("/proc/{pid}/fd");
    if !Path::new(&path).exists() {
        return 0;
    }
    let Ok(mut entries) = tokio::fs::read_dir(&path).await else {
        return 0;
    };
    let mut count = 0u32;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(target) = tokio::fs::read_link(entry.path()).await {
            if target.to_string_lossy().starts_with("socket:") {
                count += 1;
            }
        }
    }
    count
}

async fn run_tool(program: &str, args: &[&str]) -> Option<String> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    cmd.stdin(std::process::Stdio::null());

    match tokio::time::timeout(TOOL_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(_)) | Ok(Err(_)) => None,
        Err(_) => {
            debug!("{program} timed out after {TOOL_TIMEOUT:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_net_dev_sums_interfaces_without_loopback() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9999999     100    0    0    0     0          0         0  9999999     100    0    0    0     0       0          0
  eth0: 1000000     800    0    0    0     0          0         0   500000     700    0    0    0     0       0          0
  eth1:  250000     200    0    0    0     0          0         0    50000     100    0    0    0     0       0          0
";
        let (rx, tx) = parse_net_dev(content);
        assert_eq!(rx, 1_250_000);
        assert_eq!(tx, 550_000);
    }

    #[tokio::test]
    async fn test_stats_default_to_zero_for_dead_pid() {
        let collector = ProcessStatsCollector::new();
        // pid_max on Linux tops out well below this value
        let stats = collector.stats_for(4_000_000).await;
        assert_eq!(stats.cpu_percent, 0.0);
        assert_eq!(stats.rx_bytes, 0);
        assert_eq!(stats.tx_bytes, 0);
        assert_eq!(stats.elapsed_seconds, 0);
    }
}
