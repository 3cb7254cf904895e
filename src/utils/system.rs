// src/utils/system.rs: System functions

use std::time::Duration;

use anyhow::Result;
use log::warn;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::time::sleep;


/// Determines number of cores that can be used by concurrently running stages
///
/// # Arguments
///
/// * `args_threads` - Core budget requested on the command line.
///
/// # Returns
///
/// Result<(usize, f32)> usable cores, current cpu usage
pub async fn detect_cores_and_load(args_threads: usize) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_usage();
    // Usage is a delta between two refreshes
    sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(100))).await;
    system.refresh_cpu_usage();

    let logical_cores = system.cpus().len().max(1);
    let cpu_load = system.global_cpu_usage();
    let max_cores = clamp_cores(args_threads, logical_cores);

    if args_threads > logical_cores {
        warn!(
            "Requested {} threads but only {} logical cores are available; using {}",
            args_threads, logical_cores, max_cores
        );
    }
    if cpu_load > 80.0 {
        warn!("CPU load is already {:.0}%; stages may run slower than usual", cpu_load);
    }
    Ok((max_cores, cpu_load))
}


/// Core budget: at least one, never more than the machine has.
pub fn clamp_cores(requested: usize, available: usize) -> usize {
    requested.min(available.max(1)).max(1)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_cores() {
        assert_eq!(clamp_cores(8, 4), 4);
        assert_eq!(clamp_cores(2, 16), 2);
        assert_eq!(clamp_cores(0, 16), 1);
        assert_eq!(clamp_cores(4, 0), 1);
    }

    #[tokio::test]
    async fn test_detect_cores_is_bounded() -> Result<()> {
        let (cores, load) = detect_cores_and_load(1).await?;
        assert_eq!(cores, 1);
        assert!(load >= 0.0);
        Ok(())
    }
}
