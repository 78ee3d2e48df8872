//! 文本面板渲染：全局统计、配置表与工作者三张表（状态 / 设置 / 计数）。
//!
//! 列宽固定，便于在终端里逐轮对比；批次号以十六进制显示，`act` 列在没有活动缓冲时显示 `-1`。

use std::fmt::Write as _;

use capuch_core::{SimulationConfig, SimulationTelemetry};

/// 全局统计面板。
pub fn global_stats(telemetry: Option<&SimulationTelemetry>) -> String {
    let Some(telemetry) = telemetry else {
        return "Simulation not running\n".to_owned();
    };
    let pool = &telemetry.pool;
    let mut out = String::new();
    let _ = writeln!(out, "Simulation is running");
    let _ = writeln!(
        out,
        "Disk write queue(millis)={}",
        telemetry.disk.backlog.as_millis()
    );
    let _ = writeln!(out, "Total pressure={}", pool.total_pressure);
    let _ = writeln!(out, "Total free={}", pool.free);
    let _ = writeln!(out, "Locks taken={}", pool.locks_taken);
    let _ = writeln!(out, "Buffers lost={}", pool.bufs_lost);
    out
}

/// 配置面板：每个可修改键一行。
pub fn global_conf(config: &SimulationConfig) -> String {
    let mut out = String::new();
    for (key, value) in config.entries() {
        let _ = writeln!(out, "{key}: {value}");
    }
    out
}

/// 工作者面板。
pub fn capuch_view(telemetry: Option<&SimulationTelemetry>) -> String {
    let Some(telemetry) = telemetry else {
        return "Simulation not running\n".to_owned();
    };
    let mut out = String::new();

    let _ = writeln!(out, "State");
    let _ = writeln!(
        out,
        "{:>3}{:>9}{:>5}{:>5}{:>4}{:>12}{:>6}{:>6}{:>5}{:>5}{:>5}",
        "N", "BID", "frdy", "f-ng", "gr", "prs", "qta", "nbf", "free", "rdy", "act"
    );
    for worker in &telemetry.workers {
        let active = worker.active.map_or(-1, i64::from);
        let _ = writeln!(
            out,
            "{:>3}{:>9x}{:>5}{:>5}{:>4}{:>12}{:>6}{:>6}{:>5}{:>5}{:>5}",
            worker.id,
            worker.batch_id,
            u8::from(worker.flush_ready),
            u8::from(worker.flushing),
            worker.greed,
            worker.pressure,
            worker.quota,
            worker.nbufs,
            worker.free,
            worker.ready,
            active
        );
    }

    let _ = writeln!(out, "Settings");
    let _ = writeln!(out, "{:>3}{:>4}{:>5}{:>8}", "N", "run", "rps", "pri");
    for worker in &telemetry.workers {
        let _ = writeln!(
            out,
            "{:>3}{:>4}{:>5}{:>8}",
            worker.id,
            u8::from(worker.running),
            worker.ready_per_sec,
            worker.priority
        );
    }

    let _ = writeln!(out, "Stats");
    let _ = writeln!(out, "{:>3}{:>7}{:>7}{:>7}", "N", "greed+", "greed-", "t-outs");
    for worker in &telemetry.workers {
        let _ = writeln!(
            out,
            "{:>3}{:>7}{:>7}{:>7}",
            worker.id, worker.greed_inc, worker.greed_dec, worker.timeouts
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use capuch_core::{DiskTelemetry, PoolTelemetry, WorkerTelemetry};

    use super::*;

    fn sample() -> SimulationTelemetry {
        SimulationTelemetry {
            pool: PoolTelemetry {
                capacity: 40,
                total_pressure: 60,
                free: 3,
                locks_taken: 17,
                bufs_lost: 2,
            },
            disk: DiskTelemetry {
                backlog: Duration::from_millis(1_250),
            },
            workers: vec![WorkerTelemetry {
                id: 0,
                batch_id: 255,
                greed: 2,
                priority: 10,
                pressure: 40,
                quota: 12,
                nbufs: 12,
                free: 4,
                ready: 7,
                active: None,
                ready_per_sec: 3,
                running: true,
                greed_inc: 5,
                ..WorkerTelemetry::default()
            }],
        }
    }

    #[test]
    fn stopped_simulation_renders_placeholder() {
        assert_eq!(global_stats(None), "Simulation not running\n");
        assert_eq!(capuch_view(None), "Simulation not running\n");
    }

    #[test]
    fn global_stats_lists_pool_and_disk_figures() {
        let text = global_stats(Some(&sample()));
        assert!(text.contains("Disk write queue(millis)=1250"));
        assert!(text.contains("Total pressure=60"));
        assert!(text.contains("Buffers lost=2"));
    }

    #[test]
    fn worker_rows_use_hex_batch_ids_and_missing_active() {
        let text = capuch_view(Some(&sample()));
        let row = text
            .lines()
            .nth(2)
            .expect("state table has a row per worker");
        let columns: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(columns[1], "ff");
        assert_eq!(columns.last().copied(), Some("-1"));
        assert!(text.contains("Settings"));
        assert!(text.contains("Stats"));
    }

    #[test]
    fn conf_panel_lists_every_key() {
        let text = global_conf(&SimulationConfig::default());
        assert!(text.contains("conf.ncapuch: 12"));
        assert!(text.contains("pool_conf.total_rsc: 1000"));
        assert_eq!(text.lines().count(), capuch_core::config::CONFIG_KEYS.len());
    }
}
