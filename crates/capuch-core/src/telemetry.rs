//! 只读遥测快照。
//!
//! 所有类型都是值拷贝：工作者每轮把自己的私有状态复制一份发布出去，
//! 展示层读取快照而不触碰工作者的链表，读到的是最终一致的视图。

use std::time::Duration;

use serde::Serialize;

/// 单个工作者的状态快照。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerTelemetry {
    pub id: usize,
    pub batch_id: u64,
    pub batch_size: usize,
    pub flush_ready: bool,
    pub flushing: bool,
    pub greed: u32,
    pub priority: u32,
    pub pressure: u64,
    pub quota: usize,
    pub nbufs: usize,
    pub free: usize,
    pub ready: usize,
    pub active: Option<u32>,
    pub ready_per_sec: u32,
    pub running: bool,
    pub greed_inc: u64,
    pub greed_dec: u64,
    pub timeouts: u64,
}

/// 缓冲池全局指标。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolTelemetry {
    pub capacity: usize,
    pub total_pressure: u64,
    pub free: usize,
    pub locks_taken: u64,
    pub bufs_lost: u64,
}

/// 磁盘队列指标。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiskTelemetry {
    /// 剩余排队服务时长，已过期时为零。
    pub backlog: Duration,
}

/// 运行中模拟的完整快照。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SimulationTelemetry {
    pub pool: PoolTelemetry,
    pub disk: DiskTelemetry,
    pub workers: Vec<WorkerTelemetry>,
}
