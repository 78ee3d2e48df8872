//! `capuch-core`：自适应、按压力加权的缓冲池与限速磁盘队列模拟核心。
//!
//! # 模块定位（Why）
//! - 模拟一类常见的存储引擎结构：多个分片各自持有写缓冲，共享同一条 I/O 通道，
//!   并在背压下自适应地扩大或收缩各自的缓冲份额；
//! - 每个工作者（capuch）按配置速率填充缓冲、攒批、在批满或空闲超时后刷入模拟磁盘，
//!   池按每个工作者的“压力”在工作者之间重新分配有限的缓冲预算。
//!
//! # 结构概览（How）
//! - [`disk`]：共享磁盘的无锁完成时钟；
//! - [`pool`]：互斥保护的空闲链表、`total_pressure` 与配额公式；
//! - [`worker`]：capuch 状态机与自驱轮询循环；
//! - [`simulation`]：三阶段启动、停止与运维入口；
//! - [`config`]、[`clock`]、[`telemetry`]、[`error`]：配置、时间源、只读快照与错误类型。
//!
//! # 非目标（What）
//! - 不做真实磁盘 I/O、不持久化、不涉及网络；资源只是带批次标签的整数 id，没有内容。

pub mod clock;
pub mod config;
pub mod disk;
pub mod error;
pub mod pool;
pub mod resource;
pub mod simulation;
pub mod telemetry;
pub mod worker;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::{DiskConfig, PoolConfig, SharedConfig, SimulationConfig, WorkerConfig};
pub use disk::DiskQueue;
pub use error::{ConfigError, SimulationError};
pub use pool::{QuotaSync, ResourcePool, Share, ShareId, quota_for};
pub use resource::{Holdings, Resource};
pub use simulation::Simulation;
pub use telemetry::{DiskTelemetry, PoolTelemetry, SimulationTelemetry, WorkerTelemetry};
pub use worker::{Worker, WorkerControl, WorkerCounters};
