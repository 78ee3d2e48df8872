//! 模拟编排：池、磁盘队列与工作者线程的生命周期。
//!
//! # 模块定位（Why）
//! - 启动分三阶段且顺序不可交换：后一阶段假定前一阶段在单线程下完成；
//!   1. 构造全部工作者并各自抬一次 greed，使每个工作者在计算配额前都有非零压力；
//!   2. 在没有任何轮询线程时依次同步首份配额；
//!   3. 为每个工作者启动独立线程。
//! - 停止时广播停止标记、等待全部线程退出，再释放池与磁盘状态；之后可以重新启动，
//!   每次启动都使用全新的池与磁盘队列。
//!
//! # 运维入口（What）
//! - 按工作者区间设置填充速率与优先级（区间越界时夹到合法范围，空区间为无操作）；
//! - “disk-flush”：磁盘时钟拉回当前时刻，并让每个工作者把在途批次视为已完成；
//! - 按名称修改配置、读取遥测快照。

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{PRIORITY_CEILING, SharedConfig, SimulationConfig};
use crate::disk::DiskQueue;
use crate::error::{ConfigError, SimulationError};
use crate::pool::ResourcePool;
use crate::telemetry::SimulationTelemetry;
use crate::worker::{Worker, WorkerControl};

struct WorkerSlot {
    control: Arc<WorkerControl>,
    handle: Option<JoinHandle<()>>,
}

struct ActiveRun {
    pool: Arc<ResourcePool>,
    disk: Arc<DiskQueue>,
    workers: Vec<WorkerSlot>,
}

impl ActiveRun {
    fn shutdown(self) {
        for slot in &self.workers {
            slot.control.stop();
        }
        for (id, slot) in self.workers.into_iter().enumerate() {
            let Some(handle) = slot.handle else {
                continue;
            };
            if handle.join().is_err() {
                error!(worker = id, "worker thread panicked, its state was discarded");
            }
        }
    }
}

/// 模拟实例。
///
/// `Drop` 时自动停止，保证不会遗留后台线程。
pub struct Simulation {
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    run: Option<ActiveRun>,
}

impl Simulation {
    /// 使用系统时钟创建尚未启动的模拟。
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.into_shared(),
            clock,
            run: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// 当前配置副本。
    pub fn config(&self) -> SimulationConfig {
        *self.config.read()
    }

    /// 按名称修改配置，运行中同样生效，作用于下一次评估。
    pub fn set_config(&self, key: &str, value: i64) -> Result<(), ConfigError> {
        self.config.write().set(key, value)?;
        info!(key, value, "configuration updated");
        Ok(())
    }

    /// 运行中的工作者数量；未运行时为 0。
    pub fn worker_count(&self) -> usize {
        self.run.as_ref().map_or(0, |run| run.workers.len())
    }

    /// 三阶段启动。
    ///
    /// # 契约说明（What）
    /// - 已在运行时返回 [`SimulationError::AlreadyRunning`]，不做任何修改；
    /// - 配置整体校验失败时返回 [`SimulationError::Config`]；
    /// - 某个线程创建失败时停止已启动的线程并返回 [`SimulationError::Spawn`]。
    pub fn start(&mut self) -> Result<(), SimulationError> {
        if self.run.is_some() {
            return Err(SimulationError::AlreadyRunning);
        }
        let config = self.config();
        config.validate()?;

        let pool = Arc::new(ResourcePool::new(Arc::clone(&self.config)));
        let disk = Arc::new(DiskQueue::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.config),
        ));

        let mut workers: Vec<Worker> = (0..config.worker_count)
            .map(|_| {
                let mut worker = Worker::new(
                    Arc::clone(&pool),
                    Arc::clone(&disk),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.config),
                );
                worker.bootstrap_greed();
                worker
            })
            .collect();

        for worker in &mut workers {
            worker.sync_initial_quota();
        }

        let mut run = ActiveRun {
            pool,
            disk,
            workers: Vec::with_capacity(workers.len()),
        };
        for worker in workers {
            let id = worker.id();
            let control = worker.control();
            let spawned = thread::Builder::new()
                .name(format!("capuch-{id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => run.workers.push(WorkerSlot {
                    control,
                    handle: Some(handle),
                }),
                Err(source) => {
                    run.shutdown();
                    return Err(SimulationError::Spawn { worker: id, source });
                }
            }
        }

        info!(
            workers = config.worker_count,
            total_rsc = config.pool.total_rsc,
            consume_per_second = config.disk.consume_per_second,
            "simulation started"
        );
        self.run = Some(run);
        Ok(())
    }

    /// 停止全部工作者并释放状态；未运行时为无操作。
    pub fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            let workers = run.workers.len();
            run.shutdown();
            info!(workers, "simulation stopped");
        }
    }

    /// 设置区间内工作者的填充速率，返回受影响的工作者数量。
    pub fn set_ready_per_sec(
        &self,
        first: i64,
        last: i64,
        ready_per_sec: u32,
    ) -> Result<usize, SimulationError> {
        let run = self.run.as_ref().ok_or(SimulationError::NotRunning)?;
        let Some((first, last)) = clamp_range(first, last, run.workers.len()) else {
            return Ok(0);
        };
        for slot in &run.workers[first..=last] {
            slot.control.set_ready_per_sec(ready_per_sec);
        }
        Ok(last - first + 1)
    }

    /// 设置区间内工作者的优先级，经由池锁同步修正 `total_pressure`。
    pub fn set_priority(
        &self,
        first: i64,
        last: i64,
        priority: i64,
    ) -> Result<usize, SimulationError> {
        let run = self.run.as_ref().ok_or(SimulationError::NotRunning)?;
        if !(1..=i64::from(PRIORITY_CEILING)).contains(&priority) {
            return Err(ConfigError::OutOfRange {
                key: "priority",
                value: priority,
                min: 1,
                max: i64::from(PRIORITY_CEILING),
            }
            .into());
        }
        let Some((first, last)) = clamp_range(first, last, run.workers.len()) else {
            return Ok(0);
        };
        for id in first..=last {
            run.pool.set_priority(id, priority as u32);
        }
        Ok(last - first + 1)
    }

    /// 运维 “disk-flush”：跳过全部剩余的模拟服务时长。
    pub fn force_disk_flush(&self) -> Result<(), SimulationError> {
        let run = self.run.as_ref().ok_or(SimulationError::NotRunning)?;
        run.disk.reset_to_now();
        for slot in &run.workers {
            slot.control.request_flush_elapsed();
        }
        info!("disk queue flushed by operator");
        Ok(())
    }

    /// 运行中模拟的遥测快照；未运行时为 `None`。
    ///
    /// 工作者私有字段取自其最近一次发布的快照，greed/priority/配额实时读取池中的份额。
    pub fn telemetry(&self) -> Option<SimulationTelemetry> {
        let run = self.run.as_ref()?;
        let workers = run
            .workers
            .iter()
            .map(|slot| {
                let mut snapshot = (*slot.control.snapshot()).clone();
                let (share, quota) = run.pool.standing(snapshot.id);
                snapshot.greed = share.greed;
                snapshot.priority = share.priority;
                snapshot.pressure = share.pressure();
                snapshot.quota = quota;
                snapshot.ready_per_sec = slot.control.ready_per_sec();
                snapshot
            })
            .collect();
        Some(SimulationTelemetry {
            pool: run.pool.telemetry(),
            disk: run.disk.telemetry(),
            workers,
        })
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 把运维给出的闭区间夹到 `[0, len - 1]`，结果为空时返回 `None`。
fn clamp_range(first: i64, last: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let first = first.max(0);
    let last = last.min(len as i64 - 1);
    (first <= last).then(|| (first as usize, last as usize))
}
