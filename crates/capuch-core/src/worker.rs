//! capuch 工作者：填充 → 攒批 → 刷盘 → 回收 的状态机与自驱轮询循环。
//!
//! # 模块定位（Why）
//! - 每个工作者独占自己的 free/ready/active 三类容器，只有在与池交换资源或调整 greed 时才加池锁；
//! - greed 的提升对饥饿即时响应（拿不到空闲缓冲立刻加价），下降只在持续空闲（超时）时发生，
//!   避免压力随瞬时抖动来回振荡。
//!
//! # 状态（What）
//! - `IDLE`：未刷盘、无待刷批次；
//! - `BATCHING`：累积中，`flush_ready = false`；
//! - `FLUSH_PENDING`：`flush_ready = true`，尚未提交；
//! - `FLUSHING`：批次已提交磁盘，等待完成。每个工作者同一时刻最多一个在途批次。
//!
//! # 事件（How）
//! - [`Worker::on_ready`]、[`Worker::on_flush_start`]、[`Worker::on_flush_finish`]、
//!   [`Worker::on_timeout`] 由 [`Worker::tick`] 按固定顺序触发；
//! - 事件一旦开始就运行到结束，停止信号只在每轮 tick 开头检查。
//!
//! # 不变量
//! - `ready` 按批次标签非递减，完成回收只摘取标签为 `batch_id - 1` 的连续前缀；
//! - 离开 `on_ready` 时必须持有 `active`，否则视为簿记损坏并 panic。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::disk::DiskQueue;
use crate::pool::{QuotaSync, ResourcePool, ShareId};
use crate::resource::Holdings;
use crate::telemetry::WorkerTelemetry;

/// 工作者与外部（编排层、控制台）之间共享的控制面。
///
/// # 契约说明（What）
/// - `running`：协作式停止标记，每轮 tick 开头检查；
/// - `ready_per_sec`：运维可实时调整的填充速率；
/// - `flush_elapsed`：运维 “disk-flush” 请求，工作者下一轮把已记录的完成时刻视为已到达；
/// - `snapshot`：工作者每轮发布的遥测副本，读取方无锁获取。
#[derive(Debug)]
pub struct WorkerControl {
    running: AtomicBool,
    ready_per_sec: AtomicU32,
    flush_elapsed: AtomicBool,
    snapshot: ArcSwap<WorkerTelemetry>,
}

impl WorkerControl {
    fn new(id: usize, ready_per_sec: u32) -> Self {
        Self {
            running: AtomicBool::new(true),
            ready_per_sec: AtomicU32::new(ready_per_sec),
            flush_elapsed: AtomicBool::new(false),
            snapshot: ArcSwap::from_pointee(WorkerTelemetry {
                id,
                ready_per_sec,
                running: true,
                ..WorkerTelemetry::default()
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 请求轮询循环在下一轮开头退出。
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn ready_per_sec(&self) -> u32 {
        self.ready_per_sec.load(Ordering::Relaxed)
    }

    pub fn set_ready_per_sec(&self, value: u32) {
        self.ready_per_sec.store(value, Ordering::Relaxed);
    }

    /// 标记已记录的刷盘完成时刻为“已到达”。
    pub fn request_flush_elapsed(&self) {
        self.flush_elapsed.store(true, Ordering::Release);
    }

    fn take_flush_elapsed(&self) -> bool {
        self.flush_elapsed.swap(false, Ordering::AcqRel)
    }

    /// 最近一次发布的遥测快照。
    pub fn snapshot(&self) -> Arc<WorkerTelemetry> {
        self.snapshot.load_full()
    }

    fn publish(&self, telemetry: WorkerTelemetry) {
        self.snapshot.store(Arc::new(telemetry));
    }
}

/// 工作者累计计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerCounters {
    pub greed_inc: u64,
    pub greed_dec: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
struct FlushState {
    flush_ready: bool,
    flushing: bool,
    flush_start: Instant,
    flush_finish: Instant,
    last_ready: Instant,
}

impl FlushState {
    fn idle_at(now: Instant) -> Self {
        Self {
            flush_ready: false,
            flushing: false,
            flush_start: now,
            flush_finish: now,
            last_ready: now,
        }
    }
}

/// 单个 capuch 工作者。
pub struct Worker {
    id: ShareId,
    pool: Arc<ResourcePool>,
    disk: Arc<DiskQueue>,
    clock: Arc<dyn Clock>,
    config: SharedConfig,
    control: Arc<WorkerControl>,
    holdings: Holdings,
    batch_size: usize,
    batch_id: u64,
    flush: FlushState,
    counters: WorkerCounters,
}

impl Worker {
    /// 在池中登记份额并创建工作者，greed 为 0，尚未持有任何资源。
    pub fn new(
        pool: Arc<ResourcePool>,
        disk: Arc<DiskQueue>,
        clock: Arc<dyn Clock>,
        config: SharedConfig,
    ) -> Self {
        let defaults = config.read().worker;
        let id = pool.register(defaults.priority);
        let now = clock.now();
        Self {
            id,
            pool,
            disk,
            clock,
            config,
            control: Arc::new(WorkerControl::new(id, defaults.ready_per_sec)),
            holdings: Holdings::default(),
            batch_size: 0,
            batch_id: 0,
            flush: FlushState::idle_at(now),
            counters: WorkerCounters::default(),
        }
    }

    pub fn id(&self) -> ShareId {
        self.id
    }

    pub fn control(&self) -> Arc<WorkerControl> {
        Arc::clone(&self.control)
    }

    pub fn holdings(&self) -> &Holdings {
        &self.holdings
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_flush_ready(&self) -> bool {
        self.flush.flush_ready
    }

    pub fn is_flushing(&self) -> bool {
        self.flush.flushing
    }

    pub fn flush_start(&self) -> Instant {
        self.flush.flush_start
    }

    pub fn flush_finish(&self) -> Instant {
        self.flush.flush_finish
    }

    pub fn counters(&self) -> WorkerCounters {
        self.counters
    }

    pub fn nbufs(&self) -> usize {
        self.holdings.nbufs()
    }

    pub fn quota(&self) -> usize {
        self.pool.quota(self.id)
    }

    pub fn greed(&self) -> u32 {
        self.pool.share(self.id).greed
    }

    pub fn pressure(&self) -> u64 {
        self.pool.share(self.id).pressure()
    }

    /// 启动第一阶段：把 greed 从 0 抬到 `min_greed`，使压力非零。
    pub fn bootstrap_greed(&mut self) {
        self.inc_greed();
    }

    /// 启动第二阶段：同步领取首份配额。
    pub fn sync_initial_quota(&mut self) {
        self.sync_quota();
    }

    fn inc_greed(&mut self) {
        if self.pool.inc_greed(self.id) {
            self.counters.greed_inc += 1;
        }
    }

    fn dec_greed(&mut self) {
        if self.pool.dec_greed(self.id) {
            self.counters.greed_dec += 1;
        }
    }

    /// 比较与同步在同一次加锁内完成，其他工作者的 greed 变化无法插入两者之间。
    fn sync_quota(&mut self) -> Option<QuotaSync> {
        self.pool.sync_if_off_quota(self.id, &mut self.holdings)
    }

    /// 一个缓冲填满。
    ///
    /// # 执行步骤（How）
    /// 1. 把当前 `active` 打上 `batch_id` 标签追加到 `ready`，批次计数加一；
    /// 2. 批次达到 `flush_size` 时置 `flush_ready`；
    /// 3. 依次尝试：本地 free → 提升 greed 后再取 → 同步配额后再取；
    /// 4. 仍然拿不到时从 `ready` 队首抢一个作为新的 `active`，记一次数据丢失并要求立即刷盘；
    /// 5. 持有量与配额不一致时再同步一次。
    pub fn on_ready(&mut self) {
        if let Some(mut rsc) = self.holdings.active.take() {
            rsc.batch_tag = self.batch_id;
            self.holdings.ready.push_back(rsc);
            self.batch_size += 1;
        }

        if self.batch_size >= self.config.read().pool.flush_size {
            self.flush.flush_ready = true;
        }

        let mut next = self.holdings.free.pop_front();
        if next.is_none() {
            self.inc_greed();
            next = self.holdings.free.pop_front();
        }
        if next.is_none() {
            self.sync_quota();
            next = self.holdings.free.pop_front();
        }

        let rsc = match next {
            Some(rsc) => rsc,
            None => {
                let Some(stolen) = self.holdings.ready.pop_front() else {
                    panic!(
                        "worker {} has no free or ready buffer to activate (nbufs = {})",
                        self.id,
                        self.nbufs()
                    );
                };
                self.pool.record_lost();
                self.flush.flush_ready = true;
                warn!(
                    worker = self.id,
                    resource = stolen.id,
                    batch = stolen.batch_tag,
                    "ready buffer reused before flush, batch data lost"
                );
                stolen
            }
        };
        self.holdings.active = Some(rsc);

        self.sync_quota();
        assert!(
            self.holdings.active.is_some(),
            "worker {} left on_ready without an active buffer",
            self.id
        );
    }

    /// 提交当前批次。
    ///
    /// - **前置条件**：未在刷盘、`flush_ready` 为真、`batch_size > 0`；
    /// - `batch_id` 自增后成为下一批次的标签，刚关闭的批次保留旧标签。
    pub fn on_flush_start(&mut self) {
        assert!(!self.flush.flushing, "worker {} already flushing", self.id);
        assert!(self.flush.flush_ready, "worker {} flush not ready", self.id);
        assert!(self.batch_size > 0, "worker {} has an empty batch", self.id);

        self.batch_id += 1;
        self.flush.flush_ready = false;
        self.flush.flushing = true;
        self.flush.flush_start = self.clock.now();
        self.flush.flush_finish = self.disk.submit(self.batch_size);
        debug!(
            worker = self.id,
            batch = self.batch_id - 1,
            size = self.batch_size,
            "flush submitted"
        );
        self.batch_size = 0;
    }

    /// 在途批次完成，回收 `ready` 中属于该批次的连续前缀。
    pub fn on_flush_finish(&mut self) {
        assert!(self.flush.flushing, "worker {} is not flushing", self.id);
        assert!(
            self.clock.now() >= self.flush.flush_finish,
            "worker {} finished a flush before its completion time",
            self.id
        );

        let completed = self.batch_id - 1;
        let mut reclaimed = 0usize;
        while self
            .holdings
            .ready
            .front()
            .is_some_and(|rsc| rsc.batch_tag == completed)
        {
            if let Some(rsc) = self.holdings.ready.pop_front() {
                self.holdings.free.push_back(rsc);
                reclaimed += 1;
            }
        }
        self.flush.flushing = false;
        debug!(worker = self.id, batch = completed, reclaimed, "flush completed");
    }

    /// 持续空闲超时。
    ///
    /// 空闲容量多于在途数据时让出 greed；超额时只收缩不扩张；有残余批次则立即刷出。
    pub fn on_timeout(&mut self) {
        assert!(!self.flush.flushing, "worker {} timed out while flushing", self.id);
        assert!(
            !self.flush.flush_ready,
            "worker {} timed out with a pending flush",
            self.id
        );

        self.counters.timeouts += 1;

        if self.holdings.free_len() > self.holdings.ready_len() {
            self.dec_greed();
        }

        self.pool.shrink_to_quota(self.id, &mut self.holdings);

        if self.batch_size > 0 {
            self.flush.flush_ready = true;
            self.on_flush_start();
        }
    }

    /// 轮询循环的一轮。
    pub fn tick(&mut self) {
        if self.control.take_flush_elapsed() {
            self.flush.flush_finish = self.clock.now();
        }

        let now = self.clock.now();
        let timeout = self.config.read().pool.flush_timeout();

        if !self.flush.flushing
            && !self.flush.flush_ready
            && now > self.flush.flush_finish
            && now - self.flush.flush_finish >= timeout
        {
            self.on_timeout();
        }

        // 只按整秒补发，不足一秒的余数在推进 last_ready 时被合并掉。
        let ready_per_sec = u64::from(self.control.ready_per_sec());
        let due = now
            .saturating_duration_since(self.flush.last_ready)
            .as_secs()
            .saturating_mul(ready_per_sec);
        if due > 0 {
            for _ in 0..due {
                self.on_ready();
            }
            self.flush.last_ready = now;
        } else if ready_per_sec == 0 {
            self.flush.last_ready = now;
        }

        if self.flush.flushing && now >= self.flush.flush_finish {
            self.on_flush_finish();
        }

        // 与上一步独立判断：同一轮内可以先完成再开始。
        if !self.flush.flushing && self.flush.flush_ready {
            self.on_flush_start();
        }

        self.control.publish(self.telemetry());
    }

    /// 自驱轮询循环，直到控制面要求停止。
    pub fn run(mut self) {
        self.flush = FlushState::idle_at(self.clock.now());
        debug!(worker = self.id, nbufs = self.nbufs(), "worker loop started");

        while self.control.is_running() {
            self.tick();
            let tick = self.config.read().worker.tick();
            self.clock.sleep(tick);
        }

        self.control.publish(self.telemetry());
        debug!(worker = self.id, batch = self.batch_id, "worker loop stopped");
    }

    /// 当前状态的值拷贝。
    pub fn telemetry(&self) -> WorkerTelemetry {
        let (share, quota) = self.pool.standing(self.id);
        WorkerTelemetry {
            id: self.id,
            batch_id: self.batch_id,
            batch_size: self.batch_size,
            flush_ready: self.flush.flush_ready,
            flushing: self.flush.flushing,
            greed: share.greed,
            priority: share.priority,
            pressure: share.pressure(),
            quota,
            nbufs: self.holdings.nbufs(),
            free: self.holdings.free_len(),
            ready: self.holdings.ready_len(),
            active: self.holdings.active_id(),
            ready_per_sec: self.control.ready_per_sec(),
            running: self.control.is_running(),
            greed_inc: self.counters.greed_inc,
            greed_dec: self.counters.greed_dec,
            timeouts: self.counters.timeouts,
        }
    }
}
