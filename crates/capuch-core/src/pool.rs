//! 压力加权的共享资源池。
//!
//! # 模块角色（Why）
//! - 持有有限的资源槽集合，按每个工作者的“压力”占比把容量（扣除预留）分给各工作者；
//! - 工作者在饥饿时提高 greed、空闲时降低 greed，池据此重新划分配额，形成闭环。
//!
//! # 核心机制（How）
//! - 一把 `parking_lot::Mutex` 同时保护空闲链表、`total_pressure` 以及每个工作者的
//!   `greed`/`priority`（[`Share`]）。修改 greed 或 priority 时在同一临界区内先减去旧贡献、
//!   再加上新贡献，`total_pressure` 因而始终等于所有 `greed > 0` 工作者压力之和；
//! - 配额计算读取临界区内的一致快照，配额同步在同一次加锁内完成链表搬移，
//!   锁内只做 O(批量) 的链表操作，从不等待磁盘。
//!
//! # 契约说明（What）
//! - `pressure = 2^greed * priority`；
//! - `quota = 0`（`total_pressure == 0`），否则
//!   `max(min_bufs, pressure * (total_rsc - reserve) / total_pressure)`；
//! - `sync_quota` 只能在 `nbufs != quota` 时调用，超额却无可归还资源属于不变量破坏，直接 panic。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::config::{PoolConfig, SharedConfig};
use crate::resource::{Holdings, Resource};
use crate::telemetry::PoolTelemetry;

/// 工作者在池中的份额登记号。
pub type ShareId = usize;

/// 工作者的 greed 与 priority。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Share {
    pub greed: u32,
    pub priority: u32,
}

impl Share {
    /// `2^greed * priority`。
    pub fn pressure(&self) -> u64 {
        1u64.checked_shl(self.greed)
            .unwrap_or(u64::MAX)
            .saturating_mul(u64::from(self.priority))
    }

    /// 计入 `total_pressure` 的部分：greed 为 0 的工作者不参与。
    fn contribution(&self) -> u64 {
        if self.greed > 0 { self.pressure() } else { 0 }
    }
}

/// 纯函数形式的配额公式。
pub fn quota_for(pressure: u64, total_pressure: u64, config: &PoolConfig) -> usize {
    if total_pressure == 0 {
        return 0;
    }
    let share = u128::from(pressure) * config.distributable() as u128 / u128::from(total_pressure);
    let share = usize::try_from(share).unwrap_or(usize::MAX);
    share.max(config.min_bufs)
}

/// 一次配额同步的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaSync {
    /// 超额，归还了若干资源。
    Returned(usize),
    /// 不足，从池中领取了若干资源；`starved` 表示池已耗尽而未补足。
    Granted { granted: usize, starved: bool },
}

struct PoolState {
    free: VecDeque<Resource>,
    total_pressure: u64,
    shares: Vec<Share>,
}

/// 所有工作者共享的资源池。
pub struct ResourcePool {
    capacity: usize,
    config: SharedConfig,
    state: Mutex<PoolState>,
    locks_taken: AtomicU64,
    bufs_lost: AtomicU64,
}

impl ResourcePool {
    /// 按当前配置的 `total_rsc` 预先填充空闲链表。
    pub fn new(config: SharedConfig) -> Self {
        let capacity = config.read().pool.total_rsc;
        let free = (0..capacity)
            .map(|id| Resource::new(u32::try_from(id).unwrap_or(u32::MAX)))
            .collect();
        Self {
            capacity,
            config,
            state: Mutex::new(PoolState {
                free,
                total_pressure: 0,
                shares: Vec::new(),
            }),
            locks_taken: AtomicU64::new(0),
            bufs_lost: AtomicU64::new(0),
        }
    }

    /// 池创建时的资源总数。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 为新工作者登记份额，初始 greed 为 0，不贡献压力。
    pub fn register(&self, priority: u32) -> ShareId {
        let mut state = self.state.lock();
        state.shares.push(Share { greed: 0, priority });
        state.shares.len() - 1
    }

    /// 获取池锁，计入 `locks_taken`。
    pub fn lock(&self) -> PoolGuard<'_> {
        let config = self.config.read().pool;
        let state = self.state.lock();
        self.locks_taken.fetch_add(1, Ordering::Relaxed);
        PoolGuard { state, config }
    }

    /// 提高 greed；已达上限时返回 `false` 且不做任何修改。
    pub fn inc_greed(&self, id: ShareId) -> bool {
        self.lock().inc_greed(id)
    }

    /// 降低 greed；已达下限时返回 `false` 且不做任何修改。
    pub fn dec_greed(&self, id: ShareId) -> bool {
        self.lock().dec_greed(id)
    }

    pub fn set_priority(&self, id: ShareId, priority: u32) {
        self.lock().set_priority(id, priority);
    }

    /// 读取某工作者的份额，不计入 `locks_taken`。
    pub fn share(&self, id: ShareId) -> Share {
        self.state.lock().shares[id]
    }

    /// 基于一致快照计算配额，不计入 `locks_taken`。
    pub fn quota(&self, id: ShareId) -> usize {
        let config = self.config.read().pool;
        let state = self.state.lock();
        quota_for(state.shares[id].pressure(), state.total_pressure, &config)
    }

    /// 一次加锁同时读取份额与配额，供遥测使用，不计入 `locks_taken`。
    pub fn standing(&self, id: ShareId) -> (Share, usize) {
        let config = self.config.read().pool;
        let state = self.state.lock();
        let share = state.shares[id];
        (share, quota_for(share.pressure(), state.total_pressure, &config))
    }

    /// 配额同步，见 [`PoolGuard::sync_quota`]。
    pub fn sync_quota(&self, id: ShareId, holdings: &mut Holdings) -> QuotaSync {
        self.lock().sync_quota(id, holdings)
    }

    /// 同一临界区内比较并同步，见 [`PoolGuard::sync_if_off_quota`]。
    pub fn sync_if_off_quota(&self, id: ShareId, holdings: &mut Holdings) -> Option<QuotaSync> {
        self.lock().sync_if_off_quota(id, holdings)
    }

    /// 同一临界区内只收缩不扩张，见 [`PoolGuard::shrink_to_quota`]。
    pub fn shrink_to_quota(&self, id: ShareId, holdings: &mut Holdings) -> Option<QuotaSync> {
        self.lock().shrink_to_quota(id, holdings)
    }

    /// 记录一次工作者被迫复用未刷盘缓冲的数据丢失。
    pub fn record_lost(&self) {
        self.bufs_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_pressure(&self) -> u64 {
        self.state.lock().total_pressure
    }

    /// 按份额表重新求和，用于核对 `total_pressure`。
    pub fn recomputed_pressure(&self) -> u64 {
        self.state
            .lock()
            .shares
            .iter()
            .map(Share::contribution)
            .sum()
    }

    /// 池空闲链表中资源 id，仅供诊断与测试。
    pub fn free_ids(&self) -> Vec<u32> {
        self.state.lock().free.iter().map(|rsc| rsc.id).collect()
    }

    pub fn telemetry(&self) -> PoolTelemetry {
        let (total_pressure, free) = {
            let state = self.state.lock();
            (state.total_pressure, state.free.len())
        };
        PoolTelemetry {
            capacity: self.capacity,
            total_pressure,
            free,
            locks_taken: self.locks_taken.load(Ordering::Relaxed),
            bufs_lost: self.bufs_lost.load(Ordering::Relaxed),
        }
    }
}

/// 持有池锁期间可执行的原语。
///
/// 守卫在加锁时复制一份池配置，整段临界区使用同一份参数。
pub struct PoolGuard<'a> {
    state: MutexGuard<'a, PoolState>,
    config: PoolConfig,
}

impl PoolGuard<'_> {
    pub fn total_pressure(&self) -> u64 {
        self.state.total_pressure
    }

    pub fn free_len(&self) -> usize {
        self.state.free.len()
    }

    pub fn share(&self, id: ShareId) -> Share {
        self.state.shares[id]
    }

    pub fn quota(&self, id: ShareId) -> usize {
        quota_for(
            self.state.shares[id].pressure(),
            self.state.total_pressure,
            &self.config,
        )
    }

    pub fn inc_greed(&mut self, id: ShareId) -> bool {
        let (min, max) = (self.config.min_greed, self.config.max_greed);
        let current = self.state.shares[id].greed;
        if current >= max {
            return false;
        }
        self.update_share(id, |share| share.greed = (current + 1).max(min));
        trace!(worker = id, greed = self.state.shares[id].greed, "greed raised");
        true
    }

    pub fn dec_greed(&mut self, id: ShareId) -> bool {
        let (min, max) = (self.config.min_greed, self.config.max_greed);
        let current = self.state.shares[id].greed;
        if current <= min {
            return false;
        }
        self.update_share(id, |share| share.greed = (current - 1).min(max));
        trace!(worker = id, greed = self.state.shares[id].greed, "greed lowered");
        true
    }

    pub fn set_priority(&mut self, id: ShareId, priority: u32) {
        self.update_share(id, |share| share.priority = priority);
    }

    /// 让工作者持有量向配额收敛。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`holdings.nbufs() != quota`，否则 panic；
    /// - 超额：依次从工作者 free、ready 队首归还，直到恰好等于配额；无可归还资源时 panic；
    /// - 不足：从池中逐个领取到工作者 free，池耗尽时静默停止并报告 `starved`。
    pub fn sync_quota(&mut self, id: ShareId, holdings: &mut Holdings) -> QuotaSync {
        let quota = self.quota(id);
        let nbufs = holdings.nbufs();
        assert_ne!(
            nbufs, quota,
            "sync_quota called for worker {id} already at quota"
        );

        if nbufs > quota {
            let excess = nbufs - quota;
            for _ in 0..excess {
                let Some(rsc) = holdings.pop_returnable() else {
                    panic!(
                        "worker {id} holds {} buffers over quota {quota} with nothing returnable",
                        holdings.nbufs()
                    );
                };
                self.state.free.push_back(rsc);
            }
            debug!(worker = id, quota, returned = excess, "quota shrunk");
            QuotaSync::Returned(excess)
        } else {
            let wanted = quota - nbufs;
            let mut granted = 0;
            while granted < wanted {
                let Some(rsc) = self.state.free.pop_front() else {
                    break;
                };
                holdings.free.push_back(rsc);
                granted += 1;
            }
            let starved = granted < wanted;
            debug!(worker = id, quota, granted, starved, "quota grown");
            QuotaSync::Granted { granted, starved }
        }
    }

    /// 持有量与配额不一致时同步；比较与搬移使用同一份 `total_pressure`。
    pub fn sync_if_off_quota(&mut self, id: ShareId, holdings: &mut Holdings) -> Option<QuotaSync> {
        if holdings.nbufs() == self.quota(id) {
            return None;
        }
        Some(self.sync_quota(id, holdings))
    }

    /// 仅在超额时归还，配额高于持有量时不领取。
    pub fn shrink_to_quota(&mut self, id: ShareId, holdings: &mut Holdings) -> Option<QuotaSync> {
        if holdings.nbufs() <= self.quota(id) {
            return None;
        }
        Some(self.sync_quota(id, holdings))
    }

    fn update_share(&mut self, id: ShareId, mutate: impl FnOnce(&mut Share)) {
        let state = &mut *self.state;
        let share = &mut state.shares[id];
        state.total_pressure -= share.contribution();
        mutate(share);
        state.total_pressure += share.contribution();
    }
}
