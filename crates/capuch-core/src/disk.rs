//! 限速磁盘队列模型。
//!
//! # 模块定位（Why）
//! - 所有工作者共享一块吞吐固定的“磁盘”；提交的批次不做真实 I/O，只把运行中的完成时钟向后推；
//! - 完成时钟是系统内唯一的无锁共享值，提交方在 CAS 失败时重试而不是阻塞。
//!
//! # 核心机制（How）
//! - 完成时刻以“相对构造时刻的纳秒偏移”存放在 `AtomicU64` 中；
//! - `submit` 通过 `fetch_update` 的比较交换循环推进时钟：每次尝试都重新读取当前时间，
//!   新值为 `max(now, prev) + duration`。输掉竞争的一方基于更新后的尾部重新计算，
//!   累计的服务时长因此不会被少算。
//!
//! # 契约说明（What）
//! - 时钟只会被 `submit` 推后；`reset_to_now` 是运维手段，允许把尾部拉回当前时刻；
//! - `submit` 返回的完成时刻不早于调用时的 `now`。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::telemetry::DiskTelemetry;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// 共享磁盘的完成时钟。
pub struct DiskQueue {
    clock: Arc<dyn Clock>,
    config: SharedConfig,
    epoch: Instant,
    expected_finish: AtomicU64,
}

impl DiskQueue {
    /// 创建空闲的磁盘队列，完成时钟初始化为当前时刻。
    pub fn new(clock: Arc<dyn Clock>, config: SharedConfig) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            config,
            epoch,
            expected_finish: AtomicU64::new(0),
        }
    }

    /// 按当前吞吐计算服务 `count` 个资源所需的时长。
    pub fn service_time(&self, count: usize) -> Duration {
        let per_second = u128::from(self.config.read().disk.consume_per_second.max(1));
        let nanos = (count as u128).saturating_mul(NANOS_PER_SEC) / per_second;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// 提交 `count` 个资源，返回该批次的预计完成时刻。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`count > 0`；为 0 时只返回当前尾部，不推进时钟；
    /// - **后置条件**：返回值 `>= now`，且等于本次成功写入的时钟值。
    pub fn submit(&self, count: usize) -> Instant {
        if count == 0 {
            return self.expected_finish();
        }
        let duration = duration_nanos(self.service_time(count));
        let mut committed = 0;
        // 闭包在每次 CAS 尝试时重新取 now，不缓存。
        let _ = self
            .expected_finish
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |previous| {
                let now = self.offset_of(self.clock.now());
                committed = previous.max(now).saturating_add(duration);
                Some(committed)
            });
        self.epoch + Duration::from_nanos(committed)
    }

    /// 把完成时钟重置为当前时刻（运维 “disk-flush”）。
    pub fn reset_to_now(&self) {
        let now = self.offset_of(self.clock.now());
        self.expected_finish.store(now, Ordering::Release);
    }

    /// 最后一个已接纳批次的预计完成时刻。
    pub fn expected_finish(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.expected_finish.load(Ordering::Acquire))
    }

    /// 剩余排队服务时长，已过期时为零。
    pub fn backlog(&self) -> Duration {
        self.expected_finish()
            .saturating_duration_since(self.clock.now())
    }

    pub fn telemetry(&self) -> DiskTelemetry {
        DiskTelemetry {
            backlog: self.backlog(),
        }
    }

    fn offset_of(&self, instant: Instant) -> u64 {
        duration_nanos(instant.saturating_duration_since(self.epoch))
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use proptest::prelude::*;

    use super::*;
    use crate::clock::{MockClock, SystemClock};
    use crate::config::SimulationConfig;

    fn queue_with(clock: Arc<dyn Clock>, consume_per_second: u64) -> DiskQueue {
        let mut config = SimulationConfig::default();
        config.disk.consume_per_second = consume_per_second;
        DiskQueue::new(clock, config.into_shared())
    }

    #[test]
    fn idle_submissions_queue_behind_each_other() {
        let clock = MockClock::new();
        let disk = queue_with(Arc::new(clock.clone()), 10);
        let now = clock.now();

        assert_eq!(disk.submit(5), now + Duration::from_millis(500));
        assert_eq!(disk.submit(5), now + Duration::from_secs(1));
        assert_eq!(disk.backlog(), Duration::from_secs(1));
    }

    #[test]
    fn idle_queue_restarts_from_now() {
        let clock = MockClock::new();
        let disk = queue_with(Arc::new(clock.clone()), 10);
        disk.submit(10);
        clock.advance(Duration::from_secs(5));
        let now = clock.now();

        assert_eq!(disk.backlog(), Duration::ZERO);
        assert_eq!(disk.submit(1), now + Duration::from_millis(100));
    }

    #[test]
    fn reset_drops_the_queued_tail() {
        let clock = MockClock::new();
        let disk = queue_with(Arc::new(clock.clone()), 1);
        disk.submit(60);
        clock.advance(Duration::from_secs(1));
        assert_eq!(disk.backlog(), Duration::from_secs(59));

        disk.reset_to_now();
        assert_eq!(disk.backlog(), Duration::ZERO);
        assert_eq!(disk.expected_finish(), clock.now());
    }

    #[test]
    fn throughput_change_applies_to_next_submission() {
        let clock = MockClock::new();
        let mut config = SimulationConfig::default();
        config.disk.consume_per_second = 10;
        let shared = config.into_shared();
        let disk = DiskQueue::new(Arc::new(clock.clone()), Arc::clone(&shared));

        assert_eq!(disk.service_time(10), Duration::from_secs(1));
        shared.write().disk.consume_per_second = 20;
        assert_eq!(disk.service_time(10), Duration::from_millis(500));
    }

    #[test]
    fn empty_submission_leaves_idle_clock_alone() {
        let clock = MockClock::new();
        let disk = queue_with(Arc::new(clock.clone()), 10);
        let idle = disk.expected_finish();
        clock.advance(Duration::from_secs(3));

        assert_eq!(disk.submit(0), idle);
        assert_eq!(disk.expected_finish(), idle);
        assert_eq!(disk.backlog(), Duration::ZERO);
    }

    /// 多线程并发提交：累计服务时长不得少算。
    #[test]
    fn concurrent_submissions_never_undercount() {
        let disk = Arc::new(queue_with(Arc::new(SystemClock), 1_000_000));
        let start = Instant::now();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let disk = Arc::clone(&disk);
                thread::spawn(move || {
                    let mut last = Instant::now();
                    for _ in 0..500 {
                        let before = Instant::now();
                        let finish = disk.submit(100);
                        assert!(finish >= before);
                        assert!(finish >= last);
                        last = finish;
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().expect("提交线程不应 panic");
        }
        // 8 * 500 * 100 个资源，每秒 100 万个 => 至少 0.4 秒的累计服务时长。
        assert!(disk.expected_finish() >= start + Duration::from_millis(400));
    }

    proptest! {
        #[test]
        fn completion_clock_is_monotonic(steps in prop::collection::vec((1usize..64, 0u64..2_000), 1..40)) {
            let clock = MockClock::new();
            let disk = queue_with(Arc::new(clock.clone()), 16);
            let mut previous = disk.expected_finish();
            for (count, gap_ms) in steps {
                clock.advance(Duration::from_millis(gap_ms));
                let now = clock.now();
                let finish = disk.submit(count);
                prop_assert!(finish >= now);
                prop_assert!(finish >= previous);
                prop_assert_eq!(finish, disk.expected_finish());
                previous = finish;
            }
        }
    }
}
