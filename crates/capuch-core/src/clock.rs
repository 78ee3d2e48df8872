//! 可注入时钟：磁盘队列、工作者轮询循环与模拟编排共用的单调时间来源。
//!
//! # 模块定位（Why）
//! - 磁盘完成时刻、刷盘超时与 `on_ready` 补发次数全部由“当前时间”推导；若直接调用
//!   [`Instant::now`]，测试只能依赖真实睡眠，结果既慢又不可复现。
//! - 通过 [`Clock`] trait 注入时间源，生产路径使用 [`SystemClock`]，测试路径使用
//!   [`MockClock`] 手动推进时间。
//!
//! # 结构概览（What）
//! - [`Clock`]：`now` 与阻塞式 `sleep` 两个原语；
//! - [`SystemClock`]：委托给标准库；
//! - [`MockClock`]：虚拟时间，`advance` 与 `sleep` 都只推进偏移量，不会真正阻塞线程。

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 抽象可注入的时钟。
///
/// # 接口约束（What）
/// - `now`：返回单调时间点，实现者必须保证多次调用结果不递减；
/// - `sleep`：让调用线程（或虚拟时间）至少经过 `duration`。
///
/// # 使用指引（How）
/// - 以 `Arc<dyn Clock>` 在组件之间共享；
/// - 测试中注入 [`MockClock`]，通过 [`MockClock::advance`] 驱动超时与磁盘完成事件。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> Instant;

    /// 等待指定时长。
    fn sleep(&self, duration: Duration);
}

/// 基于标准库的系统时钟。
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 虚拟时钟：通过手动推进时间在测试中复现确定性的事件序列。
///
/// # 行为概览（How）
/// - 记录构造时刻作为基准 `origin`，内部只维护累计偏移 `elapsed`；
/// - [`MockClock::advance`] 与 [`Clock::sleep`] 都只增加偏移量，调用线程不会被阻塞，
///   因此在虚拟时钟下运行的轮询循环会按 tick 间隔“跳跃式”前进。
///
/// # 契约说明（What）
/// - 克隆体共享同一时间轴；
/// - 偏移量单调增加，`now()` 永远不会回退。
#[derive(Clone, Debug)]
pub struct MockClock {
    inner: Arc<MockClockInner>,
}

#[derive(Debug)]
struct MockClockInner {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl MockClock {
    /// 创建起始时间为当前系统时间的虚拟时钟。
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    /// 以指定起始时间构造虚拟时钟，便于在测试中固定初始偏移。
    pub fn with_start(origin: Instant) -> Self {
        Self {
            inner: Arc::new(MockClockInner {
                origin,
                elapsed: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// 手动推进虚拟时钟。
    pub fn advance(&self, delta: Duration) {
        if delta.is_zero() {
            return;
        }
        let mut elapsed = self.inner.elapsed.lock();
        *elapsed = elapsed.saturating_add(delta);
    }

    /// 返回自起始时间以来的虚拟时间偏移。
    pub fn elapsed(&self) -> Duration {
        *self.inner.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.inner.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_monotonically() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        clock.advance(Duration::ZERO);
        assert_eq!(clock.now() - start, Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn mock_clock_sleep_moves_virtual_time_only() {
        let clock = MockClock::new();
        let shared = clock.clone();
        let before = Instant::now();
        shared.sleep(Duration::from_secs(3600));
        assert!(before.elapsed() < Duration::from_secs(1), "虚拟睡眠不应阻塞线程");
        assert_eq!(clock.elapsed(), Duration::from_secs(3600));
    }
}
