//! 模拟配置：构造期默认值、TOML 加载与运行时按名称修改。
//!
//! # 模块定位（Why）
//! - 运维人员需要在模拟运行中直接调整池容量、刷盘阈值、磁盘吞吐等参数，
//!   因此所有字段既可从 TOML 读取，也可通过稳定的字符串键逐项修改；
//! - 池、磁盘队列与工作者在每次评估时读取一份配置副本，修改在下一次评估时生效，
//!   不会回溯已经做出的决策。
//!
//! # 契约说明（What）
//! - [`SimulationConfig::set`] 先在副本上修改并执行 [`SimulationConfig::validate`]，
//!   校验通过才提交，失败时原配置保持不变；
//! - 校验边界保证：每个工作者启动时至少拿到 `min_bufs >= 1` 个缓冲、`total_pressure`
//!   不会溢出 `u64`，从而让工作者状态机中的致命断言在合法输入下不可达。

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 多个组件共享的实时配置句柄。
pub type SharedConfig = Arc<RwLock<SimulationConfig>>;

/// greed 上限：`2^24 * 1_000_000 * 4096` 仍在 `u64` 内。
pub const GREED_CEILING: u32 = 24;
/// 单个工作者允许的最大优先级。
pub const PRIORITY_CEILING: u32 = 1_000_000;
/// 最大工作者数量。
pub const WORKER_CEILING: usize = 4096;

/// 缓冲池与刷盘策略参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 池中资源槽总数，仅在下一次 `start` 时决定池的实际规模。
    pub total_rsc: usize,
    /// 累积多少个就绪缓冲后触发刷盘。
    pub flush_size: usize,
    /// 空闲多久（自上次刷盘完成起）触发 `on_timeout`。
    pub flush_timeout_ns: u64,
    pub min_greed: u32,
    pub max_greed: u32,
    /// 每个活跃工作者配额的下限。
    pub min_bufs: usize,
    /// 不参与配额分配的预留容量。
    pub reserve: usize,
}

impl PoolConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_nanos(self.flush_timeout_ns)
    }

    /// 参与按压力分配的容量：`total_rsc - reserve`。
    pub fn distributable(&self) -> usize {
        self.total_rsc.saturating_sub(self.reserve)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            total_rsc: 1000,
            flush_size: 8,
            flush_timeout_ns: 2_000_000_000,
            min_greed: 1,
            max_greed: 20,
            min_bufs: 2,
            reserve: 100,
        }
    }
}

/// 模拟磁盘参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// 每秒可消化的资源数量。
    pub consume_per_second: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            consume_per_second: 32,
        }
    }
}

/// 新建工作者的初始参数与轮询节拍。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub priority: u32,
    pub ready_per_sec: u32,
    /// 轮询循环每轮之间的睡眠时长。
    pub tick_ns: u64,
}

impl WorkerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_nanos(self.tick_ns)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            priority: 10,
            ready_per_sec: 1,
            tick_ns: 100_000_000,
        }
    }
}

/// 模拟整体配置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub worker_count: usize,
    pub pool: PoolConfig,
    pub disk: DiskConfig,
    pub worker: WorkerConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            worker_count: 12,
            pool: PoolConfig::default(),
            disk: DiskConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// 运行时可修改的配置键，顺序即 [`SimulationConfig::entries`] 的输出顺序。
pub const CONFIG_KEYS: &[&str] = &[
    "conf.ncapuch",
    "disk_conf.consume_per_second",
    "pool_conf.flush_size",
    "pool_conf.flush_timeout_ns",
    "pool_conf.max_greed",
    "pool_conf.min_bufs",
    "pool_conf.min_greed",
    "pool_conf.reserve",
    "pool_conf.total_rsc",
    "worker_conf.priority",
    "worker_conf.ready_per_sec",
    "worker_conf.tick_ns",
];

impl SimulationConfig {
    /// 从 TOML 文本解析配置，缺省字段取默认值，解析后执行整体校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取并解析 TOML 配置文件。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 包装为共享句柄。
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// 读取单个配置键的当前值。
    pub fn get(&self, key: &str) -> Option<i64> {
        let value = match key {
            "conf.ncapuch" => self.worker_count as i64,
            "disk_conf.consume_per_second" => self.disk.consume_per_second as i64,
            "pool_conf.flush_size" => self.pool.flush_size as i64,
            "pool_conf.flush_timeout_ns" => self.pool.flush_timeout_ns as i64,
            "pool_conf.max_greed" => i64::from(self.pool.max_greed),
            "pool_conf.min_bufs" => self.pool.min_bufs as i64,
            "pool_conf.min_greed" => i64::from(self.pool.min_greed),
            "pool_conf.reserve" => self.pool.reserve as i64,
            "pool_conf.total_rsc" => self.pool.total_rsc as i64,
            "worker_conf.priority" => i64::from(self.worker.priority),
            "worker_conf.ready_per_sec" => i64::from(self.worker.ready_per_sec),
            "worker_conf.tick_ns" => self.worker.tick_ns as i64,
            _ => return None,
        };
        Some(value)
    }

    /// 列出全部配置键及当前值，供控制台展示。
    pub fn entries(&self) -> Vec<(&'static str, i64)> {
        CONFIG_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }

    /// 按名称修改单个配置键。
    ///
    /// # 契约说明（What）
    /// - 未知键返回 [`ConfigError::UnknownKey`]；
    /// - 单字段越界返回 [`ConfigError::OutOfRange`]；
    /// - 修改后整体约束不成立返回 [`ConfigError::Inconsistent`]；
    /// - 任何错误路径下 `self` 保持不变。
    pub fn set(&mut self, key: &str, value: i64) -> Result<(), ConfigError> {
        let key = CONFIG_KEYS
            .iter()
            .copied()
            .find(|known| *known == key)
            .ok_or_else(|| ConfigError::UnknownKey {
                key: key.to_owned(),
            })?;
        let mut next = *self;
        match key {
            "conf.ncapuch" => {
                next.worker_count = checked(key, value, 1, WORKER_CEILING as i64)? as usize;
            }
            "disk_conf.consume_per_second" => {
                next.disk.consume_per_second = checked(key, value, 1, i64::MAX)? as u64;
            }
            "pool_conf.flush_size" => {
                next.pool.flush_size = checked(key, value, 1, i64::from(u32::MAX))? as usize;
            }
            "pool_conf.flush_timeout_ns" => {
                next.pool.flush_timeout_ns = checked(key, value, 1, i64::MAX)? as u64;
            }
            "pool_conf.max_greed" => {
                next.pool.max_greed = checked(key, value, 1, i64::from(GREED_CEILING))? as u32;
            }
            "pool_conf.min_bufs" => {
                next.pool.min_bufs = checked(key, value, 1, i64::from(u32::MAX))? as usize;
            }
            "pool_conf.min_greed" => {
                next.pool.min_greed = checked(key, value, 1, i64::from(GREED_CEILING))? as u32;
            }
            "pool_conf.reserve" => {
                next.pool.reserve = checked(key, value, 0, i64::from(u32::MAX))? as usize;
            }
            "pool_conf.total_rsc" => {
                next.pool.total_rsc = checked(key, value, 1, i64::from(u32::MAX))? as usize;
            }
            "worker_conf.priority" => {
                next.worker.priority = checked(key, value, 1, i64::from(PRIORITY_CEILING))? as u32;
            }
            "worker_conf.ready_per_sec" => {
                next.worker.ready_per_sec = checked(key, value, 0, i64::from(u32::MAX))? as u32;
            }
            "worker_conf.tick_ns" => {
                next.worker.tick_ns = checked(key, value, 1, i64::MAX)? as u64;
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_owned(),
                });
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// 校验字段间约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = &self.pool;
        if self.worker_count == 0 || self.worker_count > WORKER_CEILING {
            return Err(inconsistent(format!(
                "worker_count {} must be within [1, {WORKER_CEILING}]",
                self.worker_count
            )));
        }
        if pool.min_greed == 0 || pool.min_greed > pool.max_greed || pool.max_greed > GREED_CEILING
        {
            return Err(inconsistent(format!(
                "greed bounds must satisfy 1 <= min_greed ({}) <= max_greed ({}) <= {GREED_CEILING}",
                pool.min_greed, pool.max_greed
            )));
        }
        if pool.min_bufs == 0 {
            return Err(inconsistent("min_bufs must be at least 1".to_owned()));
        }
        if pool.flush_size == 0 {
            return Err(inconsistent("flush_size must be at least 1".to_owned()));
        }
        if pool.reserve > pool.total_rsc {
            return Err(inconsistent(format!(
                "reserve ({}) exceeds total_rsc ({})",
                pool.reserve, pool.total_rsc
            )));
        }
        let floor = self.worker_count.saturating_mul(pool.min_bufs);
        if floor > pool.total_rsc {
            return Err(inconsistent(format!(
                "worker_count * min_bufs ({floor}) exceeds total_rsc ({})",
                pool.total_rsc
            )));
        }
        if self.disk.consume_per_second == 0 {
            return Err(inconsistent(
                "consume_per_second must be at least 1".to_owned(),
            ));
        }
        if self.worker.priority == 0 || self.worker.priority > PRIORITY_CEILING {
            return Err(inconsistent(format!(
                "priority {} must be within [1, {PRIORITY_CEILING}]",
                self.worker.priority
            )));
        }
        if self.worker.tick_ns == 0 {
            return Err(inconsistent("tick_ns must be at least 1".to_owned()));
        }
        Ok(())
    }
}

fn checked(key: &'static str, value: i64, min: i64, max: i64) -> Result<i64, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        })
    }
}

fn inconsistent(detail: String) -> ConfigError {
    ConfigError::Inconsistent { detail }
}
