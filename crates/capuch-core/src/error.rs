//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义模拟核心对外暴露的可恢复错误：配置输入错误与生命周期误用；
//! - 缓冲簿记不一致属于不变量破坏，直接在工作者线程内 `panic!`，不在此建模。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，可直接交给上层 `?` 传播或记录日志；
//! - 边界层（控制台）收到这些错误时只记录并忽略，绝不因此退出进程。

use std::io;

use thiserror::Error;

/// 配置读取与修改过程中的错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 运行时按名称修改配置时，键不存在。
    #[error("unknown configuration key `{key}`")]
    UnknownKey { key: String },

    /// 单个字段超出允许区间。
    ///
    /// - **契约 (What)**：`min`/`max` 为闭区间端点，`value` 为调用方给出的原始值。
    #[error("configuration key `{key}` = {value} is outside [{min}, {max}]")]
    OutOfRange {
        key: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// 字段之间的约束不成立，例如 `min_greed > max_greed`。
    #[error("inconsistent configuration: {detail}")]
    Inconsistent { detail: String },

    /// TOML 文本解析失败。
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// 读取配置文件失败。
    #[error("failed to read configuration file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// 模拟生命周期控制错误。
#[derive(Debug, Error)]
pub enum SimulationError {
    /// 在已运行的模拟上再次调用 `start`。
    #[error("simulation is already running")]
    AlreadyRunning,

    /// 需要运行中模拟的操作在停止状态下被调用。
    #[error("simulation is not running")]
    NotRunning,

    /// 启动前的整体配置校验失败。
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 工作者线程无法创建。
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },
}
