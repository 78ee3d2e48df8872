//! 进程级 `tracing` 订阅器。
//!
//! `fmt` 输出写到 stderr，stdout 只留给命令回显与面板；过滤规则优先读取 `RUST_LOG`，缺省为 `info`。

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

use crate::error::ConsoleError;

/// 安装全局订阅器；已有订阅器时返回错误而不是覆盖。
pub fn install() -> Result<(), ConsoleError> {
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
