use std::io;

use capuch_core::{ConfigError, SimulationError};
use thiserror::Error;

/// 单行命令的解析错误，控制台记录后继续运行。
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command `{verb}`, type `help` for the command list")]
    Unknown { verb: String },
    #[error("`{command}` is missing {what}")]
    Missing {
        command: &'static str,
        what: &'static str,
    },
    #[error("`{command}` got invalid {what}: `{value}`")]
    Invalid {
        command: &'static str,
        what: &'static str,
        value: String,
    },
    #[error("unknown capuch setting `{name}`, expected speed or priority")]
    UnknownSetting { name: String },
}

/// 控制台进程级错误。
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("usage: {0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("console I/O failed")]
    Io(#[from] io::Error),
    #[error("failed to install tracing subscriber")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
}
