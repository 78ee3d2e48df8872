//! `capuch-console`：capuch 模拟器的行式运维控制台。
//!
//! # 模块定位（Why）
//! - 把运维命令（启动、停止、区间调速调优先级、强制刷盘、按名改配置）映射到
//!   [`capuch_core::Simulation`] 的公开入口；
//! - 以固定列宽的文本表格展示全局统计、配置与每个工作者的状态，便于在终端逐轮观察。
//!
//! # 结构概览（How）
//! - [`command`]：单行命令解析；
//! - [`Console`]：分发与边界错误处理；
//! - [`render`]：文本面板；
//! - [`logging`]：`tracing-subscriber` 安装。

pub mod command;
mod console;
pub mod error;
pub mod logging;
pub mod render;

pub use console::{Console, HELP, Reply};
pub use error::{CommandError, ConsoleError};
