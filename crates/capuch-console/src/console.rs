//! 命令分发。
//!
//! # 契约说明（What）
//! - 每行输入产生一个 [`Reply`]：`Handled` 可携带回显文本，`Unhandled` 表示命令未被识别
//!   或在当前状态下不适用，`Quit` 表示模拟已停止且进程应退出；
//! - 已识别命令的参数错误、越界的配置值等边界错误只记录 WARN 日志，按无操作处理，从不中断控制台。

use capuch_core::{ConfigError, Simulation, SimulationError};
use tracing::{info, warn};

use crate::command::{self, Command, Setting};
use crate::error::CommandError;
use crate::render;

pub const HELP: &str = "\
Available commands:
  start => start simulation
  term => stop simulation
  quit => close the program
  capuch START END (speed|priority) VALUE => set capuch speed/priority
  conf FIELD VALUE => set conf FIELD to VALUE
    use any field listed by `stats`, for example pool_conf.min_bufs
    note: conf.ncapuch and pool_conf.total_rsc take effect on the next start
  disk-flush => flush all disk IO immediately
  stats [json] => print global stats, configuration and capuch tables
  help => show this text
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Handled(Option<String>),
    Unhandled(String),
    Quit,
}

/// 持有模拟实例的控制台会话。
pub struct Console {
    sim: Simulation,
}

impl Console {
    pub fn new(sim: Simulation) -> Self {
        Self { sim }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// 处理一行输入。
    pub fn dispatch(&mut self, line: &str) -> Reply {
        match command::parse(line) {
            Ok(None) => Reply::Handled(None),
            Ok(Some(command)) => self.execute(command),
            Err(CommandError::Unknown { verb }) => Reply::Unhandled(verb),
            Err(error) => {
                warn!(%error, "command ignored");
                Reply::Handled(None)
            }
        }
    }

    fn execute(&mut self, command: Command) -> Reply {
        match command {
            Command::Quit => {
                self.sim.stop();
                return Reply::Quit;
            }
            Command::Start => {
                if self.sim.is_running() {
                    return Reply::Handled(None);
                }
                if let Err(error) = self.sim.start() {
                    warn!(%error, "simulation failed to start");
                }
            }
            Command::Term => self.sim.stop(),
            Command::Help => return Reply::Handled(Some(HELP.to_owned())),
            Command::Stats { json } => return Reply::Handled(Some(self.stats(json))),
            Command::DiskFlush => {
                if let Err(SimulationError::NotRunning) = self.sim.force_disk_flush() {
                    return Reply::Unhandled("disk-flush".to_owned());
                }
            }
            Command::Capuch {
                first,
                last,
                setting,
            } => {
                let applied = match setting {
                    Setting::Speed(value) => self.sim.set_ready_per_sec(first, last, value),
                    Setting::Priority(value) => self.sim.set_priority(first, last, value),
                };
                match applied {
                    Ok(count) => info!(first, last, ?setting, workers = count, "capuch updated"),
                    Err(SimulationError::NotRunning) => {
                        return Reply::Unhandled("capuch".to_owned());
                    }
                    Err(error) => warn!(%error, "capuch command ignored"),
                }
            }
            Command::Conf { key, value } => match self.sim.set_config(&key, value) {
                Ok(()) => {}
                Err(error @ ConfigError::UnknownKey { .. }) => {
                    warn!(%error, "conf command ignored");
                }
                Err(error) => warn!(%error, key = %key, value, "conf value rejected"),
            },
        }
        Reply::Handled(None)
    }

    fn stats(&self, json: bool) -> String {
        let telemetry = self.sim.telemetry();
        if json {
            return match serde_json::to_string_pretty(&telemetry) {
                Ok(text) => text,
                Err(error) => {
                    warn!(%error, "telemetry serialization failed");
                    String::new()
                }
            };
        }
        let mut out = String::new();
        out.push_str("== Global stats ==\n");
        out.push_str(&render::global_stats(telemetry.as_ref()));
        out.push_str("== Global conf ==\n");
        out.push_str(&render::global_conf(&self.sim.config()));
        out.push_str("== Capuch view ==\n");
        out.push_str(&render::capuch_view(telemetry.as_ref()));
        out
    }
}
