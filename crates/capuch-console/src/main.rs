//! capuch 运维控制台。
//!
//! # 使用方法
//! ```bash
//! capuch-console --config capuch.toml --start
//! ```
//! - `--config`：可选，TOML 配置文件，缺省字段取默认值；
//! - `--start`：启动后立即开始模拟。
//!
//! 从 stdin 逐行读取命令，`help` 列出全部命令；日志写到 stderr，`RUST_LOG` 可调整级别。

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use capuch_console::{Console, ConsoleError, Reply, logging};
use capuch_core::{Simulation, SimulationConfig};
use tracing::info;

fn main() {
    if let Err(error) = run() {
        eprintln!("capuch-console: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ConsoleError> {
    let mut args = env::args().skip(1);
    let mut config_path = None;
    let mut autostart = false;

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| usage("--config requires a file path"))?;
                config_path = Some(PathBuf::from(value));
            }
            "--start" => autostart = true,
            unknown => return Err(usage(&format!("unknown argument `{unknown}`"))),
        }
    }

    logging::install()?;

    let config = match &config_path {
        Some(path) => SimulationConfig::from_path(path)?,
        None => SimulationConfig::default(),
    };
    info!(workers = config.worker_count, path = ?config_path, "configuration loaded");

    let mut console = Console::new(Simulation::new(config));
    if autostart {
        console.dispatch("start");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        match console.dispatch(&line) {
            Reply::Handled(Some(text)) => write!(stdout, "{text}")?,
            Reply::Handled(None) => {}
            Reply::Unhandled(verb) => writeln!(stdout, "unhandled command `{verb}`")?,
            Reply::Quit => return Ok(()),
        }
        stdout.flush()?;
    }

    console.dispatch("quit");
    Ok(())
}

fn usage(detail: &str) -> ConsoleError {
    ConsoleError::Usage(format!(
        "{detail}\n  capuch-console [--config PATH] [--start]"
    ))
}
