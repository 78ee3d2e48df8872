//! 控制台命令的词法解析。
//!
//! 每行一条命令，以空白分隔。解析只识别形状，不关心模拟当前是否在运行；
//! 运行状态相关的判断留给 [`crate::Console::dispatch`]。

use crate::error::CommandError;

/// `capuch START END <setting> VALUE` 中可设置的项。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Setting {
    /// 每秒填充的缓冲数。
    Speed(u32),
    /// 优先级，范围校验由核心完成。
    Priority(i64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Term,
    Quit,
    Help,
    /// `stats` 打印表格，`stats json` 打印 JSON 快照。
    Stats { json: bool },
    DiskFlush,
    Capuch {
        first: i64,
        last: i64,
        setting: Setting,
    },
    Conf { key: String, value: i64 },
}

/// 解析一行输入；空行返回 `Ok(None)`。
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb {
        "start" => Command::Start,
        "term" => Command::Term,
        "quit" => Command::Quit,
        "help" => Command::Help,
        "disk-flush" => Command::DiskFlush,
        "stats" => match words.next() {
            None => Command::Stats { json: false },
            Some("json") => Command::Stats { json: true },
            Some(other) => {
                return Err(CommandError::Invalid {
                    command: "stats",
                    what: "format",
                    value: other.to_owned(),
                });
            }
        },
        "capuch" => {
            let first = number(&mut words, "capuch", "START")?;
            let last = number(&mut words, "capuch", "END")?;
            let name = words.next().ok_or(CommandError::Missing {
                command: "capuch",
                what: "speed|priority",
            })?;
            let setting = match name {
                "speed" => {
                    let value = number(&mut words, "capuch", "VALUE")?;
                    let value = u32::try_from(value).map_err(|_| CommandError::Invalid {
                        command: "capuch",
                        what: "speed",
                        value: value.to_string(),
                    })?;
                    Setting::Speed(value)
                }
                "priority" => Setting::Priority(number(&mut words, "capuch", "VALUE")?),
                other => {
                    return Err(CommandError::UnknownSetting {
                        name: other.to_owned(),
                    });
                }
            };
            Command::Capuch {
                first,
                last,
                setting,
            }
        }
        "conf" => {
            let key = words.next().ok_or(CommandError::Missing {
                command: "conf",
                what: "FIELD",
            })?;
            let value = number(&mut words, "conf", "VALUE")?;
            Command::Conf {
                key: key.to_owned(),
                value,
            }
        }
        other => {
            return Err(CommandError::Unknown {
                verb: other.to_owned(),
            });
        }
    };
    Ok(Some(command))
}

fn number<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    what: &'static str,
) -> Result<i64, CommandError> {
    let word = words.next().ok_or(CommandError::Missing { command, what })?;
    word.parse().map_err(|_| CommandError::Invalid {
        command,
        what,
        value: word.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_verbs_parse() {
        assert_eq!(parse("start").unwrap(), Some(Command::Start));
        assert_eq!(parse("  term  ").unwrap(), Some(Command::Term));
        assert_eq!(parse("quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("disk-flush").unwrap(), Some(Command::DiskFlush));
        assert_eq!(
            parse("stats json").unwrap(),
            Some(Command::Stats { json: true })
        );
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn capuch_ranges_keep_raw_bounds() {
        assert_eq!(
            parse("capuch -2 40 priority 7").unwrap(),
            Some(Command::Capuch {
                first: -2,
                last: 40,
                setting: Setting::Priority(7),
            })
        );
        assert_eq!(
            parse("capuch 0 3 speed 12").unwrap(),
            Some(Command::Capuch {
                first: 0,
                last: 3,
                setting: Setting::Speed(12),
            })
        );
    }

    #[test]
    fn malformed_commands_are_reported() {
        assert!(matches!(
            parse("capuch 0"),
            Err(CommandError::Missing { what: "END", .. })
        ));
        assert!(matches!(
            parse("capuch 0 1 volume 3"),
            Err(CommandError::UnknownSetting { .. })
        ));
        assert!(matches!(
            parse("capuch 0 1 speed -1"),
            Err(CommandError::Invalid { what: "speed", .. })
        ));
        assert!(matches!(
            parse("conf pool_conf.reserve lots"),
            Err(CommandError::Invalid { what: "VALUE", .. })
        ));
        assert!(matches!(
            parse("launch"),
            Err(CommandError::Unknown { .. })
        ));
    }

    #[test]
    fn conf_keeps_field_name_verbatim() {
        assert_eq!(
            parse("conf pool_conf.min_bufs 4").unwrap(),
            Some(Command::Conf {
                key: "pool_conf.min_bufs".to_owned(),
                value: 4,
            })
        );
    }
}
