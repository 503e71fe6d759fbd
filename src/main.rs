use std::env::{self, args};
use std::str::FromStr;
use std::time::Duration;

use log::{info, LevelFilter};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use turnstile_rw::{observe::console::ConsoleLogger, Config, Error, LogObserver, PerRole, Scheduler};

fn main() -> Result<(), String> {
    let level = env::var("TURNSTILE_LOG")
        .ok()
        .map(|level| LevelFilter::from_str(&level).map_err(|e| format!("TURNSTILE_LOG: {e}")))
        .transpose()?
        .unwrap_or(LevelFilter::Info);
    ConsoleLogger::install(level).map_err(|e| e.to_string())?;

    let mut args = args().skip(1);
    let scenario = args
        .next()
        .ok_or(format!(
            "no scenario supplied, use one of {} followed by key=value overrides",
            Scenario::iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| Scenario::from_str(&selector).map_err(|e| e.to_string()))?;

    let mut config = scenario.config();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or(format!("`{arg}' isn't a key=value pair"))?;
        config.apply(key, value).map_err(|e| e.to_string())?;
    }

    match Scheduler::new(config).run(&LogObserver) {
        Ok(report) => {
            info!(
                "All threads completed. Final shared value: {}",
                report.final_value
            );
            Ok(())
        }
        Err(Error::Stalled {
            completed,
            expected,
        }) if scenario == Scenario::Stall => {
            info!("stall detected as expected: {completed} of {expected} operations done");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Scenario {
    /// 3 writers and 5 readers, 10 operations each
    Demo,
    /// 3 writers with one operation each and nobody else
    WritersOnly,
    /// fewer readers than the readers' quota => the turn never gets back to the writers
    Stall,
}

impl Scenario {
    fn config(self) -> Config {
        match self {
            Scenario::Demo => Config::default(),
            Scenario::WritersOnly => Config {
                population: PerRole::new(3, 0),
                ops: PerRole::new(1, 0),
                ..Config::default()
            },
            Scenario::Stall => Config {
                population: PerRole::new(3, 2),
                ops: PerRole::new(2, 1),
                run_timeout: Some(Duration::from_secs(2)),
                ..Config::default()
            },
        }
    }
}
