//! Command-line parsing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tunekit_types::{Operation, TuneError};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the detected platform with its capability and policy tables.
    Detect,
    /// Apply `op=value` pairs, watch telemetry, restore baselines.
    Run { parameters: BTreeMap<Operation, f64> },
    /// Stop every module and restore baselines.
    Stop,
    /// Write a default configuration file.
    Init,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub command: Command,
}

fn usage_error(msg: impl Into<String>) -> TuneError {
    TuneError::Config(msg.into())
}

/// Parse everything after the program name.
pub fn parse<I>(args: I) -> Result<Cli, TuneError>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut positional = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or_else(|| usage_error("--config needs a path"))?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                return Ok(Cli {
                    config,
                    command: Command::Help,
                });
            }
            flag if flag.starts_with('-') => return Err(usage_error(format!("unknown flag '{flag}'"))),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("help") => Command::Help,
        Some("detect") => Command::Detect,
        Some("stop") => Command::Stop,
        Some("init") => Command::Init,
        Some("run") => Command::Run {
            parameters: parse_parameters(positional.by_ref())?,
        },
        Some(other) => return Err(usage_error(format!("unknown command '{other}'"))),
    };
    if let Some(extra) = positional.next() {
        return Err(usage_error(format!("unexpected argument '{extra}'")));
    }
    Ok(Cli { config, command })
}

fn parse_parameters(pairs: impl Iterator<Item = String>) -> Result<BTreeMap<Operation, f64>, TuneError> {
    let mut parameters = BTreeMap::new();
    for pair in pairs {
        let (op, value) = pair
            .split_once('=')
            .ok_or_else(|| usage_error(format!("expected op=value, got '{pair}'")))?;
        let op: Operation = op.trim().parse()?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| usage_error(format!("'{value}' is not a number")))?;
        if parameters.insert(op, value).is_some() {
            return Err(usage_error(format!("{op} given twice")));
        }
    }
    if parameters.is_empty() {
        return Err(usage_error("run needs at least one op=value pair"));
    }
    Ok(parameters)
}
