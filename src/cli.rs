//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `statwatch.toml` file and environment variables.

use clap::{Parser, Subcommand};
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Samples device telemetry and reports it to a chat webhook and an HTTP API.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Seconds between periodic ticks.
    #[arg(long, value_name = "SECONDS", global = true)]
    pub interval: Option<u64>,

    /// Filesystem root that proc/ and sys/ are read from.
    #[arg(long, value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the scheduler and run until interrupted (the default).
    Run {
        /// Request one tick immediately on start.
        #[arg(long)]
        now: bool,
    },
    /// Take a single sample and print it.
    Snapshot {
        /// Print the API payload instead of the text line.
        #[arg(long)]
        json: bool,
    },
    /// Persist sink settings for later runs.
    Save {
        #[arg(long, value_name = "URL")]
        webhook: Option<String>,
        #[arg(long, value_name = "URL")]
        api: Option<String>,
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
        #[arg(long, value_name = "BOOL")]
        enable_webhook: Option<bool>,
        #[arg(long, value_name = "BOOL")]
        enable_api: Option<bool>,
        #[arg(long, value_name = "BOOL")]
        enable_periodic: Option<bool>,
    },
}

impl Cli {
    /// The subcommand to execute, defaulting to `run`.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run { now: false })
    }
}

fn section(map: &mut Dict, name: &str, key: &str, value: Value) {
    let entry = map
        .entry(name.to_string())
        .or_insert_with(|| Value::Dict(Tag::Default, Dict::new()));
    if let Value::Dict(_, dict) = entry {
        dict.insert(key.to_string(), value);
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            section(&mut dict, "core", "log_level", Value::from(level.clone()));
        }
        if let Some(interval) = self.interval {
            section(&mut dict, "dispatch", "interval_seconds", Value::from(interval));
        }
        if let Some(root) = &self.root {
            section(
                &mut dict,
                "sources",
                "root",
                Value::from(root.to_string_lossy().into_owned()),
            );
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["statwatch", "snapshot", "--json", "--root", "/tmp/x"]);
        assert_eq!(cli.command(), Command::Snapshot { json: true });
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::parse_from(["statwatch"]);
        assert_eq!(cli.command(), Command::Run { now: false });
    }

    #[test]
    fn test_provider_nests_overrides() {
        let cli = Cli {
            interval: Some(5),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let data = cli.data().unwrap();
        let dict = &data[&Profile::Default];
        let dispatch = dict["dispatch"].as_dict().unwrap();
        assert_eq!(dispatch["interval_seconds"].to_u128(), Some(5));
        assert!(dict.get("sources").is_none());
    }
}
