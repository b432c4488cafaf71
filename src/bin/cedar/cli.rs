//! # Cli
//!
//! This module contains everything needed for parsing the CLI arguments for
//! the cedar binary.

use clap::{Parser, ValueEnum};

/// Struct containing the CLI configuration for cedar.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// The path to a cedar source file to run.
    #[arg(index = 1)]
    pub file: Option<std::path::PathBuf>,

    /// Evaluate an expression and print its value.
    #[arg(short, long)]
    pub eval: Option<String>,

    /// Specify the log level of the engine.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

/// Enum for specifying the log level of cedar.
#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    /// The default log level. Only critical errors will be logged.
    #[default]
    #[value(alias("0"))]
    Error,

    /// Also log warnings.
    #[value(alias("1"))]
    Warn,

    /// Log general engine state, e.g. worker pool startup.
    #[value(alias("2"))]
    Info,

    /// Log scheduler and compiler internals.
    #[value(alias("3"))]
    Debug,

    /// Log everything, including per-form compilation.
    #[value(alias("4"))]
    Trace,
}

impl From<LogLevel> for log::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
