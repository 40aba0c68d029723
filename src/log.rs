// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Optional `simplelog` setup driven by `CKBIND_TRACE` and
//! `CKBIND_TRACE_LEVEL`

use std::fs::File;
use std::path::PathBuf;

use crate::error::{Error, Result};

use simplelog::{Config, LevelFilter, SimpleLogger, WriteLogger};

const TRACE_VAR: &str = "CKBIND_TRACE";
const TRACE_LEVEL_VAR: &str = "CKBIND_TRACE_LEVEL";

/// Where trace output goes
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TraceTarget {
    Stdout,
    File(PathBuf),
}

impl TraceTarget {
    /// "stdout" or a file name
    pub fn parse(value: &str) -> TraceTarget {
        match value {
            "stdout" => TraceTarget::Stdout,
            name => TraceTarget::File(PathBuf::from(name)),
        }
    }
}

/// Unknown names select the most verbose level
pub fn parse_level(value: &str) -> LevelFilter {
    match value {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the global logger for `target` at `level`
pub fn init_with(target: &TraceTarget, level: LevelFilter) -> Result<()> {
    let res = match target {
        TraceTarget::Stdout => SimpleLogger::init(level, Config::default()),
        TraceTarget::File(path) => {
            let file = File::create(path)?;
            WriteLogger::init(level, Config::default(), file)
        }
    };
    res.map_err(|e| Error::config(format!("cannot install logger: {}", e)))
}

/// Initializes tracing from the environment. `CKBIND_TRACE` names the
/// target (absent means no tracing) and `CKBIND_TRACE_LEVEL` the level,
/// error by default.
///
/// Failures, such as a log file that can't be created or a logger the
/// application already installed, leave tracing off without reporting.
pub fn init() {
    let target = match std::env::var(TRACE_VAR) {
        Ok(t) => TraceTarget::parse(&t),
        Err(_) => return,
    };
    let level = match std::env::var(TRACE_LEVEL_VAR) {
        Ok(l) => parse_level(&l),
        Err(_) => LevelFilter::Error,
    };
    let _ = init_with(&target, level);
}

#[test]
pub fn test_init() {
    init();
}

#[test]
fn test_parse() {
    assert_eq!(TraceTarget::parse("stdout"), TraceTarget::Stdout);
    assert_eq!(
        TraceTarget::parse("/tmp/ckbind.log"),
        TraceTarget::File(PathBuf::from("/tmp/ckbind.log"))
    );
    assert_eq!(parse_level("warn"), LevelFilter::Warn);
    assert_eq!(parse_level("off"), LevelFilter::Off);
    assert_eq!(parse_level("verbose"), LevelFilter::Trace);
}
