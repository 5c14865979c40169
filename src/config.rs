// THERMOBENCH RUN CONFIGURATION
// RESOLVED OPTIONS (AFTER CLI PARSING AND SENSORS-FILE EXPANSION) AND THE
// FROZEN COLUMN LAYOUT DERIVED FROM THEM.
//
// COLUMN ORDER:
//   time/ms, SENSORS, CPU<n>_load/%, EXEC COLUMNS, BENCHMARK KEYS, stdout

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::csv::{Column, Columns};
use crate::demux::{Binding, KeyMap};
use crate::sensor::{BoundSensor, Sensor};
use crate::spec::{ColumnSpec, ExecSpec, Match};

pub const TIME_HEADER: &str = "time/ms";
pub const STDOUT_HEADER: &str = "stdout";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("COMMAND to run was not specified")]
    NoCommand,

    #[error("COMMAND already specified with --benchmark")]
    DuplicateCommand,

    #[error("No sensors to measure")]
    NothingToMeasure,

    #[error("Sampling period must be positive")]
    ZeroPeriod,

    #[error("Deadline budget must be between 1 and 100 percent, got {0}")]
    BadBudget(u32),

    #[error("Cooldown requires at least one sensor")]
    CooldownWithoutSensor,

    #[error("Column {0:?} would be a second catch-all for the same stream")]
    DuplicateCatchAll(String),

    #[error("Column {0:?} clashes with a time, sensor or CPU column")]
    ReservedColumn(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    // --output WINS; "-" IS STDOUT. OTHERWISE DIR/NAME.csv WHERE NAME
    // DEFAULTS TO THE BASENAME OF THE BENCHMARK EXECUTABLE.
    pub fn resolve(output: Option<&str>, dir: &Path, name: Option<&str>, command: &[String]) -> Self {
        match output {
            Some("-") => OutputTarget::Stdout,
            Some(file) => OutputTarget::File(PathBuf::from(file)),
            None => {
                let base = match name {
                    Some(n) => n.to_string(),
                    None => command
                        .first()
                        .and_then(|c| Path::new(c).file_name())
                        .map(|b| b.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "thermobench".to_string()),
                };
                OutputTarget::File(dir.join(format!("{}.csv", base)))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            OutputTarget::Stdout => "stdout".to_string(),
            OutputTarget::File(p) => p.display().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cooldown {
    pub threshold: f64,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FanControl {
    pub command: String,
    pub keep_on: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub period: Duration,
    pub random: bool,
    pub command: Vec<String>,
    pub sensors: Vec<Sensor>,
    pub execs: Vec<ExecSpec>,
    pub columns: Vec<ColumnSpec>,
    pub log_stdout: bool,
    pub terminate_after: Option<Duration>,
    pub cpu_usage: bool,
    pub verbose: bool,
    pub exec_wait: bool,
    pub flush: bool,
    // SCHED_DEADLINE BUDGET IN PERCENT OF THE PERIOD
    pub deadline_budget: Option<u32>,
    pub cooldown: Option<Cooldown>,
    pub fan: Option<FanControl>,
    pub output: OutputTarget,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::NoCommand);
        }
        if self.period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.sensors.is_empty() && self.execs.is_empty() && self.columns.is_empty() && !self.cpu_usage {
            return Err(ConfigError::NothingToMeasure);
        }
        if let Some(pct) = self.deadline_budget {
            if !(1..=100).contains(&pct) {
                return Err(ConfigError::BadBudget(pct));
            }
        }
        if self.cooldown.is_some() && self.sensors.is_empty() {
            return Err(ConfigError::CooldownWithoutSensor);
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------
// LAYOUT
// ------------------------------------------------------------------------

#[derive(Debug)]
pub struct ExecSetup {
    pub command: String,
    pub keys: KeyMap,
}

#[derive(Debug)]
pub struct Layout {
    pub columns: Columns,
    pub time: Column,
    pub sensors: Vec<BoundSensor>,
    pub cpu: Vec<Column>,
    pub execs: Vec<ExecSetup>,
    pub benchmark: KeyMap,
}

impl Layout {
    pub fn build(
        sensors: &[Sensor],
        cpu_count: usize,
        execs: &[ExecSpec],
        bench_columns: &[ColumnSpec],
        log_stdout: bool,
    ) -> Result<Self, ConfigError> {
        let mut columns = Columns::new();
        let time = columns.add(TIME_HEADER);

        let sensors = sensors
            .iter()
            .map(|s| BoundSensor {
                sensor: s.clone(),
                column: columns.add(s.header()),
            })
            .collect();

        let cpu = (0..cpu_count)
            .map(|i| columns.add(format!("CPU{}_load/%", i)))
            .collect();

        // EVERYTHING BELOW IS SHARED BY NAME, BUT NEVER WITH THE COLUMNS ABOVE
        let fixed = columns.len();

        let mut exec_setups = Vec::with_capacity(execs.len());
        for exec in execs {
            let mut keys = KeyMap::new();
            bind_columns(&mut columns, fixed, &mut keys, &exec.columns)?;
            exec_setups.push(ExecSetup {
                command: exec.command.clone(),
                keys,
            });
        }

        let mut benchmark = KeyMap::new();
        bind_columns(&mut columns, fixed, &mut benchmark, bench_columns)?;
        if log_stdout {
            let col = key_column(&mut columns, fixed, STDOUT_HEADER)?;
            benchmark.bind_catch_all(STDOUT_HEADER, Binding::Immediate(col))?;
        }

        Ok(Self {
            columns,
            time,
            sensors,
            cpu,
            execs: exec_setups,
            benchmark,
        })
    }

    pub fn from_config(config: &Config, cpu_count: usize) -> Result<Self, ConfigError> {
        Self::build(
            &config.sensors,
            if config.cpu_usage { cpu_count } else { 0 },
            &config.execs,
            &config.columns,
            config.log_stdout,
        )
    }

    // THE PERIODIC SAMPLER ONLY RUNS WHEN SOMETHING NEEDS IT
    pub fn needs_sampling(&self) -> bool {
        !self.sensors.is_empty()
            || !self.cpu.is_empty()
            || self.benchmark.has_synchronous()
            || self.execs.iter().any(|e| e.keys.has_synchronous())
    }
}

fn key_column(columns: &mut Columns, fixed: usize, name: &str) -> Result<Column, ConfigError> {
    let col = columns.get_or_add(name);
    if col.order() < fixed {
        return Err(ConfigError::ReservedColumn(name.to_string()));
    }
    Ok(col)
}

fn bind_columns(
    columns: &mut Columns,
    fixed: usize,
    keys: &mut KeyMap,
    specs: &[ColumnSpec],
) -> Result<(), ConfigError> {
    for spec in specs {
        let binding = Binding::new(key_column(columns, fixed, &spec.name)?, spec.synchronous);
        match spec.matches {
            Match::Key => keys.bind_key(&spec.name, binding),
            Match::CatchAll => keys.bind_catch_all(&spec.name, binding)?,
        }
    }
    Ok(())
}
