// THERMOBENCH SPECIFICATION PARSING
// SENSOR SPECS:    PATH [NAME [UNIT]]
// SENSORS FILES:   ONE SENSOR SPEC PER LINE, '#' COMMENTS, '!' EXEC SPECS
// EXEC SPECS:      [(COL[,COL...])]COMMAND
// COLUMN SPECS:    KEY, KEY= OR @KEY (BENCHMARK --column)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::sensor::Sensor;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Invalid sensor specification: {0:?}")]
    InvalidSensor(String),

    #[error("Extra text in sensor specification: {0:?}")]
    ExtraText(String),

    #[error("Cannot read sensors file {path}: {source}")]
    SensorsFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid exec specification: {0:?}")]
    InvalidExec(String),

    #[error("Empty column name in {0:?}")]
    EmptyColumn(String),

    #[error("More than one catch-all column in exec {0:?}")]
    MultipleCatchAll(String),
}

// ------------------------------------------------------------------------
// SENSORS
// ------------------------------------------------------------------------

pub fn parse_sensor_spec(spec: &str) -> Result<Sensor, SpecError> {
    let words: Vec<&str> = spec.split_whitespace().collect();
    match words.len() {
        0 => Err(SpecError::InvalidSensor(spec.to_string())),
        1..=3 => {
            let path = PathBuf::from(words[0]);
            let name = match words.get(1) {
                Some(name) => name.to_string(),
                None => infer_sensor_name(&path),
            };
            Ok(Sensor {
                path,
                name,
                unit: words.get(2).map(|u| u.to_string()),
            })
        }
        _ => Err(SpecError::ExtraText(words[3..].join(" "))),
    }
}

// .../thermal_zone0/temp WITH A READABLE SIBLING "type" -> CONTENTS OF type.
// OTHERWISE THE PARENT DIRECTORY'S BASENAME.
fn infer_sensor_name(path: &Path) -> String {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    if path.file_name().map_or(false, |f| f == "temp") {
        if let Ok(contents) = fs::read_to_string(dir.join("type")) {
            if let Some(line) = contents.lines().next() {
                let name = line.trim_end();
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }
    match dir.file_name() {
        Some(base) => base.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

#[derive(Debug, PartialEq)]
pub enum SensorsFileEntry {
    Sensor(Sensor),
    Exec(ExecSpec),
}

pub fn parse_sensors_text(text: &str) -> Result<Vec<SensorsFileEntry>, SpecError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(exec) = trimmed.strip_prefix('!') {
            entries.push(SensorsFileEntry::Exec(parse_exec_spec(exec)?));
        } else {
            entries.push(SensorsFileEntry::Sensor(parse_sensor_spec(trimmed)?));
        }
    }
    Ok(entries)
}

pub fn read_sensors_file(path: &Path) -> Result<Vec<SensorsFileEntry>, SpecError> {
    let text = fs::read_to_string(path).map_err(|source| SpecError::SensorsFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sensors_text(&text)
}

// ------------------------------------------------------------------------
// COLUMNS AND EXECS
// ------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Match {
    // ONLY "KEY=value" LINES, THE VALUE GOES TO THE COLUMN
    Key,
    // ANY LINE NOT CLAIMED BY A KEY
    CatchAll,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub matches: Match,
    // DEFERRED TO THE NEXT PERIODIC SAMPLE
    pub synchronous: bool,
}

impl ColumnSpec {
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let text = text.trim();
        let (synchronous, rest) = match text.strip_prefix('@') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (matches, name) = match rest.strip_suffix('=') {
            Some(name) => (Match::Key, name),
            None => (Match::CatchAll, rest),
        };
        if name.is_empty() {
            return Err(SpecError::EmptyColumn(text.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            matches,
            synchronous,
        })
    }

    // BENCHMARK --column VALUES ARE ALWAYS KEYS; A TRAILING '=' IS OPTIONAL
    pub fn parse_key(text: &str) -> Result<Self, SpecError> {
        let mut spec = Self::parse(text)?;
        spec.matches = Match::Key;
        Ok(spec)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: String,
    pub columns: Vec<ColumnSpec>,
}

fn exec_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\(([^)]*)\)(.*)$").expect("static regex"))
}

pub fn parse_exec_spec(spec: &str) -> Result<ExecSpec, SpecError> {
    let (columns, command) = match exec_regex().captures(spec) {
        Some(caps) => {
            let list = caps.get(1).map_or("", |m| m.as_str());
            let command = caps.get(2).map_or("", |m| m.as_str()).trim();
            let columns = list
                .split(',')
                .map(ColumnSpec::parse)
                .collect::<Result<Vec<_>, _>>()?;
            (columns, command)
        }
        None => {
            let command = spec.trim();
            // IMPLICIT CATCH-ALL NAMED AFTER THE PROGRAM
            let name = command
                .split_whitespace()
                .next()
                .ok_or_else(|| SpecError::InvalidExec(spec.to_string()))?;
            let column = ColumnSpec {
                name: name.to_string(),
                matches: Match::CatchAll,
                synchronous: false,
            };
            (vec![column], command)
        }
    };
    if command.is_empty() {
        return Err(SpecError::InvalidExec(spec.to_string()));
    }
    if columns.iter().filter(|c| c.matches == Match::CatchAll).count() > 1 {
        return Err(SpecError::MultipleCatchAll(spec.to_string()));
    }
    Ok(ExecSpec {
        command: command.to_string(),
        columns,
    })
}
