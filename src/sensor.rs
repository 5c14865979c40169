// THERMOBENCH SENSORS
// A SENSOR IS A FILE HOLDING ONE NUMBER (USUALLY A SYSFS PSEUDO-FILE).
// OPEN FAILURE IS FATAL. A FILE THAT OPENS BUT YIELDS NO NUMBER IS NAN.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::csv::Column;

#[derive(Clone, Debug, PartialEq)]
pub struct Sensor {
    pub path: PathBuf,
    pub name: String,
    pub unit: Option<String>,
}

impl Sensor {
    // CSV HEADER: NAME/UNIT, OR NAME WHEN NO UNIT WAS GIVEN
    pub fn header(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{}/{}", self.name, unit),
            None => self.name.clone(),
        }
    }

    pub fn read(&self) -> Result<f64> {
        read_value(&self.path)
    }
}

// SENSOR WITH ITS OUTPUT COLUMN (ASSIGNED WHEN THE LAYOUT IS FROZEN)
#[derive(Clone, Debug)]
pub struct BoundSensor {
    pub sensor: Sensor,
    pub column: Column,
}

pub fn read_value(path: &Path) -> Result<f64> {
    let mut file = File::open(path)
        .with_context(|| format!("Error while opening sensor file: {}", path.display()))?;
    let mut contents = String::new();
    // SYSFS READS CAN FAIL AFTER A SUCCESSFUL OPEN (DEVICE ASLEEP). SAME AS EMPTY.
    if file.read_to_string(&mut contents).is_err() {
        return Ok(f64::NAN);
    }
    Ok(scan_number(&contents).unwrap_or(f64::NAN))
}

// FIRST NUMERIC TOKEN. ACCEPTS A NUMBER FOLLOWED BY JUNK ("45000mC").
pub fn scan_number(text: &str) -> Option<f64> {
    let token = text.split_whitespace().next()?;
    if let Ok(v) = token.parse::<f64>() {
        return Some(v);
    }
    let end = token
        .char_indices()
        .take_while(|&(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    // LONGEST PARSEABLE PREFIX ("1e" -> "1")
    (1..=end).rev().find_map(|n| token[..n].parse::<f64>().ok())
}
