// PRE-MEASUREMENT COOLDOWN
// BLOCKING BY CONSTRUCTION: RUNS BEFORE ANY CHILD OR TIMER EXISTS.

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::config::{Cooldown, FanControl};
use crate::sensor::Sensor;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

impl FanControl {
    // "CMD on" / "CMD off" THROUGH THE SHELL
    pub fn set(&self, on: bool) -> Result<()> {
        let line = format!("{} {}", self.command, if on { "on" } else { "off" });
        debug!("fan: {}", line);
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(&line)
            .status()
            .with_context(|| format!("exec({})", line))?;
        if !status.success() {
            warn!("fan command `{}` failed: {}", line, status);
        }
        Ok(())
    }
}

// TRUE ONCE THE SENSOR READS <= THRESHOLD, FALSE ON TIMEOUT
pub fn wait_for_cooldown(sensor: &Sensor, cooldown: &Cooldown, interval: Duration, verbose: bool) -> Result<bool> {
    let start = Instant::now();
    loop {
        let value = sensor.read()?;
        if verbose {
            eprint!(
                "\rCooling down: {}={} (target {}), {:.0} s   ",
                sensor.header(),
                value,
                cooldown.threshold,
                start.elapsed().as_secs_f64()
            );
        }
        // NaN NEVER COMPARES <=, SO A BROKEN SENSOR RUNS INTO THE TIMEOUT
        if value <= cooldown.threshold {
            if verbose {
                eprintln!();
            }
            return Ok(true);
        }
        if start.elapsed() >= cooldown.timeout {
            if verbose {
                eprintln!();
            }
            warn!(
                "cooldown timeout after {:?}: {} still at {} (target {})",
                cooldown.timeout,
                sensor.header(),
                value,
                cooldown.threshold
            );
            return Ok(false);
        }
        thread::sleep(interval);
    }
}

// FAN ON, WAIT, FAN OFF (UNLESS KEPT ON)
pub fn prepare(sensor: Option<&Sensor>, cooldown: Option<&Cooldown>, fan: Option<&FanControl>, verbose: bool) -> Result<()> {
    if let Some(fan) = fan {
        fan.set(true)?;
    }
    if let (Some(sensor), Some(cooldown)) = (sensor, cooldown) {
        wait_for_cooldown(sensor, cooldown, POLL_INTERVAL, verbose)?;
    }
    if let Some(fan) = fan {
        if !fan.keep_on {
            fan.set(false)?;
        }
    }
    Ok(())
}
