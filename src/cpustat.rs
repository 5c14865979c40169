// PER-CPU USAGE FROM /proc/stat
// USAGE = DELTA(ACTIVE) / DELTA(ACTIVE + IDLE) * 100 BETWEEN TWO READS.
// THE FIRST READ ONLY ESTABLISHES BASELINES.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const PROC_STAT: &str = "/proc/stat";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub active: u64,
    pub idle: u64,
}

// PER-CPU LINES ONLY ("cpu0 ...", NOT THE AGGREGATE "cpu ...")
pub fn parse_proc_stat(text: &str) -> Vec<CpuTimes> {
    let mut cpus = Vec::new();
    for line in text.lines() {
        if !line.starts_with("cpu") || line.starts_with("cpu ") {
            continue;
        }
        // user nice system idle iowait irq softirq steal [guest guest_nice]
        // GUEST TIME IS ALREADY INCLUDED IN user/nice
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .filter_map(|s| s.parse().ok())
            .collect();
        if fields.len() < 4 {
            continue;
        }
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total: u64 = fields.iter().sum();
        cpus.push(CpuTimes {
            active: total - idle,
            idle,
        });
    }
    cpus
}

// NAN WHEN NO TIME ELAPSED (OR THE COUNTERS WENT BACKWARDS, CPU HOTPLUG)
pub fn usage_percent(prev: CpuTimes, now: CpuTimes) -> f64 {
    let active = now.active.saturating_sub(prev.active);
    let idle = now.idle.saturating_sub(prev.idle);
    let total = active + idle;
    if total == 0 {
        return f64::NAN;
    }
    active as f64 / total as f64 * 100.0
}

pub struct CpuUsage {
    path: PathBuf,
    prev: Option<Vec<CpuTimes>>,
}

impl CpuUsage {
    pub fn new() -> Self {
        Self::with_path(PROC_STAT)
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            prev: None,
        }
    }

    pub fn count_cpus(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    fn read(&self) -> Result<Vec<CpuTimes>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read {}", self.path.display()))?;
        Ok(parse_proc_stat(&text))
    }

    // None ON THE FIRST CALL (BASELINE ONLY), THEN ONE PERCENTAGE PER CPU
    pub fn sample(&mut self) -> Result<Option<Vec<f64>>> {
        let now = self.read()?;
        Ok(self.update(now))
    }

    pub fn update(&mut self, now: Vec<CpuTimes>) -> Option<Vec<f64>> {
        let usage = self.prev.as_ref().map(|prev| {
            now.iter()
                .enumerate()
                .map(|(i, &t)| match prev.get(i) {
                    Some(&p) => usage_percent(p, t),
                    None => f64::NAN,
                })
                .collect()
        });
        self.prev = Some(now);
        usage
    }
}

impl Default for CpuUsage {
    fn default() -> Self {
        Self::new()
    }
}
