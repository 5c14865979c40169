// THERMOBENCH -- TEMPERATURE AND PERFORMANCE MEASUREMENT HARNESS
// RUNS A BENCHMARK, SAMPLES SENSOR FILES PERIODICALLY AND MERGES SENSOR
// VALUES, CPU USAGE AND KEY=VALUE LINES FROM THE BENCHMARK AND AUXILIARY
// COMMANDS INTO ONE CSV FILE.

pub mod child;
pub mod config;
pub mod cooldown;
pub mod cpustat;
pub mod csv;
pub mod demux;
pub mod lines;
pub mod quote;
pub mod reactor;
pub mod sampler;
pub mod sched;
pub mod sensor;
pub mod spec;
