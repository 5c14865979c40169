// THERMOBENCH -- RUN A BENCHMARK AND LOG TEMPERATURES TO CSV
//
// STARTUP:  PARSE -> VALIDATE -> FAN/COOLDOWN -> SCHEDULING CLASS ->
//           OPEN OUTPUT + HEADER -> SIGNAL PIPE -> REACTOR
// EXIT:     0 ONCE THE MEASUREMENT COMPLETED, WHATEVER THE BENCHMARK RETURNED

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use thermobench::child::describe_status;
use thermobench::config::{Config, ConfigError, Cooldown, FanControl, Layout, OutputTarget};
use thermobench::cooldown;
use thermobench::cpustat::CpuUsage;
use thermobench::csv::CsvWriter;
use thermobench::quote::shell_quote;
use thermobench::reactor::{self, HarnessContext, Reactor, ReactorOptions};
use thermobench::sched;
use thermobench::spec::{self, ColumnSpec, SensorsFileEntry};

#[derive(Parser)]
#[command(name = "thermobench", version)]
#[command(about = "Run a benchmark and log temperatures, CPU usage and benchmark output to CSV")]
struct Cli {
    // SAMPLING PERIOD IN MILLISECONDS
    #[arg(short, long, value_name = "MS", default_value_t = 100)]
    period: u64,

    // RANDOMIZE THE SAMPLING PHASE WITHIN EACH PERIOD
    #[arg(short, long)]
    random: bool,

    // BENCHMARK EXECUTABLE (ALTERNATIVE TO COMMAND)
    #[arg(short, long, value_name = "EXE")]
    benchmark: Option<String>,

    // FILE WITH ONE SENSOR OR !EXEC SPEC PER LINE
    #[arg(short, long = "sensors-file", value_name = "FILE")]
    sensors_file: Vec<PathBuf>,

    // SENSOR "PATH [NAME [UNIT]]"
    #[arg(short = 'S', long = "sensor", value_name = "SPEC")]
    sensor: Vec<String>,

    // BASENAME OF THE CSV FILE (DEFAULT: BENCHMARK BASENAME)
    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long = "output-dir", value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    // EXPLICIT OUTPUT FILE, "-" FOR STDOUT
    #[arg(short = 'O', long, value_name = "FILE")]
    output: Option<String>,

    // CAPTURE KEY=VALUE LINES FROM THE BENCHMARK ("@KEY" = SYNCHRONOUS)
    #[arg(short, long = "column", value_name = "KEY")]
    column: Vec<String>,

    // STORE OTHER BENCHMARK STDOUT LINES IN THE "stdout" COLUMN
    #[arg(short = 'l', long = "stdout")]
    log_stdout: bool,

    // SIGTERM THE BENCHMARK AFTER THIS MANY SECONDS
    #[arg(short, long, value_name = "SECONDS")]
    time: Option<f64>,

    // PER-CPU USAGE COLUMNS
    #[arg(short = 'u', long = "cpu-usage")]
    cpu_usage: bool,

    #[arg(short, long)]
    verbose: bool,

    // AUXILIARY COMMAND "[(COLUMNS)] CMD", REPEATABLE
    #[arg(short, long, value_name = "SPEC")]
    exec: Vec<String>,

    // WAIT FOR EXECS TO FINISH INSTEAD OF KILLING THEM
    #[arg(short = 'w', long = "exec-wait")]
    exec_wait: bool,

    // FLUSH THE OUTPUT AFTER EVERY ROW
    #[arg(short, long)]
    flush: bool,

    // RUN THE HARNESS UNDER SCHED_DEADLINE
    #[arg(short = 'd', long = "sched-deadline")]
    sched_deadline: bool,

    // SCHED_DEADLINE RUNTIME, PERCENT OF THE PERIOD
    #[arg(long, value_name = "PCT", default_value_t = 10)]
    budget: u32,

    // WAIT UNTIL THE FIRST SENSOR READS AT MOST TEMP
    #[arg(short = 'C', long, value_name = "TEMP")]
    cooldown: Option<f64>,

    #[arg(long = "cooldown-timeout", value_name = "SECONDS", default_value_t = 600)]
    cooldown_timeout: u64,

    // FAN CONTROL COMMAND, CALLED AS "CMD on" / "CMD off"
    #[arg(long = "fan-cmd", value_name = "CMD")]
    fan_cmd: Option<String>,

    // KEEP THE FAN ON DURING THE MEASUREMENT
    #[arg(long = "fan-on")]
    fan_on: bool,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let command = match (self.benchmark, self.command.is_empty()) {
            (Some(_), false) => return Err(ConfigError::DuplicateCommand.into()),
            (Some(exe), true) => vec![exe],
            (None, _) => self.command,
        };

        let mut sensors = Vec::new();
        let mut execs = Vec::new();
        for path in &self.sensors_file {
            for entry in spec::read_sensors_file(path)? {
                match entry {
                    SensorsFileEntry::Sensor(s) => sensors.push(s),
                    SensorsFileEntry::Exec(e) => execs.push(e),
                }
            }
        }
        for s in &self.sensor {
            sensors.push(spec::parse_sensor_spec(s)?);
        }
        for e in &self.exec {
            execs.push(spec::parse_exec_spec(e)?);
        }
        let columns = self
            .column
            .iter()
            .map(|c| ColumnSpec::parse_key(c))
            .collect::<Result<Vec<_>, _>>()?;

        let terminate_after = match self.time {
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid --time value {}", secs))?,
            ),
            None => None,
        };

        let output = OutputTarget::resolve(self.output.as_deref(), &self.output_dir, self.name.as_deref(), &command);

        Ok(Config {
            period: Duration::from_millis(self.period),
            random: self.random,
            command,
            sensors,
            execs,
            columns,
            log_stdout: self.log_stdout,
            terminate_after,
            cpu_usage: self.cpu_usage,
            verbose: self.verbose,
            exec_wait: self.exec_wait,
            flush: self.flush,
            deadline_budget: self.sched_deadline.then_some(self.budget),
            cooldown: self.cooldown.map(|threshold| Cooldown {
                threshold,
                timeout: Duration::from_secs(self.cooldown_timeout),
            }),
            fan: self.fan_cmd.map(|command| FanControl {
                command,
                keep_on: self.fan_on,
            }),
            output,
        })
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn header_comment(argv: &[String]) -> String {
    format!(
        "Started at: {}, Version: {}, Generated by: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z"),
        env!("CARGO_PKG_VERSION"),
        shell_quote(argv)
    )
}

fn open_output(target: &OutputTarget) -> Result<Box<dyn Write>> {
    Ok(match target {
        OutputTarget::Stdout => Box::new(io::stdout()),
        OutputTarget::File(path) => Box::new(
            File::create(path).with_context(|| format!("Cannot create output file {}", path.display()))?,
        ),
    })
}

fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.into_config()?;
    config.validate()?;

    let cpu = config.cpu_usage.then(CpuUsage::new);
    let cpu_count = match &cpu {
        Some(cpu) => cpu.count_cpus()?,
        None => 0,
    };
    let layout = Layout::from_config(&config, cpu_count)?;

    cooldown::prepare(
        config.sensors.first(),
        config.cooldown.as_ref(),
        config.fan.as_ref(),
        config.verbose,
    )?;

    // SCHEDULING CLASS
    match config.deadline_budget {
        Some(pct) => sched::request_deadline(config.period, pct)?,
        None => {
            if let Err(e) = sched::boost_priority() {
                warn!("Cannot raise harness priority: {}", e);
            }
        }
    }

    let out = BufWriter::new(open_output(&config.output)?);
    let mut ctx = HarnessContext::new(layout, CsvWriter::new(out, config.flush)).with_verbose(config.verbose);
    if let Some(cpu) = cpu {
        ctx = ctx.with_cpu_usage(cpu);
    }
    ctx.write_header(&header_comment(&argv))
        .context("Cannot write CSV header")?;

    // SIGINT/SIGTERM -> ONE BYTE IN THE PIPE. THE REACTOR DOES THE REST.
    let (interrupt, mut pipe) = reactor::interrupt_pipe().context("pipe2")?;
    ctrlc::set_handler(move || {
        let _ = pipe.write(&[1]);
    })?;

    let reactor = Reactor::start(
        ctx,
        ReactorOptions {
            command: config.command.clone(),
            period: config.period,
            random: config.random,
            terminate_after: config.terminate_after,
            exec_wait: config.exec_wait,
            interrupt: Some(interrupt),
        },
    )?;
    let (summary, _) = reactor.run()?;

    info!(
        "benchmark finished with {}, {} rows ({} samples)",
        describe_status(summary.benchmark_status),
        summary.rows,
        summary.samples
    );
    eprintln!("Results stored to {}", config.output.describe());
    Ok(())
}
