// THERMOBENCH REACTOR
// SINGLE-THREADED poll(2) LOOP MULTIPLEXING:
//   - STDOUT OF THE BENCHMARK AND EVERY EXEC      (StreamDemux)
//   - CHILD EXITS                                 (PIDFDS, OR try_wait FALLBACK)
//   - THE SAMPLING AND TERMINATE TIMERS           (POLL TIMEOUT)
//   - SIGINT/SIGTERM                              (SELF-PIPE WRITTEN BY ctrlc)
//
// PHASES: Running -> Draining -> Done
//   Running:  SAMPLE, ROUTE STDOUT, FORWARD SIGNALS TO THE BENCHMARK
//   Draining: BENCHMARK EXITED. TIMERS AND SIGNALS OFF, EXECS TERMINATED
//             (UNLESS exec_wait). KEEP READING UNTIL EVERY STDOUT HITS EOF.
//   Done:     NO OPEN STREAMS LEFT. REAP, FLUSH, RETURN.
//
// WITHIN ONE WAKEUP: STREAMS FIRST (IN SPAWN ORDER), THEN SIGNALS, THEN
// CHILD EXITS, THEN TIMERS. OUTPUT PRODUCED BEFORE AN EXIT IS NEVER LOST.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::{ChildStdout, ExitStatus};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::child::{describe_status, Supervised};
use crate::config::Layout;
use crate::cpustat::CpuUsage;
use crate::csv::{CsvWriter, Row};
use crate::demux::{StdoutRows, StreamDemux};
use crate::sampler::SampleClock;

// POLL CAP WHEN SOME CHILD HAS NO PIDFD
const REAP_INTERVAL: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------
// HARNESS CONTEXT: EVERYTHING A CALLBACK TOUCHES
// ------------------------------------------------------------------------

pub struct HarnessContext<W: Write> {
    layout: Layout,
    out: CsvWriter<W>,
    start: Instant,
    sample_row: Row,
    stdout_rows: StdoutRows,
    cpu: Option<CpuUsage>,
    verbose: bool,
    samples: u64,
}

impl<W: Write> HarnessContext<W> {
    pub fn new(layout: Layout, out: CsvWriter<W>) -> Self {
        let sample_row = Row::new(&layout.columns);
        let stdout_rows = StdoutRows::new(&layout.columns, layout.time);
        Self {
            layout,
            out,
            start: Instant::now(),
            sample_row,
            stdout_rows,
            cpu: None,
            verbose: false,
            samples: 0,
        }
    }

    pub fn with_cpu_usage(mut self, cpu: CpuUsage) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn writer(&self) -> &CsvWriter<W> {
        &self.out
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn restart_clock(&mut self, start: Instant) {
        self.start = start;
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.start).as_millis() as u64
    }

    // "# COMMENT" LINE, THEN THE COLUMN HEADER ROW
    pub fn write_header(&mut self, comment: &str) -> io::Result<()> {
        self.out.write_comment(comment)?;
        let header = self.layout.columns.header_row();
        self.out.write_header(&header)
    }

    // ONE PERIODIC TICK. RETURNS FALSE FOR THE CPU-BASELINE TICK (NO ROW).
    pub fn sample(&mut self, now: Instant) -> Result<bool> {
        let usage = match &mut self.cpu {
            Some(cpu) => match cpu.sample()? {
                Some(usage) => Some(usage),
                None => {
                    debug!("cpu usage baseline recorded");
                    return Ok(false);
                }
            },
            None => None,
        };

        let elapsed = self.elapsed_ms(now);
        let row = &mut self.sample_row;
        row.set_number(self.layout.time, elapsed as f64);
        for bound in &self.layout.sensors {
            row.set_number(bound.column, bound.sensor.read()?);
        }
        if let Some(usage) = usage {
            for (&col, pct) in self.layout.cpu.iter().zip(usage) {
                row.set(col, &format!("{:.1}", pct));
            }
        }
        self.stdout_rows.sync_mut().take_into(row);

        debug!("sample: {}", row.to_string().trim_end());
        self.out.write_row(row).context("Cannot write sample row")?;
        if self.verbose {
            self.progress(elapsed);
        }
        self.sample_row.clear();
        self.samples += 1;
        Ok(true)
    }

    fn progress(&self, elapsed_ms: u64) {
        let first = self
            .layout
            .sensors
            .first()
            .map(|b| format!("  {}={}", b.sensor.header(), self.sample_row.get(b.column)))
            .unwrap_or_default();
        eprint!("\r{:>9.1} s{}   ", elapsed_ms as f64 / 1000.0, first);
    }

    // ONE READINESS NOTIFICATION FOR ONE STREAM. TRUE AT END OF STREAM.
    pub fn read_stream<R: Read>(&mut self, demux: &mut StreamDemux, src: &mut R, now: Instant) -> io::Result<bool> {
        let now_ms = self.elapsed_ms(now);
        demux.read_batch(src, &mut self.stdout_rows, now_ms, &mut self.out)
    }

    pub fn feed(&mut self, demux: &mut StreamDemux, bytes: &[u8], now: Instant) -> io::Result<()> {
        let now_ms = self.elapsed_ms(now);
        demux.feed(bytes, &mut self.stdout_rows, now_ms, &mut self.out)
    }

    pub fn finish(mut self) -> Result<CsvWriter<W>> {
        self.stdout_rows.flush(&mut self.out)?;
        self.out.flush().context("Cannot flush output")?;
        if self.verbose && self.samples > 0 {
            eprintln!();
        }
        Ok(self.out)
    }
}

// ------------------------------------------------------------------------
// SIGNALS
// ------------------------------------------------------------------------

// (READ END FOR THE REACTOR, WRITE END FOR THE SIGNAL HANDLER). BOTH ENDS
// NON-BLOCKING AND CLOSE-ON-EXEC SO CHILDREN NEVER INHERIT THEM.
pub fn interrupt_pipe() -> io::Result<(OwnedFd, File)> {
    let mut fds = [0 as libc::c_int; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write = unsafe { File::from_raw_fd(fds[1]) };
    Ok((read, write))
}

fn drain_pipe(fd: &OwnedFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

// ------------------------------------------------------------------------
// REACTOR
// ------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Done,
}

pub struct ReactorOptions {
    pub command: Vec<String>,
    pub period: Duration,
    pub random: bool,
    pub terminate_after: Option<Duration>,
    pub exec_wait: bool,
    pub interrupt: Option<OwnedFd>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub benchmark_status: ExitStatus,
    pub rows: u64,
    pub samples: u64,
}

struct Stream {
    source: ChildStdout,
    demux: StreamDemux,
    open: bool,
}

#[derive(Clone, Copy)]
enum Slot {
    Stream(usize),
    Interrupt,
    Child,
}

pub struct Reactor<W: Write> {
    ctx: HarnessContext<W>,
    phase: Phase,
    benchmark: Supervised,
    execs: Vec<Supervised>,
    // streams[0] IS THE BENCHMARK, THEN EXECS IN ORDER
    streams: Vec<Stream>,
    clock: Option<SampleClock>,
    terminate_at: Option<Instant>,
    interrupt: Option<OwnedFd>,
    exec_wait: bool,
    benchmark_status: Option<ExitStatus>,
}

impl<W: Write> Reactor<W> {
    // START THE BENCHMARK, THEN THE EXECS, THEN ARM THE TIMERS
    pub fn start(mut ctx: HarnessContext<W>, opts: ReactorOptions) -> Result<Self> {
        let needs_sampling = ctx.layout.needs_sampling();
        let bench_keys = std::mem::take(&mut ctx.layout.benchmark);
        let exec_setups = std::mem::take(&mut ctx.layout.execs);

        let (benchmark, bench_out) = Supervised::spawn_benchmark(&opts.command)?;
        info!("benchmark {} started (pid {})", benchmark.label(), benchmark.id());
        let mut streams = vec![Stream {
            source: bench_out,
            demux: StreamDemux::new(bench_keys),
            open: true,
        }];

        let mut execs = Vec::with_capacity(exec_setups.len());
        for setup in exec_setups {
            let (exec, out) = Supervised::spawn_exec(&setup.command)?;
            info!("exec `{}` started (pid {})", exec.label(), exec.id());
            streams.push(Stream {
                source: out,
                demux: StreamDemux::new(setup.keys),
                open: true,
            });
            execs.push(exec);
        }

        let start = Instant::now();
        ctx.restart_clock(start);
        let clock = needs_sampling.then(|| SampleClock::new(start, opts.period, opts.random));
        if clock.is_none() {
            debug!("nothing to sample periodically, sampling timer not armed");
        }

        Ok(Self {
            ctx,
            phase: Phase::Running,
            benchmark,
            execs,
            streams,
            clock,
            terminate_at: opts.terminate_after.map(|d| start + d),
            interrupt: opts.interrupt,
            exec_wait: opts.exec_wait,
            benchmark_status: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run(mut self) -> Result<(RunSummary, CsvWriter<W>)> {
        while self.phase != Phase::Done {
            self.turn()?;
        }

        for exec in &mut self.execs {
            if exec.is_running() {
                let status = exec.wait().with_context(|| format!("wait({})", exec.label()))?;
                report_exec_exit(exec, status);
            }
        }
        let benchmark_status = match self.benchmark_status {
            Some(status) => status,
            None => self.benchmark.wait().context("wait(benchmark)")?,
        };

        info!("measurement complete");
        let samples = self.ctx.samples();
        let out = self.ctx.finish()?;
        let summary = RunSummary {
            benchmark_status,
            rows: out.rows(),
            samples,
        };
        Ok((summary, out))
    }

    // ONE LOOP ITERATION: WAIT FOR READINESS OR A TIMER, THEN DISPATCH
    fn turn(&mut self) -> Result<()> {
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();

        for (i, stream) in self.streams.iter().enumerate() {
            if stream.open {
                fds.push(pollin(stream.source.as_raw_fd()));
                slots.push(Slot::Stream(i));
            }
        }
        if let Some(fd) = &self.interrupt {
            fds.push(pollin(fd.as_raw_fd()));
            slots.push(Slot::Interrupt);
        }
        for child in std::iter::once(&self.benchmark).chain(&self.execs) {
            if let Some(fd) = child.pidfd() {
                fds.push(pollin(fd));
                slots.push(Slot::Child);
            }
        }

        let timeout = self.poll_timeout(Instant::now());
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err).context("poll");
        }

        let now = Instant::now();
        let mut interrupted = false;
        for (pfd, slot) in fds.iter().zip(&slots) {
            if pfd.revents == 0 {
                continue;
            }
            match *slot {
                Slot::Stream(i) => self.on_readable(i, now)?,
                Slot::Interrupt => interrupted = true,
                Slot::Child => {}
            }
        }
        if interrupted {
            self.on_interrupt();
        }
        self.reap_children()?;
        self.fire_timers()?;

        if self.phase == Phase::Draining && self.streams.iter().all(|s| !s.open) {
            debug!("all streams closed");
            self.phase = Phase::Done;
        }
        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> libc::c_int {
        let mut wait: Option<Duration> = None;
        let mut consider = |d: Duration| {
            wait = Some(wait.map_or(d, |w| w.min(d)));
        };
        if self.phase == Phase::Running {
            if let Some(clock) = &self.clock {
                consider(clock.deadline().saturating_duration_since(now));
            }
            if let Some(at) = self.terminate_at {
                consider(at.saturating_duration_since(now));
            }
        }
        let unwatched = std::iter::once(&self.benchmark)
            .chain(&self.execs)
            .any(|c| c.is_running() && c.pidfd().is_none());
        if unwatched {
            consider(REAP_INTERVAL);
        }
        match wait {
            // ROUND UP: WAKING EARLY WOULD SPIN UNTIL THE DEADLINE
            Some(d) => ((d.as_micros() + 999) / 1000).min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        }
    }

    fn on_readable(&mut self, i: usize, now: Instant) -> Result<()> {
        let stream = &mut self.streams[i];
        let eof = self
            .ctx
            .read_stream(&mut stream.demux, &mut stream.source, now)
            .context("Cannot write stdout row")?;
        if eof {
            debug!("stream {} reached end of file", i);
            stream.open = false;
        }
        Ok(())
    }

    // THE HARNESS ITSELF KEEPS RUNNING: IT ASKS THE BENCHMARK TO STOP AND
    // DRAINS UNTIL EVERYTHING HAS EXITED
    fn on_interrupt(&mut self) {
        if let Some(fd) = &self.interrupt {
            drain_pipe(fd);
        }
        debug!("interrupt received in phase {:?}", self.phase);
        if self.phase != Phase::Running {
            return;
        }
        eprintln!("Waiting for child to terminate...");
        if let Err(e) = self.benchmark.terminate() {
            warn!("cannot signal benchmark: {}", e);
        }
    }

    fn reap_children(&mut self) -> Result<()> {
        if let Some(status) = self.benchmark.try_reap().context("wait(benchmark)")? {
            info!("benchmark exited with {}", describe_status(status));
            self.benchmark_status = Some(status);
            self.begin_drain();
        }
        for exec in &mut self.execs {
            if let Some(status) = exec.try_reap().with_context(|| format!("wait({})", exec.label()))? {
                report_exec_exit(exec, status);
            }
        }
        Ok(())
    }

    fn begin_drain(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        self.phase = Phase::Draining;
        self.clock = None;
        self.terminate_at = None;
        // LATER SIGNALS LAND IN A CLOSED PIPE AND ARE IGNORED
        self.interrupt = None;
        if self.exec_wait {
            return;
        }
        for exec in &mut self.execs {
            if let Err(e) = exec.terminate() {
                warn!("cannot terminate exec `{}`: {}", exec.label(), e);
            }
        }
    }

    fn fire_timers(&mut self) -> Result<()> {
        if self.phase != Phase::Running {
            return Ok(());
        }
        let now = Instant::now();
        if let Some(at) = self.terminate_at {
            if now >= at {
                info!("time limit reached, terminating benchmark");
                self.terminate_at = None;
                if let Err(e) = self.benchmark.terminate() {
                    warn!("cannot signal benchmark: {}", e);
                }
            }
        }
        if let Some(clock) = &mut self.clock {
            if clock.is_due(now) {
                self.ctx.sample(now)?;
                clock.advance(Instant::now());
            }
        }
        Ok(())
    }
}

fn pollin(fd: libc::c_int) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

fn report_exec_exit(exec: &Supervised, status: ExitStatus) {
    if status.success() || exec.was_terminated() {
        debug!("exec `{}` exited with {}", exec.label(), describe_status(status));
    } else {
        warn!("exec `{}` exited with {}", exec.label(), describe_status(status));
    }
}
