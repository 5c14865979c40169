// THERMOBENCH END-TO-END HARNESS TESTS
// REAL /bin/sh CHILDREN, FAKE SENSOR FILES IN A TEMP DIRECTORY.
//
// LIBRARY TESTS DRIVE Reactor DIRECTLY. BINARY TESTS RUN THE BUILT
// thermobench EXECUTABLE AND CHECK ITS CSV FILE AND EXIT STATUS.

use std::fs;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thermobench::config::Layout;
use thermobench::csv::CsvWriter;
use thermobench::reactor::{interrupt_pipe, HarnessContext, Phase, Reactor, ReactorOptions, RunSummary};
use thermobench::spec::{parse_exec_spec, parse_sensors_text, ColumnSpec, ExecSpec, SensorsFileEntry};

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

fn options(command: Vec<String>) -> ReactorOptions {
    ReactorOptions {
        command,
        period: Duration::from_millis(50),
        random: false,
        terminate_after: None,
        exec_wait: false,
        interrupt: None,
    }
}

fn run(layout: Layout, opts: ReactorOptions) -> (RunSummary, String) {
    let mut ctx = HarnessContext::new(layout, CsvWriter::new(Vec::new(), false));
    ctx.write_header("test").unwrap();
    let reactor = Reactor::start(ctx, opts).unwrap();
    let (summary, out) = reactor.run().unwrap();
    (summary, String::from_utf8(out.into_inner()).unwrap())
}

fn column(text: &str, header: &str) -> Vec<String> {
    let mut lines = text.lines().filter(|l| !l.starts_with('#'));
    let headers: Vec<&str> = lines.next().unwrap().split(',').collect();
    let idx = headers.iter().position(|h| *h == header).unwrap();
    lines
        .map(|l| l.split(',').nth(idx).unwrap_or("").to_string())
        .collect()
}

fn fake_sensor(dir: &Path, value: &str) -> String {
    let path = dir.join("fake_temp");
    fs::write(&path, value).unwrap();
    format!("{} temp_zone °C", path.display())
}

fn split_sensors_file(text: &str) -> (Vec<thermobench::sensor::Sensor>, Vec<ExecSpec>) {
    let mut sensors = Vec::new();
    let mut execs = Vec::new();
    for entry in parse_sensors_text(text).unwrap() {
        match entry {
            SensorsFileEntry::Sensor(s) => sensors.push(s),
            SensorsFileEntry::Exec(e) => execs.push(e),
        }
    }
    (sensors, execs)
}

// === LIBRARY ===

#[test]
fn sensors_exec_and_benchmark_columns() {
    let dir = tempfile::tempdir().unwrap();
    let (sensors, _) = split_sensors_file(&fake_sensor(dir.path(), "45000\n"));
    let execs = vec![parse_exec_spec("(level=) echo level=3").unwrap()];
    let columns = vec![ColumnSpec::parse_key("work_done").unwrap()];
    let layout = Layout::build(&sensors, 0, &execs, &columns, false).unwrap();

    let (summary, text) = run(layout, options(sh("sleep 0.3; echo work_done=10")));

    assert!(summary.benchmark_status.success());
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("# test"));
    assert_eq!(lines.next(), Some("time/ms,temp_zone/°C,level,work_done"));
    assert!(column(&text, "temp_zone/°C").iter().any(|v| v == "45000"));
    assert_eq!(column(&text, "level").iter().filter(|v| *v == "3").count(), 1);
    assert_eq!(column(&text, "work_done").iter().filter(|v| *v == "10").count(), 1);
    assert!(summary.samples >= 1);
}

#[test]
fn reactor_starts_running() {
    let columns = vec![ColumnSpec::parse_key("x").unwrap()];
    let layout = Layout::build(&[], 0, &[], &columns, false).unwrap();
    let ctx = HarnessContext::new(layout, CsvWriter::new(Vec::new(), false));
    let reactor = Reactor::start(ctx, options(sh("echo x=1"))).unwrap();
    assert_eq!(reactor.phase(), Phase::Running);
    let (summary, _) = reactor.run().unwrap();
    assert_eq!(summary.rows, 1);
}

#[test]
fn key_named_like_a_sensor_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (sensors, _) = split_sensors_file(&fake_sensor(dir.path(), "45000\n"));
    let execs = vec![parse_exec_spec("(temp_zone/°C=) echo temp_zone/°C=1").unwrap()];
    assert!(Layout::build(&sensors, 0, &execs, &[], false).is_err());
}

#[test]
fn unterminated_last_line_is_kept() {
    let columns = vec![ColumnSpec::parse_key("score").unwrap()];
    let layout = Layout::build(&[], 0, &[], &columns, false).unwrap();
    let (_, text) = run(layout, options(sh("printf score=42")));
    assert_eq!(column(&text, "score"), vec!["42"]);
}

#[test]
fn time_limit_terminates_benchmark() {
    let columns = vec![ColumnSpec::parse_key("x").unwrap()];
    let layout = Layout::build(&[], 0, &[], &columns, false).unwrap();
    let mut opts = options(vec!["sleep".to_string(), "30".to_string()]);
    opts.terminate_after = Some(Duration::from_millis(200));

    let started = Instant::now();
    let (summary, _) = run(layout, opts);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.benchmark_status.signal(), Some(libc::SIGTERM));
}

#[test]
fn interrupt_is_forwarded_to_benchmark() {
    let columns = vec![ColumnSpec::parse_key("x").unwrap()];
    let layout = Layout::build(&[], 0, &[], &columns, false).unwrap();
    let (read, mut write) = interrupt_pipe().unwrap();
    let mut opts = options(vec!["sleep".to_string(), "30".to_string()]);
    opts.interrupt = Some(read);

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        write.write_all(&[1]).unwrap();
    });
    let started = Instant::now();
    let (summary, _) = run(layout, opts);
    writer.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.benchmark_status.signal(), Some(libc::SIGTERM));
}

#[test]
fn execs_are_terminated_when_benchmark_exits() {
    let execs = vec![parse_exec_spec("(x=) sleep 30").unwrap()];
    let layout = Layout::build(&[], 0, &execs, &[], false).unwrap();

    let started = Instant::now();
    let (summary, _) = run(layout, options(sh("exit 3")));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.benchmark_status.code(), Some(3));
}

#[test]
fn exec_wait_collects_late_exec_output() {
    let execs = vec![parse_exec_spec("(done=) sleep 0.3; echo done=1").unwrap()];
    let layout = Layout::build(&[], 0, &execs, &[], false).unwrap();
    let mut opts = options(sh("true"));
    opts.exec_wait = true;

    let (_, text) = run(layout, opts);
    assert_eq!(column(&text, "done"), vec!["1"]);
}

#[test]
fn synchronous_exec_values_land_in_sampled_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (sensors, _) = split_sensors_file(&fake_sensor(dir.path(), "45000\n"));
    let execs = vec![parse_exec_spec("(@power=) echo power=7; sleep 30").unwrap()];
    let layout = Layout::build(&sensors, 0, &execs, &[], false).unwrap();

    let (_, text) = run(layout, options(sh("sleep 0.5")));
    // EVERY ROW IS A SAMPLED ROW: THE SENSOR IS ALWAYS SET
    let temps = column(&text, "temp_zone/°C");
    assert!(temps.iter().all(|v| v == "45000"));
    assert_eq!(column(&text, "power").iter().filter(|v| *v == "7").count(), 1);
}

// === BINARY ===

fn thermobench() -> Command {
    Command::new(env!("CARGO_BIN_EXE_thermobench"))
}

#[test]
fn binary_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let sensors = dir.path().join("sensors");
    fs::write(&sensors, format!("# fake zone\n{}\n", fake_sensor(dir.path(), "45000"))).unwrap();
    let csv = dir.path().join("out.csv");

    let output = thermobench()
        .arg("-s")
        .arg(&sensors)
        .args(["-e", "(level=) echo level=3", "-c", "work_done", "-O"])
        .arg(&csv)
        .args(["--", "/bin/sh", "-c", "sleep 0.3; echo work_done=10"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Results stored to"));

    let text = fs::read_to_string(&csv).unwrap();
    let mut lines = text.lines();
    let comment = lines.next().unwrap();
    assert!(comment.starts_with("# Started at: "));
    assert!(comment.contains("Generated by: "));
    assert_eq!(lines.next(), Some("time/ms,temp_zone/°C,level,work_done"));
    assert!(column(&text, "temp_zone/°C").iter().any(|v| v == "45000"));
    assert!(column(&text, "level").iter().any(|v| v == "3"));
    assert!(column(&text, "work_done").iter().any(|v| v == "10"));
}

#[test]
fn binary_exits_zero_on_benchmark_failure() {
    let dir = tempfile::tempdir().unwrap();
    let output = thermobench()
        .args(["-S", &fake_sensor(dir.path(), "40000"), "-O", "-", "--", "/bin/sh", "-c", "exit 5"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.lines().nth(1).unwrap().starts_with("time/ms,temp_zone/°C"));
}

#[test]
fn binary_rejects_missing_command() {
    let output = thermobench().args(["-S", "/sys/nothing/temp"]).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("COMMAND to run was not specified"));
}

#[test]
fn binary_forwards_sigterm() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = thermobench()
        .args(["-S", &fake_sensor(dir.path(), "40000"), "-O"])
        .arg(dir.path().join("out.csv"))
        .args(["--", "sleep", "30"])
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_millis(500));
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }

    let started = Instant::now();
    let output = child.wait_with_output().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Waiting for child to terminate..."));
}
