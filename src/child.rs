// CHILD PROCESS SUPERVISION
// THE BENCHMARK AND EVERY EXEC RUN IN THEIR OWN PROCESS GROUP WITH STDOUT ON
// A NON-BLOCKING PIPE. TERMINATION IS SIGTERM TO THE WHOLE GROUP, SO SHELL
// WRAPPERS TAKE THEIR CHILDREN DOWN WITH THEM.
//
// EXIT NOTIFICATION: A PIDFD BECOMES READABLE WHEN THE CHILD EXITS. KERNELS
// WITHOUT pidfd_open (< 5.3) FALL BACK TO PERIODIC try_wait IN THE REACTOR.

use std::io::{self, IsTerminal};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

const SHELL: &str = "/bin/sh";
const DROP_GRACE: Duration = Duration::from_millis(500);

pub struct Supervised {
    label: String,
    child: Child,
    pgid: i32,
    pidfd: Option<OwnedFd>,
    status: Option<ExitStatus>,
    terminated: bool,
}

impl Supervised {
    // BENCHMARK: EXECUTED DIRECTLY FROM ITS ARGV, INHERITS PIPED STDIN
    pub fn spawn_benchmark(argv: &[String]) -> Result<(Self, ChildStdout)> {
        let cmd = benchmark_command(argv, io::stdin().is_terminal())?;
        Self::spawn(cmd, argv[0].clone())
    }

    // EXEC: A SHELL COMMAND LINE, STDIN FROM /dev/null
    pub fn spawn_exec(command: &str) -> Result<(Self, ChildStdout)> {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(command).stdin(Stdio::null());
        Self::spawn(cmd, command.to_string())
    }

    fn spawn(mut cmd: Command, label: String) -> Result<(Self, ChildStdout)> {
        cmd.process_group(0)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = cmd.spawn().with_context(|| format!("exec({})", label))?;
        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("no stdout pipe for {}", label))?;
        set_nonblocking(stdout.as_raw_fd()).context("fcntl(O_NONBLOCK)")?;

        let pgid = child.id() as i32;
        let pidfd = open_pidfd(pgid);
        log::debug!(
            "started `{}` pid {} ({})",
            label,
            pgid,
            if pidfd.is_some() { "pidfd" } else { "polled" }
        );

        Ok((
            Self {
                label,
                child,
                pgid,
                pidfd,
                status: None,
                terminated: false,
            },
            stdout,
        ))
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pidfd(&self) -> Option<RawFd> {
        self.pidfd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn is_running(&self) -> bool {
        self.status.is_none()
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated
    }

    // SIGTERM TO THE PROCESS GROUP. NO-OP ONCE THE CHILD HAS BEEN REAPED.
    pub fn terminate(&mut self) -> io::Result<()> {
        self.signal(libc::SIGTERM)?;
        if self.is_running() {
            self.terminated = true;
        }
        Ok(())
    }

    fn signal(&self, sig: libc::c_int) -> io::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let ret = unsafe { libc::killpg(self.pgid, sig) };
        if ret == -1 {
            let err = io::Error::last_os_error();
            // GROUP ALREADY GONE, EXIT NOT YET REAPED
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    // Some(status) EXACTLY ONCE: ON THE CALL THAT OBSERVES THE EXIT
    pub fn try_reap(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_some() {
            return Ok(None);
        }
        let status = self.child.try_wait()?;
        if let Some(status) = status {
            self.status = Some(status);
            self.pidfd = None;
        }
        Ok(status)
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        self.pidfd = None;
        Ok(status)
    }
}

impl Drop for Supervised {
    // ERROR PATHS ONLY: THE REACTOR REAPS EVERYTHING ON A NORMAL EXIT
    fn drop(&mut self) {
        if !self.is_running() {
            return;
        }
        let _ = self.signal(libc::SIGTERM);
        let deadline = Instant::now() + DROP_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
                Err(_) => return,
            }
        }
        let _ = self.signal(libc::SIGKILL);
        let _ = self.child.wait();
    }
}

// THE BENCHMARK RUNS IN A BACKGROUND PROCESS GROUP: READING THE TERMINAL
// WOULD STOP IT WITH SIGTTIN. ONLY PIPES AND FILES ARE PASSED THROUGH.
fn benchmark_command(argv: &[String], terminal_stdin: bool) -> Result<Command> {
    let (program, args) = argv.split_first().context("empty benchmark command")?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    if terminal_stdin {
        cmd.stdin(Stdio::null());
    }
    Ok(cmd)
}

pub fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(sig)) => format!("signal {}", sig),
        _ => status.to_string(),
    }
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn open_pidfd(pid: i32) -> Option<OwnedFd> {
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
    if fd < 0 {
        return None;
    }
    // pidfd_open SETS O_CLOEXEC ITSELF
    Some(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}
