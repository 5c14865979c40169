// HARNESS SCHEDULING CLASS
// SCHED_DEADLINE WITH GRUB RECLAIM: THE KERNEL GUARANTEES runtime EVERY
// period, SO SAMPLING STAYS ON TIME UNDER A CPU-SATURATING BENCHMARK.
// WITHOUT IT THE HARNESS ONLY RAISES ITS NICE PRIORITY BY ONE.

use std::io;
use std::time::Duration;

use anyhow::{bail, Result};

const SCHED_DEADLINE: u32 = 6;
// A SCHED_DEADLINE TASK MAY ONLY fork() WITH RESET_ON_FORK (ELSE EAGAIN).
// CHILDREN START AS SCHED_OTHER AND NEVER SHARE THE HARNESS BUDGET.
const SCHED_FLAG_RESET_ON_FORK: u64 = 0x01;
const SCHED_FLAG_RECLAIM: u64 = 0x02;

// MATCHES struct sched_attr (include/uapi/linux/sched/types.h, VER0)
#[repr(C)]
#[derive(Default, Debug)]
struct SchedAttr {
    size: u32,
    sched_policy: u32,
    sched_flags: u64,
    sched_nice: i32,
    sched_priority: u32,
    sched_runtime: u64,
    sched_deadline: u64,
    sched_period: u64,
}

// RUNTIME = period * budget_pct / 100
pub fn deadline_runtime(period: Duration, budget_pct: u32) -> Duration {
    let nanos = period.as_nanos() * u128::from(budget_pct) / 100;
    Duration::from_nanos(nanos as u64)
}

fn deadline_attr(period: Duration, budget_pct: u32) -> SchedAttr {
    SchedAttr {
        size: std::mem::size_of::<SchedAttr>() as u32,
        sched_policy: SCHED_DEADLINE,
        sched_flags: SCHED_FLAG_RESET_ON_FORK | SCHED_FLAG_RECLAIM,
        sched_runtime: deadline_runtime(period, budget_pct).as_nanos() as u64,
        sched_deadline: period.as_nanos() as u64,
        sched_period: period.as_nanos() as u64,
        ..Default::default()
    }
}

pub fn request_deadline(period: Duration, budget_pct: u32) -> Result<()> {
    let runtime = deadline_runtime(period, budget_pct);
    let attr = deadline_attr(period, budget_pct);
    let ret = unsafe { libc::syscall(libc::SYS_sched_setattr, 0, &attr as *const SchedAttr, 0) };
    if ret < 0 {
        bail!(
            "sched_setattr(SCHED_DEADLINE, runtime={:?}, period={:?}): {}",
            runtime,
            period,
            io::Error::last_os_error()
        );
    }
    log::info!("SCHED_DEADLINE active: runtime {:?} every {:?}", runtime, period);
    Ok(())
}

// NICE - 1. NEEDS CAP_SYS_NICE BELOW THE CURRENT VALUE, SO FAILURE IS COMMON.
pub fn boost_priority() -> io::Result<()> {
    unsafe {
        *libc::__errno_location() = 0;
        let current = libc::getpriority(libc::PRIO_PROCESS, 0);
        if current == -1 && *libc::__errno_location() != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setpriority(libc::PRIO_PROCESS, 0, current - 1) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_layout_is_ver0() {
        // SCHED_ATTR_SIZE_VER0
        assert_eq!(std::mem::size_of::<SchedAttr>(), 48);
    }

    #[test]
    fn deadline_attr_resets_children() {
        let attr = deadline_attr(Duration::from_millis(100), 10);
        assert_eq!(attr.sched_flags & SCHED_FLAG_RESET_ON_FORK, SCHED_FLAG_RESET_ON_FORK);
        assert_eq!(attr.sched_flags & SCHED_FLAG_RECLAIM, SCHED_FLAG_RECLAIM);
        assert_eq!(attr.sched_runtime, 10_000_000);
    }

    #[test]
    fn children_spawn_under_deadline() {
        // sched_setattr(0, ..) ONLY CHANGES THE CALLING THREAD
        let status = std::thread::spawn(|| {
            if let Err(e) = request_deadline(Duration::from_millis(100), 10) {
                eprintln!("SCHED_DEADLINE not permitted here, skipping: {}", e);
                return None;
            }
            Some(std::process::Command::new("/bin/true").status())
        })
        .join()
        .unwrap();
        if let Some(status) = status {
            assert!(status.unwrap().success());
        }
    }

    #[test]
    fn runtime_is_percent_of_period() {
        let p = Duration::from_millis(100);
        assert_eq!(deadline_runtime(p, 10), Duration::from_millis(10));
        assert_eq!(deadline_runtime(p, 100), p);
    }
}
