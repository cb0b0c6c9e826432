//! Process-group signalling for the wrapped command.
//!
//! The wrapped command runs in its own session behind the pty, so most
//! signals the user aims at it (interrupt, suspend, resize, ...) must be
//! re-sent to the child's process *group* to reach pipelines and
//! grandchildren as well.

use std::io;

/// Forward `signal` to the process group led by `pid`, falling back to the
/// pid itself when the group is gone.
///
/// The child calls `setsid()` after fork, so `-pid` addresses the whole
/// group. `missing_is_ok` controls whether a vanished child (`ESRCH`) counts
/// as success — forwarding paths want that, teardown paths do not.
pub fn forward_to_child_group(pid: i32, signal: i32, missing_is_ok: bool) -> io::Result<()> {
    if pid <= 0 {
        return Ok(());
    }

    // SAFETY: kill is called with plain integer pid/signal values; errno is
    // read immediately after each call on this thread.
    unsafe {
        if libc::kill(-pid, signal) == 0 {
            return Ok(());
        }
        let group_err = io::Error::last_os_error();

        if libc::kill(pid, signal) == 0 {
            return Ok(());
        }
        let pid_err = io::Error::last_os_error();

        if missing_is_ok && is_no_such_process(&pid_err) {
            return Ok(());
        }

        Err(io::Error::new(
            pid_err.kind(),
            format!("group(-{pid}): {group_err}; pid({pid}): {pid_err}"),
        ))
    }
}

fn is_no_such_process(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_missing_pid() -> i32 {
        // A very high pid avoids "found missing, then reused" races.
        let high_pid = i32::MAX;
        // SAFETY: signal 0 probes existence/permission without delivering.
        let res = unsafe { libc::kill(high_pid, 0) };
        let err = io::Error::last_os_error();
        if res != 0 && is_no_such_process(&err) {
            return high_pid;
        }

        // SAFETY: getpid has no preconditions.
        let current = unsafe { libc::getpid() };
        let mut candidate = current.saturating_add(10_000);
        for _ in 0..1000 {
            // SAFETY: probe-only signal 0.
            let res = unsafe { libc::kill(candidate, 0) };
            let err = io::Error::last_os_error();
            if res != 0 && is_no_such_process(&err) {
                return candidate;
            }
            candidate = candidate.saturating_add(1);
        }
        panic!("unable to find an unused pid for the forwarding tests")
    }

    #[test]
    fn non_positive_pid_is_a_no_op() {
        assert!(forward_to_child_group(0, libc::SIGTERM, false).is_ok());
        assert!(forward_to_child_group(-1, libc::SIGTERM, false).is_ok());
    }

    #[test]
    fn missing_child_is_ok_only_when_requested() {
        let missing = find_missing_pid();
        assert!(forward_to_child_group(missing, libc::SIGTERM, true).is_ok());
        assert!(forward_to_child_group(missing, libc::SIGTERM, false).is_err());
    }
}
