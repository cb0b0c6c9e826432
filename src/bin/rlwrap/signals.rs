//! Signal handling: handlers translate delivery into atomic flags (plus
//! bounded forwarding to the child's process group) and the event loop does
//! the real work on its next turn.
//!
//! SIGWINCH and SIGTSTP want to mutate editor and screen state, so they stay
//! blocked except while the loop sits in pselect; their handlers never touch
//! more than an atomic.

use nix::sys::signal::{SigSet, SigmaskHow, Signal};
#[cfg(not(debug_assertions))]
use rlwrap::terminal_restore;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static WINCH_RECEIVED: AtomicBool = AtomicBool::new(false);
static TSTP_RECEIVED: AtomicBool = AtomicBool::new(false);
static TERM_RECEIVED: AtomicBool = AtomicBool::new(false);
static CHILD_DEAD: AtomicBool = AtomicBool::new(false);
static CHILD_STATUS: AtomicI32 = AtomicI32::new(0);
static CHILD_PID: AtomicI32 = AtomicI32::new(0);

/// User-aimed signals that are re-sent to the child's process group as-is.
const FORWARDED_SIGNALS: &[libc::c_int] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGABRT,
    libc::SIGTERM,
    libc::SIGCONT,
    libc::SIGUSR1,
    libc::SIGUSR2,
];

/// Forwarding handler: flag SIGTERM for the loop, pass the signal on.
extern "C" fn handle_forward(signo: libc::c_int) {
    if signo == libc::SIGTERM {
        TERM_RECEIVED.store(true, Ordering::SeqCst);
    }
    let pid = CHILD_PID.load(Ordering::SeqCst);
    if pid > 0 {
        // SAFETY: kill is async-signal-safe.
        unsafe {
            libc::kill(-pid, signo);
        }
    }
}

/// Resize handler. Forwarding is NOT done here: the loop forwards only when
/// the geometry really changed, because the child's own TIOCSWINSZ on the
/// slave would bounce straight back as another SIGWINCH.
extern "C" fn handle_winch(_: libc::c_int) {
    WINCH_RECEIVED.store(true, Ordering::SeqCst);
}

/// Suspend handler. The loop saves editor state, forwards the stop, and
/// re-raises it on itself with the default disposition.
extern "C" fn handle_tstp(_: libc::c_int) {
    TSTP_RECEIVED.store(true, Ordering::SeqCst);
}

/// Reap the child without exiting: the loop drains any remaining output
/// first, so the child's last words still reach the screen.
extern "C" fn handle_chld(_: libc::c_int) {
    loop {
        let mut status = 0;
        // SAFETY: waitpid with WNOHANG is async-signal-safe.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid == -1 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        if pid > 0 && pid == CHILD_PID.load(Ordering::SeqCst) {
            CHILD_STATUS.store(status, Ordering::SeqCst);
            CHILD_DEAD.store(true, Ordering::SeqCst);
            CHILD_PID.store(0, Ordering::SeqCst);
        }
        return;
    }
}

/// Leave the terminal usable even after sudden death. Debug builds keep the
/// default disposition so a core dump survives.
#[cfg(not(debug_assertions))]
extern "C" fn handle_segv(_: libc::c_int) {
    let msg = b"\nrlwrap: Oops, segfault - this should not have happened!\nResetting terminal and cleaning up...\n";
    // SAFETY: write/tcsetattr/_exit are async-signal-safe; the saved termios
    // is a plain struct copied out of a OnceLock set during startup.
    unsafe {
        libc::write(libc::STDERR_FILENO, b"\x1b[0m".as_ptr().cast(), 4);
        if let Some(saved) = terminal_restore::saved_user_termios() {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, &saved);
        }
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(1);
    }
}

fn install(signo: libc::c_int, handler: extern "C" fn(libc::c_int)) {
    // SAFETY: sigaction with a zeroed, initialized struct and a handler that
    // only performs async-signal-safe work.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as *const () as usize;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signo, &action, std::ptr::null_mut());
    }
}

fn restore_default(signo: libc::c_int) {
    // SAFETY: resetting a disposition to SIG_DFL.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signo, &action, std::ptr::null_mut());
    }
}

/// Install every handler. Runs right after the fork, while SIGCHLD is still
/// blocked, so a fast-dying child is reaped by us and not by default
/// disposition.
pub(crate) fn install_signal_handlers() {
    install(libc::SIGCHLD, handle_chld);
    install(libc::SIGTSTP, handle_tstp);
    install(libc::SIGWINCH, handle_winch);
    #[cfg(not(debug_assertions))]
    install(libc::SIGSEGV, handle_segv);
    for &signo in FORWARDED_SIGNALS {
        install(signo, handle_forward);
    }
}

pub(crate) fn uninstall_signal_handlers() {
    restore_default(libc::SIGCHLD);
    restore_default(libc::SIGTSTP);
    restore_default(libc::SIGWINCH);
    #[cfg(not(debug_assertions))]
    restore_default(libc::SIGSEGV);
    for &signo in FORWARDED_SIGNALS {
        restore_default(signo);
    }
}

/// Block the signals whose handling mutates editor state; the loop unblocks
/// them only inside pselect.
pub(crate) fn block_messy_signals() {
    let _ = nix::sys::signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&messy_signals()), None);
}

fn messy_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGWINCH);
    set.add(Signal::SIGTSTP);
    set
}

/// The mask to sit in pselect with: everything open.
pub(crate) fn select_sigmask() -> SigSet {
    SigSet::empty()
}

pub(crate) fn set_child_pid(pid: i32) {
    CHILD_PID.store(pid, Ordering::SeqCst);
}

pub(crate) fn child_is_dead() -> bool {
    CHILD_DEAD.load(Ordering::SeqCst)
}

pub(crate) fn child_exit_status() -> i32 {
    CHILD_STATUS.load(Ordering::SeqCst)
}

pub(crate) fn sigterm_received() -> bool {
    TERM_RECEIVED.load(Ordering::SeqCst)
}

pub(crate) fn take_winch() -> bool {
    WINCH_RECEIVED.swap(false, Ordering::SeqCst)
}

pub(crate) fn take_tstp() -> bool {
    TSTP_RECEIVED.swap(false, Ordering::SeqCst)
}

/// Genuinely suspend ourselves with the default SIGTSTP disposition. The
/// caller forwards the stop to the child group and saves editor state
/// first; on return the process has been continued and the handler is back
/// in place.
pub(crate) fn suspend_self() {
    restore_default(libc::SIGTSTP);
    let mut tstp = SigSet::empty();
    tstp.add(Signal::SIGTSTP);
    let _ = nix::sys::signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&tstp), None);
    // SAFETY: re-raising SIGTSTP with default disposition stops the process
    // here; execution resumes on SIGCONT.
    unsafe {
        libc::kill(libc::getpid(), libc::SIGTSTP);
    }
    // ... keyboard gathers dust, kingdoms crumble, then someone types fg:
    let _ = nix::sys::signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&tstp), None);
    install(libc::SIGTSTP, handle_tstp);
    tracing::debug!(target: "signals", "woken up after suspend");
}

/// Die by `signo` so our parent observes the child's true fate. Handlers
/// are uninstalled first so the signal is not forwarded or swallowed.
pub(crate) fn suicide_by(signo: i32) -> ! {
    uninstall_signal_handlers();
    tracing::debug!(target: "signals", signo, "re-raising the child's fatal signal");
    let all = SigSet::all();
    let _ = nix::sys::signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&all), None);
    // SAFETY: raising a default-disposition signal on ourselves.
    unsafe {
        libc::kill(libc::getpid(), signo);
    }
    // if still alive
    std::process::exit(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winch_flag_is_set_and_consumed_once() {
        WINCH_RECEIVED.store(false, Ordering::SeqCst);
        handle_winch(0);
        assert!(take_winch());
        assert!(!take_winch());
    }

    #[test]
    fn tstp_flag_is_set_and_consumed_once() {
        TSTP_RECEIVED.store(false, Ordering::SeqCst);
        handle_tstp(0);
        assert!(take_tstp());
        assert!(!take_tstp());
    }

    #[test]
    fn sigterm_forwarding_sets_the_flag() {
        TERM_RECEIVED.store(false, Ordering::SeqCst);
        CHILD_PID.store(0, Ordering::SeqCst);
        handle_forward(libc::SIGTERM);
        assert!(sigterm_received());
    }

    #[test]
    fn installed_winch_handler_reacts_to_a_real_signal() {
        WINCH_RECEIVED.store(false, Ordering::SeqCst);
        install(libc::SIGWINCH, handle_winch);
        // SAFETY: raising SIGWINCH at ourselves for test purposes.
        unsafe {
            libc::raise(libc::SIGWINCH);
        }
        for _ in 0..20 {
            if take_winch() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("SIGWINCH was not delivered to the handler");
    }

    #[test]
    fn child_reaper_records_exit_status() {
        CHILD_DEAD.store(false, Ordering::SeqCst);
        // SAFETY: fork+_exit in a test child; waitpid happens in the
        // handler under test.
        let pid = unsafe { libc::fork() };
        if pid == 0 {
            // SAFETY: child exits immediately.
            unsafe { libc::_exit(7) };
        }
        set_child_pid(pid);
        for _ in 0..100 {
            handle_chld(0);
            if child_is_dead() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(child_is_dead());
        let status = child_exit_status();
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 7);
        CHILD_DEAD.store(false, Ordering::SeqCst);
    }
}
