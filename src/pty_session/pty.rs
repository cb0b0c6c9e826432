//! Fork the wrapped command behind a pseudo-terminal and keep enough of the
//! pair around to introspect the child's terminal modes afterwards.
//!
//! The slave fd stays open in the parent for exactly one purpose: `tcgetattr`
//! tells us whether the child put its terminal into raw mode or switched echo
//! off (password entry), which drives the line-editing and redisplay
//! decisions upstream.

use anyhow::{anyhow, Context, Result};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::termios::{
    tcgetattr, tcsetattr, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices, Termios,
};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::thread;
use std::time::Duration;

const DEFAULT_VEOF: u8 = 0x04; // ^D

/// Everything the fork needs to know about the command and the user's
/// terminal at spawn time.
pub struct PtySpawnConfig<'a> {
    /// Command and arguments, `argv[0]` included.
    pub argv: &'a [String],
    /// Value for `TERM` in the child, when overridden.
    pub term_override: Option<&'a str>,
    /// The user's terminal attributes, installed on the slave.
    pub termios: Option<&'a Termios>,
    /// The user's window size, installed on the slave.
    pub winsize: Option<Winsize>,
    /// Extra stderr line printed in the child when exec fails (used to hint
    /// at an option argument that swallowed the command word).
    pub exec_fail_hint: Option<&'a str>,
}

/// Parent-side handle on the pty pair and the child.
#[derive(Debug)]
pub struct PtySession {
    master: OwnedFd,
    slave: OwnedFd,
    child_pid: i32,
    always_echo: bool,
}

/// Fork `cfg.argv` over a fresh pty pair. Returns only in the parent; the
/// child execs (or `_exit`s after reporting).
///
/// `install_handlers` runs in the parent immediately after the fork, while
/// `SIGCHLD` is still blocked, so a fast-dying child cannot slip past the
/// handler installation.
///
/// # Errors
///
/// Returns an error when pty allocation or the fork itself fails.
pub fn fork_with_pty(cfg: &PtySpawnConfig<'_>, install_handlers: fn()) -> Result<PtySession> {
    let pty = openpty(cfg.winsize.as_ref(), cfg.termios).context("cannot allocate pty pair")?;

    let argv_c = cstring_argv(cfg.argv)?;
    let term_c = cfg
        .term_override
        .map(|term| CString::new(term).context("TERM value contains a NUL byte"))
        .transpose()?;
    let hint_c = cfg
        .exec_fail_hint
        .map(|hint| CString::new(hint.to_string()).context("hint contains a NUL byte"))
        .transpose()?;

    // Block SIGCHLD until the parent has its handler in place; the child
    // unblocks before exec because the mask survives execvp.
    let mut chld = SigSet::empty();
    chld.add(Signal::SIGCHLD);
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&chld), None).context("cannot block SIGCHLD")?;

    // SAFETY: fork is called while the process is still single-threaded;
    // each branch only touches fds it owns and async-signal-safe calls until
    // exec or return.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&chld), None);
        return Err(anyhow!("cannot fork: {}", io::Error::last_os_error()));
    }

    if pid == 0 {
        child_exec(
            pty.slave,
            pty.master,
            &chld,
            &argv_c,
            term_c.as_deref(),
            hint_c.as_deref(),
        );
    }

    install_handlers();
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&chld), None);

    let mut session = PtySession {
        master: pty.master,
        slave: pty.slave,
        child_pid: pid,
        always_echo: false,
    };

    if tcgetattr(session.master.as_fd()).is_err() {
        // The child may not have initialized its terminal yet; there is no
        // reliable way to sense that from here, so wait a little and retry
        // via the slave.
        thread::sleep(Duration::from_secs(1));
        if tcgetattr(session.slave.as_fd()).is_err() {
            session.always_echo = true;
        }
    }

    Ok(session)
}

fn cstring_argv(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|arg| {
            CString::new(arg.as_str()).with_context(|| format!("argument contains NUL byte: {arg}"))
        })
        .collect()
}

/// Child-side setup after fork. Never returns: execs the command or reports
/// and `_exit`s so the parent can drain the last words naturally.
fn child_exec(
    slave: OwnedFd,
    master: OwnedFd,
    blocked: &SigSet,
    argv: &[CString],
    term_override: Option<&std::ffi::CStr>,
    exec_fail_hint: Option<&std::ffi::CStr>,
) -> ! {
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(blocked), None);
    drop(master);

    let slave_raw = slave.as_raw_fd();
    // SAFETY: only async-signal-safe calls on fds this process owns; every
    // failure path ends in _exit.
    unsafe {
        if libc::setsid() == -1 {
            child_fail("setsid");
        }
        if libc::ioctl(slave_raw, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
            child_fail("ioctl(TIOCSCTTY)");
        }
        if libc::dup2(slave_raw, libc::STDIN_FILENO) < 0 {
            child_fail("dup2 to stdin");
        }
        // Redirected stdout/stderr keep their targets; only ttys are pointed
        // at the slave.
        if libc::isatty(libc::STDOUT_FILENO) == 1 && libc::dup2(slave_raw, libc::STDOUT_FILENO) < 0
        {
            child_fail("dup2 to stdout");
        }
        if libc::isatty(libc::STDERR_FILENO) == 1 && libc::dup2(slave_raw, libc::STDERR_FILENO) < 0
        {
            child_fail("dup2 to stderr");
        }
        if slave_raw > libc::STDERR_FILENO {
            let _ = libc::close(slave_raw);
        }
        std::mem::forget(slave);

        if let Some(term) = term_override {
            let key = b"TERM\0";
            if libc::setenv(key.as_ptr().cast::<libc::c_char>(), term.as_ptr(), 1) != 0 {
                child_fail("setenv(TERM)");
            }
        }

        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());
        libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());

        if let Some(hint) = exec_fail_hint {
            let bytes = hint.to_bytes();
            let _ = libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
            let _ = libc::write(libc::STDERR_FILENO, b"\n".as_ptr().cast(), 1);
        }
        child_fail("cannot execute command");
    }
}

fn child_fail(context: &str) -> ! {
    let err = io::Error::last_os_error();
    let msg = format!("rlwrap (child): {context}: {err}\n");
    // SAFETY: write is async-signal-safe; stderr is open in the child.
    unsafe {
        let _ = libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr().cast::<libc::c_void>(),
            msg.len(),
        );
        // 255 so the parent, which drains and mirrors our status, reports
        // a stillborn child distinctly from the command's own exit codes
        libc::_exit(255);
    }
}

/// When stdout or stderr are redirected, point both at `/dev/tty` in the
/// parent so the wrapper can always paint the screen. Call after the fork:
/// the child has already inherited the redirection targets.
///
/// # Errors
///
/// Returns an error when `/dev/tty` cannot be opened or duplicated.
pub fn reopen_tty_over_stdio() -> Result<()> {
    // SAFETY: isatty/open/dup2/close with owned integer fds only.
    unsafe {
        if libc::isatty(libc::STDOUT_FILENO) == 1 && libc::isatty(libc::STDERR_FILENO) == 1 {
            return Ok(());
        }
        let path = b"/dev/tty\0";
        let ttyfd = libc::open(path.as_ptr().cast::<libc::c_char>(), libc::O_WRONLY);
        if ttyfd < 0 {
            return Err(anyhow!(
                "cannot open /dev/tty: {}",
                io::Error::last_os_error()
            ));
        }
        if libc::dup2(ttyfd, libc::STDOUT_FILENO) != libc::STDOUT_FILENO {
            return Err(anyhow!(
                "dup2 of stdout to /dev/tty failed: {}",
                io::Error::last_os_error()
            ));
        }
        if libc::dup2(ttyfd, libc::STDERR_FILENO) != libc::STDERR_FILENO {
            return Err(anyhow!(
                "dup2 of stderr to /dev/tty failed: {}",
                io::Error::last_os_error()
            ));
        }
        let _ = libc::close(ttyfd);
    }
    Ok(())
}

impl PtySession {
    /// Pid of the wrapped command, 0 once it has been reaped.
    #[must_use]
    pub fn child_pid(&self) -> i32 {
        self.child_pid
    }

    /// Forget the child after the reaper saw it exit.
    pub fn clear_child(&mut self) {
        self.child_pid = 0;
    }

    /// True when terminal-mode introspection failed at startup and the
    /// wrapper must assume echo is always wanted (passwords will show).
    #[must_use]
    pub fn always_echo(&self) -> bool {
        self.always_echo
    }

    #[must_use]
    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    #[must_use]
    pub fn master_raw(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Current terminal attributes of the slave side, i.e. what the child
    /// thinks its terminal looks like.
    #[must_use]
    pub fn slave_termios(&self) -> Option<Termios> {
        match tcgetattr(self.slave.as_fd()) {
            Ok(term) => Some(term),
            Err(err) => {
                tracing::debug!(target: "termio", "tcgetattr on slave failed: {err}");
                None
            }
        }
    }

    /// True when the child cleared `ICANON` on its terminal (character-at-a-
    /// time programs like editors and pagers). Always false in degraded
    /// `always_echo` mode, where we cannot tell.
    #[must_use]
    pub fn slave_in_raw_mode(&self) -> bool {
        if self.always_echo {
            return false;
        }
        self.slave_termios()
            .map(|term| !term.local_flags.contains(LocalFlags::ICANON))
            .unwrap_or(false)
    }

    /// Decide whether typed input should be shown. Mirrors the slave's ECHO
    /// bit, forced on by degraded mode or `--always-readline`, forced off
    /// when the current prompt ends with the configured password marker.
    #[must_use]
    pub fn echo_decision(
        &self,
        child_dead: bool,
        always_readline: bool,
        password_prompt: Option<&str>,
        prompt: &str,
    ) -> bool {
        let mut should_echo_anyway = self.always_echo || always_readline;

        let slave = if !child_dead && !self.always_echo {
            match self.slave_termios() {
                Some(term) => Some(term),
                None => return true, // racing a dying child; keep echo on
            }
        } else {
            None
        };

        if should_echo_anyway {
            if let Some(marker) = password_prompt {
                if prompt.trim_end_matches(' ').ends_with(marker) {
                    should_echo_anyway = false;
                }
            }
        }

        let slave_echo = slave
            .map(|term| term.local_flags.contains(LocalFlags::ECHO))
            .unwrap_or(false);
        !child_dead && (should_echo_anyway || slave_echo)
    }

    /// The slave's end-of-file byte (`VEOF`, normally `^D`).
    #[must_use]
    pub fn veof_byte(&self) -> u8 {
        self.slave_termios()
            .map(|term| term.control_chars[SpecialCharacterIndices::VEOF as usize])
            .unwrap_or(DEFAULT_VEOF)
    }

    /// Translate an accept-key byte per the slave's input flags. `None`
    /// means the byte is swallowed (`IGNCR`).
    #[must_use]
    pub fn translated_eol(&self, key: u8) -> Option<u8> {
        let Some(term) = self.slave_termios() else {
            return Some(key);
        };
        match key {
            b'\n' if term.input_flags.contains(InputFlags::INLCR) => Some(b'\r'),
            b'\r' if term.input_flags.contains(InputFlags::IGNCR) => None,
            b'\r' if term.input_flags.contains(InputFlags::ICRNL) => Some(b'\n'),
            other => Some(other),
        }
    }

    /// Copy the slave's terminal attributes onto stdin (used after an
    /// external editor scrambled them, and in transparent mode).
    pub fn mirror_slave_modes_to_stdin(&self) {
        if let Some(term) = self.slave_termios() {
            // SAFETY: stdin is open for the lifetime of the process.
            let stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
            // ENOTTY (stdin redirected) is harmless here.
            let _ = tcsetattr(stdin, SetArg::TCSANOW, &term);
        }
    }

    /// Push a new window size to the child's terminal.
    pub fn set_winsize(&self, winsize: &Winsize) -> io::Result<()> {
        // SAFETY: ioctl reads a fully initialized winsize from our pointer.
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, winsize) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Write to the master; the caller decides when the fd is writable.
    pub fn write_to_master(&self, bytes: &[u8]) -> io::Result<usize> {
        // SAFETY: plain write on an fd we own with a valid buffer.
        let written = unsafe {
            libc::write(
                self.master.as_raw_fd(),
                bytes.as_ptr().cast::<libc::c_void>(),
                bytes.len(),
            )
        };
        if written < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(written as usize)
        }
    }

    /// Read a chunk of child output from the master.
    pub fn read_from_master(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: plain read into a valid buffer on an fd we own.
        let nread = unsafe {
            libc::read(
                self.master.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if nread < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(nread as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_session() -> PtySession {
        let argv = vec!["cat".to_string()];
        let cfg = PtySpawnConfig {
            argv: &argv,
            term_override: None,
            termios: None,
            winsize: Some(Winsize {
                ws_row: 24,
                ws_col: 80,
                ws_xpixel: 0,
                ws_ypixel: 0,
            }),
            exec_fail_hint: None,
        };
        fork_with_pty(&cfg, || {}).expect("fork cat behind a pty")
    }

    fn reap(session: &PtySession) {
        // SAFETY: pid belongs to a child this test spawned.
        unsafe {
            libc::kill(session.child_pid(), libc::SIGKILL);
            let mut status = 0;
            libc::waitpid(session.child_pid(), &mut status, 0);
        }
    }

    #[test]
    fn fork_with_pty_starts_a_live_child() {
        let session = cat_session();
        assert!(session.child_pid() > 0);
        // SAFETY: probe-only signal 0 on our own child.
        let alive = unsafe { libc::kill(session.child_pid(), 0) } == 0;
        assert!(alive);
        reap(&session);
    }

    #[test]
    fn cat_slave_stays_in_cooked_mode() {
        let session = cat_session();
        assert!(!session.slave_in_raw_mode());
        reap(&session);
    }

    #[test]
    fn echo_round_trips_through_the_pair() {
        let session = cat_session();
        session.write_to_master(b"ping\n").expect("write to master");
        let mut collected = Vec::new();
        let mut buf = [0u8; 256];
        for _ in 0..50 {
            match session.read_from_master(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if collected.windows(4).any(|w| w == b"ping") {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => std::thread::sleep(Duration::from_millis(20)),
            }
        }
        assert!(collected.windows(4).any(|w| w == b"ping"));
        reap(&session);
    }

    #[test]
    fn veof_byte_defaults_to_ctrl_d() {
        let session = cat_session();
        assert_eq!(session.veof_byte(), 0x04);
        reap(&session);
    }

    #[test]
    fn eol_translation_follows_icrnl() {
        let session = cat_session();
        // A fresh pty slave has ICRNL set, so CR becomes NL.
        assert_eq!(session.translated_eol(b'\r'), Some(b'\n'));
        assert_eq!(session.translated_eol(b'\n'), Some(b'\n'));
        reap(&session);
    }

    #[test]
    fn echo_decision_honours_password_marker() {
        let session = cat_session();
        // A password-prompting program switches echo off on its own
        // terminal; emulate that on the slave before asking.
        let mut term = session.slave_termios().expect("slave termios");
        term.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(session.slave.as_fd(), SetArg::TCSANOW, &term).expect("clear slave echo");

        assert!(!session.echo_decision(false, true, Some("assword:"), "Password: "));
        assert!(session.echo_decision(false, true, Some("assword:"), "sql> "));
        assert!(!session.echo_decision(true, true, None, "sql> "));
        reap(&session);
    }
}
