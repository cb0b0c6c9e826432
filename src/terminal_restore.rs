//! Terminal-state guards that prevent broken shells after exit or panic paths.
//!
//! The wrapper puts the user's terminal into CBREAK mode and later mirrors
//! arbitrary slave-pty modes onto it, so the only reliable restoration is a
//! snapshot of the original termios taken before any of that happens. The
//! snapshot lives in process-wide state because the panic hook and the
//! segfault handler must reach it without a context struct.

use std::io::Write;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static SAVED_TERMIOS: OnceLock<libc::termios> = OnceLock::new();
static COLOURS_ACTIVE: AtomicBool = AtomicBool::new(false);
static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

/// Snapshot the user's terminal attributes from stdin. Returns `false` when
/// stdin is not a terminal (nothing to restore later).
pub fn save_user_termios() -> bool {
    // SAFETY: tcgetattr writes into an initialized out-struct and is handed
    // a fixed, valid fd.
    unsafe {
        let mut term: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(libc::STDIN_FILENO, &mut term) == 0 {
            let _ = SAVED_TERMIOS.set(term);
            true
        } else {
            false
        }
    }
}

/// The snapshot taken by [`save_user_termios`], if any.
pub fn saved_user_termios() -> Option<libc::termios> {
    SAVED_TERMIOS.get().copied()
}

/// Record whether a colourised prompt may be on screen, so restoration knows
/// to reset SGR attributes first.
pub fn set_colours_active(active: bool) {
    COLOURS_ACTIVE.store(active, Ordering::SeqCst);
}

/// Put the terminal back the way we found it. Safe to call more than once
/// and from the panic hook; every step is best-effort.
pub fn restore_terminal() {
    if COLOURS_ACTIVE.swap(false, Ordering::SeqCst) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x1b[0m");
        let _ = stdout.flush();
    }
    if let Some(saved) = SAVED_TERMIOS.get() {
        // SAFETY: saved is a complete termios captured from this terminal.
        unsafe {
            let _ = libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, saved);
        }
    }
}

/// RAII guard so early-return and error paths restore the terminal without
/// remembering to.
pub struct TerminalRestoreGuard;

impl TerminalRestoreGuard {
    /// Create a guard and install the shared panic hook (once).
    #[must_use]
    pub fn new() -> Self {
        install_terminal_panic_hook();
        TerminalRestoreGuard
    }
}

impl Default for TerminalRestoreGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TerminalRestoreGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Install a panic hook that restores the terminal before delegating to the
/// previous hook.
pub fn install_terminal_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_terminal();
            previous(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_terminal_panic_hook_sets_once_flag() {
        install_terminal_panic_hook();
        assert!(PANIC_HOOK_INSTALLED.get().is_some());
    }

    #[test]
    fn restore_terminal_clears_colour_flag() {
        COLOURS_ACTIVE.store(true, Ordering::SeqCst);
        restore_terminal();
        assert!(!COLOURS_ACTIVE.load(Ordering::SeqCst));
    }

    #[test]
    fn guard_drop_runs_restore() {
        COLOURS_ACTIVE.store(true, Ordering::SeqCst);
        {
            let _guard = TerminalRestoreGuard::new();
        }
        assert!(!COLOURS_ACTIVE.load(Ordering::SeqCst));
    }

    #[test]
    fn saved_termios_is_none_until_captured() {
        // In a test runner stdin may or may not be a tty; the accessor must
        // simply agree with what the save call reported.
        let have_tty = save_user_termios();
        assert_eq!(saved_user_termios().is_some(), have_tty);
    }
}
