//! Driver for the user's terminal: mode switches, cursor motion and line
//! clearing, window-size queries.
//!
//! All painting goes to stdout, which main() re-points at `/dev/tty` when
//! the user redirected it; the child keeps the redirection target. Terminals
//! that cannot move the cursor vertically (`TERM` unset or `dumb`) degrade
//! to single-line editing, so every vertical motion funnels through the
//! capability check here.

use crossterm::cursor::{MoveDown, MoveToColumn, MoveUp};
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use nix::pty::Winsize;
use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, SpecialCharacterIndices};
use std::env;
use std::io::{self, Write};
use std::os::fd::BorrowedFd;

#[derive(Debug)]
pub(crate) struct Terminal {
    can_move_vertically: bool,
}

impl Terminal {
    pub fn new() -> Self {
        let term = env::var("TERM").unwrap_or_default();
        Terminal {
            can_move_vertically: !term.is_empty() && term != "dumb",
        }
    }

    /// Whether the terminal supports moving the cursor up/down and absolute
    /// column positioning. Without it, multi-line repaints are skipped and
    /// the editor stays in single-line (horizontal-scroll) mode.
    pub fn can_move_vertically(&self) -> bool {
        self.can_move_vertically
    }

    /// Switch the user's terminal between echoing and silent input. Always
    /// leaves it in CBREAK mode: one key at a time, no kernel line editing.
    pub fn set_echo(&self, on: bool) -> io::Result<()> {
        // SAFETY: stdin stays open for the lifetime of the process.
        let stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
        let mut term = tcgetattr(stdin).map_err(io::Error::from)?;
        term.local_flags.remove(LocalFlags::ICANON);
        if on {
            term.local_flags.insert(LocalFlags::ECHO);
        } else {
            term.local_flags.remove(LocalFlags::ECHO);
        }
        term.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        term.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        tcsetattr(stdin, SetArg::TCSANOW, &term).map_err(io::Error::from)
    }

    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut out = io::stdout();
        out.write_all(bytes)?;
        out.flush()
    }

    pub fn carriage_return(&mut self) -> io::Result<()> {
        self.write_bytes(b"\r")
    }

    pub fn newline(&mut self) -> io::Result<()> {
        self.write_bytes(b"\n")
    }

    /// Erase the current line and leave the cursor in column 0.
    pub fn clear_line(&mut self) -> io::Result<()> {
        let mut out = io::stdout();
        out.queue(MoveToColumn(0))?;
        out.queue(Clear(ClearType::CurrentLine))?;
        out.flush()
    }

    /// Erase from the cursor to the end of the screen.
    pub fn clear_below(&mut self) -> io::Result<()> {
        let mut out = io::stdout();
        out.queue(Clear(ClearType::FromCursorDown))?;
        out.flush()
    }

    /// Erase the whole screen and home the cursor.
    pub fn clear_screen(&mut self) -> io::Result<()> {
        let mut out = io::stdout();
        out.queue(crossterm::cursor::MoveTo(0, 0))?;
        out.queue(Clear(ClearType::All))?;
        out.flush()
    }

    pub fn cursor_up(&mut self, rows: u16) -> io::Result<()> {
        if rows == 0 || !self.can_move_vertically {
            return Ok(());
        }
        let mut out = io::stdout();
        out.queue(MoveUp(rows))?;
        out.flush()
    }

    pub fn cursor_down(&mut self, rows: u16) -> io::Result<()> {
        if rows == 0 || !self.can_move_vertically {
            return Ok(());
        }
        let mut out = io::stdout();
        out.queue(MoveDown(rows))?;
        out.flush()
    }

    /// Absolute column positioning; callers fall back to redrawing plus
    /// [`Terminal::backspace`] when [`Terminal::can_move_vertically`] says
    /// the terminal is too dumb for it.
    pub fn cursor_to_column(&mut self, col: u16) -> io::Result<()> {
        let mut out = io::stdout();
        out.queue(MoveToColumn(col))?;
        out.flush()
    }

    /// Move the cursor left by emitting backspaces.
    pub fn backspace(&mut self, count: usize) -> io::Result<()> {
        if count == 0 {
            return Ok(());
        }
        let bytes = vec![0x08u8; count];
        self.write_bytes(&bytes)
    }
}

/// Current window size of the user's terminal, with the same fallbacks the
/// rest of the ecosystem uses: ioctl, then `COLUMNS`/`LINES`, then 80x24.
pub(crate) fn query_winsize() -> Winsize {
    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: ioctl writes a winsize into our initialized struct.
    let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc != 0 || ws.ws_col == 0 || ws.ws_row == 0 {
        ws.ws_col = parse_env_dimension("COLUMNS").unwrap_or(80);
        ws.ws_row = parse_env_dimension("LINES").unwrap_or(24);
    }
    ws
}

fn parse_env_dimension(key: &str) -> Option<u16> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_winsize_always_reports_something_usable() {
        let ws = query_winsize();
        assert!(ws.ws_col > 0);
        assert!(ws.ws_row > 0);
    }

    #[test]
    fn backspace_zero_is_a_no_op() {
        let mut terminal = Terminal::new();
        terminal.backspace(0).expect("no-op backspace");
    }

    #[test]
    fn dumb_terminal_cannot_move_vertically() {
        let saved = env::var("TERM").ok();
        env::set_var("TERM", "dumb");
        assert!(!Terminal::new().can_move_vertically());
        env::set_var("TERM", "xterm-256color");
        assert!(Terminal::new().can_move_vertically());
        match saved {
            Some(value) => env::set_var("TERM", value),
            None => env::remove_var("TERM"),
        }
    }
}
