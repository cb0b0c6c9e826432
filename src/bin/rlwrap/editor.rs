//! The embedded line editor and the bridge that suspends and resumes it
//! around command output.
//!
//! The event loop feeds one byte per keystroke; escape sequences and UTF-8
//! runs are reassembled here. The editor never reads or writes the pty: an
//! accepted line is handed back as an event and the loop queues it. The
//! prompt is painted by the host; the editor repaints prompt plus buffer
//! only when it owns the screen.

use anyhow::Result;
use unicode_width::UnicodeWidthStr;

use crate::completion::CompletionList;
use crate::history::History;
use crate::prompt::PromptTracker;
use crate::terminal::Terminal;
use rlwrap::string_utils::colourless_width_unmarked;

/// How far the homegrown viewport jumps when the cursor runs off an edge.
const JUMPSCROLL_MAX: usize = 10;

/// What a fed byte amounted to.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EditorEvent {
    None,
    /// A finished line, the key that finished it, and whether Ctrl-O asked
    /// for it to stay out of history.
    Accepted { line: String, key: u8, forget: bool },
    /// End-of-file on an empty buffer.
    Eof,
    /// Ctrl-^: hand the buffer to the external editor.
    EditExternally,
}

/// Everything a repaint needs to know about the screen.
pub(crate) struct RedisplayCtx<'a> {
    pub terminal: &'a mut Terminal,
    /// The prompt as painted (may carry SGR escapes).
    pub prompt: &'a str,
    /// Whether escapes in the prompt are width-invisible.
    pub prompt_counts_ansi: bool,
    pub width: u16,
    /// False while a password is being entered: buffer bytes render as `*`.
    pub echo: bool,
}

impl RedisplayCtx<'_> {
    fn prompt_width(&self) -> usize {
        if self.prompt_counts_ansi {
            colourless_width_unmarked(self.prompt)
        } else {
            UnicodeWidthStr::width(self.prompt)
        }
    }
}

#[derive(Debug, Default)]
struct SavedState {
    text: String,
    point: usize,
    already_saved: bool,
}

#[derive(Debug, Default)]
struct EscapeState {
    /// Some while assembling an ESC sequence; holds the bytes after ESC.
    pending: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct ViewportState {
    line_start: usize,
    extends_left: bool,
    extends_right: bool,
    previous_line: Option<String>,
}

#[derive(Debug)]
struct CompletionCycle {
    word_start: usize,
    prefix: String,
    next_index: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Editor {
    buffer: String,
    point: usize,
    yank: String,
    pending_utf8: Vec<u8>,
    escape: EscapeState,
    history_cursor: Option<usize>,
    stash: String,
    cycle: Option<CompletionCycle>,
    saved: SavedState,
    viewport: ViewportState,
    /// Rows below the prompt's first row where the cursor was left by the
    /// last repaint.
    painted_row: usize,
    /// Whether Ctrl-^ is live (multi-line editing configured).
    external_editor_bound: bool,
}

impl Editor {
    pub fn new(external_editor_bound: bool) -> Self {
        Editor {
            external_editor_bound,
            ..Default::default()
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn buffer_is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn point(&self) -> usize {
        self.point
    }

    /// Pre-fill the buffer (the `--pre-given` option) with the cursor at the
    /// end.
    pub fn preseed(&mut self, text: &str) {
        self.saved.text = text.to_string();
        self.saved.point = text.len();
        self.saved.already_saved = true;
    }

    /// Replace the whole buffer (external editor return path).
    pub fn replace_buffer(&mut self, text: &str) {
        self.buffer = text.to_string();
        self.point = 0;
        self.cycle = None;
        self.history_cursor = None;
    }

    /// Snapshot and visually retract the in-progress line so command output
    /// can stream through. Idempotent: a second save before a resume is a
    /// no-op.
    pub fn save(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        if self.saved.already_saved {
            return Ok(());
        }
        self.saved.text = std::mem::take(&mut self.buffer);
        self.saved.point = self.point;
        self.saved.already_saved = true;
        self.point = 0;
        self.redisplay(ctx)?; // erases the buffer, leaves the prompt
        tracing::trace!(target: "readline", text = %self.saved.text, "editor state saved");
        Ok(())
    }

    /// Re-enter editing: repaint prompt plus saved buffer and put the cursor
    /// back where it was.
    pub fn resume(&mut self, ctx: &mut RedisplayCtx<'_>, prompt: &PromptTracker) -> Result<()> {
        prompt.move_to_prompt_start(ctx.terminal, true, ctx.width)?;
        self.buffer = std::mem::take(&mut self.saved.text);
        self.point = self.saved.point.min(self.buffer.len());
        self.saved.already_saved = false;
        self.painted_row = 0;
        self.redisplay(ctx)?;
        tracing::trace!(target: "readline", text = %self.buffer, "editor state restored");
        Ok(())
    }

    /// Repaint prompt and buffer from the prompt's first row, assuming the
    /// cursor already sits there (resize cleanup path).
    pub fn repaint_from_prompt_start(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        self.painted_row = 0;
        self.redisplay(ctx)
    }

    /// Wipe editor state after a line has been dispatched. The accepted line
    /// stays on screen for the command's echo to overwrite.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.point = 0;
        self.saved = SavedState {
            already_saved: true,
            ..Default::default()
        };
        self.history_cursor = None;
        self.stash.clear();
        self.cycle = None;
        self.pending_utf8.clear();
        self.escape = EscapeState::default();
        self.viewport = ViewportState::default();
        self.painted_row = 0;
    }

    /// Feed one keystroke byte. Multi-byte sequences return `None` events
    /// until complete.
    pub fn feed_byte(
        &mut self,
        byte: u8,
        ctx: &mut RedisplayCtx<'_>,
        history: &History,
        completion: &CompletionList,
    ) -> Result<EditorEvent> {
        if self.escape.pending.is_some() {
            return self.feed_escape_byte(byte, ctx, history);
        }
        if !self.pending_utf8.is_empty() || byte >= 0x80 {
            return self.feed_utf8_byte(byte, ctx);
        }
        if byte != b'\t' {
            self.cycle = None;
        }

        match byte {
            0x01 => self.move_point(ctx, 0),                       // C-a
            0x02 => self.step_left(ctx),                           // C-b
            0x04 => {
                if self.buffer.is_empty() {
                    return Ok(EditorEvent::Eof);                   // C-d
                }
                self.delete_at_point(ctx)
            }
            0x05 => self.move_point(ctx, self.buffer.len()),       // C-e
            0x06 => self.step_right(ctx),                          // C-f
            0x08 | 0x7f => self.backspace(ctx),                    // C-h / DEL
            b'\t' => self.complete_word(ctx, completion),          // Tab
            b'\n' | b'\r' => return self.accept(ctx, byte, false),
            0x0b => self.kill_to_end(ctx),                         // C-k
            0x0c => self.clear_and_repaint(ctx),                   // C-l
            0x0e => self.history_step(ctx, history, 1),            // C-n
            0x0f => return self.accept(ctx, b'\n', true),          // C-o
            0x10 => self.history_step(ctx, history, -1),           // C-p
            0x15 => self.kill_to_start(ctx),                       // C-u
            0x17 => self.kill_word_back(ctx),                      // C-w
            0x19 => self.yank(ctx),                                // C-y
            0x1b => {
                self.escape.pending = Some(Vec::new());
                Ok(())
            }
            0x1e if self.external_editor_bound => return Ok(EditorEvent::EditExternally),
            byte if byte >= 0x20 => self.insert_char(ctx, byte as char),
            _ => Ok(()), // unbound control key
        }?;
        Ok(EditorEvent::None)
    }

    fn feed_escape_byte(
        &mut self,
        byte: u8,
        ctx: &mut RedisplayCtx<'_>,
        history: &History,
    ) -> Result<EditorEvent> {
        let mut pending = self.escape.pending.take().unwrap_or_default();
        if pending.is_empty() {
            match byte {
                b'[' | b'O' => {
                    pending.push(byte);
                    self.escape.pending = Some(pending);
                }
                b'b' => self.word_left(ctx)?,
                b'f' => self.word_right(ctx)?,
                _ => {} // unbound meta key
            }
            return Ok(EditorEvent::None);
        }
        if !(0x40..=0x7e).contains(&byte) || byte == b'[' {
            pending.push(byte);
            if pending.len() < 16 {
                self.escape.pending = Some(pending);
            }
            return Ok(EditorEvent::None);
        }
        let args: String = pending[1..].iter().map(|b| *b as char).collect();
        match byte {
            b'A' => self.history_step(ctx, history, -1)?,
            b'B' => self.history_step(ctx, history, 1)?,
            b'C' => self.step_right(ctx)?,
            b'D' => self.step_left(ctx)?,
            b'H' => self.move_point(ctx, 0)?,
            b'F' => self.move_point(ctx, self.buffer.len())?,
            b'~' => match args.as_str() {
                "1" | "7" => self.move_point(ctx, 0)?,
                "4" | "8" => self.move_point(ctx, self.buffer.len())?,
                "3" => self.delete_at_point(ctx)?,
                _ => {}
            },
            _ => {}
        }
        Ok(EditorEvent::None)
    }

    fn feed_utf8_byte(&mut self, byte: u8, ctx: &mut RedisplayCtx<'_>) -> Result<EditorEvent> {
        self.pending_utf8.push(byte);
        let needed = match self.pending_utf8[0] {
            b if b >> 5 == 0b110 => 2,
            b if b >> 4 == 0b1110 => 3,
            b if b >> 3 == 0b11110 => 4,
            _ => 1, // stray continuation byte, drop below
        };
        if self.pending_utf8.len() >= needed {
            let bytes = std::mem::take(&mut self.pending_utf8);
            if let Ok(text) = std::str::from_utf8(&bytes) {
                if let Some(ch) = text.chars().next() {
                    self.insert_char(ctx, ch)?;
                }
            }
        }
        Ok(EditorEvent::None)
    }

    fn accept(
        &mut self,
        ctx: &mut RedisplayCtx<'_>,
        key: u8,
        forget: bool,
    ) -> Result<EditorEvent> {
        // Park the cursor on a predictable column before the command's echo
        // takes over the line.
        self.point = 0;
        self.redisplay(ctx)?;
        Ok(EditorEvent::Accepted {
            line: self.buffer.clone(),
            key,
            forget,
        })
    }

    fn insert_char(&mut self, ctx: &mut RedisplayCtx<'_>, ch: char) -> Result<()> {
        self.buffer.insert(self.point, ch);
        self.point += ch.len_utf8();
        self.history_cursor = None;
        self.redisplay(ctx)
    }

    fn backspace(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        if self.point == 0 {
            return Ok(());
        }
        let prev = previous_char_boundary(&self.buffer, self.point);
        self.buffer.drain(prev..self.point);
        self.point = prev;
        self.redisplay(ctx)
    }

    fn delete_at_point(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        if self.point >= self.buffer.len() {
            return Ok(());
        }
        let next = next_char_boundary(&self.buffer, self.point);
        self.buffer.drain(self.point..next);
        self.redisplay(ctx)
    }

    fn move_point(&mut self, ctx: &mut RedisplayCtx<'_>, to: usize) -> Result<()> {
        self.point = to.min(self.buffer.len());
        self.redisplay(ctx)
    }

    fn step_left(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        if self.point > 0 {
            self.point = previous_char_boundary(&self.buffer, self.point);
        }
        self.redisplay(ctx)
    }

    fn step_right(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        if self.point < self.buffer.len() {
            self.point = next_char_boundary(&self.buffer, self.point);
        }
        self.redisplay(ctx)
    }

    fn word_left(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        let before = &self.buffer[..self.point];
        let trimmed = before.trim_end_matches(|c: char| !c.is_alphanumeric());
        let word_start = trimmed
            .rfind(|c: char| !c.is_alphanumeric())
            .map(|i| next_char_boundary(trimmed, i))
            .unwrap_or(0);
        self.point = word_start;
        self.redisplay(ctx)
    }

    fn word_right(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        let rest = &self.buffer[self.point..];
        let skip_sep = rest.len() - rest.trim_start_matches(|c: char| !c.is_alphanumeric()).len();
        let after_sep = &rest[skip_sep..];
        let word_len = after_sep
            .find(|c: char| !c.is_alphanumeric())
            .unwrap_or(after_sep.len());
        self.point += skip_sep + word_len;
        self.redisplay(ctx)
    }

    fn kill_to_end(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        self.yank = self.buffer.split_off(self.point);
        self.redisplay(ctx)
    }

    fn kill_to_start(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        self.yank = self.buffer.drain(..self.point).collect();
        self.point = 0;
        self.redisplay(ctx)
    }

    fn kill_word_back(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        let before = &self.buffer[..self.point];
        let trimmed_len = before.trim_end_matches(char::is_whitespace).len();
        let word_start = before[..trimmed_len]
            .rfind(char::is_whitespace)
            .map(|i| next_char_boundary(before, i))
            .unwrap_or(0);
        self.yank = self.buffer.drain(word_start..self.point).collect();
        self.point = word_start;
        self.redisplay(ctx)
    }

    fn yank(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        if self.yank.is_empty() {
            return Ok(());
        }
        let text = self.yank.clone();
        self.buffer.insert_str(self.point, &text);
        self.point += text.len();
        self.redisplay(ctx)
    }

    fn clear_and_repaint(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        ctx.terminal.clear_screen()?;
        self.painted_row = 0;
        self.redisplay(ctx)
    }

    fn history_step(
        &mut self,
        ctx: &mut RedisplayCtx<'_>,
        history: &History,
        direction: i32,
    ) -> Result<()> {
        if history.len() == 0 {
            return Ok(());
        }
        let next = match (self.history_cursor, direction) {
            (None, d) if d < 0 => {
                self.stash = self.buffer.clone();
                Some(history.len() - 1)
            }
            (None, _) => None,
            (Some(0), d) if d < 0 => Some(0),
            (Some(i), d) if d < 0 => Some(i - 1),
            (Some(i), _) if i + 1 < history.len() => Some(i + 1),
            (Some(_), _) => {
                // walked past the newest entry: back to the stashed line
                self.buffer = std::mem::take(&mut self.stash);
                self.point = self.buffer.len();
                self.history_cursor = None;
                return self.redisplay(ctx);
            }
        };
        if let Some(index) = next {
            if let Some(entry) = history.entry(index) {
                self.buffer = entry.to_string();
                self.point = self.buffer.len();
                self.history_cursor = Some(index);
            }
        }
        self.redisplay(ctx)
    }

    fn complete_word(
        &mut self,
        ctx: &mut RedisplayCtx<'_>,
        completion: &CompletionList,
    ) -> Result<()> {
        if let Some(cycle) = self.cycle.take() {
            let index = cycle.next_index;
            match completion
                .complete(&cycle.prefix, index)
                .or_else(|| completion.complete(&cycle.prefix, 0))
            {
                Some(word) => {
                    let wrapped = completion.complete(&cycle.prefix, index).is_none();
                    self.buffer.replace_range(cycle.word_start..self.point, &word);
                    self.point = cycle.word_start + word.len();
                    self.cycle = Some(CompletionCycle {
                        next_index: if wrapped { 1 } else { index + 1 },
                        ..cycle
                    });
                    return self.redisplay(ctx);
                }
                None => return Ok(()),
            }
        }

        let word_start = completion.word_start(&self.buffer, self.point);
        let prefix = self.buffer[word_start..self.point].to_string();
        if prefix.is_empty() {
            return Ok(());
        }
        if let Some(extended) = completion.common_prefix(&prefix) {
            self.buffer.replace_range(word_start..self.point, &extended);
            self.point = word_start + extended.len();
            self.cycle = Some(CompletionCycle {
                word_start,
                prefix: extended,
                next_index: 0,
            });
            return self.redisplay(ctx);
        }
        match completion.complete(&prefix, 0) {
            Some(word) => {
                self.buffer.replace_range(word_start..self.point, &word);
                self.point = word_start + word.len();
                self.cycle = Some(CompletionCycle {
                    word_start,
                    prefix,
                    next_index: 1,
                });
                self.redisplay(ctx)
            }
            None => Ok(()),
        }
    }

    /// Repaint prompt plus buffer. Multi-row aware when the terminal can
    /// move vertically and input is echoed; otherwise the single-line
    /// viewport takes over (which also stars out passwords).
    pub fn redisplay(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        if ctx.echo && ctx.terminal.can_move_vertically() {
            self.full_redisplay(ctx)
        } else {
            self.viewport_redisplay(ctx)
        }
    }

    fn display_buffer(&self, ctx: &RedisplayCtx<'_>) -> String {
        if ctx.echo {
            self.buffer.clone()
        } else {
            "*".repeat(self.buffer.chars().count())
        }
    }

    fn full_redisplay(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        let width = ctx.width.max(1) as usize;
        let prompt_width = ctx.prompt_width();

        ctx.terminal.carriage_return()?;
        ctx.terminal.cursor_up(self.painted_row as u16)?;
        ctx.terminal.clear_below()?;
        ctx.terminal.write_str(ctx.prompt)?;
        ctx.terminal.write_str(&self.buffer)?;

        let end = prompt_width + UnicodeWidthStr::width(self.buffer.as_str());
        let target = prompt_width + UnicodeWidthStr::width(&self.buffer[..self.point]);
        let end_row = end / width;
        let target_row = target / width;
        ctx.terminal.cursor_up((end_row - target_row) as u16)?;
        ctx.terminal.cursor_to_column((target % width) as u16)?;
        self.painted_row = target_row;
        Ok(())
    }

    /// Single-line viewport with `<`/`>` truncation marks and jumpscroll,
    /// also responsible for starring passwords.
    fn viewport_redisplay(&mut self, ctx: &mut RedisplayCtx<'_>) -> Result<()> {
        let width = ctx.width.max(2) as usize;
        let skip = (width / 5).clamp(1, JUMPSCROLL_MAX);

        let prompt_chars: Vec<char> = ctx.prompt.chars().collect();
        let prompt_len = prompt_chars.len();
        let invisible = prompt_len.saturating_sub(ctx.prompt_width());

        let shown_buffer = self.display_buffer(ctx);
        let mut line: Vec<char> = prompt_chars;
        line.extend(shown_buffer.chars());
        let total = line.len();
        let curpos = prompt_len + self.buffer[..self.point].chars().count();

        if self.point == 0 {
            self.viewport.line_start = 0;
        }
        let mut line_start = self.viewport.line_start;
        let mut vlinestart = if line_start > prompt_len {
            line_start
        } else {
            invisible
        };
        let extends_left = usize::from(self.viewport.extends_left);
        let extends_right = usize::from(self.viewport.extends_right);

        if curpos.saturating_sub(vlinestart) > width - extends_right {
            // cursor fell off the right edge: jumpscroll left
            vlinestart = curpos + extends_right + skip - width;
        } else if curpos < vlinestart + extends_left {
            // fell off the left edge
            vlinestart = if curpos == total {
                total.saturating_sub(width)
            } else {
                curpos.saturating_sub(extends_left + skip)
            };
        }
        if vlinestart <= invisible {
            line_start = 0;
            vlinestart = invisible;
        } else if vlinestart <= prompt_len {
            line_start = prompt_len;
            vlinestart = prompt_len;
        } else {
            line_start = vlinestart;
        }

        let printwidth = if line_start > 0 {
            width
        } else {
            width + invisible
        };
        let printed = printwidth.min(total - line_start);

        self.viewport.line_start = line_start;
        self.viewport.extends_left = line_start > 0;
        self.viewport.extends_right = total - vlinestart > width;

        let mut new_line: Vec<char> = line[line_start..line_start + printed].to_vec();
        if self.viewport.extends_left {
            new_line[0] = '<';
        }
        if self.viewport.extends_right && printed == printwidth {
            new_line[printwidth - 1] = '>';
        }
        let new_line: String = new_line.into_iter().collect();
        let new_curpos = curpos - vlinestart;

        let keep_old_line = ctx.terminal.can_move_vertically()
            && self.viewport.previous_line.as_deref() == Some(new_line.as_str());
        if !keep_old_line {
            ctx.terminal.clear_line()?;
            ctx.terminal.write_str(&new_line)?;
            self.viewport.previous_line = Some(new_line.clone());
        }
        if ctx.terminal.can_move_vertically() {
            ctx.terminal.cursor_to_column(new_curpos as u16)?;
        } else {
            // cannot address columns: we are one past the last printed char
            let cursor_col = (line_start + printed).saturating_sub(vlinestart);
            ctx.terminal.backspace(cursor_col.saturating_sub(new_curpos))?;
        }
        self.painted_row = 0;
        Ok(())
    }
}

fn previous_char_boundary(text: &str, from: usize) -> usize {
    let mut idx = from - 1;
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_char_boundary(text: &str, from: usize) -> usize {
    let mut idx = from + 1;
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{DecorationContext, DupPolicy};
    use std::path::PathBuf;

    fn fixtures() -> (Terminal, History, CompletionList) {
        let terminal = Terminal::new();
        let history = History::new(
            PathBuf::from("/nonexistent"),
            100,
            true,
            DupPolicy::KeepAll,
            None,
        );
        let completion =
            CompletionList::new(false, false, " \t\n".to_string(), "\"'".to_string());
        (terminal, history, completion)
    }

    fn feed(
        editor: &mut Editor,
        terminal: &mut Terminal,
        history: &History,
        completion: &CompletionList,
        bytes: &[u8],
    ) -> EditorEvent {
        let mut last = EditorEvent::None;
        for &byte in bytes {
            let mut ctx = RedisplayCtx {
                terminal,
                prompt: "> ",
                prompt_counts_ansi: false,
                width: 80,
                echo: true,
            };
            last = editor
                .feed_byte(byte, &mut ctx, history, completion)
                .expect("feed byte");
        }
        last
    }

    #[test]
    fn typed_characters_accumulate_in_the_buffer() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, b"abc");
        assert_eq!(editor.buffer(), "abc");
        assert_eq!(editor.point(), 3);
    }

    #[test]
    fn carriage_return_accepts_the_line() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        let event = feed(&mut editor, &mut terminal, &history, &completion, b"ls\r");
        assert_eq!(
            event,
            EditorEvent::Accepted {
                line: "ls".to_string(),
                key: b'\r',
                forget: false
            }
        );
    }

    #[test]
    fn ctrl_o_accepts_and_forgets() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        let event = feed(&mut editor, &mut terminal, &history, &completion, b"x\x0f");
        assert_eq!(
            event,
            EditorEvent::Accepted {
                line: "x".to_string(),
                key: b'\n',
                forget: true
            }
        );
    }

    #[test]
    fn ctrl_d_on_empty_buffer_is_eof_but_deletes_otherwise() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        let event = feed(&mut editor, &mut terminal, &history, &completion, &[0x04]);
        assert_eq!(event, EditorEvent::Eof);

        feed(&mut editor, &mut terminal, &history, &completion, b"ab\x01");
        let event = feed(&mut editor, &mut terminal, &history, &completion, &[0x04]);
        assert_eq!(event, EditorEvent::None);
        assert_eq!(editor.buffer(), "b");
    }

    #[test]
    fn backspace_and_kill_keys_edit_the_buffer() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, b"hello\x7f");
        assert_eq!(editor.buffer(), "hell");
        feed(&mut editor, &mut terminal, &history, &completion, &[0x15]);
        assert_eq!(editor.buffer(), "");
        feed(&mut editor, &mut terminal, &history, &completion, b"a b c");
        feed(&mut editor, &mut terminal, &history, &completion, &[0x17]);
        assert_eq!(editor.buffer(), "a b ");
        // C-y brings the killed word back
        feed(&mut editor, &mut terminal, &history, &completion, &[0x19]);
        assert_eq!(editor.buffer(), "a b c");
    }

    #[test]
    fn arrow_keys_move_the_point() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, b"ab");
        feed(&mut editor, &mut terminal, &history, &completion, b"\x1b[D");
        assert_eq!(editor.point(), 1);
        feed(&mut editor, &mut terminal, &history, &completion, b"\x1b[C");
        assert_eq!(editor.point(), 2);
        feed(&mut editor, &mut terminal, &history, &completion, b"\x1b[H");
        assert_eq!(editor.point(), 0);
    }

    #[test]
    fn utf8_input_arrives_byte_by_byte() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, "é".as_bytes());
        assert_eq!(editor.buffer(), "é");
        assert_eq!(editor.point(), 2);
    }

    #[test]
    fn history_navigation_recalls_and_returns() {
        let (mut terminal, mut history, completion) = fixtures();
        let ctx = DecorationContext {
            child_pid: 0,
            prompt: "",
            command_name: "test",
        };
        history.add("first", &ctx);
        history.add("second", &ctx);

        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, b"typed");
        feed(&mut editor, &mut terminal, &history, &completion, &[0x10]);
        assert_eq!(editor.buffer(), "second");
        feed(&mut editor, &mut terminal, &history, &completion, &[0x10]);
        assert_eq!(editor.buffer(), "first");
        feed(&mut editor, &mut terminal, &history, &completion, &[0x0e, 0x0e]);
        assert_eq!(editor.buffer(), "typed");
    }

    #[test]
    fn tab_completion_extends_then_cycles() {
        let (mut terminal, history, mut completion) = fixtures();
        completion.add_word("select");
        completion.add_word("selfie");
        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, b"se\t");
        // common prefix "sel" first
        assert_eq!(editor.buffer(), "sel");
        feed(&mut editor, &mut terminal, &history, &completion, b"\t");
        assert_eq!(editor.buffer(), "select");
        feed(&mut editor, &mut terminal, &history, &completion, b"\t");
        assert_eq!(editor.buffer(), "selfie");
    }

    #[test]
    fn save_is_idempotent_and_resume_restores() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, b"half a line");

        let prompt = PromptTracker::new(None);
        let mut ctx = RedisplayCtx {
            terminal: &mut terminal,
            prompt: "> ",
            prompt_counts_ansi: false,
            width: 80,
            echo: true,
        };
        editor.save(&mut ctx).expect("save");
        assert_eq!(editor.buffer(), "");
        editor.save(&mut ctx).expect("second save");
        editor.resume(&mut ctx, &prompt).expect("resume");
        assert_eq!(editor.buffer(), "half a line");
        assert_eq!(editor.point(), 11);
    }

    #[test]
    fn external_editor_key_fires_only_when_bound() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(true);
        let event = feed(&mut editor, &mut terminal, &history, &completion, &[0x1e]);
        assert_eq!(event, EditorEvent::EditExternally);

        let mut unbound = Editor::new(false);
        let event = feed(&mut unbound, &mut terminal, &history, &completion, &[0x1e]);
        assert_eq!(event, EditorEvent::None);
    }

    #[test]
    fn reset_clears_state_for_the_next_line() {
        let (mut terminal, history, completion) = fixtures();
        let mut editor = Editor::new(false);
        feed(&mut editor, &mut terminal, &history, &completion, b"leftover");
        editor.reset();
        assert_eq!(editor.buffer(), "");
        assert_eq!(editor.point(), 0);
    }
}
