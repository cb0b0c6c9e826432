//! Prompt tracking: infer the command's prompt from its output stream and
//! keep an optionally colourised copy ready for repaints.
//!
//! The prompt is, by definition, whatever the command printed after its last
//! newline. Backspace/CR games (progress bars, spinners) are normalised away
//! first so width computations see what the terminal actually shows.

use anyhow::{bail, Result};
use rlwrap::string_utils::{colourless_width_unmarked, last_screenline, unbackspace};

use crate::terminal::Terminal;

/// Parsed `-p` argument: a validated ANSI attribute triple and the SGR pair
/// built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColourSpec {
    start: String,
    end: &'static str,
}

impl ColourSpec {
    /// Parse `attr;fg[;bg]` with the classic ranges: attr 0-8, foreground
    /// 30-37, background 40-47.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.split(';');
        let attr: i32 = next_number(&mut parts)?;
        let fg: i32 = next_number(&mut parts)?;
        let bg: i32 = match parts.next() {
            Some(part) => part.trim().parse().unwrap_or(-1),
            None => 40, // unspecified background is fine
        };
        if parts.next().is_some()
            || !(0..=8).contains(&attr)
            || !(30..=37).contains(&fg)
            || !(40..=47).contains(&bg)
        {
            bail!(
                "prompt colour spec should be <attr>;<fg>[;<bg>]\n\
                 where <attr> ranges over [0...8], <fg> over [30...37] and <bg> over [40...47]\n\
                 example: 0;33 for yellow on current background, 1;31;40 for bold red on black"
            );
        }
        Ok(ColourSpec {
            start: format!("\x1b[{spec}m"),
            end: "\x1b[0m",
        })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        self.end
    }
}

fn next_number(parts: &mut std::str::Split<'_, char>) -> Result<i32> {
    match parts.next().map(|p| p.trim().parse::<i32>()) {
        Some(Ok(n)) => Ok(n),
        _ => bail!("prompt colour spec should look like 1;31 or 0;33;40"),
    }
}

#[derive(Debug, Default)]
pub(crate) struct PromptTracker {
    prompt: String,
    coloured: Option<String>,
    spec: Option<ColourSpec>,
    /// The accepted line is about to be echoed by the command; do not paint
    /// over it on the next output chunk.
    pub leave_alone: bool,
    /// A fresh prompt is on screen uncoloured; colour it when the output
    /// stream has been quiet for a moment.
    pub wait_recolour: bool,
}

impl PromptTracker {
    pub fn new(spec: Option<ColourSpec>) -> Self {
        PromptTracker {
            spec,
            ..Default::default()
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn coloured(&self) -> Option<&str> {
        self.coloured.as_deref()
    }

    pub fn colouring_enabled(&self) -> bool {
        self.spec.is_some()
    }

    /// The prompt to hand the editor: coloured when colouring is on and a
    /// coloured copy exists.
    pub fn effective_prompt(&self) -> &str {
        self.coloured.as_deref().unwrap_or(&self.prompt)
    }

    /// Digest a chunk of command output. `single_line` truncates the prompt
    /// to its last screen row (horizontal-scroll editing); `width` is the
    /// current terminal width.
    pub fn update_from_chunk(&mut self, chunk: &str, single_line: bool, width: u16) {
        let new_prompt = match chunk.rfind('\n') {
            Some(pos) => {
                self.leave_alone = false;
                chunk[pos + 1..].to_string()
            }
            None => format!("{}{chunk}", self.prompt),
        };
        let normalised = unbackspace(&new_prompt);
        self.prompt = if single_line {
            last_screenline(&normalised, width as usize)
        } else {
            normalised
        };
        tracing::trace!(target: "readline", prompt = %self.prompt, "prompt updated");

        if self.spec.is_some() {
            self.coloured = if self.prompt.is_empty() {
                Some(String::new())
            } else {
                Some(self.colourise(&self.prompt, width))
            };
            // Wait for the stream to go quiet before painting colour: more
            // of the same line may still be on its way.
            self.wait_recolour = true;
        }
    }

    /// Wrap the non-space part of a prompt in the configured SGR pair.
    /// Prompts that already contain escapes, or that would no longer fit on
    /// one row with the escapes added, are left alone.
    pub fn colourise(&self, prompt: &str, width: u16) -> String {
        let Some(spec) = &self.spec else {
            return prompt.to_string();
        };
        let budget = prompt.chars().count() + spec.start().len() + spec.end().len() + 4;
        if prompt.contains('\x1b') || budget >= width as usize {
            return prompt.to_string();
        }
        let trimmed_len = prompt.trim_end_matches(' ').len();
        let (body, trailing_space) = prompt.split_at(trimmed_len);
        format!("{}{body}{}{trailing_space}", spec.start(), spec.end())
    }

    /// Recompute the coloured copy after a width change (the fit check
    /// depends on it).
    pub fn recolour_for_width(&mut self, width: u16) {
        if self.spec.is_some() && !self.prompt.is_empty() {
            self.coloured = Some(self.colourise(&self.prompt.clone(), width));
        }
    }

    /// Repaint the prompt in place, coloured or plain. Skipped entirely when
    /// the command's echo owns the line or the session is in transparent
    /// mode.
    pub fn reprint(
        &mut self,
        coloured: bool,
        terminal: &mut Terminal,
        within_line_edit: bool,
        width: u16,
        transparent: bool,
    ) -> Result<()> {
        if self.leave_alone || transparent {
            return Ok(());
        }
        if coloured {
            if let Some(painted) = self.coloured.clone().filter(|c| !c.is_empty()) {
                self.move_to_prompt_start(terminal, within_line_edit, width)?;
                terminal.write_str(&painted)?;
            }
        } else {
            if !self.prompt.is_empty() {
                let plain = self.prompt.clone();
                self.move_to_prompt_start(terminal, within_line_edit, width)?;
                terminal.write_str(&plain)?;
            }
            self.coloured = None;
        }
        Ok(())
    }

    /// Put the cursor on the first column of the row the prompt starts on.
    /// A prompt longer than the terminal is wide occupies several rows; when
    /// the user has already pressed a key the cursor sits one column past
    /// the prompt, which matters exactly at the wrap boundary.
    pub fn move_to_prompt_start(
        &self,
        terminal: &mut Terminal,
        within_line_edit: bool,
        width: u16,
    ) -> Result<()> {
        let shown = colourless_width_unmarked(self.effective_prompt());
        let cursor_extra = usize::from(within_line_edit);
        let rows = 1 + (shown + cursor_extra).saturating_sub(1) / width.max(1) as usize;
        terminal.carriage_return()?;
        terminal.cursor_up((rows - 1) as u16)?;
        tracing::trace!(target: "readline", rows, shown, "moved to prompt start");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with_colour() -> PromptTracker {
        PromptTracker::new(Some(ColourSpec::parse("1;31").expect("valid spec")))
    }

    #[test]
    fn colour_spec_accepts_classic_triples() {
        assert!(ColourSpec::parse("1;31").is_ok());
        assert!(ColourSpec::parse("0;33;40").is_ok());
        let spec = ColourSpec::parse("1;31").unwrap();
        assert_eq!(spec.start(), "\x1b[1;31m");
        assert_eq!(spec.end(), "\x1b[0m");
    }

    #[test]
    fn colour_spec_rejects_out_of_range_values() {
        assert!(ColourSpec::parse("9;31").is_err());
        assert!(ColourSpec::parse("1;38").is_err());
        assert!(ColourSpec::parse("1;31;48").is_err());
        assert!(ColourSpec::parse("bold").is_err());
        assert!(ColourSpec::parse("").is_err());
    }

    #[test]
    fn chunk_with_newline_starts_a_fresh_prompt() {
        let mut tracker = PromptTracker::new(None);
        tracker.update_from_chunk("line one\nhi> ", false, 80);
        assert_eq!(tracker.prompt(), "hi> ");
    }

    #[test]
    fn chunk_without_newline_extends_the_prompt() {
        let mut tracker = PromptTracker::new(None);
        tracker.update_from_chunk("hi", false, 80);
        tracker.update_from_chunk("> ", false, 80);
        assert_eq!(tracker.prompt(), "hi> ");
    }

    #[test]
    fn prompt_is_unbackspaced() {
        let mut tracker = PromptTracker::new(None);
        tracker.update_from_chunk("\nabx\u{8}c> ", false, 80);
        assert_eq!(tracker.prompt(), "abc> ");
    }

    #[test]
    fn single_line_mode_keeps_only_the_last_screen_row() {
        let mut tracker = PromptTracker::new(None);
        let long = format!("\n{}", "x".repeat(25));
        tracker.update_from_chunk(&long, true, 10);
        assert_eq!(tracker.prompt(), "x".repeat(5));
    }

    #[test]
    fn colourise_wraps_but_keeps_trailing_space_plain() {
        let tracker = tracker_with_colour();
        assert_eq!(
            tracker.colourise("sql> ", 80),
            "\x1b[1;31msql>\x1b[0m "
        );
    }

    #[test]
    fn colourise_leaves_escaped_or_overlong_prompts_alone() {
        let tracker = tracker_with_colour();
        assert_eq!(tracker.colourise("\x1b[1mX> ", 80), "\x1b[1mX> ");
        let long = "y".repeat(75);
        assert_eq!(tracker.colourise(&long, 80), long);
    }

    #[test]
    fn update_sets_the_recolour_flag_only_when_colouring() {
        let mut plain = PromptTracker::new(None);
        plain.update_from_chunk("hi> ", false, 80);
        assert!(!plain.wait_recolour);

        let mut coloured = tracker_with_colour();
        coloured.update_from_chunk("hi> ", false, 80);
        assert!(coloured.wait_recolour);
        assert_eq!(coloured.coloured(), Some("\x1b[1;31mhi>\x1b[0m "));
    }

    #[test]
    fn newline_clears_leave_alone() {
        let mut tracker = PromptTracker::new(None);
        tracker.leave_alone = true;
        tracker.update_from_chunk("echoed input\nnext> ", false, 80);
        assert!(!tracker.leave_alone);
    }
}
