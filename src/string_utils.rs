//! Text manglers shared by the prompt tracker, editor and history code.
//!
//! Everything here works on plain strings and stays free of terminal or
//! process state, so the contracts are unit-testable in isolation.

use unicode_width::UnicodeWidthStr;

const BACKSPACE: char = '\u{8}';
const CARRIAGE_RETURN: char = '\r';
const ESCAPE: char = '\u{1b}';

/// Marker pair bracketing zero-width sequences so width computation can skip
/// them. The values match the readline convention (SOH/STX) so prompts that
/// already carry them are handled transparently.
pub const IGNORE_START: char = '\u{1}';
pub const IGNORE_END: char = '\u{2}';

/// Replay backspaces and carriage returns, producing the string a terminal
/// would actually leave on screen. `\b` steps the write position back one
/// character (never past the start), `\r` resets it to the start; characters
/// already written survive unless overwritten.
pub fn unbackspace(input: &str) -> String {
    let mut display: Vec<char> = Vec::with_capacity(input.len());
    let mut pos: usize = 0;
    for ch in input.chars() {
        match ch {
            BACKSPACE => pos = pos.saturating_sub(1),
            CARRIAGE_RETURN => pos = 0,
            _ => {
                if pos < display.len() {
                    display[pos] = ch;
                } else {
                    display.push(ch);
                }
                pos += 1;
            }
        }
    }
    display.into_iter().collect()
}

/// Bracket `ESC [ ... m` colour sequences with [`IGNORE_START`]/[`IGNORE_END`]
/// so that [`colourless_width`] can skip them.
pub fn mark_invisible(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == ESCAPE && matches!(chars.peek(), Some('[') | Some(']')) {
            out.push(IGNORE_START);
            out.push(ch);
            out.push(chars.next().unwrap_or_default());
            while matches!(chars.peek(), Some(c) if c.is_ascii_digit() || *c == ';') {
                out.push(chars.next().unwrap_or_default());
            }
            if matches!(chars.peek(), Some('m')) {
                out.push(chars.next().unwrap_or_default());
            }
            out.push(IGNORE_END);
        } else {
            out.push(ch);
        }
    }
    out
}

/// Display width of a marked string, counting only characters outside
/// [`IGNORE_START`]/[`IGNORE_END`] brackets.
pub fn colourless_width(marked: &str) -> usize {
    let mut counting = true;
    let mut width = 0;
    for ch in marked.chars() {
        match ch {
            IGNORE_START => counting = false,
            IGNORE_END => counting = true,
            _ if counting => {
                let mut buf = [0u8; 4];
                width += UnicodeWidthStr::width(&*ch.encode_utf8(&mut buf));
            }
            _ => {}
        }
    }
    width
}

/// Copy of a marked string with the ignore markers removed (the form that is
/// actually written to the terminal).
pub fn strip_ignore_markers(marked: &str) -> String {
    marked
        .chars()
        .filter(|c| *c != IGNORE_START && *c != IGNORE_END)
        .collect()
}

/// Display width of an unmarked string, skipping any embedded SGR sequences.
pub fn colourless_width_unmarked(input: &str) -> usize {
    colourless_width(&mark_invisible(input))
}

/// Cursor location after a substitution, 1-based the way editors count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPos {
    pub line: usize,
    pub column: usize,
}

/// Replace every occurrence of `pattern` with `replacement`, treating each
/// replacement as a line break for cursor accounting: `cursor` (a byte offset
/// into `input`) is translated into the (line, column) it lands on in the
/// rewritten text.
pub fn search_and_replace(
    pattern: &str,
    replacement: &str,
    input: &str,
    cursor: usize,
) -> (String, CursorPos) {
    debug_assert!(!pattern.is_empty());
    let mut out = String::with_capacity(input.len());
    let mut pos = CursorPos { line: 1, column: 1 };
    let mut cursor_seen = cursor == 0;
    let mut line = 1;
    let mut column = 1;
    let mut i = 0;
    let bytes = input.as_bytes();
    while i < input.len() {
        if input[i..].starts_with(pattern) {
            i += pattern.len();
            out.push_str(replacement);
            line += 1;
            column = 1;
        } else {
            // advance one UTF-8 character
            let mut end = i + 1;
            while end < input.len() && (bytes[end] & 0xc0) == 0x80 {
                end += 1;
            }
            out.push_str(&input[i..end]);
            i = end;
            column += 1;
        }
        if i >= cursor && !cursor_seen {
            cursor_seen = true;
            pos = CursorPos { line, column };
        }
    }
    (out, pos)
}

/// Plain multi-pattern substitution without cursor bookkeeping.
pub fn replace_all(pattern: &str, replacement: &str, input: &str) -> String {
    search_and_replace(pattern, replacement, input, 0).0
}

/// Tail of `line` starting at the last multiple of `width`, i.e. the part
/// that occupies the final screen row. Gives up (fixed placeholder) when the
/// line carries escape sequences, because their on-screen width is unknown
/// here.
pub fn last_screenline(line: &str, width: usize) -> String {
    let chars: Vec<char> = line.chars().collect();
    if width == 0 || chars.len() <= width {
        return line.to_string();
    }
    if line.contains(ESCAPE) {
        return "Ehhmm..? > ".to_string();
    }
    let removed = (chars.len() / width) * width;
    chars[removed..].iter().collect()
}

/// Printable preview of raw bytes for the debug log, truncated with an
/// ellipsis past `max_chars`.
pub fn bytes_preview(bytes: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::new();
    for (count, ch) in text.chars().enumerate() {
        if count >= max_chars {
            out.push_str("...");
            break;
        }
        for escaped in ch.escape_default() {
            out.push(escaped);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unbackspace_replays_backspaces_in_place() {
        assert_eq!(unbackspace("123\ra\u{8}bcde"), "bcde");
        assert_eq!(unbackspace("ab\u{8}c"), "ac");
        assert_eq!(unbackspace("\u{8}\u{8}x"), "x");
    }

    #[test]
    fn unbackspace_carriage_return_rewrites_from_start() {
        assert_eq!(unbackspace("hello\rHE"), "HEllo");
        assert_eq!(unbackspace("abc\r"), "abc");
    }

    #[test]
    fn unbackspace_passes_plain_text_through() {
        assert_eq!(unbackspace("prompt> "), "prompt> ");
        assert_eq!(unbackspace(""), "");
    }

    #[test]
    fn mark_invisible_brackets_sgr_sequences() {
        let marked = mark_invisible("\u{1b}[1;31mred\u{1b}[0m");
        assert_eq!(
            marked,
            format!(
                "{IGNORE_START}\u{1b}[1;31m{IGNORE_END}red{IGNORE_START}\u{1b}[0m{IGNORE_END}"
            )
        );
    }

    #[test]
    fn mark_invisible_leaves_plain_text_alone() {
        assert_eq!(mark_invisible("sql> "), "sql> ");
    }

    #[test]
    fn colourless_width_skips_marked_regions() {
        let marked = mark_invisible("\u{1b}[1;31mab\u{1b}[0m");
        assert_eq!(colourless_width(&marked), 2);
        assert_eq!(colourless_width_unmarked("\u{1b}[33mhi\u{1b}[0m> "), 4);
    }

    #[test]
    fn strip_ignore_markers_restores_writable_form() {
        let original = "\u{1b}[1mboo\u{1b}[0m";
        assert_eq!(strip_ignore_markers(&mark_invisible(original)), original);
    }

    #[test]
    fn search_and_replace_maps_cursor_to_line_and_column() {
        let (text, pos) = search_and_replace("NL", "\n", "To be NL ... or not to be", 11);
        assert_eq!(text, "To be \n ... or not to be");
        // cursor sat before the third dot: three characters into line 2
        assert_eq!(pos, CursorPos { line: 2, column: 4 });
    }

    #[test]
    fn search_and_replace_round_trips_multiline_separator() {
        let stored = "SELECT 1 \\ FROM t";
        let (expanded, _) = search_and_replace(" \\ ", "\n", stored, 0);
        assert_eq!(expanded, "SELECT 1\nFROM t");
        assert_eq!(replace_all("\n", " \\ ", &expanded), stored);
    }

    #[test]
    fn last_screenline_returns_tail_of_wrapped_line() {
        assert_eq!(last_screenline("abcdefghij", 4), "ij");
        assert_eq!(last_screenline("short", 80), "short");
        // an exact multiple of the width leaves the cursor on a fresh row
        assert_eq!(last_screenline("abcdefgh", 4), "");
    }

    #[test]
    fn last_screenline_gives_up_on_escape_sequences() {
        let line = "x".repeat(100) + "\u{1b}[0m";
        assert_eq!(last_screenline(&line, 10), "Ehhmm..? > ");
    }

    #[test]
    fn bytes_preview_escapes_and_truncates() {
        assert_eq!(bytes_preview(b"a\nb", 10), "a\\nb");
        assert_eq!(bytes_preview(b"abcdef", 3), "abc...");
    }

    proptest! {
        #[test]
        fn unbackspace_is_idempotent(s in "[ -~\u{8}\r]{0,64}") {
            let once = unbackspace(&s);
            prop_assert_eq!(unbackspace(&once), once);
        }

        #[test]
        fn colourless_width_never_exceeds_char_count(s in "[ -~]{0,64}") {
            let marked = mark_invisible(&s);
            prop_assert!(colourless_width(&marked) <= marked.chars().count());
        }

        #[test]
        fn separator_substitution_round_trips(parts in proptest::collection::vec("[a-z0-9 ]{0,12}", 1..5)) {
            let joined = parts.join("\n");
            let stored = replace_all("\n", " \\ ", &joined);
            prop_assert_eq!(replace_all(" \\ ", "\n", &stored), joined);
        }
    }
}
