//! Multi-line editing in the user's own editor: the buffer goes to a
//! temporary file, the editor runs on the user's real terminal, and the
//! result comes back with newlines re-substituted.

use anyhow::{bail, Context, Result};
use rlwrap::string_utils::{replace_all, search_and_replace};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

/// Resolve, run, and read back. `point` is the byte offset of the cursor in
/// `buffer`; the editor is pointed at the matching line/column via `%L` and
/// `%C` in its command line.
///
/// # Errors
///
/// A failing or signalled editor is an error: the buffer on screen and the
/// buffer in the file can no longer be assumed to match.
pub(crate) fn edit_buffer(buffer: &str, point: usize, separator: &str) -> Result<String> {
    let (text, cursor) = search_and_replace(separator, "\n", buffer, point);

    let mut tmpfile = tempfile::Builder::new()
        .prefix("rlwrap_")
        .tempfile_in(tmpdir())
        .context("could not create temporary file")?;
    tmpfile
        .write_all(text.as_bytes())
        .with_context(|| format!("could not write to {}", tmpfile.path().display()))?;
    tmpfile.flush().ok();

    let command_line = editor_command()
        .replace("%L", &cursor.line.to_string())
        .replace("%C", &cursor.column.to_string());
    let mut words =
        shell_words::split(&command_line).context("cannot parse editor command line")?;
    if words.is_empty() {
        bail!("empty editor command");
    }
    let program = words.remove(0);
    tracing::debug!(target: "readline", editor = %command_line, "calling external editor");

    let status = Command::new(&program)
        .args(&words)
        .arg(tmpfile.path())
        .status()
        .with_context(|| format!("failed to invoke editor '{command_line}'"))?;
    if !status.success() {
        bail!("editor '{command_line}' exited with {status}");
    }

    let edited = fs::read_to_string(tmpfile.path())
        .with_context(|| format!("could not read temp file {}", tmpfile.path().display()))?;
    Ok(sanitize(&edited, separator))
}

/// Tabs become spaces (the editor cannot represent them), newlines become
/// the separator, and any other control character becomes a space.
fn sanitize(edited: &str, separator: &str) -> String {
    let detabbed = replace_all("\t", "    ", edited);
    let seperated = replace_all("\n", separator, &detabbed);
    seperated
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}

fn editor_command() -> String {
    for key in ["RLWRAP_EDITOR", "EDITOR", "VISUAL"] {
        if let Ok(value) = env::var(key) {
            if !value.trim().is_empty() {
                return value;
            }
        }
    }
    "vi +%L".to_string()
}

fn tmpdir() -> PathBuf {
    for key in ["TMPDIR", "TMP", "TEMP"] {
        if let Ok(value) = env::var(key) {
            if !value.is_empty() {
                return PathBuf::from(value);
            }
        }
    }
    PathBuf::from("/tmp")
}
