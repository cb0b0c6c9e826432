//! History store: load at startup, decorate and dedup on insert, write back
//! on clean exit.

use anyhow::{bail, Context, Result};
use nix::unistd::{access, AccessFlags};
use rlwrap::logging::format_local_time;
use rlwrap::string_utils::replace_all;
use std::fs;
use std::path::{Path, PathBuf};

/// What to do when a new entry equals an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DupPolicy {
    KeepAll,
    EliminateSuccessive,
    EliminateAll,
}

impl DupPolicy {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => DupPolicy::KeepAll,
            1 => DupPolicy::EliminateSuccessive,
            _ => DupPolicy::EliminateAll,
        }
    }

    fn lookback(self, len: usize) -> usize {
        match self {
            DupPolicy::KeepAll => 0,
            DupPolicy::EliminateSuccessive => 1,
            DupPolicy::EliminateAll => len,
        }
    }
}

/// Values interpolated into `--history-format` decorations.
pub(crate) struct DecorationContext<'a> {
    pub child_pid: i32,
    pub prompt: &'a str,
    pub command_name: &'a str,
}

#[derive(Debug)]
pub(crate) struct History {
    entries: Vec<String>,
    max: usize,
    path: PathBuf,
    readonly: bool,
    policy: DupPolicy,
    format: Option<String>,
}

impl History {
    pub fn new(
        path: PathBuf,
        max: usize,
        readonly: bool,
        policy: DupPolicy,
        format: Option<String>,
    ) -> Self {
        History {
            entries: Vec::new(),
            max,
            path,
            readonly,
            policy,
            format,
        }
    }

    /// Fail early when the history file will not be usable, instead of
    /// discovering it at exit when the session's history is about to be
    /// thrown away.
    pub fn check_access(&self) -> Result<()> {
        if self.readonly {
            if access(&self.path, AccessFlags::R_OK).is_err() {
                bail!("cannot read {}", self.path.display());
            }
            return Ok(());
        }
        if self.path.exists() {
            if access(&self.path, AccessFlags::R_OK | AccessFlags::W_OK).is_err() {
                bail!("cannot read and write {}", self.path.display());
            }
        } else {
            let dir = self
                .path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            if access(dir, AccessFlags::W_OK).is_err() {
                bail!("cannot create history file in {}", dir.display());
            }
        }
        Ok(())
    }

    /// Read the file if it exists; a missing file is not an error, it will
    /// be created at exit.
    pub fn load(&mut self) -> Result<()> {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Ok(());
        };
        self.entries = contents.lines().map(str::to_string).collect();
        let len = self.entries.len();
        if len > self.max {
            self.entries.drain(..len - self.max);
        }
        Ok(())
    }

    /// Write the history back, skipping read-only sessions and empty
    /// histories (a mistyped command should not litter the home directory).
    pub fn save(&self) -> Result<()> {
        if self.readonly || self.entries.is_empty() {
            return Ok(());
        }
        let joined = self.entries.join("\n") + "\n";
        fs::write(&self.path, joined)
            .with_context(|| format!("cannot write {}", self.path.display()))
    }

    /// Decorate `line` when a format is configured, drop duplicates per the
    /// policy, and append.
    pub fn add(&mut self, line: &str, ctx: &DecorationContext<'_>) {
        let new_entry = match &self.format {
            Some(format) => decorate(line, format, ctx),
            None => line.to_string(),
        };
        let lookback = self.policy.lookback(self.entries.len()).min(self.entries.len());
        let keep_from = self.entries.len() - lookback;
        let mut index = self.entries.len();
        while index > keep_from {
            index -= 1;
            if self.entries[index] == new_entry {
                self.entries.remove(index);
            }
        }
        self.entries.push(new_entry);
        if self.entries.len() > self.max {
            let excess = self.entries.len() - self.max;
            self.entries.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }
}

/// Append the expanded format to the line, first stripping any decoration a
/// recalled entry already carries (recognised by the format's first token).
fn decorate(line: &str, format: &str, ctx: &DecorationContext<'_>) -> String {
    let separator = format
        .split(' ')
        .next()
        .filter(|tok| !tok.is_empty())
        .unwrap_or(format);
    let bare = trim_from_last_separator(line, separator);

    let mut expanded = format.to_string();
    expanded = replace_all("%D", &child_working_directory(ctx.child_pid), &expanded);
    if let Some(home) = dirs::home_dir() {
        let home = home.to_string_lossy();
        if !home.is_empty() {
            expanded = replace_all(&home, "~", &expanded);
        }
    }
    expanded = replace_all("%P", ctx.prompt, &expanded);
    expanded = replace_all("%C", ctx.command_name, &expanded);
    expanded = format_local_time(&expanded);

    let glue = if bare.ends_with(' ') { "" } else { " " };
    format!("{bare}{glue}{expanded}")
}

/// Cut the line at the last occurrence of `separator` (ignoring a leading
/// one), then drop trailing spaces.
fn trim_from_last_separator(line: &str, separator: &str) -> String {
    let mut cut = line.len();
    let mut from = separator.len();
    while from < line.len() {
        match line[from..].find(separator) {
            Some(pos) => {
                cut = from + pos;
                from = cut + separator.len();
            }
            None => break,
        }
    }
    line[..cut.min(line.len())].trim_end_matches(' ').to_string()
}

/// Where the child currently lives, via `/proc/<pid>/cwd`; `?` when that is
/// unknowable (non-Linux, child gone).
fn child_working_directory(child_pid: i32) -> String {
    if child_pid <= 0 {
        return "?".to_string();
    }
    match fs::read_link(format!("/proc/{child_pid}/cwd")) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => "?".to_string(),
    }
}
