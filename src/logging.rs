//! Debug-log and output-log plumbing shared by the binary.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Debug mask bit: terminal and pty mode changes.
pub const DEBUG_TERMIO: u32 = 1;
/// Debug mask bit: signal arrival and forwarding.
pub const DEBUG_SIGNALS: u32 = 2;
/// Debug mask bit: editor state transitions and prompt tracking.
pub const DEBUG_READLINE: u32 = 4;
/// Debug mask bit: ad-hoc tracing while developing.
pub const DEBUG_AD_HOC: u32 = 16;
/// Default mask: termio + signals + readline.
pub const DEBUG_ALL: u32 = DEBUG_TERMIO | DEBUG_SIGNALS | DEBUG_READLINE;

/// Where the debug log for `prog` goes.
pub fn debug_log_path(prog: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/{prog}.debug"))
}

/// Install a `tracing` subscriber that writes the selected targets to
/// `/tmp/<prog>.debug`. Only called when `--debug` was given; without it the
/// `tracing` macros stay disabled and cost nothing.
pub fn init_debug_log(prog: &str, mask: u32) -> Result<()> {
    let path = debug_log_path(prog);
    let file = File::create(&path)
        .with_context(|| format!("cannot open debug file {}", path.display()))?;

    let mut directives = vec!["off".to_string()];
    for (bit, target) in [
        (DEBUG_TERMIO, "termio"),
        (DEBUG_SIGNALS, "signals"),
        (DEBUG_READLINE, "readline"),
        (DEBUG_AD_HOC, "ad_hoc"),
    ] {
        if mask & bit != 0 {
            directives.push(format!("{target}=trace"));
        }
    }

    let filter = tracing_subscriber::EnvFilter::try_new(directives.join(","))
        .context("building debug filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .init();
    Ok(())
}

/// Append-mode mirror of everything the wrapped command prints.
#[derive(Debug)]
pub struct OutputLog {
    file: File,
}

impl OutputLog {
    /// Open (or create) the logfile and stamp a session header.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot write to logfile {}", path.display()))?;
        let stamp = format_local_time("%a %b %e %H:%M:%S %Y");
        let _ = writeln!(file, "\n\n[rlwrap] {stamp}");
        Ok(Self { file })
    }

    /// Append raw child output; write errors are ignored so a full disk
    /// cannot take the session down.
    pub fn write(&mut self, bytes: &[u8]) {
        let _ = self.file.write_all(bytes);
    }
}

/// Format the current local time with a `strftime` pattern.
pub fn format_local_time(format: &str) -> String {
    let Ok(cformat) = CString::new(format) else {
        return String::new();
    };
    let mut buf = [0u8; 256];
    // SAFETY: time/localtime_r/strftime are called with valid, initialized
    // out-pointers; strftime NUL-terminates within the reported length.
    unsafe {
        let mut now: libc::time_t = 0;
        libc::time(&mut now);
        let mut tm: libc::tm = std::mem::zeroed();
        if libc::localtime_r(&now, &mut tm).is_null() {
            return String::new();
        }
        let written = libc::strftime(
            buf.as_mut_ptr().cast::<libc::c_char>(),
            buf.len(),
            cformat.as_ptr(),
            &tm,
        );
        String::from_utf8_lossy(&buf[..written]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_log_path_lands_in_tmp() {
        assert_eq!(debug_log_path("rlwrap"), PathBuf::from("/tmp/rlwrap.debug"));
    }

    #[test]
    fn format_local_time_expands_year() {
        let year = format_local_time("%Y");
        let parsed: i32 = year.parse().expect("numeric year");
        assert!(parsed >= 2024);
    }

    #[test]
    fn format_local_time_passes_literal_text_through() {
        assert_eq!(format_local_time("plain"), "plain");
        assert_eq!(format_local_time("%%"), "%");
    }

    #[test]
    fn output_log_appends_header_and_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.log");
        {
            let mut log = OutputLog::open(&path).expect("open log");
            log.write(b"hello\n");
        }
        let contents = std::fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("[rlwrap] "));
        assert!(contents.ends_with("hello\n"));
    }
}
