//! Ordered byte queue between the line editor and the master pty.
//!
//! Accepted lines are queued here and drained only when select() reports
//! the master writable, so a stalled child can never wedge the wrapper.

use anyhow::{bail, Result};
use rlwrap::pty_session::PtySession;
use std::collections::VecDeque;
use std::io;

/// Upper bound for a single drain; matches the read buffer so one flush can
/// never outrun what the child-side buffer takes in one go.
const WRITE_CHUNK: usize = 512;

#[derive(Debug, Default)]
pub(crate) struct OutputQueue {
    bytes: VecDeque<u8>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_nonempty(&self) -> bool {
        !self.bytes.is_empty()
    }

    /// Append a whole line (or any byte run) to the tail of the queue.
    pub fn enqueue(&mut self, bytes: &[u8]) {
        self.bytes.extend(bytes);
        tracing::trace!(target: "ad_hoc", queued = bytes.len(), total = self.bytes.len(), "enqueued");
    }

    /// Write at most one chunk to the master. `EAGAIN`/`EINTR` leave the
    /// queue untouched for the next writable window; other write errors are
    /// fatal for the session.
    pub fn flush(&mut self, session: &PtySession) -> Result<()> {
        if self.bytes.is_empty() {
            return Ok(());
        }
        let chunk: Vec<u8> = self.bytes.iter().copied().take(WRITE_CHUNK).collect();
        match session.write_to_master(&chunk) {
            Ok(written) => {
                self.bytes.drain(..written);
                tracing::trace!(target: "ad_hoc", written, remaining = self.bytes.len(), "flushed");
                Ok(())
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(())
            }
            Err(err) => bail!("write to master pty failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_preserves_order_and_emptiness() {
        let mut queue = OutputQueue::new();
        assert!(!queue.is_nonempty());
        queue.enqueue(b"abc");
        queue.enqueue(b"\n");
        assert!(queue.is_nonempty());
        assert_eq!(queue.bytes.iter().copied().collect::<Vec<_>>(), b"abc\n");
    }

    #[test]
    fn flush_writes_in_order_exactly_once() {
        let argv = vec!["cat".to_string()];
        let cfg = rlwrap::pty_session::PtySpawnConfig {
            argv: &argv,
            term_override: None,
            termios: None,
            winsize: None,
            exec_fail_hint: None,
        };
        let session = rlwrap::pty_session::fork_with_pty(&cfg, || {}).expect("spawn cat");
        let mut queue = OutputQueue::new();
        queue.enqueue(b"one two\n");
        queue.flush(&session).expect("flush");
        assert!(!queue.is_nonempty());

        let mut buf = [0u8; 128];
        let mut echoed = Vec::new();
        for _ in 0..50 {
            if let Ok(n) = session.read_from_master(&mut buf) {
                echoed.extend_from_slice(&buf[..n]);
                if echoed.windows(7).any(|w| w == b"one two") {
                    break;
                }
            }
        }
        assert!(echoed.windows(7).any(|w| w == b"one two"));
        // SAFETY: our own child.
        unsafe {
            libc::kill(session.child_pid(), libc::SIGKILL);
            let mut status = 0;
            libc::waitpid(session.child_pid(), &mut status, 0);
        }
    }
}
