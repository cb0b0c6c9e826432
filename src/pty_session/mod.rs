//! Pty lifecycle for the wrapped command: fork over a pty pair, keep the
//! slave open for mode introspection, and translate line endings the way the
//! slave's input flags ask for.

mod pty;

pub use pty::{fork_with_pty, reopen_tty_over_stdio, PtySession, PtySpawnConfig};
