//! Shared plumbing for the `rlwrap` binary: pty lifecycle, terminal
//! restoration, process-group signalling, logging setup and the pure text
//! manglers the editor and prompt tracker are built on.

pub mod logging;
pub mod process_signal;
pub mod pty_session;
pub mod string_utils;
pub mod terminal_restore;
