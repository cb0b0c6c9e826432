//! rlwrap entrypoint: wrap an interactive command behind a pty and give it
//! line editing, history and completion.
//!
//! Startup order matters: options and files are validated before the fork
//! (so mistakes fail fast on a sane terminal), signal handlers go in while
//! SIGCHLD is still blocked, and the terminal goes into CBREAK mode only
//! once the child is running.

mod completion;
mod config;
mod editor;
mod event_loop;
mod ext_editor;
mod history;
mod output_queue;
mod prompt;
mod signals;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::ffi::CString;

use crate::completion::CompletionList;
use crate::config::{Cli, Settings};
use crate::editor::Editor;
use crate::event_loop::{LoopDeps, LoopState};
use crate::history::History;
use crate::output_queue::OutputQueue;
use crate::prompt::PromptTracker;
use crate::terminal::{query_winsize, Terminal};
use rlwrap::logging::{init_debug_log, OutputLog};
use rlwrap::pty_session::{fork_with_pty, reopen_tty_over_stdio, PtySpawnConfig};
use rlwrap::terminal_restore;

/// All user-visible failures funnel through here: program, version, message,
/// chained causes.
pub(crate) fn report_error(err: &anyhow::Error) {
    eprintln!("rlwrap-{}: error: {err:#}", env!("CARGO_PKG_VERSION"));
}

/// Warnings are suppressible; errors are not.
pub(crate) fn warn_user(no_warnings: bool, message: &str) {
    if no_warnings {
        return;
    }
    eprintln!("rlwrap-{}: warning: {message}", env!("CARGO_PKG_VERSION"));
    eprintln!("use the --no-warnings option to suppress warnings");
}

fn main() {
    let raw_args: Vec<String> = env::args().collect();
    let cli = Cli::parse();
    if cli.version {
        println!("rlwrap {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    let settings = match Settings::from_cli(cli, &raw_args) {
        Ok(settings) => settings,
        Err(err) => {
            report_error(&err);
            std::process::exit(1);
        }
    };

    // SAFETY: isatty on a fixed fd.
    let stdin_is_tty = unsafe { libc::isatty(libc::STDIN_FILENO) == 1 };
    if !stdin_is_tty {
        // Piped input wants no editing at all; become the command.
        exec_passthrough(&settings);
    }

    if let Err(err) = run_wrapped(settings) {
        report_error(&err);
        terminal_restore::restore_terminal();
        std::process::exit(1);
    }
}

/// Replace ourselves with the command. Only returns on exec failure.
fn exec_passthrough(settings: &Settings) -> ! {
    let argv: Vec<CString> = settings
        .command
        .iter()
        .filter_map(|arg| CString::new(arg.as_str()).ok())
        .collect();
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    // SAFETY: NUL-terminated pointer array over live CStrings.
    unsafe {
        libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
    }
    report_error(&anyhow::anyhow!(
        "cannot execute {}: {}",
        settings.command[0],
        std::io::Error::last_os_error()
    ));
    std::process::exit(1)
}

/// Set up every subsystem and hand over to the event loop. Returns only on
/// a pre-loop error; the loop itself exits the process.
fn run_wrapped(settings: Settings) -> Result<()> {
    if let Some(mask) = settings.debug_mask {
        init_debug_log("rlwrap", mask)?;
    }

    let terminal = Terminal::new();
    if !terminal.can_move_vertically() {
        warn_user(
            settings.no_warnings,
            "this terminal cannot move the cursor vertically;\n\
             input longer than one row will be scrolled, not wrapped",
        );
    }

    let mut history = History::new(
        settings.history_file.clone(),
        settings.histsize,
        settings.history_readonly,
        settings.dup_policy,
        settings.history_format.clone(),
    );
    history.check_access()?;
    history.load()?;

    let mut completion = CompletionList::new(
        settings.case_insensitive,
        settings.complete_filenames,
        settings.break_chars.clone(),
        settings.quote_chars.clone(),
    );
    for file in &settings.completion_files {
        completion.feed_file(file)?;
    }
    // the per-command word list: first readable candidate wins
    for candidate in config::default_completion_files(&settings.command_name) {
        if candidate.is_file() && completion.feed_file(&candidate).is_ok() {
            break;
        }
    }

    let output_log = settings
        .logfile
        .as_deref()
        .map(OutputLog::open)
        .transpose()?;

    terminal_restore::save_user_termios();
    terminal_restore::install_terminal_panic_hook();

    let window = query_winsize();
    // SAFETY: stdin is open; BorrowedFd for the length of the call.
    let user_termios =
        nix::sys::termios::tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(libc::STDIN_FILENO) }).ok();

    let spawn_cfg = PtySpawnConfig {
        argv: &settings.command,
        term_override: settings.term_name.as_deref(),
        termios: user_termios.as_ref(),
        winsize: Some(window),
        exec_fail_hint: settings.optional_arg_hint.as_deref(),
    };
    let session = fork_with_pty(&spawn_cfg, signals::install_signal_handlers)
        .context("cannot start the command")?;
    signals::set_child_pid(session.child_pid());
    reopen_tty_over_stdio()?;

    if session.always_echo() {
        warn_user(
            settings.no_warnings,
            &format!(
                "cannot determine the terminal mode of {};\n\
                 line editing will always be on, and passwords *will* be echoed\n\
                 and saved in the history list!",
                settings.command_name
            ),
        );
    }

    terminal.set_echo(false)?; // CBREAK from here on
    signals::block_messy_signals();

    let mut editor = Editor::new(settings.multiline_separator.is_some());
    let mut start_line_edit = false;
    if let Some(text) = &settings.pre_given {
        editor.preseed(text);
        start_line_edit = true;
    }

    let prompt = PromptTracker::new(settings.prompt_colour.clone());
    if prompt.colouring_enabled() {
        terminal_restore::set_colours_active(true);
    }

    let state = LoopState {
        settings,
        editor,
        prompt,
        history,
        completion,
        queue: OutputQueue::new(),
        output_log,
        window,
        within_line_edit: false,
        start_line_edit,
        ignore_queued_input: false,
        deferred_winsize: false,
        echo: true,
    };
    let deps = LoopDeps { session, terminal };
    event_loop::run(state, deps)
}
