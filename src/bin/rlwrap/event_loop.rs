//! The single-threaded heart: one pselect per turn over the user's keyboard
//! and the master pty, with all signal-flag work done synchronously between
//! waits.
//!
//! SIGWINCH and SIGTSTP are blocked everywhere except inside pselect (its
//! sigmask argument opens them for exactly that window), so their flags can
//! never race the editor: a flag raised mid-wait makes pselect return EINTR
//! and is handled at the top of the next turn.

use anyhow::{anyhow, bail, Context, Result};
use nix::pty::Winsize;
use nix::sys::select::FdSet;
use nix::sys::time::TimeSpec;
use std::io;
use std::os::fd::BorrowedFd;

use crate::completion::CompletionList;
use crate::config::Settings;
use crate::editor::{Editor, EditorEvent, RedisplayCtx};
use crate::ext_editor;
use crate::history::{DecorationContext, History};
use crate::output_queue::OutputQueue;
use crate::prompt::PromptTracker;
use crate::signals;
use crate::terminal::{query_winsize, Terminal};
use rlwrap::logging::OutputLog;
use rlwrap::process_signal::forward_to_child_group;
use rlwrap::pty_session::PtySession;
use rlwrap::string_utils::{bytes_preview, replace_all};
use rlwrap::terminal_restore;

/// One read from the master per loop turn; small enough that a chatty child
/// still yields the keyboard regularly.
const BUFFSIZE: usize = 512;

/// How long a freshly printed prompt must stay quiet before we repaint it
/// in colour, in nanoseconds.
const RECOLOUR_DELAY_NS: i64 = 40_000_000;

pub(crate) struct LoopDeps {
    pub session: PtySession,
    pub terminal: Terminal,
}

pub(crate) struct LoopState {
    pub settings: Settings,
    pub editor: Editor,
    pub prompt: PromptTracker,
    pub history: History,
    pub completion: CompletionList,
    pub queue: OutputQueue,
    pub output_log: Option<OutputLog>,
    pub window: Winsize,
    pub within_line_edit: bool,
    pub start_line_edit: bool,
    pub ignore_queued_input: bool,
    pub deferred_winsize: bool,
    /// Whether typed input is shown (false stars it out).
    pub echo: bool,
}

/// Drive the session to its end. Never returns: a clean end goes through
/// [`cleanup_and_exit`], a failure is reported after salvaging history.
pub(crate) fn run(mut state: LoopState, mut deps: LoopDeps) -> ! {
    let err = match run_inner(&mut state, &mut deps) {
        Err(err) => err,
        Ok(never) => match never {},
    };
    let _ = state.history.save();
    terminal_restore::restore_terminal();
    crate::report_error(&err);
    std::process::exit(1)
}

enum Never {}

fn run_inner(state: &mut LoopState, deps: &mut LoopDeps) -> Result<Never> {
    loop {
        if signals::take_tstp() {
            handle_tstp(state, deps)?;
        }
        if signals::take_winch() {
            adapt_winsize(state, deps)?;
        }
        if state.start_line_edit {
            enter_line_edit(state, deps)?;
            state.start_line_edit = false;
            continue;
        }

        // SAFETY: fds 0 and the master outlive the loop turn.
        let stdin_fd = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
        let master_fd = deps.session.master_fd();

        let mut readfds = FdSet::new();
        readfds.insert(stdin_fd);
        readfds.insert(master_fd);
        let mut writefds = FdSet::new();
        if state.queue.is_nonempty() {
            writefds.insert(master_fd);
        }

        let timeout = if signals::child_is_dead() || state.ignore_queued_input {
            Some(TimeSpec::new(0, 0))
        } else if state.prompt.colouring_enabled() && state.prompt.wait_recolour {
            Some(TimeSpec::new(0, RECOLOUR_DELAY_NS))
        } else {
            None
        };

        let sigmask = signals::select_sigmask();
        let nready = match nix::sys::select::pselect(
            None,
            Some(&mut readfds),
            Some(&mut writefds),
            None,
            timeout.as_ref(),
            Some(&sigmask),
        ) {
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => return Err(anyhow!("select failed: {err}")),
            Ok(n) => n,
        };

        if nready == 0 {
            handle_timeout(state, deps)?;
            continue;
        }

        // Plain bools so the fd borrows end before the handlers run.
        let master_writable = writefds.contains(master_fd);
        let master_ready = readfds.contains(master_fd);
        let stdin_ready = readfds.contains(stdin_fd);

        if master_writable {
            state.queue.flush(&deps.session)?;
            // Give the command time to respond; otherwise the on-screen
            // dialogue comes out in the wrong order.
            yield_briefly();
        }

        if master_ready {
            handle_master_output(state, deps)?;
            // Don't touch the keyboard while the command is talking: the
            // unfinished output line would get repainted mid-paragraph.
            continue;
        }

        if stdin_ready {
            handle_keypress(state, deps)?;
        }
    }
}

/// A zero or 40 ms timeout fired.
fn handle_timeout(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    if state.ignore_queued_input {
        // stdin has gone quiet: everything typed during the external editor
        // has now been read and dropped.
        state.ignore_queued_input = false;
        return Ok(());
    }
    if signals::child_is_dead() {
        if !state.prompt.prompt().is_empty() {
            // the command's last words had no newline; provide it
            deps.terminal.newline()?;
        }
        cleanup_and_exit(state);
    }
    if state.prompt.colouring_enabled() && state.prompt.wait_recolour {
        recolour_prompt(state, deps)?;
        return Ok(());
    }
    bail!("unexpected timeout on stdin");
}

/// The output stream stayed quiet long enough: paint the prompt in colour.
fn recolour_prompt(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    if state.within_line_edit {
        save_editor(state, deps)?;
    }
    let transparent = transparent_mode(state, deps);
    state.prompt.reprint(
        true,
        &mut deps.terminal,
        state.within_line_edit,
        state.window.ws_col,
        transparent,
    )?;
    terminal_restore::set_colours_active(true);
    if state.within_line_edit {
        resume_editing(state, deps)?;
    }
    state.prompt.wait_recolour = false;
    Ok(())
}

/// A chunk of command output is ready on the master.
fn handle_master_output(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    let mut buf = [0u8; BUFFSIZE];
    let nread = match deps.session.read_from_master(&mut buf) {
        Ok(0) => drain_and_exit(state, deps),
        Ok(n) => n,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
        // EIO on the master is how a hung-up pty reports child death
        Err(err) if signals::child_is_dead() || err.raw_os_error() == Some(libc::EIO) => {
            drain_and_exit(state, deps)
        }
        Err(err) => bail!("read error on master pty: {err}"),
    };
    let chunk = &buf[..nread];
    tracing::trace!(target: "termio", "read {} bytes: {}", nread, bytes_preview(chunk, 40));

    if state.within_line_edit {
        save_editor(state, deps)?;
    }
    if state.prompt.colouring_enabled() && !state.prompt.wait_recolour {
        // repaint the current prompt plain so output never continues a
        // coloured line
        let transparent = transparent_mode(state, deps);
        state.prompt.reprint(
            false,
            &mut deps.terminal,
            state.within_line_edit,
            state.window.ws_col,
            transparent,
        )?;
    }

    deps.terminal.write_bytes(chunk)?;
    if let Some(log) = state.output_log.as_mut() {
        log.write(chunk);
    }

    let text = String::from_utf8_lossy(chunk).into_owned();
    if state.settings.remember {
        if let Some(pos) = text.rfind('\n') {
            state.completion.feed_line(&text[..pos]);
        }
    }
    let single_line = !deps.terminal.can_move_vertically();
    state
        .prompt
        .update_from_chunk(&text, single_line, state.window.ws_col);

    if state.within_line_edit {
        resume_editing(state, deps)?;
    }
    // wait for what the command has to say next before reading keys
    yield_briefly();
    Ok(())
}

/// EOF (or hangup) on the master: print a missing final newline, then leave
/// with the child's status.
fn drain_and_exit(state: &mut LoopState, deps: &mut LoopDeps) -> ! {
    if !state.prompt.prompt().is_empty() {
        let _ = deps.terminal.newline();
    }
    cleanup_and_exit(state)
}

/// One byte of keyboard input.
fn handle_keypress(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    let mut byte = [0u8; 1];
    // SAFETY: reading one byte into a stack buffer from stdin.
    let nread = unsafe { libc::read(libc::STDIN_FILENO, byte.as_mut_ptr().cast(), 1) };
    if nread < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(());
        }
        bail!("unexpected error reading the keyboard: {err}");
    }
    if state.ignore_queued_input {
        return Ok(()); // typed during the external editor: drop it
    }
    if nread == 0 {
        cleanup_and_exit(state); // EOF on stdin
    }
    let key = byte[0];

    if deps.session.slave_in_raw_mode() && !state.settings.always_readline {
        // Transparent mode: the command does its own line handling.
        deps.session
            .write_to_master(&byte)
            .context("write to master pty failed")?;
        tracing::trace!(target: "termio", "passed {} on in transparent mode", bytes_preview(&byte, 8));
        // One keypress late, admittedly: the mode the user typed under was
        // the previous one.
        deps.session.mirror_slave_modes_to_stdin();
        return Ok(());
    }

    if !state.within_line_edit {
        tracing::debug!(target: "readline", "starting line edit");
        state.within_line_edit = true;
        resume_editing(state, deps)?;
    }

    if key == deps.session.veof_byte() && state.editor.buffer_is_empty() {
        // Deliver EOF ourselves: an empty buffer plus the eof key means the
        // user wants the command to see end-of-input.
        dispatch_event(state, deps, EditorEvent::Eof)?;
        return Ok(());
    }

    let event = {
        let prompt_text = state.prompt.effective_prompt().to_string();
        let mut ctx = RedisplayCtx {
            terminal: &mut deps.terminal,
            prompt: &prompt_text,
            prompt_counts_ansi: state.settings.ansi_colour_aware
                || state.prompt.colouring_enabled(),
            width: state.window.ws_col,
            echo: state.echo,
        };
        state
            .editor
            .feed_byte(key, &mut ctx, &state.history, &state.completion)?
    };
    dispatch_event(state, deps, event)
}

fn dispatch_event(state: &mut LoopState, deps: &mut LoopDeps, event: EditorEvent) -> Result<()> {
    match event {
        EditorEvent::None => Ok(()),
        EditorEvent::Eof => {
            let eof = deps.session.veof_byte();
            tracing::debug!(target: "readline", "EOF detected, queueing byte {eof}");
            state.queue.enqueue(&[eof]);
            Ok(())
        }
        EditorEvent::EditExternally => run_external_editor(state, deps),
        EditorEvent::Accepted { line, key, forget } => {
            handle_accepted_line(state, deps, &line, key, forget)
        }
    }
}

/// The line handler: history, separator substitution, deferred resize, and
/// the handoff to the output queue.
fn handle_accepted_line(
    state: &mut LoopState,
    deps: &mut LoopDeps,
    line: &str,
    key: u8,
    forget: bool,
) -> Result<()> {
    if !line.is_empty() && state.echo && !forget {
        let ctx = DecorationContext {
            child_pid: deps.session.child_pid(),
            prompt: state.prompt.prompt(),
            command_name: &state.settings.command_name,
        };
        state.history.add(line, &ctx);
    }

    let rewritten = match &state.settings.multiline_separator {
        Some(separator) => replace_all(separator, "\n", line),
        None => line.to_string(),
    };

    if state.deferred_winsize {
        state.window = query_winsize();
        let _ = deps.session.set_winsize(&state.window);
        let _ = forward_to_child_group(deps.session.child_pid(), libc::SIGWINCH, true);
        state.deferred_winsize = false;
    }

    tracing::debug!(target: "readline", "accepting {}", bytes_preview(rewritten.as_bytes(), 40));
    state.queue.enqueue(rewritten.as_bytes());
    if let Some(eol) = deps.session.translated_eol(key) {
        state.queue.enqueue(&[eol]);
    }

    state.editor.reset();
    state.within_line_edit = false;
    state.echo = false;
    let _ = deps.terminal.set_echo(false);
    // The command will echo the line back over the one on screen; keep the
    // prompt repaint out of its way.
    state.prompt.leave_alone = true;
    Ok(())
}

fn run_external_editor(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    let separator = state
        .settings
        .multiline_separator
        .clone()
        .unwrap_or_else(|| " \\ ".to_string());

    deps.terminal.clear_line()?;
    if let Some(saved) = terminal_restore::saved_user_termios() {
        // the editor gets the user's own terminal modes back
        // SAFETY: restoring a termios snapshot onto stdin.
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, &saved);
        }
    }

    let edited = ext_editor::edit_buffer(state.editor.buffer(), state.editor.point(), &separator)?;

    deps.session.mirror_slave_modes_to_stdin();
    state.ignore_queued_input = true;
    state.editor.replace_buffer(&edited);
    handle_accepted_line(state, deps, &edited, b'\n', false)
}

/// A resize arrived while nobody was editing: enter editing now so the user
/// sees a tidy prompt again.
fn enter_line_edit(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    tracing::debug!(target: "readline", "starting line edit after resize");
    state.within_line_edit = true;
    if state.prompt.colouring_enabled() {
        state.prompt.recolour_for_width(state.window.ws_col);
        terminal_restore::set_colours_active(true);
    }
    let painted = state.prompt.effective_prompt().to_string();
    deps.terminal.write_str(&painted)?;
    resume_editing(state, deps)
}

/// Refresh the echo decision and put the editor back on screen.
fn resume_editing(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    mirror_echo(state, deps);
    let prompt_text = state.prompt.effective_prompt().to_string();
    let mut ctx = RedisplayCtx {
        terminal: &mut deps.terminal,
        prompt: &prompt_text,
        prompt_counts_ansi: state.settings.ansi_colour_aware || state.prompt.colouring_enabled(),
        width: state.window.ws_col,
        echo: state.echo,
    };
    state.editor.resume(&mut ctx, &state.prompt)
}

/// Re-derive whether keystrokes should be visible and set the terminal to
/// match.
fn mirror_echo(state: &mut LoopState, deps: &mut LoopDeps) {
    state.echo = deps.session.echo_decision(
        signals::child_is_dead(),
        state.settings.always_readline,
        state.settings.password_prompt.as_deref(),
        state.prompt.prompt(),
    );
    let _ = deps.terminal.set_echo(state.echo);
}

fn transparent_mode(state: &LoopState, deps: &LoopDeps) -> bool {
    !state.settings.always_readline && deps.session.slave_in_raw_mode()
}

/// Snapshot and retract the in-progress line. The prompt text is cloned
/// into the context so the repaint keeps the prompt on screen.
fn save_editor(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    let prompt_text = state.prompt.effective_prompt().to_string();
    let mut ctx = RedisplayCtx {
        terminal: &mut deps.terminal,
        prompt: &prompt_text,
        prompt_counts_ansi: state.settings.ansi_colour_aware || state.prompt.colouring_enabled(),
        width: state.window.ws_col,
        echo: state.echo,
    };
    state.editor.save(&mut ctx)
}

/// The user suspended us: forward the stop, park the editor, actually stop,
/// and put the world back together on resume.
fn handle_tstp(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    tracing::debug!(target: "signals", "suspending on SIGTSTP");
    let _ = forward_to_child_group(deps.session.child_pid(), libc::SIGTSTP, true);
    if state.within_line_edit {
        save_editor(state, deps)?;
    }
    signals::suspend_self();

    // ... and we are back.
    if state.within_line_edit {
        resume_editing(state, deps)?;
    } else {
        let _ = deps.terminal.set_echo(false);
        state.echo = false;
        deps.terminal.carriage_return()?;
        if !transparent_mode(state, deps) {
            let prompt = state.prompt.prompt().to_string();
            deps.terminal.write_str(&prompt)?;
        }
    }
    // the terminal may have been resized underneath the suspension
    adapt_winsize(state, deps)
}

/// Compare the terminal's geometry against the cached one and propagate a
/// change: resize the slave (now or deferred), tell the child, tidy the
/// screen, and re-enter editing if needed.
fn adapt_winsize(state: &mut LoopState, deps: &mut LoopDeps) -> Result<()> {
    let new = query_winsize();
    let old = state.window;
    if new.ws_col == old.ws_col && new.ws_row == old.ws_row {
        return Ok(());
    }
    tracing::debug!(target: "signals",
        "winsize {}x{} -> {}x{}", old.ws_col, old.ws_row, new.ws_col, new.ws_row);
    state.window = new;

    if state.settings.always_readline {
        // Many full-screen programs spew control sequences on resize; hold
        // the slave resize until the next accepted line.
        state.deferred_winsize = true;
    } else {
        let _ = deps.session.set_winsize(&new);
        let _ = forward_to_child_group(deps.session.child_pid(), libc::SIGWINCH, true);
    }

    if !state.within_line_edit
        && (state.settings.always_readline || !deps.session.slave_in_raw_mode())
    {
        wipe_textarea(state, deps, &old)?;
        state.start_line_edit = true;
    } else if state.within_line_edit {
        wipe_textarea(state, deps, &old)?;
        if state.prompt.colouring_enabled() {
            // word wrap of the coloured prompt depends on the width
            state.prompt.recolour_for_width(new.ws_col);
        }
        // The editor is live (not saved): repaint it in place from the row
        // the wipe left the cursor on, preserving buffer and point.
        mirror_echo(state, deps);
        let prompt_text = state.prompt.effective_prompt().to_string();
        let mut ctx = RedisplayCtx {
            terminal: &mut deps.terminal,
            prompt: &prompt_text,
            prompt_counts_ansi: state.settings.ansi_colour_aware
                || state.prompt.colouring_enabled(),
            width: state.window.ws_col,
            echo: state.echo,
        };
        state.editor.repaint_from_prompt_start(&mut ctx)?;
    }
    Ok(())
}

/// After a resize, erase every row the prompt and buffer occupied at the old
/// width, leaving the cursor on a clean row. Pointless (and skipped) in
/// single-line mode.
fn wipe_textarea(state: &mut LoopState, deps: &mut LoopDeps, old: &Winsize) -> Result<()> {
    if !deps.terminal.can_move_vertically() {
        return Ok(());
    }
    let prompt_len =
        rlwrap::string_utils::colourless_width_unmarked(state.prompt.effective_prompt());
    let buffer_len = if state.within_line_edit {
        state.editor.buffer().chars().count()
    } else {
        0
    };
    let point = if state.within_line_edit {
        state.editor.buffer()[..state.editor.point()].chars().count()
    } else {
        0
    } + prompt_len;
    let line_len = prompt_len + buffer_len;
    let cols = old.ws_col.max(1) as usize;
    let line_height = if line_len == 0 {
        0
    } else {
        1 + point.max(line_len.saturating_sub(1)) / cols
    };
    if line_height > 1 {
        deps.terminal.carriage_return()?;
        let cursor_height = point / cols;
        for _ in (1 + cursor_height)..line_height {
            deps.terminal.cursor_down(1)?;
        }
        for _ in 1..line_height {
            deps.terminal.clear_line()?;
            deps.terminal.cursor_up(1)?;
        }
    }
    deps.terminal.clear_line()?;
    Ok(())
}

/// Save what should be saved, restore the terminal, and leave with the
/// child's own exit status (or its fatal signal re-raised on ourselves).
pub(crate) fn cleanup_and_exit(state: &mut LoopState) -> ! {
    tracing::debug!(target: "termio",
        "cleaning up (sigterm_received={})", signals::sigterm_received());
    if let Err(err) = state.history.save() {
        crate::warn_user(state.settings.no_warnings, &format!("{err:#}"));
    }
    terminal_restore::restore_terminal();

    let status = signals::child_exit_status();
    if libc::WIFSIGNALED(status) {
        signals::suicide_by(libc::WTERMSIG(status));
    }
    std::process::exit(libc::WEXITSTATUS(status))
}

fn yield_briefly() {
    // SAFETY: sched_yield has no preconditions.
    unsafe {
        libc::sched_yield();
    }
}
