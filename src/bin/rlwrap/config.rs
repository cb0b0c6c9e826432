//! Command-line surface and its translation into runtime settings.
//!
//! Option validation that getopt did piecemeal in other wrappers happens
//! here in one place: value ranges, ordering constraints, and the
//! command-name resolution used for history and completion files.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::history::DupPolicy;
use crate::prompt::ColourSpec;
use rlwrap::logging::DEBUG_ALL;

/// Word-break characters used when no `-b` and no filename completion is in
/// play; `/` and `.` are appended in that case so paths complete as words.
const DEFAULT_BREAK_CHARS: &str = " \t\n\r(){}[],+-=&^%$#@\";|\\";
const DEFAULT_MULTILINE_SEPARATOR: &str = " \\ ";
const DEFAULT_PROMPT_COLOUR: &str = "1;31";

#[derive(Parser, Debug)]
#[command(
    name = "rlwrap",
    disable_version_flag = true,
    about = "Give line editing, history and completion to an interactive command",
    override_usage = "rlwrap [OPTIONS] <COMMAND> [ARGS]...",
    after_help = "Options taking an optional value need the = form, e.g. --always-readline=Password:"
)]
pub(crate) struct Cli {
    /// Force line editing even when the command reads raw keystrokes; the
    /// optional value marks prompts whose input must not echo or enter
    /// history (password entry)
    #[arg(short = 'a', long = "always-readline", value_name = "PASSWORD_PROMPT",
          num_args = 0..=1, require_equals = true, default_missing_value = "")]
    pub always_readline: Option<String>,

    /// Treat ANSI colour sequences in the command's prompt as invisible when
    /// computing its width
    #[arg(short = 'A', long = "ansi-colour-aware")]
    pub ansi_colour_aware: bool,

    /// Characters that delimit words for completion
    #[arg(short = 'b', long = "break-chars", value_name = "CHARS")]
    pub break_chars: Option<String>,

    /// Complete filenames as well as words from the completion list
    #[arg(short = 'c', long = "complete-filenames")]
    pub complete_filenames: bool,

    /// Name used for history/completion files: a literal name, or a number N
    /// meaning "the Nth argument from the end of the command line"
    #[arg(short = 'C', long = "command-name", value_name = "NAME|N")]
    pub command_name: Option<String>,

    /// Write a debug log to /tmp/rlwrap.debug; the optional value is a bit
    /// mask (1 termio, 2 signals, 4 editor, 16 ad hoc)
    #[arg(short = 'd', long = "debug", value_name = "MASK",
          num_args = 0..=1, require_equals = true, default_missing_value = "7")]
    pub debug: Option<u32>,

    /// History duplicate policy: 0 keep all, 1 drop successive duplicates,
    /// 2 drop all duplicates
    #[arg(short = 'D', long = "history-no-dupes", value_name = "0|1|2",
          default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub history_no_dupes: u8,

    /// Seed the completion list from a file, one word per line (repeatable)
    #[arg(short = 'f', long = "file", value_name = "FILE", action = clap::ArgAction::Append)]
    pub file: Vec<PathBuf>,

    /// Decorate history entries with this template (%D cwd, %P prompt,
    /// %C command name, plus strftime conversions)
    #[arg(short = 'F', long = "history-format", value_name = "FORMAT")]
    pub history_format: Option<String>,

    /// Explicit history file
    #[arg(short = 'H', long = "history-filename", value_name = "FILE")]
    pub history_filename: Option<PathBuf>,

    /// Case-insensitive completion (must precede -f options)
    #[arg(short = 'i', long = "case-insensitive")]
    pub case_insensitive: bool,

    /// Append all command output to this file
    #[arg(short = 'l', long = "logfile", value_name = "FILE")]
    pub logfile: Option<PathBuf>,

    /// Enable multi-line editing; the optional value replaces newlines in
    /// single-line history entries
    #[arg(short = 'm', long = "multi-line", value_name = "SEPARATOR",
          num_args = 0..=1, require_equals = true,
          default_missing_value = DEFAULT_MULTILINE_SEPARATOR)]
    pub multi_line: Option<String>,

    /// Suppress warnings
    #[arg(short = 'n', long = "no-warnings")]
    pub no_warnings: bool,

    /// Colour the prompt; the optional value is an ANSI attribute spec like
    /// 0;33 (default bold red)
    #[arg(short = 'p', long = "prompt-colour", alias = "prompt-color", value_name = "ANSI_SPEC",
          num_args = 0..=1, require_equals = true,
          default_missing_value = DEFAULT_PROMPT_COLOUR)]
    pub prompt_colour: Option<String>,

    /// Pre-fill the edit buffer with this text (implies --always-readline)
    #[arg(short = 'P', long = "pre-given", value_name = "TEXT")]
    pub pre_given: Option<String>,

    /// Characters that quote other characters for completion purposes
    #[arg(short = 'q', long = "quote-characters", value_name = "CHARS")]
    pub quote_characters: Option<String>,

    /// Remember every word the command prints and offer it for completion
    #[arg(short = 'r', long = "remember")]
    pub remember: bool,

    /// Keep at most N history entries; a negative value means read-only
    /// history capped at |N|
    #[arg(short = 's', long = "histsize", value_name = "N", default_value_t = 300,
          allow_negative_numbers = true)]
    pub histsize: i32,

    /// Override TERM in the command's environment
    #[arg(short = 't', long = "set-terminal-name", value_name = "NAME")]
    pub set_terminal_name: Option<String>,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// The command to run, followed by its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Digested, validated configuration the rest of the program runs on.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub always_readline: bool,
    pub password_prompt: Option<String>,
    pub ansi_colour_aware: bool,
    pub break_chars: String,
    pub quote_chars: String,
    pub complete_filenames: bool,
    pub case_insensitive: bool,
    pub command: Vec<String>,
    pub command_name: String,
    pub completion_files: Vec<PathBuf>,
    pub debug_mask: Option<u32>,
    pub dup_policy: DupPolicy,
    pub history_file: PathBuf,
    pub history_format: Option<String>,
    pub history_readonly: bool,
    pub histsize: usize,
    pub logfile: Option<PathBuf>,
    pub multiline_separator: Option<String>,
    pub no_warnings: bool,
    pub pre_given: Option<String>,
    pub prompt_colour: Option<ColourSpec>,
    pub remember: bool,
    pub term_name: Option<String>,
    /// Set when an optional-value option was given bare; used to hint at a
    /// swallowed option argument when exec of the command fails.
    pub optional_arg_hint: Option<String>,
}

impl Settings {
    /// Validate a parsed command line and resolve derived values.
    pub fn from_cli(cli: Cli, raw_args: &[String]) -> Result<Self> {
        if cli.command.is_empty() {
            bail!("no command given; try 'rlwrap --help'");
        }

        check_debug_is_first(&cli, raw_args)?;
        check_case_insensitive_precedes_files(&cli, raw_args)?;

        if let Some(format) = &cli.history_format {
            validate_history_format(format)?;
        }

        let prompt_colour = cli
            .prompt_colour
            .as_deref()
            .map(ColourSpec::parse)
            .transpose()?;

        let command_name = resolve_command_name(cli.command_name.as_deref(), &cli.command)?;

        let password_prompt = cli
            .always_readline
            .clone()
            .filter(|marker| !marker.is_empty());
        // Pre-given input does not mix with transparent mode.
        let always_readline = cli.always_readline.is_some() || cli.pre_given.is_some();

        let mut break_chars = match &cli.break_chars {
            Some(chars) => format!("\r\n \t{chars}"),
            None => DEFAULT_BREAK_CHARS.to_string(),
        };
        if !cli.complete_filenames && cli.break_chars.is_none() {
            break_chars.push_str("/.");
        }

        let history_file = match &cli.history_filename {
            Some(path) => path.clone(),
            None => default_history_file(&command_name)?,
        };

        let optional_arg_hint = optional_arg_hint(&cli, raw_args);

        Ok(Settings {
            always_readline,
            password_prompt,
            ansi_colour_aware: cli.ansi_colour_aware,
            break_chars,
            quote_chars: cli.quote_characters.unwrap_or_else(|| "\"'".to_string()),
            complete_filenames: cli.complete_filenames,
            case_insensitive: cli.case_insensitive,
            command: cli.command,
            command_name,
            completion_files: cli.file,
            debug_mask: cli.debug.map(|mask| if mask == 0 { DEBUG_ALL } else { mask }),
            dup_policy: DupPolicy::from_level(cli.history_no_dupes),
            history_file,
            history_format: cli.history_format,
            history_readonly: cli.histsize < 0,
            histsize: cli.histsize.unsigned_abs() as usize,
            logfile: cli.logfile,
            multiline_separator: cli.multi_line,
            no_warnings: cli.no_warnings,
            pre_given: cli.pre_given,
            prompt_colour,
            remember: cli.remember,
            term_name: cli.set_terminal_name,
            optional_arg_hint,
        })
    }
}

/// `$RLWRAP_HOME/<cmd>_history`, or `$HOME/.<cmd>_history` without it.
fn default_history_file(command_name: &str) -> Result<PathBuf> {
    if let Ok(rlwrap_home) = std::env::var("RLWRAP_HOME") {
        return Ok(PathBuf::from(rlwrap_home).join(format!("{command_name}_history")));
    }
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(format!(".{command_name}_history")))
}

/// `$RLWRAP_HOME/<cmd>_completions`, `$HOME/.<cmd>_completions` and the
/// shared fallback, in lookup order.
pub(crate) fn default_completion_files(command_name: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(rlwrap_home) = std::env::var("RLWRAP_HOME") {
        candidates.push(PathBuf::from(rlwrap_home).join(format!("{command_name}_completions")));
    } else if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(format!(".{command_name}_completions")));
    }
    candidates.push(PathBuf::from("/usr/share/rlwrap").join(command_name));
    candidates
}

fn check_debug_is_first(cli: &Cli, raw_args: &[String]) -> Result<()> {
    if cli.debug.is_none() {
        return Ok(());
    }
    let first_option = raw_args.iter().skip(1).find(|arg| arg.starts_with('-'));
    let is_debug = first_option
        .map(|arg| arg.starts_with("-d") || arg.starts_with("--debug"))
        .unwrap_or(false);
    if !is_debug {
        bail!("the -d or --debug option has to be the first option");
    }
    Ok(())
}

fn check_case_insensitive_precedes_files(cli: &Cli, raw_args: &[String]) -> Result<()> {
    if !cli.case_insensitive || cli.file.is_empty() {
        return Ok(());
    }
    let mut seen_file = false;
    for arg in raw_args.iter().skip(1) {
        if arg.starts_with("-f") || arg.starts_with("--file") {
            seen_file = true;
        }
        if (arg == "-i" || arg == "--case-insensitive") && seen_file {
            bail!("the -i option has to precede -f options");
        }
    }
    Ok(())
}

fn validate_history_format(format: &str) -> Result<()> {
    match format.chars().next() {
        None => bail!("--history-format needs a non-empty argument"),
        Some(first) if first.is_whitespace() => {
            bail!("--history-format argument should start with a non-space")
        }
        Some('%') if !format.starts_with("% ") => {
            bail!("a --history-format argument starting with '%' should start with '% '")
        }
        _ => Ok(()),
    }
}

/// `-C name` takes the name literally; `-C N` counts back from the end of
/// the command line; without `-C` the command's basename is used.
fn resolve_command_name(opt: Option<&str>, command: &[String]) -> Result<String> {
    let Some(value) = opt else {
        return Ok(basename(&command[0]));
    };
    if let Ok(countback) = value.parse::<i32>() {
        if countback > 0 {
            let count = countback as usize;
            if count > command.len() {
                bail!("-C {count} needs at least {count} command arguments");
            }
            let target = &command[command.len() - count];
            if target.starts_with('-') {
                bail!("the argument selected by -C {count} looks like an option: {target}");
            }
            return Ok(basename(target));
        }
        if value == "0" {
            bail!("-C 0 makes no sense");
        }
        bail!("-C needs a name or a positive number, perhaps you meant -C {}", -countback);
    }
    if value.contains('/') {
        bail!("a -C name should not contain directory components");
    }
    if value.starts_with('-') {
        bail!("-C needs an argument");
    }
    Ok(value.to_string())
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// When an optional-value option was given bare and the word after it became
/// the command, a failed exec probably means the user forgot the `=`.
fn optional_arg_hint(cli: &Cli, raw_args: &[String]) -> Option<String> {
    let bare_optionals: &[(&str, &str, bool)] = &[
        ("-a", "--always-readline", cli.always_readline.as_deref() == Some("")),
        ("-m", "--multi-line", cli.multi_line.as_deref() == Some(DEFAULT_MULTILINE_SEPARATOR)),
        ("-p", "--prompt-colour", cli.prompt_colour.as_deref() == Some(DEFAULT_PROMPT_COLOUR)),
    ];
    let command_word = cli.command.first()?;
    for (short, long, was_bare) in bare_optionals {
        if !was_bare {
            continue;
        }
        let used = raw_args
            .iter()
            .any(|arg| arg == short || arg == long || arg.starts_with(&format!("{long}=")));
        if used {
            return Some(format!(
                "Did you mean '{command_word}' to be an option argument?\n\
                 Then you should write {long}={command_word}, without the space"
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Result<Settings> {
        let raw: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let cli = Cli::try_parse_from(args).expect("clap parse");
        Settings::from_cli(cli, &raw)
    }

    #[test]
    fn plain_command_uses_its_basename() {
        let settings = parse(&["rlwrap", "/usr/bin/sqlplus", "-s"]).expect("settings");
        assert_eq!(settings.command_name, "sqlplus");
        assert_eq!(settings.command, vec!["/usr/bin/sqlplus", "-s"]);
        assert!(!settings.always_readline);
    }

    #[test]
    fn command_options_are_not_parsed_as_ours() {
        let settings = parse(&["rlwrap", "cat", "-n", "-A"]).expect("settings");
        assert_eq!(settings.command, vec!["cat", "-n", "-A"]);
        assert!(!settings.ansi_colour_aware);
        assert!(!settings.no_warnings);
    }

    #[test]
    fn always_readline_with_marker_sets_password_prompt() {
        let settings =
            parse(&["rlwrap", "--always-readline=assword:", "sqlplus"]).expect("settings");
        assert!(settings.always_readline);
        assert_eq!(settings.password_prompt.as_deref(), Some("assword:"));
    }

    #[test]
    fn bare_always_readline_has_no_marker() {
        let settings = parse(&["rlwrap", "-a", "cat"]).expect("settings");
        assert!(settings.always_readline);
        assert_eq!(settings.password_prompt, None);
        assert!(settings.optional_arg_hint.is_some());
    }

    #[test]
    fn pre_given_implies_always_readline() {
        let settings = parse(&["rlwrap", "-P", "select", "sqlite3"]).expect("settings");
        assert!(settings.always_readline);
        assert_eq!(settings.pre_given.as_deref(), Some("select"));
    }

    #[test]
    fn multi_line_defaults_its_separator() {
        let settings = parse(&["rlwrap", "-m", "psql"]).expect("settings");
        assert_eq!(settings.multiline_separator.as_deref(), Some(" \\ "));
        let settings = parse(&["rlwrap", "--multi-line=NL", "psql"]).expect("settings");
        assert_eq!(settings.multiline_separator.as_deref(), Some("NL"));
    }

    #[test]
    fn dup_policy_rejects_out_of_range() {
        assert!(Cli::try_parse_from(["rlwrap", "-D", "3", "cat"]).is_err());
        let settings = parse(&["rlwrap", "-D", "2", "cat"]).expect("settings");
        assert_eq!(settings.dup_policy, DupPolicy::EliminateAll);
    }

    #[test]
    fn negative_histsize_means_readonly() {
        let settings = parse(&["rlwrap", "-s", "-500", "cat"]).expect("settings");
        assert!(settings.history_readonly);
        assert_eq!(settings.histsize, 500);
    }

    #[test]
    fn command_name_countback_picks_argument() {
        let settings = parse(&["rlwrap", "-C", "1", "perl", "test.cgi"]).expect("settings");
        assert_eq!(settings.command_name, "test.cgi");
        assert!(parse(&["rlwrap", "-C", "0", "cat"]).is_err());
        assert!(parse(&["rlwrap", "-C", "7", "cat"]).is_err());
        assert!(parse(&["rlwrap", "-C", "dir/name", "cat"]).is_err());
    }

    #[test]
    fn history_format_validation_catches_bad_starts() {
        assert!(parse(&["rlwrap", "-F", " x", "cat"]).is_err());
        assert!(parse(&["rlwrap", "-F", "%H:%M", "cat"]).is_err());
        assert!(parse(&["rlwrap", "-F", "% %H:%M", "cat"]).is_ok());
    }

    #[test]
    fn debug_must_come_first() {
        assert!(parse(&["rlwrap", "-n", "-d", "cat"]).is_err());
        let settings = parse(&["rlwrap", "-d", "-n", "cat"]).expect("settings");
        assert_eq!(settings.debug_mask, Some(DEBUG_ALL));
    }

    #[test]
    fn case_insensitive_must_precede_file_options() {
        assert!(parse(&["rlwrap", "-f", "/dev/null", "-i", "cat"]).is_err());
        assert!(parse(&["rlwrap", "-i", "-f", "/dev/null", "cat"]).is_ok());
    }

    #[test]
    fn break_chars_gain_path_characters_without_filename_completion() {
        let settings = parse(&["rlwrap", "cat"]).expect("settings");
        assert!(settings.break_chars.contains("/."));
        let settings = parse(&["rlwrap", "-c", "cat"]).expect("settings");
        assert!(!settings.break_chars.contains('/'));
    }

    #[test]
    fn bad_prompt_colour_is_rejected() {
        assert!(parse(&["rlwrap", "--prompt-colour=9;31", "cat"]).is_err());
        assert!(parse(&["rlwrap", "--prompt-colour=0;33", "cat"]).is_ok());
    }
}
