//! Completion word list: seeded from files, optionally fed by everything
//! the command prints, queried by prefix with an iteration index.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub(crate) struct CompletionList {
    words: BTreeSet<String>,
    case_insensitive: bool,
    complete_filenames: bool,
    break_chars: String,
    quote_chars: String,
}

impl CompletionList {
    pub fn new(
        case_insensitive: bool,
        complete_filenames: bool,
        break_chars: String,
        quote_chars: String,
    ) -> Self {
        CompletionList {
            words: BTreeSet::new(),
            case_insensitive,
            complete_filenames,
            break_chars,
            quote_chars,
        }
    }

    /// Byte offset where the word under the cursor starts: the position
    /// after the last unquoted break character before `point`.
    pub fn word_start(&self, text: &str, point: usize) -> usize {
        let mut start = 0;
        let mut quote: Option<char> = None;
        for (idx, ch) in text.char_indices() {
            if idx >= point {
                break;
            }
            match quote {
                Some(open) if ch == open => quote = None,
                Some(_) => {}
                None if self.quote_chars.contains(ch) => quote = Some(ch),
                None if self.break_chars.contains(ch) => start = idx + ch.len_utf8(),
                None => {}
            }
        }
        start
    }

    /// Load a word list, one word per line. Blank lines are skipped.
    pub fn feed_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read completion list {}", path.display()))?;
        for line in contents.lines() {
            let word = line.trim();
            if !word.is_empty() {
                self.add_word(word);
            }
        }
        Ok(())
    }

    /// Split a line of command output (or accepted input) on the break
    /// characters and remember each word.
    pub fn feed_line(&mut self, line: &str) {
        let mut word = String::new();
        for ch in line.chars() {
            if self.break_chars.contains(ch) || ch.is_control() {
                if word.len() > 1 {
                    self.add_word(&word);
                }
                word.clear();
            } else {
                word.push(ch);
            }
        }
        if word.len() > 1 {
            self.add_word(&word);
        }
    }

    pub fn add_word(&mut self, word: &str) {
        self.words.insert(word.to_string());
    }

    /// The `index`-th completion of `prefix`, dictionary words first, then
    /// filesystem matches when filename completion is on.
    pub fn complete(&self, prefix: &str, index: usize) -> Option<String> {
        self.matches(prefix).into_iter().nth(index)
    }

    /// All completions of `prefix`, in listing order.
    pub fn matches(&self, prefix: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .words
            .iter()
            .filter(|word| self.prefix_matches(word, prefix))
            .cloned()
            .collect();
        if self.complete_filenames {
            for name in self.filename_matches(prefix) {
                if !found.contains(&name) {
                    found.push(name);
                }
            }
        }
        found
    }

    fn prefix_matches(&self, word: &str, prefix: &str) -> bool {
        if self.case_insensitive {
            word.to_lowercase().starts_with(&prefix.to_lowercase())
        } else {
            word.starts_with(prefix)
        }
    }

    fn filename_matches(&self, prefix: &str) -> Vec<String> {
        let (dir, stem) = match prefix.rsplit_once('/') {
            Some((dir, stem)) => (format!("{dir}/"), stem.to_string()),
            None => ("./".to_string(), prefix.to_string()),
        };
        let Ok(entries) = fs::read_dir(dir.trim_end_matches('/')) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if self.prefix_matches(&name, &stem) {
                    let shown = if dir == "./" { name } else { format!("{dir}{name}") };
                    Some(shown)
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }

    /// Longest prefix shared by all matches of `prefix` (used to extend the
    /// word before cycling starts).
    pub fn common_prefix(&self, prefix: &str) -> Option<String> {
        let matches = self.matches(prefix);
        let first = matches.first()?;
        let mut common = first.clone();
        for word in &matches[1..] {
            let shared: usize = common
                .char_indices()
                .zip(word.chars())
                .take_while(|((_, a), b)| a == b)
                .map(|((i, a), _)| i + a.len_utf8())
                .last()
                .unwrap_or(0);
            common.truncate(shared);
        }
        if common.len() > prefix.len() {
            Some(common)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(words: &[&str]) -> CompletionList {
        let mut completion = CompletionList::new(false, false, " \t\n".to_string(), "\"'".to_string());
        for word in words {
            completion.add_word(word);
        }
        completion
    }

    #[test]
    fn complete_iterates_matches_in_order() {
        let completion = list(&["select", "selfie", "update"]);
        assert_eq!(completion.complete("sel", 0).as_deref(), Some("select"));
        assert_eq!(completion.complete("sel", 1).as_deref(), Some("selfie"));
        assert_eq!(completion.complete("sel", 2), None);
        assert_eq!(completion.complete("zz", 0), None);
    }

    #[test]
    fn case_insensitive_matching_when_asked() {
        let mut completion = CompletionList::new(true, false, " ".to_string(), "\"'".to_string());
        completion.add_word("SELECT");
        assert_eq!(completion.complete("sel", 0).as_deref(), Some("SELECT"));
        let sensitive = list(&["SELECT"]);
        assert_eq!(sensitive.complete("sel", 0), None);
    }

    #[test]
    fn feed_line_splits_on_break_characters() {
        let mut completion = CompletionList::new(false, false, " \t\n(),".to_string(), "\"'".to_string());
        completion.feed_line("insert into users (name, age)");
        assert_eq!(completion.complete("use", 0).as_deref(), Some("users"));
        assert_eq!(completion.complete("na", 0).as_deref(), Some("name"));
        // single characters are noise, not words
        assert_eq!(completion.complete("a", 0).as_deref(), Some("age"));
    }

    #[test]
    fn word_start_respects_breaks_and_quotes() {
        let completion = list(&[]);
        assert_eq!(completion.word_start("select na", 9), 7);
        assert_eq!(completion.word_start("word", 4), 0);
        // a break character inside quotes does not start a new word
        assert_eq!(completion.word_start("say 'a b", 8), 4);
    }

    #[test]
    fn common_prefix_extends_before_cycling() {
        let completion = list(&["selection", "selections"]);
        assert_eq!(completion.common_prefix("sel").as_deref(), Some("selection"));
        let ambiguous = list(&["abc", "abd"]);
        assert_eq!(ambiguous.common_prefix("a").as_deref(), Some("ab"));
        assert_eq!(ambiguous.common_prefix("ab"), None);
    }

    #[test]
    fn feed_file_loads_one_word_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("words");
        fs::write(&path, "alpha\n\nbeta\n").expect("write words");
        let mut completion = CompletionList::new(false, false, " ".to_string(), "\"'".to_string());
        completion.feed_file(&path).expect("feed");
        assert_eq!(completion.complete("al", 0).as_deref(), Some("alpha"));
        assert_eq!(completion.complete("be", 0).as_deref(), Some("beta"));
    }

    #[test]
    fn filename_completion_lists_directory_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("notes.txt"), "").expect("touch");
        fs::write(dir.path().join("nothing.md"), "").expect("touch");
        let completion = CompletionList::new(false, true, " ".to_string(), "\"'".to_string());
        let prefix = format!("{}/not", dir.path().display());
        let matches = completion.matches(&prefix);
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.starts_with(dir.path().to_str().unwrap())));
    }
}
