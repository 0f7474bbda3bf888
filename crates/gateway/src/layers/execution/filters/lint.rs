use crate::layers::execution::command::CommandResult;
use crate::layers::execution::plt::PltOverride;
use protocol::compact::{FIELD_SEPARATOR, NEWLINE_SEPARATOR};
use protocol::config::LintConfig;
use regex::Regex;
use std::sync::OnceLock;

pub const MIN_LINT_LENGTH: usize = 35;
pub const MAX_LINT_LENGTH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintText {
    pub trim_spaces: bool,
    pub compress_to_single_line: bool,
    pub keep_visible_7bit_only: bool,
    pub compress_spaces: bool,
    pub begin_position: usize,
    pub max_length: usize,
}

impl From<&LintConfig> for LintText {
    fn from(config: &LintConfig) -> Self {
        Self {
            trim_spaces: config.trim_spaces,
            compress_to_single_line: config.compress_to_single_line,
            keep_visible_7bit_only: config.keep_visible_7bit_only,
            compress_spaces: config.compress_spaces,
            begin_position: config.begin_position,
            max_length: config.max_length,
        }
    }
}

fn blank_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[ \t]+").expect("valid blank pattern"))
}

impl LintText {
    pub fn with_plt(&self, plt: &PltOverride) -> Self {
        Self {
            begin_position: plt.begin_position,
            max_length: plt.max_length,
            ..self.clone()
        }
    }

    pub fn transform(&self, result: &mut CommandResult) {
        result.combined_output = self.lint(&result.combined_output);
    }

    pub fn lint(&self, input: &str) -> String {
        let mut text = input.to_string();
        if self.trim_spaces {
            text = text
                .lines()
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
        }
        if self.compress_to_single_line {
            text = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(";");
        }
        if self.keep_visible_7bit_only {
            text = text.chars().map(visible_7bit_or_placeholder).collect();
        }
        if self.compress_spaces {
            text = blank_run().replace_all(&text, " ").into_owned();
        }
        if self.begin_position > 0 {
            text = text.chars().skip(self.begin_position).collect();
        }
        if self.max_length > 0 {
            protocol::truncate_chars(&mut text, self.max_length);
        }
        text
    }
}

/// Compact-report separators survive so `.0m` replies stay decodable.
fn visible_7bit_or_placeholder(ch: char) -> char {
    match ch {
        ' '..='~' | '\n' | '\t' | FIELD_SEPARATOR | NEWLINE_SEPARATOR => ch,
        _ => '?',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint_all(max_length: usize) -> LintText {
        LintText {
            trim_spaces: true,
            compress_to_single_line: true,
            keep_visible_7bit_only: true,
            compress_spaces: true,
            begin_position: 0,
            max_length,
        }
    }

    #[test]
    fn collapses_multiline_output() {
        let out = lint_all(100).lint("  first   line \n\n\t second\tline  \n");
        assert_eq!(out, "first line;second line");
    }

    #[test]
    fn replaces_non_ascii_with_placeholder() {
        let out = lint_all(100).lint("héllo\u{7}");
        assert_eq!(out, "h?llo?");
    }

    #[test]
    fn drops_prefix_and_truncates() {
        let lint = LintText {
            begin_position: 3,
            ..lint_all(4)
        };
        assert_eq!(lint.lint("abcdefghij"), "defg");
        let lint = LintText {
            begin_position: 30,
            ..lint_all(4)
        };
        assert_eq!(lint.lint("abc"), "");
    }

    #[test]
    fn only_enabled_steps_run() {
        let lint = LintText {
            trim_spaces: false,
            compress_to_single_line: false,
            keep_visible_7bit_only: false,
            compress_spaces: false,
            begin_position: 0,
            max_length: 0,
        };
        assert_eq!(lint.lint("  a\n  b  "), "  a\n  b  ");
    }

    #[test]
    fn keeps_compact_separators() {
        let input = format!("host{FIELD_SEPARATOR}line{NEWLINE_SEPARATOR}two");
        assert_eq!(lint_all(100).lint(&input), input);
    }

    #[test]
    fn plt_overrides_position_and_length() {
        let lint = lint_all(100).with_plt(&PltOverride {
            begin_position: 2,
            max_length: 3,
            timeout_secs: 9,
        });
        assert!(lint.trim_spaces);
        assert_eq!(lint.lint("0123456789"), "234");
    }
}
