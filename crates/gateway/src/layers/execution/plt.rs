use crate::error::ProcessError;
use crate::layers::execution::processor::MAX_TIMEOUT_SECS;
use regex::Regex;
use std::sync::OnceLock;

pub const PLT_PREFIX: &str = ".plt";

/// Per-call override of output position, output length and timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PltOverride {
    pub begin_position: usize,
    pub max_length: usize,
    pub timeout_secs: u64,
}

fn plt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)(.*)$").expect("valid PLT pattern")
    })
}

/// Splits `.plt B,L,T rest` into the override and the remaining command.
/// Returns `None` when `content` does not start with the PLT prefix.
pub fn parse_plt(content: &str) -> Option<Result<(PltOverride, String), ProcessError>> {
    let body = content.strip_prefix(PLT_PREFIX)?;
    let Some(captures) = plt_pattern().captures(body) else {
        return Some(Err(ProcessError::BadPltSyntax(
            "expected .plt <begin>,<length>,<timeout> <command>",
        )));
    };
    let numbers: Option<(usize, usize, u64)> = (|| {
        Some((
            captures[1].parse().ok()?,
            captures[2].parse().ok()?,
            captures[3].parse().ok()?,
        ))
    })();
    let Some((begin_position, max_length, timeout_secs)) = numbers else {
        return Some(Err(ProcessError::BadPltSyntax("numbers out of range")));
    };
    if max_length == 0 || timeout_secs == 0 {
        return Some(Err(ProcessError::BadPltSyntax(
            "length and timeout must be positive",
        )));
    }
    if timeout_secs > MAX_TIMEOUT_SECS {
        return Some(Err(ProcessError::BadPltSyntax("timeout is too long")));
    }
    let rest = captures[4].trim().to_string();
    if rest.is_empty() {
        return Some(Err(ProcessError::BadPltSyntax("command is missing")));
    }
    Some(Ok((
        PltOverride {
            begin_position,
            max_length,
            timeout_secs,
        },
        rest,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_override_and_command() {
        let (plt, rest) = parse_plt(".plt 10, 200, 60 .s uname -a")
            .expect("plt")
            .expect("valid");
        assert_eq!(
            plt,
            PltOverride {
                begin_position: 10,
                max_length: 200,
                timeout_secs: 60,
            }
        );
        assert_eq!(rest, ".s uname -a");
    }

    #[test]
    fn ignores_other_content() {
        assert!(parse_plt(".s echo .plt 1,2,3").is_none());
    }

    #[test]
    fn rejects_missing_numbers() {
        let err = parse_plt(".plt 10,20 .s date").expect("plt").expect_err("bad");
        assert!(matches!(err, ProcessError::BadPltSyntax(_)));
    }

    #[test]
    fn rejects_missing_command() {
        let err = parse_plt(".plt 0,100,5").expect("plt").expect_err("bad");
        assert_eq!(err, ProcessError::BadPltSyntax("command is missing"));
    }

    #[test]
    fn rejects_timeout_beyond_limit() {
        let err = parse_plt(".plt 0,40,18446744073709551615 .s date")
            .expect("plt")
            .expect_err("bad");
        assert_eq!(err, ProcessError::BadPltSyntax("timeout is too long"));
        assert!(parse_plt(&format!(".plt 0,40,{MAX_TIMEOUT_SECS} .s date"))
            .expect("plt")
            .is_ok());
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = parse_plt(".plt 0,100,0 .s date").expect("plt").expect_err("bad");
        assert!(matches!(err, ProcessError::BadPltSyntax(_)));
    }
}
