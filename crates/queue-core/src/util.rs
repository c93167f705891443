//! Small helpers shared across the crate: wall-clock timestamps and the
//! printf-style log formatter used by `Job::log`.

use std::fmt;

/// Current epoch-ms timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One positional argument to [`format_log`].
#[derive(Debug, Clone)]
pub enum LogArg {
    Str(String),
    Int(i64),
}

impl fmt::Display for LogArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogArg::Str(s) => write!(f, "{s}"),
            LogArg::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for LogArg {
    fn from(s: &str) -> Self {
        LogArg::Str(s.to_string())
    }
}

impl From<String> for LogArg {
    fn from(s: String) -> Self {
        LogArg::Str(s)
    }
}

impl From<i64> for LogArg {
    fn from(i: i64) -> Self {
        LogArg::Int(i)
    }
}

impl From<i32> for LogArg {
    fn from(i: i32) -> Self {
        LogArg::Int(i as i64)
    }
}

impl From<u64> for LogArg {
    fn from(i: u64) -> Self {
        LogArg::Int(i as i64)
    }
}

/// Render `fmt` substituting `%s`/`%d` specifiers with `args` in order.
/// `%%` is a literal `%`. An unrecognized specifier or a specifier with no
/// remaining argument is left verbatim, matching the forgiving behavior
/// of the printf-style logger this mirrors.
pub fn format_log(fmt: &str, args: &[LogArg]) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut arg_iter = args.iter();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(spec @ ('s' | 'd')) => {
                let spec = *spec;
                chars.next();
                match arg_iter.next() {
                    Some(arg) => out.push_str(&arg.to_string()),
                    None => {
                        out.push('%');
                        out.push(spec);
                    }
                }
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_string_and_int_specifiers() {
        let rendered = format_log(
            "user %s attempted %d times",
            &[LogArg::from("alice"), LogArg::from(3i64)],
        );
        assert_eq!(rendered, "user alice attempted 3 times");
    }

    #[test]
    fn literal_percent_escapes() {
        assert_eq!(format_log("100%% done", &[]), "100% done");
    }

    #[test]
    fn leaves_specifier_verbatim_when_args_exhausted() {
        assert_eq!(format_log("%s and %s", &[LogArg::from("only")]), "only and %s");
    }
}
