//! Diagnostics formatting for the terminal.

use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;

static ANSI_ESCAPES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid regex"));

/// Removes ANSI escape sequences from a message.
pub fn strip_ansi(message: &str) -> String {
    ANSI_ESCAPES.replace_all(message, "").into_owned()
}

/// Prints an error to stderr, ANSI-stripped, with a trailing `\r\n` so the
/// cursor lands at the line start even under a raw-mode shell.
pub fn print_error(message: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "{}\r\n", strip_ansi(message));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_sequences() {
        assert_eq!(strip_ansi("\x1b[31merror\x1b[0m: boom"), "error: boom");
        assert_eq!(strip_ansi("plain"), "plain");
    }
}
