//! ANSI escape-sequence stripping (spec.md §4.1 "Framing").

use std::sync::LazyLock;

use regex::Regex;

/// CSI sequences: `ESC [ params intermediate final`.
static CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("valid regex"));

/// OSC sequences: `ESC ] ... BEL` or `ESC ] ... ESC \`.
static OSC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").expect("valid regex"));

/// Strip CSI sequences, OSC sequences, and standalone `CR` bytes from a
/// single line of text, per spec.md §4.1.
#[must_use]
pub fn strip_ansi(line: &str) -> String {
    let no_csi = CSI.replace_all(line, "");
    let no_osc = OSC.replace_all(&no_csi, "");
    no_osc.replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_csi_sequences() {
        let raw = "\x1b[?25l{\"type\":\"result\"}\x1b[0m";
        assert_eq!(strip_ansi(raw), "{\"type\":\"result\"}");
    }

    #[test]
    fn strips_osc_sequences() {
        let raw = "\x1b]0;title\x07{\"type\":\"result\"}";
        assert_eq!(strip_ansi(raw), "{\"type\":\"result\"}");
    }

    #[test]
    fn strips_standalone_cr() {
        let raw = "{\"a\":1}\r";
        assert_eq!(strip_ansi(raw), "{\"a\":1}");
    }

    #[test]
    fn leaves_clean_json_untouched() {
        let raw = "{\"type\":\"result\",\"result\":\"4\"}";
        assert_eq!(strip_ansi(raw), raw);
    }

    #[test]
    fn multiple_sequences_in_one_line() {
        let raw = "\x1b[1m\x1b[32m{\"x\":1}\x1b[0m";
        assert_eq!(strip_ansi(raw), "{\"x\":1}");
    }
}
