//! Log line normalisation.
//!
//! Strips the parts of a line that change from one run to the next (numbers,
//! hashes, uuids, dates, addresses, temporary paths) so that two occurrences
//! of the same event produce the same token string.

use once_cell::sync::Lazy;
use regex::Regex;

/// Lines that are pure noise whatever their content.
static RAW_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#""GET / HTTP/1\.1""#,
        r#"|"OPTIONS \* HTTP/1\.0" 200"#,
        // ssh keys
        r"|AAAA[A-Z][0-9]",
        // hashed passwords
        r"|\$[0-9]\$",
        r"|-----BEGIN",
        // git status
        r"|HEAD is now at|Change-Id: ",
        // download progress
        r"| ETA ",
        // yum mirrors
        r"|\* [a-zA-Z]+: [a-zA-Z0-9.-]*$|Trying other mirror\.",
        // ssh scans
        r#"|audit.*exe="/usr/sbin/sshd"|sshd.*[iI]nvalid user"#,
    ))
    .expect("valid raw line regex")
});

static URI_PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%[2345][0-9A-F]").expect("valid percent regex"));

static POWER2_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-f]{128}|[0-9a-f]{64}|[0-9a-f]{32}").expect("valid hash length regex")
});

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[0-9a-f]{8}-?[0-9a-f]{4}-?4[0-9a-f]{3}-?[89ab][0-9a-f]{3}-?[0-9a-f]{12}|tx[^ ]{32}",
    )
    .expect("valid uuid regex")
});

static HEAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"-\w{12}[- "$]"#).expect("valid short id regex"));

static GITSHA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w{7}\.\.\w{7}\b").expect("valid git range regex"));

static HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SHA256:[\w+/]{43}\b").expect("valid fingerprint regex"));

static RANDPATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/tmp/ansible\.\w{8}|/tmp/tmp\w{6}|/tmp/tmp\.\w{10}|/tmp/\w+\.\w{6,}")
        .expect("valid random path regex")
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:",
        "sunday|monday|tuesday|wednesday|thursday|friday|saturday",
        "|january|february|march|april|may|june|july|august|september|october|november|december",
        "|sun|mon|tue|wed|thu|fri|sat",
        "|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec",
        r")\b",
    ))
    .expect("valid date regex")
});

static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b",
        r"|\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b",
        r"|\b(?:[0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}\b",
    ))
    .expect("valid address regex")
});

static DIGITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]{2,}|[0-9]+(?:\.[0-9]+)?").expect("valid digits regex"));

static ALPHA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z_/\s]+").expect("valid alpha regex"));

/// Words shorter than this are dropped.
const MIN_WORD_LEN: usize = 4;

/// Tokens that get extra weight when present, so that two lines differing
/// only by an error marker end up far apart.
const WEIGHTED_TOKENS: [&str; 3] = ["error", "fail", "warn"];

/// Normalises a raw log line. Returns an empty string for ignored lines.
pub fn process(line: &str) -> String {
    if RAW_LINE_RE.is_match(line) {
        return String::new();
    }

    let strip = URI_PERCENT_RE.replace_all(line, " ");
    let strip = POWER2_RE.replace_all(&strip, "RNGH");
    let strip = UUID_RE.replace_all(&strip, "RNGU");
    let strip = HEAT_RE.replace_all(&strip, " HEAT ");
    let strip = GITSHA_RE.replace_all(&strip, "RNGG");
    let strip = HASH_RE.replace_all(&strip, "RNGH");
    let strip = RANDPATH_RE.replace_all(&strip, "RNGP");
    let strip = DATE_RE.replace_all(&strip, "DATE");
    let strip = IP_RE.replace_all(&strip, "RNGI");
    let strip = DIGITS_RE.replace_all(&strip, "");
    let strip = ALPHA_RE.replace_all(&strip, " ");

    let mut tokens = strip
        .split_whitespace()
        .filter(|word| word.len() >= MIN_WORD_LEN)
        .collect::<Vec<_>>()
        .join(" ");

    let lower = tokens.to_lowercase();
    for token in WEIGHTED_TOKENS {
        if lower.contains(token) {
            tokens.push_str(&format!(" {token}A {token}B {token}C {token}D"));
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_numbers_and_short_words() {
        assert_eq!(process("Created container 1234 in 5.2s"), "Created container");
    }

    #[test]
    fn test_volatile_parts_are_masked() {
        let first = process(
            "Pulled image quay.io/ocp/release@sha256:0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9 on 10.0.3.17",
        );
        let second = process(
            "Pulled image quay.io/ocp/release@sha256:ffeeddccbbaa99887766554433221100ffeeddccbbaa99887766554433221100 on 10.0.140.2",
        );

        assert_eq!(first, second);
        assert!(first.contains("RNGH"));
        assert!(first.contains("RNGI"));
    }

    #[test]
    fn test_uuid_is_masked() {
        let tokens = process("Deleted pod uid 3f2b8c1e-5d4a-4b6f-9e2d-7c1a0b9f8e6d from node");
        assert!(tokens.contains("RNGU"));
        assert!(!tokens.contains("3f2b"));
    }

    #[test]
    fn test_dates_are_masked() {
        assert_eq!(
            process("Backup started Monday Jan 12"),
            process("Backup started Friday Oct 30")
        );
    }

    #[test]
    fn test_raw_noise_lines_are_ignored() {
        assert_eq!(process("-----BEGIN CERTIFICATE-----"), "");
        assert_eq!(process("HEAD is now at 1a2b3c4 Merge pull request"), "");
    }

    #[test]
    fn test_error_tokens_are_weighted() {
        let tokens = process("Error: pod failed to start");
        assert!(tokens.starts_with("Error failed start"));
        assert!(tokens.contains("errorA errorB errorC errorD"));
        assert!(tokens.contains("failA failB failC failD"));
        assert!(!tokens.contains("warnA"));
    }
}
