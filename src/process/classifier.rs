//! Output classification.
//!
//! Maps a fragment of tool output to a verdict using case-insensitive
//! pattern lists. The lists match the English messages the tool and the
//! platforms it talks to emit today. This is a known approximation:
//! localized or reworded messages fall through to [`Verdict::None`] and the
//! task then fails (or times out) through the ordinary paths instead.

use std::sync::OnceLock;

use regex::{RegexSet, RegexSetBuilder};

use crate::error::TaskError;

/// Category of an unrecoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalKind {
    Authentication,
    Network,
    RateLimit,
    ModelConfiguration,
}

impl FatalKind {
    /// Converts the verdict into the task error it stands for.
    pub fn into_error(self, message: impl Into<String>) -> TaskError {
        let message = message.into();
        match self {
            FatalKind::Authentication => TaskError::Authentication(message),
            FatalKind::Network => TaskError::Network {
                message,
                fatal: true,
            },
            FatalKind::RateLimit => TaskError::RateLimit {
                message,
                fatal: true,
            },
            FatalKind::ModelConfiguration => TaskError::ModelConfiguration(message),
        }
    }
}

/// Result of classifying one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Fatal(FatalKind),
    Warning,
    None,
}

const AUTH_PATTERNS: &[&str] = &[
    r"authentication (failed|error|required)",
    r"invalid (api[ _-]?key|x-api-key|token)",
    r"\bunauthori[sz]ed\b",
    r"\b401\b",
    r"not logged in",
    r"please run /login",
    r"invalid credentials?",
    r"credentials? (expired|missing|not found)",
    r"oauth token (has )?expired",
];

const MODEL_PATTERNS: &[&str] = &[
    r"model (not found|.*does not exist)",
    r"invalid model",
    r"unknown model",
    r"not_found_error.*model",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    r"rate[ _-]?limit",
    r"\b429\b",
    r"too many requests",
    r"quota (exceeded|exhausted)",
    r"usage limit reached",
];

const NETWORK_PATTERNS: &[&str] = &[
    r"\beconnrefused\b",
    r"\benotfound\b",
    r"\beconnreset\b",
    r"\betimedout\b",
    r"getaddrinfo",
    r"\bdns\b.*(fail|error|resolve)",
    r"(tls|ssl) (handshake|error)",
    r"certificate (verify|has expired|error)",
    r"connection (refused|reset|closed unexpectedly)",
    r"network (error|is unreachable)",
    r"unable to connect",
];

const WARNING_PATTERNS: &[&str] = &[
    r"\bretrying\b",
    r"\bdegraded\b",
    r"\boverloaded\b",
    r"temporarily unavailable",
    r"\bwarn(ing)?\b",
];

struct Patterns {
    auth: RegexSet,
    model: RegexSet,
    rate_limit: RegexSet,
    network: RegexSet,
    warning: RegexSet,
}

fn build(patterns: &[&str]) -> RegexSet {
    match RegexSetBuilder::new(patterns).case_insensitive(true).build() {
        Ok(set) => set,
        // The lists are constants covered by tests
        Err(_) => RegexSet::empty(),
    }
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        auth: build(AUTH_PATTERNS),
        model: build(MODEL_PATTERNS),
        rate_limit: build(RATE_LIMIT_PATTERNS),
        network: build(NETWORK_PATTERNS),
        warning: build(WARNING_PATTERNS),
    })
}

/// Classifies a fragment of output.
///
/// Families are checked in order: authentication, model configuration, rate
/// limit, network, warning. The first match wins.
pub fn classify(fragment: &str) -> Verdict {
    let p = patterns();
    if p.auth.is_match(fragment) {
        Verdict::Fatal(FatalKind::Authentication)
    } else if p.model.is_match(fragment) {
        Verdict::Fatal(FatalKind::ModelConfiguration)
    } else if p.rate_limit.is_match(fragment) {
        Verdict::Fatal(FatalKind::RateLimit)
    } else if p.network.is_match(fragment) {
        Verdict::Fatal(FatalKind::Network)
    } else if p.warning.is_match(fragment) {
        Verdict::Warning
    } else {
        Verdict::None
    }
}

/// Incremental line classifier for a byte stream.
///
/// Chunks may split a line; the unfinished tail is carried into the next
/// chunk and is also classified on its own so a message without a trailing
/// newline is caught without waiting for more output.
#[derive(Debug, Default)]
pub struct LineClassifier {
    carry: String,
}

/// Longest partial line kept between chunks.
const MAX_CARRY: usize = 4096;

impl LineClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the first fatal verdict with its line,
    /// plus whether a warning was seen.
    pub fn feed(&mut self, chunk: &str) -> (Option<(FatalKind, String)>, bool) {
        self.carry.push_str(chunk);
        let mut warning = false;
        let mut fatal = None;

        let text = std::mem::take(&mut self.carry);
        let (complete, tail) = match text.rfind('\n') {
            Some(idx) => (&text[..idx], &text[idx + 1..]),
            None => ("", text.as_str()),
        };

        for line in complete.lines().chain(std::iter::once(tail)) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match classify(line) {
                Verdict::Fatal(kind) => {
                    fatal = Some((kind, truncate(line, 500)));
                    break;
                }
                Verdict::Warning => warning = true,
                Verdict::None => {}
            }
        }

        let keep_from = tail.len().saturating_sub(MAX_CARRY);
        let keep_from = (keep_from..=tail.len())
            .find(|idx| tail.is_char_boundary(*idx))
            .unwrap_or(tail.len());
        self.carry = tail[keep_from..].to_string();
        (fatal, warning)
    }
}

fn truncate(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let mut out: String = line.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_lists_compile() {
        for list in [
            AUTH_PATTERNS,
            MODEL_PATTERNS,
            RATE_LIMIT_PATTERNS,
            NETWORK_PATTERNS,
            WARNING_PATTERNS,
        ] {
            assert!(RegexSetBuilder::new(list).build().is_ok());
        }
    }

    #[test]
    fn test_authentication_fragments() {
        for fragment in [
            "Authentication failed",
            "Error: Invalid API key · Please run /login",
            "HTTP 401 Unauthorized",
            "You are not logged in",
            "OAuth token has expired",
        ] {
            assert_eq!(
                classify(fragment),
                Verdict::Fatal(FatalKind::Authentication),
                "{}",
                fragment
            );
        }
    }

    #[test]
    fn test_network_fragments() {
        for fragment in [
            "connect ECONNREFUSED 127.0.0.1:443",
            "getaddrinfo ENOTFOUND api.anthropic.com",
            "TLS handshake timeout",
            "certificate has expired",
            "Connection reset by peer",
        ] {
            assert_eq!(
                classify(fragment),
                Verdict::Fatal(FatalKind::Network),
                "{}",
                fragment
            );
        }
    }

    #[test]
    fn test_rate_limit_fragments() {
        for fragment in ["Rate limit exceeded", "status 429", "Too Many Requests", "quota exceeded"] {
            assert_eq!(
                classify(fragment),
                Verdict::Fatal(FatalKind::RateLimit),
                "{}",
                fragment
            );
        }
    }

    #[test]
    fn test_model_fragments() {
        assert_eq!(
            classify("Error: model not found: claude-nope"),
            Verdict::Fatal(FatalKind::ModelConfiguration)
        );
        assert_eq!(
            classify("Invalid model name"),
            Verdict::Fatal(FatalKind::ModelConfiguration)
        );
    }

    #[test]
    fn test_warning_and_none() {
        assert_eq!(classify("API overloaded, retrying in 2s"), Verdict::Warning);
        assert_eq!(classify("Service degraded"), Verdict::Warning);
        assert_eq!(classify("Generated 12 tests"), Verdict::None);
        assert_eq!(classify(""), Verdict::None);
        // Numbers inside longer tokens are not status codes
        assert_eq!(classify("line 14010 ok"), Verdict::None);
    }

    #[test]
    fn test_fatal_kind_into_error() {
        let err = FatalKind::Network.into_error("ENOTFOUND");
        assert!(err.is_fatal());
        assert_eq!(err.kind(), crate::error::ErrorKind::Network);
        assert!(FatalKind::Authentication.into_error("x").is_fatal());
    }

    #[test]
    fn test_line_classifier_split_chunks() {
        let mut classifier = LineClassifier::new();
        let (fatal, _) = classifier.feed("progress ok\nAuthenti");
        assert!(fatal.is_none());
        let (fatal, _) = classifier.feed("cation failed\n");
        let (kind, line) = fatal.unwrap();
        assert_eq!(kind, FatalKind::Authentication);
        assert_eq!(line, "Authentication failed");
    }

    #[test]
    fn test_line_classifier_partial_line_detected() {
        let mut classifier = LineClassifier::new();
        let (fatal, _) = classifier.feed("Error: Invalid API key");
        assert_eq!(fatal.unwrap().0, FatalKind::Authentication);
    }

    #[test]
    fn test_line_classifier_reports_warnings() {
        let mut classifier = LineClassifier::new();
        let (fatal, warning) = classifier.feed("Overloaded, retrying\nok\n");
        assert!(fatal.is_none());
        assert!(warning);
    }

    #[test]
    fn test_line_classifier_bounds_carry() {
        let mut classifier = LineClassifier::new();
        classifier.feed(&"é".repeat(10_000));
        assert!(classifier.carry.len() <= MAX_CARRY);
    }
}
