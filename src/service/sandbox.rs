//! Input sandboxing for user-supplied idea text
//!
//! The LLM downstream is treated as an untrusted interpreter: user text is
//! filtered for injection patterns AND structurally delimited, because
//! either defense alone is insufficient. Every LLM-facing prompt must embed
//! user text through `wrap` — passing raw idea text to a model is a
//! contract violation.

use regex::Regex;

pub const MAX_INPUT_CHARS: usize = 2000;

const OPEN_TAG: &str = "<user_query>";
const CLOSE_TAG: &str = "</user_query>";

/// English injection patterns, matched case-insensitively on the raw text.
const DANGEROUS_PATTERNS: &[&str] = &[
    r"(?:ignore|disregard)\s+(?:all\s+)?(?:the\s+)?(?:above|previous|below|system|instruction|prompt)",
    r"system\s*:",
    r"\[\s*system\s*\]",
    r"you\s+are\s+now\s+a",
    r"new\s+rule",
    r"system\s+override",
    r"don'?t\s+follow\s+the\s+instructions",
    r"forget\s+everything",
    r"previous\s+context\s+is\s+deleted",
];

/// Korean injection patterns, whitespace-flexible.
const DANGEROUS_PATTERNS_KO: &[&str] = &[
    r"이전\s*지침을?\s*무시",
    r"시스템\s*프롬프트를?\s*무시",
    r"앞의\s*내용은?\s*무시",
    r"지금부터\s*당신은",
    r"새로운\s*규칙",
    r"시스템\s*재설정",
    r"지침을?\s*따르지\s*마세요",
    r"대신\s*답변하세요",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Input is too long (max {MAX_INPUT_CHARS} characters)")]
    InputTooLong,

    #[error("Malicious input pattern detected")]
    PromptInjection,
}

impl SandboxError {
    /// Stable error code surfaced through the event stream.
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::InputTooLong => "InputTooLong",
            SandboxError::PromptInjection => "PromptInjection",
        }
    }
}

/// Validates, escapes, and tag-wraps user idea text.
pub struct InputSandbox {
    patterns: Vec<Regex>,
}

impl InputSandbox {
    pub fn new() -> Self {
        let patterns = DANGEROUS_PATTERNS
            .iter()
            .chain(DANGEROUS_PATTERNS_KO)
            .map(|p| {
                Regex::new(&format!("(?i){p}")).unwrap_or_else(|e| {
                    panic!("invalid injection pattern {p:?}: {e}");
                })
            })
            .collect();
        Self { patterns }
    }

    /// Sandbox user input.
    ///
    /// 1. Trim, drop control characters other than newline/tab.
    /// 2. Enforce the length cap.
    /// 3. Run the injection pattern set against the raw text; a match logs
    ///    one WARNING with a masked snippet and fails the request.
    /// 4. HTML-escape the survivors.
    pub fn sanitize(&self, text: &str) -> Result<String, SandboxError> {
        let text: String = text
            .trim()
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();

        if text.chars().count() > MAX_INPUT_CHARS {
            return Err(SandboxError::InputTooLong);
        }

        self.detect_injection(&text)?;

        Ok(escape_html(&text))
    }

    fn detect_injection(&self, text: &str) -> Result<(), SandboxError> {
        for pattern in &self.patterns {
            if pattern.is_match(text) {
                tracing::warn!(
                    event = "injection_detected",
                    pattern = pattern.as_str(),
                    masked_input = %mask_snippet(text),
                    "Potential prompt injection blocked"
                );
                return Err(SandboxError::PromptInjection);
            }
        }
        Ok(())
    }
}

impl Default for InputSandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap sanitized text in the structural delimiter pair.
pub fn wrap(sanitized: &str) -> String {
    format!("{OPEN_TAG}\n{sanitized}\n{CLOSE_TAG}")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Masked log snippet: at most the first 40 chars of input, middle elided.
/// Raw input never reaches the log stream in full.
fn mask_snippet(text: &str) -> String {
    let chars: Vec<char> = text.chars().take(40).collect();
    if chars.len() <= 24 {
        return chars.into_iter().collect();
    }
    let head: String = chars[..16].iter().collect();
    let tail: String = chars[chars.len() - 8..].iter().collect();
    format!("{head}...{tail}")
}
