use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Provenance of a derived search query.
///
/// Used in logs and in score fusion to avoid double-counting the same
/// passage retrieved through different formulations of the idea.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// The sandboxed user idea verbatim.
    Original,
    /// HyDE output: a synthetic independent claim written from the idea.
    HypotheticalClaim,
    /// The i-th lexical paraphrase produced by the query expander.
    Paraphrase(usize),
    /// Output of the single rewrite round after low grading scores.
    Rewritten,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Original => "original",
            QueryKind::HypotheticalClaim => "hypothetical_claim",
            QueryKind::Paraphrase(_) => "paraphrase",
            QueryKind::Rewritten => "rewritten",
        }
    }
}

/// A derived search string with its provenance tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub kind: QueryKind,
}

impl Query {
    pub fn new(text: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    /// Short stable identifier for log correlation.
    ///
    /// Logs carry the fingerprint instead of the query text so that no
    /// user-derived text reaches the log stream unescaped.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.text.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_text_free() {
        let q = Query::new("스마트 안경 AR 내비게이션", QueryKind::HypotheticalClaim);
        let fp = q.fingerprint();
        assert_eq!(fp, q.fingerprint());
        assert_eq!(fp.len(), 16);
        assert!(!fp.contains("스마트"));
    }

    #[test]
    fn paraphrases_share_a_provenance_label() {
        assert_eq!(QueryKind::Paraphrase(0).as_str(), "paraphrase");
        assert_eq!(QueryKind::Paraphrase(2).as_str(), "paraphrase");
        assert_ne!(QueryKind::Paraphrase(0), QueryKind::Paraphrase(2));
    }
}
