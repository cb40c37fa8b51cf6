//! Subprobe name patterns used by triggers and silences.

use regex::Regex;

/// An anchored regular expression over subprobe names.
///
/// The empty pattern matches every subprobe. A pattern that is not a valid
/// regular expression only matches a name equal to it.
#[derive(Debug, Clone)]
pub struct SubprobePattern {
    raw: String,
    regex: Option<Regex>,
}

impl SubprobePattern {
    pub fn new(raw: &str) -> Self {
        let regex = if raw.is_empty() {
            None
        } else {
            Regex::new(&format!("^(?:{})$", raw)).ok()
        };
        Self {
            raw: raw.to_string(),
            regex,
        }
    }

    /// Whether `raw` compiles as a regular expression.
    pub fn is_valid(raw: &str) -> bool {
        raw.is_empty() || Regex::new(&format!("^(?:{})$", raw)).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.raw.is_empty() || self.raw == name {
            return true;
        }
        self.regex.as_ref().is_some_and(|re| re.is_match(name))
    }
}

impl PartialEq for SubprobePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for SubprobePattern {}
