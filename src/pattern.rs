//! Sentence pattern construction.
//!
//! Patterns are built from a handful of primitives and compiled once into
//! anchored matchers. Composite blocks embed their source verbatim, so the
//! same wire sub-structure parses identically wherever it recurs.

use regex::{Captures, Regex};

/// Accumulates pattern primitives into a single expression.
///
/// The order in which capture groups are declared here is the order a
/// [`crate::parser::FieldParser`] consumes them.
#[derive(Debug, Clone, Default)]
pub struct PatternBuilder {
    source: String,
}

impl PatternBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact substring match; all metacharacters are escaped.
    pub fn literal(mut self, text: &str) -> Self {
        self.source.push_str(&regex::escape(text));
        self
    }

    /// Numeric token spec: `d` matches a digit, `x` a hex digit, `.` a
    /// literal dot. Everything else passes through, so `(-?d+.d+),`
    /// declares one signed decimal capture group followed by a comma.
    pub fn number(mut self, spec: &str) -> Self {
        self.source.push_str(&translate(spec));
        self
    }

    /// Hexadecimal token spec; same placeholder language as [`Self::number`].
    pub fn hex(mut self, spec: &str) -> Self {
        self.source.push_str(&translate(spec));
        self
    }

    /// Free-text token expression, e.g. `([^,]+),`. Inserted as written.
    pub fn text(mut self, spec: &str) -> Self {
        self.source.push_str(spec);
        self
    }

    /// Embed a compiled pattern's source verbatim.
    pub fn pattern(mut self, pattern: &Pattern) -> Self {
        self.source.push_str(pattern.source());
        self
    }

    /// Consume and discard a variable number of unspecified trailing fields.
    pub fn any(mut self) -> Self {
        self.source.push_str(".*");
        self
    }

    /// Compile into a full-sentence matcher.
    ///
    /// Panics if the accumulated spec is not a valid expression; patterns
    /// are fixed at startup, so this only fires on a bad builder spec.
    pub fn compile(self) -> Pattern {
        let regex = Regex::new(&format!("^(?:{})$", self.source))
            .unwrap_or_else(|e| panic!("bad sentence pattern {:?}: {e}", self.source));
        Pattern {
            source: self.source,
            regex,
        }
    }
}

fn translate(spec: &str) -> String {
    let mut out = String::with_capacity(spec.len() * 2);
    for c in spec.chars() {
        match c {
            'd' => out.push_str(r"\d"),
            'x' => out.push_str("[0-9a-fA-F]"),
            '.' => out.push_str(r"\."),
            _ => out.push(c),
        }
    }
    out
}

/// A precompiled sentence matcher. Immutable and shareable across threads.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Unanchored source, suitable for embedding into other patterns.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the whole sentence matches.
    pub fn matches(&self, sentence: &str) -> bool {
        self.regex.is_match(sentence)
    }

    pub fn captures<'t>(&self, sentence: &'t str) -> Option<Captures<'t>> {
        self.regex.captures(sentence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_escapes_metacharacters() {
        let pattern = PatternBuilder::new().literal("a.b").compile();
        assert!(pattern.matches("a.b"));
        assert!(!pattern.matches("axb"));
    }

    #[test]
    fn test_number_translation() {
        let pattern = PatternBuilder::new().number("(-?d+.d+)").compile();
        assert!(pattern.matches("-12.5"));
        assert!(pattern.matches("12.5"));
        assert!(!pattern.matches("12"));
        assert!(!pattern.matches("12x5"));
    }

    #[test]
    fn test_hex_translation() {
        let pattern = PatternBuilder::new().hex("(x+)").compile();
        assert!(pattern.matches("1aF0"));
        assert!(!pattern.matches("1g"));
    }

    #[test]
    fn test_matching_is_full_sentence() {
        let pattern = PatternBuilder::new().literal("ok").compile();
        assert!(pattern.matches("ok"));
        assert!(!pattern.matches("okay"));
        assert!(!pattern.matches("not ok"));
    }

    #[test]
    fn test_any_tolerates_trailing_fields() {
        let pattern = PatternBuilder::new().literal("a,").any().compile();
        assert!(pattern.matches("a,"));
        assert!(pattern.matches("a,unknown,trailing,fields"));
    }

    #[test]
    fn test_embedded_pattern_matches_like_inline() {
        let block = PatternBuilder::new().number("(d+),").compile();
        let composite = PatternBuilder::new()
            .literal("#")
            .pattern(&block)
            .pattern(&block)
            .compile();
        assert!(composite.matches("#1,22,"));
        assert!(!composite.matches("#1,"));

        let captures = composite.captures("#1,22,").unwrap();
        assert_eq!(captures.get(1).unwrap().as_str(), "1");
        assert_eq!(captures.get(2).unwrap().as_str(), "22");
    }
}
