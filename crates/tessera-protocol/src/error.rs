//! Error types for the protocol layer.
//!
//! Two families of failure live here. A [`GrammarError`] means the text is
//! not a well-formed wire term at all. A [`ConversionError`] means the text
//! (or value) is well-formed but no registered rule could turn it into the
//! other representation, or the rule that was picked failed.

/// Boxed error returned by individual conversion rules.
///
/// Rules are free to fail with whatever error fits (a grammar error, a
/// parse error from `str::parse`, a nested [`ConversionError`]); the
/// [`Registry`](crate::Registry) wraps it together with the offending
/// value or text.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A malformed wire term.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    /// Parentheses do not balance (a `)` without its `(`, or the reverse).
    #[error("unbalanced parentheses in {0:?}")]
    UnbalancedParens(String),

    /// A quoted string payload is never closed.
    #[error("unterminated quoted string in {0:?}")]
    UnterminatedQuote(String),

    /// The text is not of the form `tag(...)`.
    #[error("expected a `tag(...)` term, got {0:?}")]
    NotATerm(String),

    /// The text is not a `"..."` string literal.
    #[error("expected a quoted string, got {0:?}")]
    NotQuoted(String),

    /// A term carries the wrong number of elements.
    #[error("expected {expected} element(s), got {actual} in {term:?}")]
    Arity {
        expected: usize,
        actual: usize,
        term: String,
    },

    /// A term carries an unexpected tag.
    #[error("expected tag `{expected}`, got {term:?}")]
    UnexpectedTag { expected: String, term: String },

    /// Terms are nested deeper than the decoder allows.
    #[error("terms nested deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Failure to convert between a [`Value`](crate::Value) and its wire term.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// No registered type key accepts the value's runtime type.
    #[error("no conversion rule accepts values of type {type_name}")]
    NoRuleForType { type_name: &'static str },

    /// No registered rule recognizes the text.
    #[error("no conversion rule recognizes {text:?}")]
    NoRuleForText { text: String },

    /// The text was rejected before any rule looked at it.
    #[error(transparent)]
    Malformed(#[from] GrammarError),

    /// The selected rule failed while encoding.
    #[error("rule `{rule}` failed to encode a {type_name}: {source}")]
    Encode {
        rule: String,
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    /// The selected rule failed while decoding.
    #[error("rule `{rule}` failed to decode {text:?}: {source}")]
    Decode {
        rule: String,
        text: String,
        #[source]
        source: BoxError,
    },

    /// Decoding succeeded but produced a different type than requested.
    #[error("expected a {expected}, decoded a {actual}")]
    UnexpectedType {
        expected: &'static str,
        actual: &'static str,
    },
}

const EXCERPT_LEN: usize = 120;

/// Shortens wire text for error messages and log fields.
pub(crate) fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
