//! The wire grammar: nested `tag(elem,elem,...)` terms.
//!
//! Every encoded value is a term. A term's body is a comma separated list
//! of elements, and each element is itself a term (or, for a few rules, a
//! bare word such as a type name or a parenthesized pair). String payloads
//! are wrapped in double quotes and may contain anything, including commas
//! and parentheses.
//!
//! ```text
//! term       := tag "(" [ elem ("," elem)* ] ")"
//! string-lit := "str(\"" escaped-text "\")"
//! ```
//!
//! The functions here only understand structure. They never look at tags
//! to decide what a term means; that is the job of the conversion rules.

use crate::GrammarError;

/// Deepest parenthesis nesting a message may use.
///
/// Decoding recurses once per level, so the limit keeps a hostile but
/// well-formed message from exhausting a reader thread's stack.
pub const MAX_DEPTH: usize = 64;

/// Splits a term body at its top-level commas.
///
/// A comma is a split point only when it is outside every parenthesized
/// group and outside every quoted region. A backslash escapes the next
/// character, so `\"` never opens or closes a quote. An empty body yields
/// no elements at all.
///
/// ```
/// use tessera_protocol::grammar::split;
///
/// let parts = split(r#"a,(b,c),"d,e""#).unwrap();
/// assert_eq!(parts, vec!["a", "(b,c)", r#""d,e""#]);
/// ```
pub fn split(body: &str) -> Result<Vec<&str>, GrammarError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| GrammarError::UnbalancedParens(body.to_string()))?;
            }
            ',' if !in_quote && depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if in_quote || escaped {
        return Err(GrammarError::UnterminatedQuote(body.to_string()));
    }
    if depth != 0 {
        return Err(GrammarError::UnbalancedParens(body.to_string()));
    }

    parts.push(&body[start..]);
    Ok(parts)
}

/// Fails if `text` nests parentheses deeper than `limit`.
///
/// Quoted regions are skipped the same way [`split`] skips them. Balance is
/// not checked; the scan stops at the first level past the limit.
///
/// ```
/// use tessera_protocol::grammar::check_depth;
///
/// assert!(check_depth("list(list(int(1)))", 3).is_ok());
/// assert!(check_depth("list(list(int(1)))", 2).is_err());
/// assert!(check_depth(r#"str("((((")"#, 1).is_ok());
/// ```
pub fn check_depth(text: &str, limit: usize) -> Result<(), GrammarError> {
    let mut depth: usize = 0;
    let mut in_quote = false;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quote = !in_quote,
            '(' if !in_quote => {
                depth += 1;
                if depth > limit {
                    return Err(GrammarError::TooDeep { limit });
                }
            }
            ')' if !in_quote => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Returns the text between the first `(` and the final `)` of a term.
///
/// The term must end with `)`. Balance is not checked here; [`split`]
/// does that when the body is taken apart.
pub fn unwrap(term: &str) -> Result<&str, GrammarError> {
    let open = term
        .find('(')
        .ok_or_else(|| GrammarError::NotATerm(term.to_string()))?;
    if !term.ends_with(')') || term.len() < open + 2 {
        return Err(GrammarError::NotATerm(term.to_string()));
    }
    Ok(&term[open + 1..term.len() - 1])
}

/// Returns the tag of a term: everything before the first `(`.
pub fn tag(term: &str) -> Option<&str> {
    term.find('(').map(|open| &term[..open])
}

/// Takes a term apart into its tag and its top-level elements.
pub fn parts(term: &str) -> Result<(&str, Vec<&str>), GrammarError> {
    let body = unwrap(term)?;
    let tag = tag(term).unwrap_or_default();
    Ok((tag, split(body)?))
}

/// Like [`parts`], but insists on a specific tag.
pub fn elements<'a>(term: &'a str, tag: &str) -> Result<Vec<&'a str>, GrammarError> {
    let (found, elems) = parts(term)?;
    if found != tag {
        return Err(GrammarError::UnexpectedTag {
            expected: tag.to_string(),
            term: term.to_string(),
        });
    }
    Ok(elems)
}

/// Like [`elements`], but also insists on an exact element count.
pub fn expect<'a>(term: &'a str, tag: &str, arity: usize) -> Result<Vec<&'a str>, GrammarError> {
    let elems = elements(term, tag)?;
    if elems.len() != arity {
        return Err(GrammarError::Arity {
            expected: arity,
            actual: elems.len(),
            term: term.to_string(),
        });
    }
    Ok(elems)
}

/// Builds `tag(e1,e2,...)` from already-encoded elements.
pub fn term<I, S>(tag: &str, elems: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::with_capacity(tag.len() + 2);
    out.push_str(tag);
    out.push('(');
    for (i, elem) in elems.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(elem.as_ref());
    }
    out.push(')');
    out
}

/// Wraps a string in double quotes, escaping what the grammar needs.
///
/// `"` and `\` are backslash-escaped so [`split`] never mistakes payload
/// for structure. Line breaks are escaped as `\n` / `\r` because the
/// transport frames one message per line.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Reverses [`quote`].
///
/// Unknown escapes are kept verbatim (`\x` stays `\x`), so payloads from
/// peers that only escape `"` still decode.
pub fn unquote(quoted: &str) -> Result<String, GrammarError> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| GrammarError::NotQuoted(quoted.to_string()))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            // The closing quote was escaped, so the literal never ended.
            None => return Err(GrammarError::UnterminatedQuote(quoted.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- split ------------------------------------------------------------

    #[test]
    fn test_split_respects_parens_and_quotes() {
        let parts = split(r#"a,(b,c),"d,e""#).unwrap();
        assert_eq!(parts, vec!["a", "(b,c)", r#""d,e""#]);
    }

    #[test]
    fn test_split_empty_body_yields_no_elements() {
        assert!(split("").unwrap().is_empty());
    }

    #[test]
    fn test_split_single_element() {
        assert_eq!(split("int(1)").unwrap(), vec!["int(1)"]);
    }

    #[test]
    fn test_split_nested_terms() {
        let parts = split("list(int(1),int(2)),map((str(\"k\"),int(1)))").unwrap();
        assert_eq!(parts, vec!["list(int(1),int(2))", "map((str(\"k\"),int(1)))"]);
    }

    #[test]
    fn test_split_parens_inside_quotes_are_ignored() {
        let parts = split(r#"str(":-)"),str("(,")"#).unwrap();
        assert_eq!(parts, vec![r#"str(":-)")"#, r#"str("(,")"#]);
    }

    #[test]
    fn test_split_escaped_quote_does_not_toggle() {
        let parts = split(r#"str("a\",b"),int(1)"#).unwrap();
        assert_eq!(parts, vec![r#"str("a\",b")"#, "int(1)"]);
    }

    #[test]
    fn test_split_unbalanced_close_is_error() {
        assert!(matches!(
            split("a),b"),
            Err(GrammarError::UnbalancedParens(_))
        ));
    }

    #[test]
    fn test_split_unbalanced_open_is_error() {
        assert!(matches!(
            split("(a,b"),
            Err(GrammarError::UnbalancedParens(_))
        ));
    }

    #[test]
    fn test_split_unterminated_quote_is_error() {
        assert!(matches!(
            split(r#"str("abc)"#),
            Err(GrammarError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn test_check_depth_counts_only_structural_parens() {
        assert!(check_depth("int(1)", 1).is_ok());
        assert!(check_depth("list(int(1),int(2))", 2).is_ok());
        assert_eq!(
            check_depth("list(list(int(1)))", 2),
            Err(GrammarError::TooDeep { limit: 2 })
        );
        assert!(check_depth(r#"str("\"((((")"#, 1).is_ok());
    }

    // -- unwrap / tag / parts ---------------------------------------------

    #[test]
    fn test_unwrap_returns_body() {
        assert_eq!(unwrap("list(int(1),int(2))").unwrap(), "int(1),int(2)");
        assert_eq!(unwrap("list()").unwrap(), "");
        assert_eq!(unwrap("(a,b)").unwrap(), "a,b");
    }

    #[test]
    fn test_unwrap_rejects_non_terms() {
        assert!(unwrap("hello").is_err());
        assert!(unwrap("int(1").is_err());
        assert!(unwrap(")").is_err());
    }

    #[test]
    fn test_tag_is_text_before_paren() {
        assert_eq!(tag("pojo(a,b)"), Some("pojo"));
        assert_eq!(tag("(a,b)"), Some(""));
        assert_eq!(tag("bare"), None);
    }

    #[test]
    fn test_expect_checks_tag_and_arity() {
        assert_eq!(expect("int(5)", "int", 1).unwrap(), vec!["5"]);
        assert!(matches!(
            expect("int(5)", "long", 1),
            Err(GrammarError::UnexpectedTag { .. })
        ));
        assert!(matches!(
            expect("int(5,6)", "int", 1),
            Err(GrammarError::Arity { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_term_joins_elements() {
        assert_eq!(term("list", ["int(1)", "int(2)"]), "list(int(1),int(2))");
        assert_eq!(term("list", Vec::<String>::new()), "list()");
    }

    // -- quote / unquote --------------------------------------------------

    #[test]
    fn test_quote_escapes_quotes_and_backslashes() {
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quote(r"C:\tiles"), r#""C:\\tiles""#);
    }

    #[test]
    fn test_quote_escapes_line_breaks() {
        let quoted = quote("a\nb\r");
        assert!(!quoted.contains('\n'));
        assert_eq!(unquote(&quoted).unwrap(), "a\nb\r");
    }

    #[test]
    fn test_unquote_reverses_quote() {
        for s in ["", "plain", "a,b", "(x)", r#""quoted""#, r"back\slash", r#"\""#] {
            assert_eq!(unquote(&quote(s)).unwrap(), s);
        }
    }

    #[test]
    fn test_unquote_keeps_unknown_escapes() {
        assert_eq!(unquote(r#""a\tb""#).unwrap(), r"a\tb");
    }

    #[test]
    fn test_unquote_rejects_unquoted_text() {
        assert!(matches!(unquote("abc"), Err(GrammarError::NotQuoted(_))));
        assert!(matches!(unquote("\""), Err(GrammarError::NotQuoted(_))));
    }

    #[test]
    fn test_unquote_rejects_escaped_closing_quote() {
        assert!(matches!(
            unquote(r#""abc\""#),
            Err(GrammarError::UnterminatedQuote(_))
        ));
    }
}
