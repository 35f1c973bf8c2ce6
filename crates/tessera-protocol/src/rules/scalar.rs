use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use super::expect_type;
use crate::grammar::{expect, quote, unquote};
use crate::{BoxError, ConversionRule, Object, Registry, Value};

/// `str("...")`, with the payload quoted and escaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringRule;

impl ConversionRule for StringRule {
    fn tag(&self) -> &str {
        "str"
    }

    fn encode(&self, value: &Value, _: &Registry) -> Result<String, BoxError> {
        let s = expect_type::<String>(value)?;
        Ok(format!("str({})", quote(s)))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with("str(\"")
    }

    fn decode(&self, text: &str, _: &Registry) -> Result<Value, BoxError> {
        let elems = expect(text, "str", 1)?;
        Ok(Value::new(unquote(elems[0])?))
    }
}

/// `tag(<Display output>)` for any type that round-trips through
/// `Display` and `FromStr`.
pub struct ScalarRule<T> {
    tag: &'static str,
    prefix: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScalarRule<T> {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            prefix: format!("{tag}("),
            _marker: PhantomData,
        }
    }
}

impl<T> ConversionRule for ScalarRule<T>
where
    T: Object + Display + FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    fn tag(&self) -> &str {
        self.tag
    }

    fn encode(&self, value: &Value, _: &Registry) -> Result<String, BoxError> {
        let v = expect_type::<T>(value)?;
        Ok(format!("{}({v})", self.tag))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with(&self.prefix)
    }

    fn decode(&self, text: &str, _: &Registry) -> Result<Value, BoxError> {
        let elems = expect(text, self.tag, 1)?;
        let parsed = elems[0].trim().parse::<T>()?;
        Ok(Value::new(parsed))
    }
}

/// `null()`, the wire form of `()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRule;

impl ConversionRule for NullRule {
    fn tag(&self) -> &str {
        "null"
    }

    fn encode(&self, value: &Value, _: &Registry) -> Result<String, BoxError> {
        expect_type::<()>(value)?;
        Ok("null()".to_string())
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with("null(")
    }

    fn decode(&self, text: &str, _: &Registry) -> Result<Value, BoxError> {
        expect(text, "null", 0)?;
        Ok(Value::unit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new()
    }

    #[test]
    fn test_string_rule_escapes_payload() {
        let wire = StringRule
            .encode(&Value::from(r#"a "b", (c)"#), &registry())
            .unwrap();
        assert_eq!(wire, r#"str("a \"b\", (c)")"#);
        assert!(StringRule.recognize(&wire));
        assert_eq!(
            StringRule.decode(&wire, &registry()).unwrap(),
            Value::from(r#"a "b", (c)"#)
        );
    }

    #[test]
    fn test_string_rule_rejects_wrong_type() {
        assert!(StringRule.encode(&Value::from(1i32), &registry()).is_err());
    }

    #[test]
    fn test_scalar_rule_int_negative() {
        let rule = ScalarRule::<i32>::new("int");
        assert_eq!(rule.encode(&Value::from(-5i32), &registry()).unwrap(), "int(-5)");
        assert_eq!(rule.decode("int(-5)", &registry()).unwrap(), Value::from(-5i32));
    }

    #[test]
    fn test_scalar_rule_recognizes_only_its_tag() {
        let rule = ScalarRule::<i64>::new("long");
        assert!(rule.recognize("long(1)"));
        assert!(!rule.recognize("int(1)"));
        assert!(!rule.recognize("longer(1)"));
    }

    #[test]
    fn test_scalar_rule_double_special_values() {
        let rule = ScalarRule::<f64>::new("double");
        let wire = rule.encode(&Value::from(f64::INFINITY), &registry()).unwrap();
        assert_eq!(wire, "double(inf)");
        let back = rule.decode("double(NaN)", &registry()).unwrap();
        assert!(back.downcast_ref::<f64>().is_some_and(|f| f.is_nan()));
    }

    #[test]
    fn test_scalar_rule_overflow_is_error() {
        let rule = ScalarRule::<i32>::new("int");
        assert!(rule.decode("int(99999999999)", &registry()).is_err());
    }

    #[test]
    fn test_scalar_rule_bool() {
        let rule = ScalarRule::<bool>::new("bool");
        assert_eq!(rule.encode(&Value::from(false), &registry()).unwrap(), "bool(false)");
        assert!(rule.decode("bool(maybe)", &registry()).is_err());
    }

    #[test]
    fn test_null_rule_rejects_arguments() {
        assert_eq!(NullRule.decode("null()", &registry()).unwrap(), Value::unit());
        assert!(NullRule.decode("null(1)", &registry()).is_err());
    }
}
