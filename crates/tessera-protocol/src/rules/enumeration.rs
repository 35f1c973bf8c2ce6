use std::marker::PhantomData;

use super::expect_type;
use crate::grammar::expect;
use crate::{BoxError, ConversionRule, Object, Registry, Value};

/// A fieldless enum with a stable wire name per variant.
///
/// ```
/// use tessera_protocol::rules::WireEnum;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Color { Red, Green }
///
/// impl WireEnum for Color {
///     const TYPE_NAME: &'static str = "com.example.Color";
///
///     fn variant_name(&self) -> &'static str {
///         match self {
///             Color::Red => "RED",
///             Color::Green => "GREEN",
///         }
///     }
///
///     fn from_variant_name(name: &str) -> Option<Self> {
///         match name {
///             "RED" => Some(Color::Red),
///             "GREEN" => Some(Color::Green),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait WireEnum: Object + Sized {
    /// The declaring type name written before the variant.
    const TYPE_NAME: &'static str;

    fn variant_name(&self) -> &'static str;

    fn from_variant_name(name: &str) -> Option<Self>;
}

/// `enum(TYPE_NAME,VARIANT)` for one [`WireEnum`].
///
/// Recognition includes the type name, so two enums never claim each
/// other's text.
pub struct EnumRule<T> {
    prefix: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: WireEnum> EnumRule<T> {
    pub fn new() -> Self {
        Self {
            prefix: format!("enum({},", T::TYPE_NAME),
            _marker: PhantomData,
        }
    }
}

impl<T: WireEnum> Default for EnumRule<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WireEnum> ConversionRule for EnumRule<T> {
    fn tag(&self) -> &str {
        T::TYPE_NAME
    }

    fn encode(&self, value: &Value, _: &Registry) -> Result<String, BoxError> {
        let v = expect_type::<T>(value)?;
        Ok(format!("{}{})", self.prefix, v.variant_name()))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with(&self.prefix)
    }

    fn decode(&self, text: &str, _: &Registry) -> Result<Value, BoxError> {
        let elems = expect(text, "enum", 2)?;
        if elems[0] != T::TYPE_NAME {
            return Err(format!("expected enum type {}, got {}", T::TYPE_NAME, elems[0]).into());
        }
        let variant = T::from_variant_name(elems[1])
            .ok_or_else(|| format!("{} has no variant {:?}", T::TYPE_NAME, elems[1]))?;
        Ok(Value::new(variant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Color {
        Red,
        Green,
    }

    impl WireEnum for Color {
        const TYPE_NAME: &'static str = "com.example.Color";

        fn variant_name(&self) -> &'static str {
            match self {
                Color::Red => "RED",
                Color::Green => "GREEN",
            }
        }

        fn from_variant_name(name: &str) -> Option<Self> {
            match name {
                "RED" => Some(Color::Red),
                "GREEN" => Some(Color::Green),
                _ => None,
            }
        }
    }

    #[test]
    fn test_enum_rule_documented_form() {
        let rule = EnumRule::<Color>::new();
        let wire = rule.encode(&Value::new(Color::Red), &Registry::new()).unwrap();
        assert_eq!(wire, "enum(com.example.Color,RED)");
        assert_eq!(
            rule.decode(&wire, &Registry::new()).unwrap(),
            Value::new(Color::Red)
        );
    }

    #[test]
    fn test_enum_rule_recognizes_only_its_type() {
        let rule = EnumRule::<Color>::new();
        assert!(rule.recognize("enum(com.example.Color,GREEN)"));
        assert!(!rule.recognize("enum(com.example.Wind,EAST)"));
    }

    #[test]
    fn test_enum_rule_unknown_variant_is_error() {
        let rule = EnumRule::<Color>::new();
        let err = rule
            .decode("enum(com.example.Color,PURPLE)", &Registry::new())
            .unwrap_err();
        assert!(err.to_string().contains("PURPLE"));
    }
}
