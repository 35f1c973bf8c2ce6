//! The codec registry: an ordered list of `(type key, rule)` pairs.
//!
//! Order is the whole point. Encoding walks the list and uses the first
//! key that accepts the value's runtime type, so a specific rule placed in
//! front shadows a broader one behind it. Decoding walks the same list and
//! uses the first rule whose `recognize` accepts the text, so a domain tag
//! placed in front wins over a generic container or structural fallback.
//!
//! A registry is built once during setup and then shared read-only
//! (usually behind an `Arc`) by every proxy and dispatcher.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::envelope::{RequestRule, ResponseRule};
use crate::error::excerpt;
use crate::grammar;
use crate::rules::{
    EnumRule, FieldType, ListRule, MapRule, NullRule, ScalarRule, StringRule, StructRule,
    WireEnum,
};
use crate::{BoxError, ConversionError, Object, Value};

/// One type's wire representation: encode, recognize, decode.
///
/// Rules that contain other values (lists, maps, envelopes) receive the
/// registry so they can recurse into it.
pub trait ConversionRule: Send + Sync + 'static {
    /// Short name used in logs and error messages, usually the wire tag.
    fn tag(&self) -> &str;

    fn encode(&self, value: &Value, registry: &Registry) -> Result<String, BoxError>;

    /// Whether `text` looks like something this rule produced. Must accept
    /// everything [`encode`](Self::encode) emits.
    fn recognize(&self, text: &str) -> bool;

    fn decode(&self, text: &str, registry: &Registry) -> Result<Value, BoxError>;
}

// ---------------------------------------------------------------------------
// TypeKey
// ---------------------------------------------------------------------------

type FamilyFn = dyn Fn(&Value) -> bool + Send + Sync;

#[derive(Clone)]
enum Matcher {
    Exact(TypeId),
    Family(Arc<FamilyFn>),
}

/// Which values a registry entry accepts when encoding.
///
/// [`TypeKey::of`] matches exactly one concrete type.
/// [`TypeKey::family`] matches any value its predicate accepts, which is
/// how a rule covers several concrete types at once (a "base type").
/// Keys are identified by name.
#[derive(Clone)]
pub struct TypeKey {
    name: Cow<'static, str>,
    matcher: Matcher,
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        Self {
            name: Cow::Borrowed(std::any::type_name::<T>()),
            matcher: Matcher::Exact(TypeId::of::<T>()),
        }
    }

    pub fn family<F>(name: impl Into<Cow<'static, str>>, accepts: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matcher: Matcher::Family(Arc::new(accepts)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match &self.matcher {
            Matcher::Exact(id) => value.concrete_type_id() == *id,
            Matcher::Family(accepts) => accepts(value),
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeKey {}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeKey").field(&self.name).finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Entry {
    key: TypeKey,
    rule: Arc<dyn ConversionRule>,
}

/// Ordered set of conversion rules.
///
/// # Example
///
/// ```
/// use tessera_protocol::{Registry, Value, ValueList};
///
/// let registry = Registry::with_defaults();
/// let list: ValueList = vec![Value::from(1i32), Value::from("two")];
///
/// let wire = registry.encode(&Value::new(list.clone())).unwrap();
/// assert_eq!(wire, r#"list(int(1),str("two"))"#);
///
/// let back: ValueList = registry.decode_as(&wire).unwrap();
/// assert_eq!(back, list);
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    /// Types that keep their own rule inside struct fields, by serde name.
    field_types: HashMap<&'static str, FieldType>,
    field_types_by_id: HashMap<TypeId, FieldType>,
}

impl Registry {
    /// An empty registry. Nothing encodes until rules are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes, then scalar leaves, then containers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .add_last(TypeKey::of::<crate::Request>(), RequestRule)
            .add_last(TypeKey::of::<crate::Response>(), ResponseRule)
            .add_last(TypeKey::of::<String>(), StringRule)
            .add_last(TypeKey::of::<i32>(), ScalarRule::<i32>::new("int"))
            .add_last(TypeKey::of::<i64>(), ScalarRule::<i64>::new("long"))
            .add_last(TypeKey::of::<f64>(), ScalarRule::<f64>::new("double"))
            .add_last(TypeKey::of::<bool>(), ScalarRule::<bool>::new("bool"))
            .add_last(TypeKey::of::<()>(), NullRule)
            .add_last(TypeKey::of::<crate::ValueList>(), ListRule)
            .add_last(TypeKey::of::<crate::ValueMap>(), MapRule);
        registry
    }

    /// Registers a rule at the front (highest priority).
    ///
    /// If the key is already registered its rule is replaced in place and
    /// keeps its old position.
    pub fn add_first(&mut self, key: TypeKey, rule: impl ConversionRule) -> &mut Self {
        self.insert(key, Arc::new(rule), true)
    }

    /// Registers a rule at the back (lowest priority). Same replacement
    /// behaviour as [`add_first`](Self::add_first).
    pub fn add_last(&mut self, key: TypeKey, rule: impl ConversionRule) -> &mut Self {
        self.insert(key, Arc::new(rule), false)
    }

    /// Registers `enum(TYPE,VARIANT)` for a [`WireEnum`] at the front.
    pub fn add_enum<T: WireEnum>(&mut self) -> &mut Self {
        self.add_first(TypeKey::of::<T>(), EnumRule::<T>::new())
    }

    /// Registers the serde-driven `pojo(...)` fallback for `T` at the back.
    ///
    /// A field of type `T` inside another registered struct is encoded
    /// through this registry as a `T`, not flattened into a map.
    pub fn add_struct<T>(&mut self, type_name: &'static str) -> &mut Self
    where
        T: Object + serde::Serialize + serde::de::DeserializeOwned + Default,
    {
        self.add_field_type::<T>(type_name);
        self.add_last(TypeKey::of::<T>(), StructRule::<T>::new(type_name))
    }

    /// Like [`add_enum`](Self::add_enum) for an enum that also derives
    /// serde, so struct fields of that type are written as `enum(...)`
    /// instead of a bare variant string.
    pub fn add_serde_enum<T>(&mut self) -> &mut Self
    where
        T: WireEnum + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.add_field_type::<T>(T::TYPE_NAME);
        self.add_enum::<T>()
    }

    fn add_field_type<T>(&mut self, wire_name: &'static str)
    where
        T: Object + serde::Serialize + serde::de::DeserializeOwned,
    {
        let Some(field_type) = FieldType::of::<T>(wire_name) else {
            tracing::debug!(wire_name, "no serde container name, fields of this type stay plain");
            return;
        };
        self.field_types.insert(field_type.serde_name, field_type);
        self.field_types_by_id.insert(field_type.type_id, field_type);
    }

    pub(crate) fn field_type_named(&self, serde_name: &str) -> Option<&FieldType> {
        self.field_types.get(serde_name)
    }

    pub(crate) fn field_type_of(&self, value: &Value) -> Option<&FieldType> {
        self.field_types_by_id.get(&value.concrete_type_id())
    }

    fn insert(&mut self, key: TypeKey, rule: Arc<dyn ConversionRule>, front: bool) -> &mut Self {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.key == key) {
            tracing::debug!(key = key.name(), tag = rule.tag(), "replacing conversion rule");
            existing.rule = rule;
            return self;
        }
        let entry = Entry { key, rule };
        if front {
            self.entries.insert(0, entry);
        } else {
            self.entries.push(entry);
        }
        self
    }

    /// Encodes a value with the first rule whose key accepts it.
    pub fn encode(&self, value: &Value) -> Result<String, ConversionError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.key.accepts(value))
            .ok_or(ConversionError::NoRuleForType {
                type_name: value.type_name(),
            })?;

        entry
            .rule
            .encode(value, self)
            .map_err(|source| ConversionError::Encode {
                rule: entry.rule.tag().to_string(),
                type_name: value.type_name(),
                source,
            })
    }

    /// Shorthand for encoding a concrete value.
    pub fn to_wire<T: Object>(&self, value: T) -> Result<String, ConversionError> {
        self.encode(&Value::new(value))
    }

    /// Decodes text with the first rule that recognizes it.
    ///
    /// Text nested deeper than [`grammar::MAX_DEPTH`] is refused up front.
    pub fn decode(&self, text: &str) -> Result<Value, ConversionError> {
        grammar::check_depth(text, grammar::MAX_DEPTH)?;
        let entry = self
            .entries
            .iter()
            .find(|e| e.rule.recognize(text))
            .ok_or_else(|| ConversionError::NoRuleForText {
                text: excerpt(text),
            })?;

        entry
            .rule
            .decode(text, self)
            .map_err(|source| ConversionError::Decode {
                rule: entry.rule.tag().to_string(),
                text: excerpt(text),
                source,
            })
    }

    /// Decodes and downcasts in one step.
    pub fn decode_as<T: Any>(&self, text: &str) -> Result<T, ConversionError> {
        self.decode(text)?
            .downcast::<T>()
            .map_err(|other| ConversionError::UnexpectedType {
                expected: std::any::type_name::<T>(),
                actual: other.type_name(),
            })
    }

    /// Registered key names in priority order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.name())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.rule.tag()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ClosureRule, prefix_recognizer};
    use crate::{ValueList, ValueMap};

    fn roundtrip(registry: &Registry, value: Value) {
        let wire = registry.encode(&value).unwrap();
        let back = registry.decode(&wire).unwrap();
        assert_eq!(back, value, "wire form was {wire}");
    }

    #[test]
    fn test_with_defaults_roundtrips_leaves() {
        let registry = Registry::with_defaults();
        roundtrip(&registry, Value::from(r#"he said "hi, (there)""#));
        roundtrip(&registry, Value::from(""));
        roundtrip(&registry, Value::from(-17i32));
        roundtrip(&registry, Value::from(i64::MIN));
        roundtrip(&registry, Value::from(-0.25f64));
        roundtrip(&registry, Value::from(true));
        roundtrip(&registry, Value::unit());
    }

    #[test]
    fn test_with_defaults_roundtrips_nested_containers() {
        let registry = Registry::with_defaults();
        let mut inner = ValueMap::new();
        inner.insert("k", 1i32);
        inner.insert(2i64, vec![Value::from("x")]);
        let list: ValueList = vec![
            Value::new(inner),
            Value::new(ValueMap::new()),
            Value::new(ValueList::new()),
        ];
        roundtrip(&registry, Value::new(list));
    }

    #[test]
    fn test_encode_matches_documented_forms() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.to_wire(42i32).unwrap(), "int(42)");
        assert_eq!(registry.to_wire("hello".to_string()).unwrap(), r#"str("hello")"#);
        let mut map = ValueMap::new();
        map.insert("k", 1i32);
        assert_eq!(registry.to_wire(map).unwrap(), r#"map((str("k"),int(1)))"#);
        assert_eq!(registry.to_wire(ValueList::new()).unwrap(), "list()");
    }

    #[test]
    fn test_encode_unknown_type_is_error() {
        #[derive(Debug, Clone, PartialEq)]
        struct Unregistered;

        let registry = Registry::with_defaults();
        let err = registry.to_wire(Unregistered).unwrap_err();
        assert!(matches!(err, ConversionError::NoRuleForType { .. }));
    }

    #[test]
    fn test_decode_unrecognized_text_is_error() {
        let registry = Registry::with_defaults();
        let err = registry.decode("frobnicate(1)").unwrap_err();
        assert!(matches!(err, ConversionError::NoRuleForText { .. }));
    }

    #[test]
    fn test_decode_rule_failure_is_wrapped() {
        let registry = Registry::with_defaults();
        let err = registry.decode("int(forty)").unwrap_err();
        match err {
            ConversionError::Decode { rule, text, .. } => {
                assert_eq!(rule, "int");
                assert_eq!(text, "int(forty)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_as_wrong_type_is_error() {
        let registry = Registry::with_defaults();
        let err = registry.decode_as::<String>("int(1)").unwrap_err();
        assert!(matches!(
            err,
            ConversionError::UnexpectedType { actual: "i32", .. }
        ));
    }

    #[test]
    fn test_add_first_family_shadows_later_exact_rule() {
        // Every i32 that is negative goes through the family rule.
        let mut registry = Registry::with_defaults();
        registry.add_first(
            TypeKey::family("negative", |v: &Value| {
                v.downcast_ref::<i32>().is_some_and(|n| *n < 0)
            }),
            ClosureRule::new(
                "neg",
                |v: &Value, _: &Registry| {
                    let n = v.downcast_ref::<i32>().copied().unwrap_or_default();
                    Ok(format!("neg({})", -n))
                },
                prefix_recognizer("neg("),
                |text: &str, _: &Registry| {
                    let body = crate::grammar::unwrap(text)?;
                    Ok(Value::new(-body.parse::<i32>()?))
                },
            ),
        );

        assert_eq!(registry.to_wire(-3i32).unwrap(), "neg(3)");
        assert_eq!(registry.to_wire(3i32).unwrap(), "int(3)");
        assert_eq!(registry.decode_as::<i32>("neg(3)").unwrap(), -3);
    }

    #[test]
    fn test_add_last_existing_key_replaces_in_place() {
        let mut registry = Registry::with_defaults();
        let before: Vec<String> = registry.type_names().map(str::to_string).collect();

        registry.add_last(
            TypeKey::of::<bool>(),
            ClosureRule::new(
                "yn",
                |v: &Value, _: &Registry| {
                    let yes = v.downcast_ref::<bool>() == Some(&true);
                    Ok(if yes { "yn(y)" } else { "yn(n)" }.to_string())
                },
                prefix_recognizer("yn("),
                |text: &str, _: &Registry| Ok(Value::new(text == "yn(y)")),
            ),
        );

        let after: Vec<String> = registry.type_names().map(str::to_string).collect();
        assert_eq!(before, after);
        assert_eq!(registry.to_wire(true).unwrap(), "yn(y)");
    }

    #[test]
    fn test_with_defaults_order_is_envelopes_scalars_containers() {
        let registry = Registry::with_defaults();
        let names: Vec<&str> = registry.type_names().collect();
        assert!(names[0].ends_with("Request"));
        assert!(names[1].ends_with("Response"));
        assert!(names.last().unwrap().ends_with("ValueMap"));
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_registry_debug_lists_tags() {
        let registry = Registry::with_defaults();
        let debug = format!("{registry:?}");
        assert!(debug.contains("\"int\""));
        assert!(debug.contains("\"map\""));
    }
}
