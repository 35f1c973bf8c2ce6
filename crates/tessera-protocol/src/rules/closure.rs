use crate::{BoxError, ConversionRule, Registry, Value};

type EncodeFn = dyn Fn(&Value, &Registry) -> Result<String, BoxError> + Send + Sync;
type RecognizeFn = dyn Fn(&str) -> bool + Send + Sync;
type DecodeFn = dyn Fn(&str, &Registry) -> Result<Value, BoxError> + Send + Sync;

/// A rule assembled from three closures.
///
/// Handy for domain types with a hand-written wire form:
///
/// ```
/// use tessera_protocol::rules::{ClosureRule, prefix_recognizer};
/// use tessera_protocol::{Registry, TypeKey, Value};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Discard(u8);
///
/// let mut registry = Registry::with_defaults();
/// registry.add_first(
///     TypeKey::of::<Discard>(),
///     ClosureRule::new(
///         "discard",
///         |v: &Value, _: &Registry| {
///             let d = v.downcast_ref::<Discard>().ok_or("not a discard")?;
///             Ok(format!("discard({})", d.0))
///         },
///         prefix_recognizer("discard("),
///         |text: &str, _: &Registry| {
///             let body = tessera_protocol::grammar::unwrap(text)?;
///             Ok(Value::new(Discard(body.parse()?)))
///         },
///     ),
/// );
///
/// assert_eq!(registry.to_wire(Discard(7)).unwrap(), "discard(7)");
/// ```
pub struct ClosureRule {
    tag: String,
    encode: Box<EncodeFn>,
    recognize: Box<RecognizeFn>,
    decode: Box<DecodeFn>,
}

impl ClosureRule {
    pub fn new<E, R, D>(tag: impl Into<String>, encode: E, recognize: R, decode: D) -> Self
    where
        E: Fn(&Value, &Registry) -> Result<String, BoxError> + Send + Sync + 'static,
        R: Fn(&str) -> bool + Send + Sync + 'static,
        D: Fn(&str, &Registry) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self {
            tag: tag.into(),
            encode: Box::new(encode),
            recognize: Box::new(recognize),
            decode: Box::new(decode),
        }
    }
}

impl ConversionRule for ClosureRule {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn encode(&self, value: &Value, registry: &Registry) -> Result<String, BoxError> {
        (self.encode)(value, registry)
    }

    fn recognize(&self, text: &str) -> bool {
        (self.recognize)(text)
    }

    fn decode(&self, text: &str, registry: &Registry) -> Result<Value, BoxError> {
        (self.decode)(text, registry)
    }
}

/// A recognizer that matches a fixed literal prefix.
pub fn prefix_recognizer(prefix: impl Into<String>) -> impl Fn(&str) -> bool + Send + Sync + 'static {
    let prefix = prefix.into();
    move |text: &str| text.starts_with(prefix.as_str())
}
