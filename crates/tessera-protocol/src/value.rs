//! Type-erased values.
//!
//! The registry has to encode "whatever the caller handed us" and decode
//! text into "whatever the tag says", so values travel as [`Value`]: an
//! owned box around any type that is cloneable, comparable and printable.
//! Concrete types come back out with [`Value::downcast_ref`] or
//! [`Value::downcast`].

use std::any::{Any, TypeId};
use std::fmt;

/// Anything that can live inside a [`Value`].
///
/// Blanket-implemented; there is no need to implement it by hand.
pub trait Object: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
    fn clone_object(&self) -> Box<dyn Object>;
    fn eq_object(&self, other: &dyn Object) -> bool;
    fn object_type_name(&self) -> &'static str;
}

impl<T> Object for T
where
    T: Any + fmt::Debug + Clone + PartialEq + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn clone_object(&self) -> Box<dyn Object> {
        Box::new(self.clone())
    }

    fn eq_object(&self, other: &dyn Object) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn object_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// An owned value of some runtime type.
///
/// Two values are equal when they hold the same concrete type and that
/// type's `PartialEq` says so.
pub struct Value(Box<dyn Object>);

/// A heterogeneous ordered sequence, encoded as `list(...)`.
pub type ValueList = Vec<Value>;

impl Value {
    /// Wraps a value. Wrapping a `Value` returns it unchanged instead of
    /// nesting it.
    pub fn new<T: Object>(value: T) -> Self {
        let mut slot = Some(value);
        if let Some(nested) = (&mut slot as &mut dyn Any).downcast_mut::<Option<Value>>() {
            if let Some(inner) = nested.take() {
                return inner;
            }
        }
        match slot {
            Some(value) => Self(Box::new(value)),
            None => Self::unit(),
        }
    }

    /// The absent value, `()`.
    pub fn unit() -> Self {
        Self(Box::new(()))
    }

    pub fn is_unit(&self) -> bool {
        self.is::<()>()
    }

    pub fn is<T: Any>(&self) -> bool {
        (*self.0).as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }

    /// Takes the concrete value out, or hands the `Value` back if it holds
    /// a different type.
    pub fn downcast<T: Any>(self) -> Result<T, Value> {
        if !self.is::<T>() {
            return Err(self);
        }
        match self.0.into_any().downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            // The type was checked above.
            Err(_) => Err(Self::unit()),
        }
    }

    /// The Rust type name of the held value, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        (*self.0).object_type_name()
    }

    /// The `TypeId` of the held value (not of `Value` itself).
    pub fn concrete_type_id(&self) -> TypeId {
        Any::type_id((*self.0).as_any())
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        Self((*self.0).clone_object())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        (*self.0).eq_object(&*other.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::unit()
    }
}

macro_rules! impl_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::new(value)
                }
            }
        )*
    };
}

impl_from!(String, i32, i64, f64, bool, (), ValueList, ValueMap);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// ValueMap
// ---------------------------------------------------------------------------

/// Key/value pairs encoded as `map((k,v),...)`.
///
/// Keys are arbitrary values, so this is an insertion-ordered list rather
/// than a hash map. Equality ignores order.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces; returns the previous value for an equal key.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for ValueMap {
    type Item = (Value, Value);
    type IntoIter = std::vec::IntoIter<(Value, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
