//! The structural fallback: `pojo(Type,fields((name,decltype,value),...))`.
//!
//! Fields are discovered through serde, in declaration order. Each field
//! value goes back through the registry, so a field whose type has its own
//! rule (a registered enum, another registered struct, a domain rule in
//! front) is written by that rule. Decoding starts from `T::default()`,
//! overwrites each named field and deserializes the result, so a payload
//! may omit fields but may not invent them.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};

use super::expect_type;
use super::fields::{Shape, ShapeSerializer, to_json};
use crate::grammar::{elements, expect, term};
use crate::{BoxError, ConversionRule, Object, Registry, Value};

pub struct StructRule<T> {
    type_name: &'static str,
    prefix: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StructRule<T>
where
    T: Object + Serialize + DeserializeOwned + Default,
{
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            prefix: format!("pojo({type_name},"),
            _marker: PhantomData,
        }
    }

    fn defaults(&self) -> Result<Map<String, Json>, BoxError> {
        match serde_json::to_value(T::default())? {
            Json::Object(fields) => Ok(fields),
            other => Err(self.not_a_struct(other)),
        }
    }

    fn not_a_struct(&self, got: impl std::fmt::Debug) -> BoxError {
        format!("{} does not serialize to named fields (got {got:?})", self.type_name).into()
    }
}

impl<T> ConversionRule for StructRule<T>
where
    T: Object + Serialize + DeserializeOwned + Default,
{
    fn tag(&self) -> &str {
        self.type_name
    }

    fn encode(&self, value: &Value, registry: &Registry) -> Result<String, BoxError> {
        let fields = match expect_type::<T>(value)?.serialize(ShapeSerializer)? {
            Shape::Struct { fields, .. } => fields,
            other => return Err(self.not_a_struct(other)),
        };
        let mut triples = Vec::with_capacity(fields.len());
        for (name, shape) in fields {
            let (decltype, field) = shape.into_value(registry)?;
            triples.push(term(
                "",
                [name.to_string(), decltype.to_string(), registry.encode(&field)?],
            ));
        }
        Ok(term("pojo", [self.type_name.to_string(), term("fields", triples)]))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with(&self.prefix)
    }

    fn decode(&self, text: &str, registry: &Registry) -> Result<Value, BoxError> {
        let elems = expect(text, "pojo", 2)?;
        if elems[0] != self.type_name {
            return Err(format!("expected {}, got {}", self.type_name, elems[0]).into());
        }

        let mut fields = self.defaults()?;
        for triple in elements(elems[1], "fields")? {
            let parts = expect(triple, "", 3)?;
            let name = parts[0];
            let slot = fields
                .get_mut(name)
                .ok_or_else(|| format!("{} has no field {name:?}", self.type_name))?;
            *slot = to_json(&registry.decode(parts[2])?, registry)?;
        }

        let decoded: T = serde_json::from_value(Json::Object(fields))?;
        Ok(Value::new(decoded))
    }
}
