//! Struct fields as the registry sees them.
//!
//! [`StructRule`](super::StructRule) walks a struct through serde. A
//! [`ShapeSerializer`] records what serde reports, including the container
//! name of every nested struct and enum, so a field whose type has its own
//! registered rule can be rebuilt as that concrete type and encoded by it.
//! Fields of unregistered types become plain values (maps, lists, leaves).

use std::any::TypeId;
use std::cell::Cell;
use std::fmt;

use serde::de::{self, DeserializeOwned, Visitor};
use serde::ser::{self, Serialize};
use serde_json::{Map, Number, Value as Json};

use super::expect_type;
use crate::{BoxError, Object, Registry, Value, ValueList, ValueMap};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub(crate) struct FieldError(String);

impl ser::Error for FieldError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

impl de::Error for FieldError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

// ---------------------------------------------------------------------------
// Field types
// ---------------------------------------------------------------------------

/// A registered type that can stand as a struct field.
#[derive(Clone, Copy)]
pub(crate) struct FieldType {
    pub(crate) serde_name: &'static str,
    pub(crate) wire_name: &'static str,
    pub(crate) type_id: TypeId,
    lift: fn(Json) -> Result<Value, BoxError>,
    lower: fn(&Value) -> Result<Json, BoxError>,
}

impl FieldType {
    /// `None` when serde does not expose a container name for `T`
    /// (transparent or untagged types).
    pub(crate) fn of<T>(wire_name: &'static str) -> Option<Self>
    where
        T: Object + Serialize + DeserializeOwned,
    {
        Some(Self {
            serde_name: container_name::<T>()?,
            wire_name,
            type_id: TypeId::of::<T>(),
            lift: lift::<T>,
            lower: lower::<T>,
        })
    }

    fn lift(&self, json: Json) -> Result<Value, BoxError> {
        (self.lift)(json)
    }

    fn lower(&self, value: &Value) -> Result<Json, BoxError> {
        (self.lower)(value)
    }
}

fn lift<T: Object + DeserializeOwned>(json: Json) -> Result<Value, BoxError> {
    Ok(Value::new(serde_json::from_value::<T>(json)?))
}

fn lower<T: Object + Serialize>(value: &Value) -> Result<Json, BoxError> {
    Ok(serde_json::to_value(expect_type::<T>(value)?)?)
}

/// The name serde passes for `T`'s struct or enum.
///
/// Derived `Deserialize` impls announce it to the deserializer before
/// reading anything, so asking is enough; nothing is ever decoded.
fn container_name<T: DeserializeOwned>() -> Option<&'static str> {
    let seen = Cell::new(None);
    let _ = T::deserialize(ContainerName(&seen));
    seen.get()
}

struct ContainerName<'a>(&'a Cell<Option<&'static str>>);

impl<'de> de::Deserializer<'de> for ContainerName<'_> {
    type Error = FieldError;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, FieldError> {
        Err(FieldError("not a named container".to_string()))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        _fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, FieldError> {
        self.0.set(Some(name));
        Err(FieldError(name.to_string()))
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, FieldError> {
        self.0.set(Some(name));
        Err(FieldError(name.to_string()))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 u8 u16 u32 u64 f32 f64 char str string bytes
        byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map identifier ignored_any
    }
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// One serialized value, with the container names serde reported.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shape {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Seq(Vec<Shape>),
    Map(Vec<(Shape, Shape)>),
    Struct {
        name: &'static str,
        fields: Vec<(&'static str, Shape)>,
    },
    UnitVariant {
        name: &'static str,
        variant: &'static str,
    },
    /// Newtype, tuple and struct variants.
    Variant {
        name: &'static str,
        variant: &'static str,
        inner: Box<Shape>,
    },
}

impl Shape {
    fn container(&self) -> Option<&'static str> {
        match self {
            Shape::Struct { name, .. }
            | Shape::UnitVariant { name, .. }
            | Shape::Variant { name, .. } => Some(*name),
            _ => None,
        }
    }

    /// Turns the shape into a registry value plus the declared type name
    /// written next to it.
    pub(crate) fn into_value(self, registry: &Registry) -> Result<(&'static str, Value), BoxError> {
        if let Some(field_type) = self.container().and_then(|n| registry.field_type_named(n)) {
            return Ok((field_type.wire_name, field_type.lift(self.into_json()?)?));
        }

        Ok(match self {
            Shape::Null => ("null", Value::unit()),
            Shape::Bool(b) => ("bool", Value::new(b)),
            Shape::Int(i) => ("int", Value::new(i)),
            Shape::Long(i) => ("long", Value::new(i)),
            Shape::Double(f) => ("double", Value::new(f)),
            Shape::Str(s) => ("str", Value::new(s)),
            Shape::UnitVariant { variant, .. } => ("str", Value::from(variant)),
            Shape::Seq(items) => {
                let list = items
                    .into_iter()
                    .map(|item| item.into_value(registry).map(|(_, v)| v))
                    .collect::<Result<ValueList, _>>()?;
                ("list", Value::new(list))
            }
            Shape::Map(entries) => {
                let mut map = ValueMap::new();
                for (k, v) in entries {
                    map.insert(k.into_value(registry)?.1, v.into_value(registry)?.1);
                }
                ("map", Value::new(map))
            }
            Shape::Struct { fields, .. } => {
                let mut map = ValueMap::new();
                for (k, v) in fields {
                    map.insert(k, v.into_value(registry)?.1);
                }
                ("map", Value::new(map))
            }
            Shape::Variant { variant, inner, .. } => {
                let mut map = ValueMap::new();
                map.insert(variant, inner.into_value(registry)?.1);
                ("map", Value::new(map))
            }
        })
    }

    /// The JSON form serde_json would have produced for the same value.
    fn into_json(self) -> Result<Json, BoxError> {
        Ok(match self {
            Shape::Null => Json::Null,
            Shape::Bool(b) => Json::Bool(b),
            Shape::Int(i) => Json::from(i),
            Shape::Long(i) => Json::from(i),
            Shape::Double(f) => Number::from_f64(f)
                .map(Json::Number)
                .ok_or_else(|| format!("{f} has no structural form"))?,
            Shape::Str(s) => Json::String(s),
            Shape::UnitVariant { variant, .. } => Json::String(variant.to_string()),
            Shape::Seq(items) => Json::Array(
                items
                    .into_iter()
                    .map(Shape::into_json)
                    .collect::<Result<_, _>>()?,
            ),
            Shape::Map(entries) => {
                let mut object = Map::new();
                for (k, v) in entries {
                    let key = match k {
                        Shape::Str(s) => s,
                        Shape::Int(i) => i.to_string(),
                        Shape::Long(i) => i.to_string(),
                        other => return Err(format!("{other:?} is not a field name").into()),
                    };
                    object.insert(key, v.into_json()?);
                }
                Json::Object(object)
            }
            Shape::Struct { fields, .. } => {
                let mut object = Map::new();
                for (k, v) in fields {
                    object.insert(k.to_string(), v.into_json()?);
                }
                Json::Object(object)
            }
            Shape::Variant { variant, inner, .. } => {
                let mut object = Map::new();
                object.insert(variant.to_string(), inner.into_json()?);
                Json::Object(object)
            }
        })
    }
}

/// The inverse of [`Shape::into_value`]: a decoded field value as JSON, so
/// serde can place it into the struct.
pub(crate) fn to_json(value: &Value, registry: &Registry) -> Result<Json, BoxError> {
    if let Some(field_type) = registry.field_type_of(value) {
        return field_type.lower(value);
    }
    if value.is_unit() {
        return Ok(Json::Null);
    }
    if let Some(s) = value.downcast_ref::<String>() {
        return Ok(Json::String(s.clone()));
    }
    if let Some(b) = value.downcast_ref::<bool>() {
        return Ok(Json::Bool(*b));
    }
    if let Some(i) = value.downcast_ref::<i32>() {
        return Ok(Json::from(*i));
    }
    if let Some(i) = value.downcast_ref::<i64>() {
        return Ok(Json::from(*i));
    }
    if let Some(f) = value.downcast_ref::<f64>() {
        return Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| format!("{f} has no structural form").into());
    }
    if let Some(list) = value.downcast_ref::<ValueList>() {
        return list
            .iter()
            .map(|item| to_json(item, registry))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array);
    }
    if let Some(map) = value.downcast_ref::<ValueMap>() {
        let mut entries = Map::new();
        for (k, v) in map.iter() {
            let key = k
                .downcast_ref::<String>()
                .ok_or_else(|| format!("map key of type {} is not a field name", k.type_name()))?;
            entries.insert(key.clone(), to_json(v, registry)?);
        }
        return Ok(Json::Object(entries));
    }
    Err(format!("{} cannot be stored in a field", value.type_name()).into())
}

// ---------------------------------------------------------------------------
// Serializer
// ---------------------------------------------------------------------------

/// Serializes any `T: Serialize` into a [`Shape`].
pub(crate) struct ShapeSerializer;

impl ser::Serializer for ShapeSerializer {
    type Ok = Shape;
    type Error = FieldError;
    type SerializeSeq = SeqShape;
    type SerializeTuple = SeqShape;
    type SerializeTupleStruct = SeqShape;
    type SerializeTupleVariant = VariantShape<SeqShape>;
    type SerializeMap = MapShape;
    type SerializeStruct = StructShape;
    type SerializeStructVariant = VariantShape<MapShape>;

    fn serialize_bool(self, v: bool) -> Result<Shape, FieldError> {
        Ok(Shape::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Shape, FieldError> {
        Ok(Shape::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Shape, FieldError> {
        Ok(Shape::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Shape, FieldError> {
        Ok(Shape::Int(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Shape, FieldError> {
        Ok(Shape::Long(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Shape, FieldError> {
        Ok(Shape::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Shape, FieldError> {
        Ok(Shape::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Shape, FieldError> {
        Ok(Shape::Long(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Shape, FieldError> {
        i64::try_from(v)
            .map(Shape::Long)
            .map_err(|_| FieldError(format!("{v} does not fit in a long")))
    }

    fn serialize_f32(self, v: f32) -> Result<Shape, FieldError> {
        Ok(Shape::Double(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Shape, FieldError> {
        Ok(Shape::Double(v))
    }

    fn serialize_char(self, v: char) -> Result<Shape, FieldError> {
        Ok(Shape::Str(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Shape, FieldError> {
        Ok(Shape::Str(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Shape, FieldError> {
        Ok(Shape::Seq(v.iter().map(|b| Shape::Int((*b).into())).collect()))
    }

    fn serialize_none(self) -> Result<Shape, FieldError> {
        Ok(Shape::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Shape, FieldError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Shape, FieldError> {
        Ok(Shape::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Shape, FieldError> {
        Ok(Shape::Null)
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Shape, FieldError> {
        Ok(Shape::UnitVariant { name, variant })
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Shape, FieldError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Shape, FieldError> {
        Ok(Shape::Variant {
            name,
            variant,
            inner: Box::new(value.serialize(ShapeSerializer)?),
        })
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqShape, FieldError> {
        Ok(SeqShape(Vec::with_capacity(len.unwrap_or(0))))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqShape, FieldError> {
        Ok(SeqShape(Vec::with_capacity(len)))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqShape, FieldError> {
        Ok(SeqShape(Vec::with_capacity(len)))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantShape<SeqShape>, FieldError> {
        Ok(VariantShape {
            name,
            variant,
            inner: SeqShape(Vec::with_capacity(len)),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapShape, FieldError> {
        Ok(MapShape {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }

    fn serialize_struct(self, name: &'static str, len: usize) -> Result<StructShape, FieldError> {
        Ok(StructShape {
            name,
            fields: Vec::with_capacity(len),
        })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantShape<MapShape>, FieldError> {
        Ok(VariantShape {
            name,
            variant,
            inner: MapShape {
                entries: Vec::with_capacity(len),
                key: None,
            },
        })
    }
}

pub(crate) struct SeqShape(Vec<Shape>);

impl SeqShape {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FieldError> {
        self.0.push(value.serialize(ShapeSerializer)?);
        Ok(())
    }
}

impl ser::SerializeSeq for SeqShape {
    type Ok = Shape;
    type Error = FieldError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FieldError> {
        self.push(value)
    }

    fn end(self) -> Result<Shape, FieldError> {
        Ok(Shape::Seq(self.0))
    }
}

impl ser::SerializeTuple for SeqShape {
    type Ok = Shape;
    type Error = FieldError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FieldError> {
        self.push(value)
    }

    fn end(self) -> Result<Shape, FieldError> {
        Ok(Shape::Seq(self.0))
    }
}

impl ser::SerializeTupleStruct for SeqShape {
    type Ok = Shape;
    type Error = FieldError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FieldError> {
        self.push(value)
    }

    fn end(self) -> Result<Shape, FieldError> {
        Ok(Shape::Seq(self.0))
    }
}

pub(crate) struct MapShape {
    entries: Vec<(Shape, Shape)>,
    key: Option<Shape>,
}

impl ser::SerializeMap for MapShape {
    type Ok = Shape;
    type Error = FieldError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), FieldError> {
        self.key = Some(key.serialize(ShapeSerializer)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FieldError> {
        let key = self
            .key
            .take()
            .ok_or_else(|| FieldError("map value without a key".to_string()))?;
        self.entries.push((key, value.serialize(ShapeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Shape, FieldError> {
        Ok(Shape::Map(self.entries))
    }
}

pub(crate) struct StructShape {
    name: &'static str,
    fields: Vec<(&'static str, Shape)>,
}

impl ser::SerializeStruct for StructShape {
    type Ok = Shape;
    type Error = FieldError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), FieldError> {
        self.fields.push((key, value.serialize(ShapeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Shape, FieldError> {
        Ok(Shape::Struct {
            name: self.name,
            fields: self.fields,
        })
    }
}

pub(crate) struct VariantShape<S> {
    name: &'static str,
    variant: &'static str,
    inner: S,
}

impl<S> VariantShape<S> {
    fn finish(name: &'static str, variant: &'static str, inner: Shape) -> Shape {
        Shape::Variant {
            name,
            variant,
            inner: Box::new(inner),
        }
    }
}

impl ser::SerializeTupleVariant for VariantShape<SeqShape> {
    type Ok = Shape;
    type Error = FieldError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FieldError> {
        self.inner.push(value)
    }

    fn end(self) -> Result<Shape, FieldError> {
        Ok(Self::finish(self.name, self.variant, Shape::Seq(self.inner.0)))
    }
}

impl ser::SerializeStructVariant for VariantShape<MapShape> {
    type Ok = Shape;
    type Error = FieldError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), FieldError> {
        self.inner
            .entries
            .push((Shape::Str(key.to_string()), value.serialize(ShapeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Shape, FieldError> {
        Ok(Self::finish(self.name, self.variant, Shape::Map(self.inner.entries)))
    }
}
