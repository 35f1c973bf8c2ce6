//! Request and response envelopes.
//!
//! ```text
//! request(long(7),str("Room"),str("join"),list(str("str")),list(str("alice")))
//! response(long(7),enum(lobby.Wind,EAST))
//! ```
//!
//! The leading `long(...)` is the correlation id. A caller picks a fresh id
//! per request; the responder copies it into the response so the caller
//! can match answers to questions even with several calls in flight.

use std::fmt;

use crate::grammar::{expect, term};
use crate::rules::expect_type;
use crate::{BoxError, ConversionRule, Registry, Value, ValueList};

/// Language-neutral identity of a remote method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub interface: String,
    pub method: String,
    pub parameter_types: Vec<String>,
}

impl MethodDescriptor {
    pub fn new(
        interface: impl Into<String>,
        method: impl Into<String>,
        parameter_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            interface: interface.into(),
            method: method.into(),
            parameter_types: parameter_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.interface,
            self.method,
            self.parameter_types.join(",")
        )
    }
}

/// A method call on its way to the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: MethodDescriptor,
    pub arguments: ValueList,
}

/// The return value of a completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub value: Value,
}

fn encode_id(id: u64, registry: &Registry) -> Result<String, BoxError> {
    Ok(registry.to_wire(i64::try_from(id)?)?)
}

fn decode_id(text: &str, registry: &Registry) -> Result<u64, BoxError> {
    Ok(u64::try_from(registry.decode_as::<i64>(text)?)?)
}

/// `request(long(id),str(iface),str(method),list(str(ptype)...),list(args...))`
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestRule;

impl ConversionRule for RequestRule {
    fn tag(&self) -> &str {
        "request"
    }

    fn encode(&self, value: &Value, registry: &Registry) -> Result<String, BoxError> {
        let request = expect_type::<Request>(value)?;
        let parameter_types: ValueList = request
            .method
            .parameter_types
            .iter()
            .map(|p| Value::from(p.as_str()))
            .collect();

        Ok(term(
            "request",
            [
                encode_id(request.id, registry)?,
                registry.to_wire(request.method.interface.clone())?,
                registry.to_wire(request.method.method.clone())?,
                registry.to_wire(parameter_types)?,
                registry.to_wire(request.arguments.clone())?,
            ],
        ))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with("request(")
    }

    fn decode(&self, text: &str, registry: &Registry) -> Result<Value, BoxError> {
        let elems = expect(text, "request", 5)?;
        let parameter_types = registry
            .decode_as::<ValueList>(elems[3])?
            .into_iter()
            .map(|p| {
                p.downcast::<String>()
                    .map_err(|other| format!("parameter type name is a {}", other.type_name()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Value::new(Request {
            id: decode_id(elems[0], registry)?,
            method: MethodDescriptor {
                interface: registry.decode_as(elems[1])?,
                method: registry.decode_as(elems[2])?,
                parameter_types,
            },
            arguments: registry.decode_as(elems[4])?,
        }))
    }
}

/// `response(long(id),value)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseRule;

impl ConversionRule for ResponseRule {
    fn tag(&self) -> &str {
        "response"
    }

    fn encode(&self, value: &Value, registry: &Registry) -> Result<String, BoxError> {
        let response = expect_type::<Response>(value)?;
        Ok(term(
            "response",
            [
                encode_id(response.id, registry)?,
                registry.encode(&response.value)?,
            ],
        ))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with("response(")
    }

    fn decode(&self, text: &str, registry: &Registry) -> Result<Value, BoxError> {
        let elems = expect(text, "response", 2)?;
        Ok(Value::new(Response {
            id: decode_id(elems[0], registry)?,
            value: registry.decode(elems[1])?,
        }))
    }
}
