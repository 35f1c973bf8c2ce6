//! Wire protocol for Tessera.
//!
//! This crate knows how to turn typed values into text and back. It does
//! not know about sockets, threads or remote objects:
//!
//! - **Grammar** ([`grammar`]) splits and builds nested `tag(a,b,...)`
//!   terms and quotes string payloads.
//! - **Values** ([`Value`], [`ValueList`], [`ValueMap`]) carry data of any
//!   runtime type through the registry.
//! - **Rules** ([`ConversionRule`] and the built-ins in [`rules`]) define
//!   one type's wire form each.
//! - **Registry** ([`Registry`]) keeps rules in priority order and picks
//!   the right one for a value or a piece of text.
//! - **Envelopes** ([`Request`], [`Response`]) wrap a method call and its
//!   result so they can travel through the registry like any other value.
//!
//! # Architecture
//!
//! ```text
//! Transport (lines of text) → Protocol (Value) → RPC (method calls)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

// `grammar` and `rules` are public so hosts can write their own rules with
// the same building blocks the built-in ones use.

mod envelope;
mod error;
pub mod grammar;
mod registry;
pub mod rules;
mod value;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use envelope::{MethodDescriptor, Request, RequestRule, Response, ResponseRule};
pub use error::{BoxError, ConversionError, GrammarError};
pub use registry::{ConversionRule, Registry, TypeKey};
pub use rules::WireEnum;
pub use value::{Object, Value, ValueList, ValueMap};
