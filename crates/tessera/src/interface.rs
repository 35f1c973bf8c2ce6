//! Compile-time method tables for remote interfaces.
//!
//! A remote interface is described once as a `static` [`InterfaceDef`] and
//! shared by both ends: the [`CallProxy`](crate::CallProxy) looks methods up
//! by name to build requests, the [`Dispatcher`](crate::Dispatcher) resolves
//! incoming [`MethodDescriptor`]s against it.
//!
//! ```
//! use tessera::{InterfaceDef, MethodDef};
//!
//! const JOIN: MethodDef = MethodDef::returning("join", &["str"]);
//! const LEAVE: MethodDef = MethodDef::void("leave", &[]);
//!
//! static ROOM: InterfaceDef = InterfaceDef::new("lobby.Room", &[JOIN, LEAVE]);
//!
//! assert_eq!(ROOM.find("join", 1), Some(&JOIN));
//! assert_eq!(ROOM.find("join", 2), None);
//! ```

use std::fmt;

use tessera_protocol::MethodDescriptor;

/// Whether a method answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// Fire-and-forget: the caller does not wait and no response is sent.
    Void,
    /// The caller blocks until the response arrives.
    Value,
}

/// One method of a remote interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDef {
    pub name: &'static str,
    /// Wire type names of the formal parameters, in order.
    pub parameter_types: &'static [&'static str],
    pub returns: Returns,
}

impl MethodDef {
    pub const fn returning(name: &'static str, parameter_types: &'static [&'static str]) -> Self {
        Self {
            name,
            parameter_types,
            returns: Returns::Value,
        }
    }

    pub const fn void(name: &'static str, parameter_types: &'static [&'static str]) -> Self {
        Self {
            name,
            parameter_types,
            returns: Returns::Void,
        }
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }

    pub fn is_void(&self) -> bool {
        self.returns == Returns::Void
    }

    /// The wire identity of this method as declared by `interface`.
    pub fn descriptor(&self, interface: &str) -> MethodDescriptor {
        MethodDescriptor::new(interface, self.name, self.parameter_types.iter().copied())
    }

    fn matches(&self, descriptor: &MethodDescriptor) -> bool {
        self.name == descriptor.method
            && self.parameter_types.len() == descriptor.parameter_types.len()
            && self
                .parameter_types
                .iter()
                .zip(&descriptor.parameter_types)
                .all(|(ours, theirs)| *ours == theirs)
    }
}

/// A named set of methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDef {
    pub name: &'static str,
    pub methods: &'static [MethodDef],
}

impl InterfaceDef {
    pub const fn new(name: &'static str, methods: &'static [MethodDef]) -> Self {
        Self { name, methods }
    }

    /// Finds a method by name and argument count. Overloads that differ
    /// in arity are told apart here.
    pub fn find(&self, name: &str, arity: usize) -> Option<&'static MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.arity() == arity)
    }

    /// Resolves a descriptor received from the wire: interface name,
    /// method name and every parameter type must match.
    pub fn resolve(&self, descriptor: &MethodDescriptor) -> Option<&'static MethodDef> {
        if descriptor.interface != self.name {
            return None;
        }
        self.methods.iter().find(|m| m.matches(descriptor))
    }
}

impl fmt::Display for InterfaceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREET: MethodDef = MethodDef::returning("greet", &["str"]);
    const GREET_TWICE: MethodDef = MethodDef::returning("greet", &["str", "int"]);
    const PING: MethodDef = MethodDef::void("ping", &[]);

    static GREETER: InterfaceDef = InterfaceDef::new("test.Greeter", &[GREET, GREET_TWICE, PING]);

    #[test]
    fn test_find_overload_by_arity() {
        assert_eq!(GREETER.find("greet", 1), Some(&GREET));
        assert_eq!(GREETER.find("greet", 2), Some(&GREET_TWICE));
        assert_eq!(GREETER.find("greet", 3), None);
        assert_eq!(GREETER.find("wave", 0), None);
    }

    #[test]
    fn test_resolve_matches_descriptor_exactly() {
        let descriptor = GREET_TWICE.descriptor("test.Greeter");
        assert_eq!(GREETER.resolve(&descriptor), Some(&GREET_TWICE));

        let wrong_types = MethodDescriptor::new("test.Greeter", "greet", ["str", "str"]);
        assert_eq!(GREETER.resolve(&wrong_types), None);

        let wrong_interface = GREET.descriptor("test.Other");
        assert_eq!(GREETER.resolve(&wrong_interface), None);
    }

    #[test]
    fn test_descriptor_carries_declared_types() {
        let descriptor = GREET_TWICE.descriptor("test.Greeter");
        assert_eq!(descriptor.to_string(), "test.Greeter.greet(str,int)");
        assert!(!GREET.is_void());
        assert!(PING.is_void());
        assert_eq!(PING.arity(), 0);
    }
}
