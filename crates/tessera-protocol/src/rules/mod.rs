//! Built-in conversion rules.
//!
//! | Rule | Type | Wire form |
//! |---|---|---|
//! | [`StringRule`] | `String` | `str("...")` |
//! | [`ScalarRule`] | `i32`, `i64`, `f64`, `bool` | `int(42)`, `long(42)`, `double(1.5)`, `bool(true)` |
//! | [`NullRule`] | `()` | `null()` |
//! | [`ListRule`] | [`ValueList`](crate::ValueList) | `list(e1,e2,...)` |
//! | [`MapRule`] | [`ValueMap`](crate::ValueMap) | `map((k,v),...)` |
//! | [`EnumRule`] | any [`WireEnum`] | `enum(Type,VARIANT)` |
//! | [`StructRule`] | any serde struct | `pojo(Type,fields((name,decltype,value),...))` |
//! | [`ClosureRule`] | anything | whatever the closures produce |

mod closure;
mod container;
mod enumeration;
mod fields;
mod scalar;
mod structural;

pub use closure::{ClosureRule, prefix_recognizer};
pub use container::{ListRule, MapRule};
pub use enumeration::{EnumRule, WireEnum};
pub use scalar::{NullRule, ScalarRule, StringRule};
pub use structural::StructRule;

pub(crate) use fields::FieldType;

use crate::{BoxError, ConversionError, Value};

/// Borrows the concrete value a rule was selected for.
pub(crate) fn expect_type<T: std::any::Any>(value: &Value) -> Result<&T, BoxError> {
    value.downcast_ref::<T>().ok_or_else(|| {
        ConversionError::UnexpectedType {
            expected: std::any::type_name::<T>(),
            actual: value.type_name(),
        }
        .into()
    })
}
