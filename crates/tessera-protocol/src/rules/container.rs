use super::expect_type;
use crate::grammar::{elements, expect, term};
use crate::{BoxError, ConversionRule, Registry, Value, ValueList, ValueMap};

/// `list(e1,e2,...)`; elements are encoded through the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListRule;

impl ConversionRule for ListRule {
    fn tag(&self) -> &str {
        "list"
    }

    fn encode(&self, value: &Value, registry: &Registry) -> Result<String, BoxError> {
        let list = expect_type::<ValueList>(value)?;
        let elems = list
            .iter()
            .map(|v| registry.encode(v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(term("list", elems))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with("list(")
    }

    fn decode(&self, text: &str, registry: &Registry) -> Result<Value, BoxError> {
        let list = elements(text, "list")?
            .into_iter()
            .map(|elem| registry.decode(elem))
            .collect::<Result<ValueList, _>>()?;
        Ok(Value::new(list))
    }
}

/// `map((k,v),(k,v),...)`; keys and values are encoded through the
/// registry, each pair wrapped in a bare `(...)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapRule;

impl ConversionRule for MapRule {
    fn tag(&self) -> &str {
        "map"
    }

    fn encode(&self, value: &Value, registry: &Registry) -> Result<String, BoxError> {
        let map = expect_type::<ValueMap>(value)?;
        let mut pairs = Vec::with_capacity(map.len());
        for (k, v) in map.iter() {
            pairs.push(term("", [registry.encode(k)?, registry.encode(v)?]));
        }
        Ok(term("map", pairs))
    }

    fn recognize(&self, text: &str) -> bool {
        text.starts_with("map(")
    }

    fn decode(&self, text: &str, registry: &Registry) -> Result<Value, BoxError> {
        let mut map = ValueMap::new();
        for pair in elements(text, "map")? {
            let kv = expect(pair, "", 2)?;
            map.insert(registry.decode(kv[0])?, registry.decode(kv[1])?);
        }
        Ok(Value::new(map))
    }
}
