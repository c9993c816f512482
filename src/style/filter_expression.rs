use bstr::{BStr, BString};
use serde::Deserialize;

use crate::vector_tile::{Value, VectorTileFeature};

/// A legacy style filter, evaluated against one feature's properties. The
/// pseudo keys `$type` and `$id` address the geometry type and feature id.
#[derive(Debug, Clone, Default)]
pub enum FilterExpression {
    All(Vec<FilterExpression>),
    Any(Vec<FilterExpression>),
    None(Vec<FilterExpression>),
    In(BString, Vec<FilterValue>),
    NotIn(BString, Vec<FilterValue>),
    Has(BString),
    NotHas(BString),
    Cmp(BString, Comparison, FilterValue),
    #[default]
    True,
}

impl FilterExpression {
    pub fn eval(&self, feature: &VectorTileFeature<'_>) -> bool {
        self.eval_with(&|key: &BStr| {
            if key == "$id" {
                feature.id().map(|id| Value::Number(id as f64))
            } else {
                feature.property(key)
            }
        })
    }

    fn eval_with<'a, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&BStr) -> Option<Value<'a>>,
    {
        match self {
            FilterExpression::All(filters) => filters.iter().all(|f| f.eval_with(lookup)),
            FilterExpression::Any(filters) => filters.iter().any(|f| f.eval_with(lookup)),
            FilterExpression::None(filters) => !filters.iter().any(|f| f.eval_with(lookup)),
            FilterExpression::In(key, values) => lookup(key.as_ref())
                .map(|value| values.iter().any(|v| v == &value))
                .unwrap_or(false),
            FilterExpression::NotIn(key, values) => lookup(key.as_ref())
                .map(|value| values.iter().all(|v| v != &value))
                .unwrap_or(true),
            FilterExpression::Has(key) => lookup(key.as_ref()).is_some(),
            FilterExpression::NotHas(key) => lookup(key.as_ref()).is_none(),
            FilterExpression::Cmp(key, cmp, value) => lookup(key.as_ref())
                .map(|v| cmp.cmp(value, &v))
                .unwrap_or(*cmp == Comparison::Neq),
            FilterExpression::True => true,
        }
    }
}

impl<'de> serde::de::Deserialize<'de> for FilterExpression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(FilterVisitor)
    }
}

struct FilterVisitor;

impl<'de> serde::de::Visitor<'de> for FilterVisitor {
    type Value = FilterExpression;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a filter array expression")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        use serde::de::Error as E;

        let kind: String = seq
            .next_element()?
            .ok_or(E::custom("expected filter expression type"))?;

        let exp = match kind.as_str() {
            "all" => FilterExpression::All(remaining(&mut seq)?),
            "any" => FilterExpression::Any(remaining(&mut seq)?),
            "none" => FilterExpression::None(remaining(&mut seq)?),
            "in" | "!in" => {
                let key: BString = seq
                    .next_element()?
                    .ok_or(E::custom("expected key for in filter expression"))?;
                let values = remaining(&mut seq)?;

                if kind == "in" {
                    FilterExpression::In(key, values)
                } else {
                    FilterExpression::NotIn(key, values)
                }
            }
            "has" | "!has" => {
                let key: BString = seq
                    .next_element()?
                    .ok_or(E::custom("expected key for has filter expression"))?;

                if kind == "has" {
                    FilterExpression::Has(key)
                } else {
                    FilterExpression::NotHas(key)
                }
            }
            s => {
                let cmp = Comparison::from_str(s)
                    .ok_or_else(|| E::custom(format!("unexpected filter type '{}'", s)))?;
                let key = seq
                    .next_element()?
                    .ok_or(E::custom("expected key for comparison filter expression"))?;
                let value = seq
                    .next_element()?
                    .ok_or(E::custom("expected value for comparison filter expression"))?;

                FilterExpression::Cmp(key, cmp, value)
            }
        };

        Ok(exp)
    }
}

fn remaining<'de, A, T>(seq: &mut A) -> Result<Vec<T>, A::Error>
where
    A: serde::de::SeqAccess<'de>,
    T: serde::Deserialize<'de>,
{
    let mut items = Vec::new();
    while let Some(item) = seq.next_element()? {
        items.push(item)
    }
    Ok(items)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    String(BString),
    Number(f64),
    Bool(bool),
}

impl PartialEq<Value<'_>> for FilterValue {
    fn eq(&self, other: &Value<'_>) -> bool {
        match (self, other) {
            (FilterValue::String(s), Value::String(ss)) => s == *ss,
            (FilterValue::Number(n), Value::Number(nn)) => n == nn,
            (FilterValue::Bool(b), Value::Bool(bb)) => b == bb,
            _ => false,
        }
    }
}

impl PartialOrd<Value<'_>> for FilterValue {
    fn partial_cmp(&self, other: &Value<'_>) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (FilterValue::Number(n), Value::Number(nn)) => n.partial_cmp(nn),
            (FilterValue::String(s), Value::String(ss)) => {
                let other: &[u8] = ss.as_ref();
                Some(s.as_slice().cmp(other))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Lteq,
    GtEq,
    Lt,
    Gt,
}

impl Comparison {
    /// Compares the feature's value `r` against the filter's value `l`,
    /// written `r <op> l` in the style.
    fn cmp(&self, l: &FilterValue, r: &Value<'_>) -> bool {
        use std::cmp::Ordering;

        // The operand order in styles is [op, key, value]
        let ord = l.partial_cmp(r).map(Ordering::reverse);
        match self {
            Comparison::Eq => l == r,
            Comparison::Neq => l != r,
            Comparison::Lteq => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            Comparison::GtEq => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            Comparison::Lt => ord == Some(Ordering::Less),
            Comparison::Gt => ord == Some(Ordering::Greater),
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        let v = match s {
            "==" => Comparison::Eq,
            "!=" => Comparison::Neq,
            "<=" => Comparison::Lteq,
            ">=" => Comparison::GtEq,
            "<" => Comparison::Lt,
            ">" => Comparison::Gt,
            _ => return None,
        };

        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::ByteSlice;
    use serde_json::json;

    fn filter(value: serde_json::Value) -> FilterExpression {
        serde_json::from_value(value).unwrap()
    }

    fn eval(filter: &FilterExpression, props: &[(&'static str, Value<'static>)]) -> bool {
        filter.eval_with(&|key: &BStr| {
            props
                .iter()
                .find(|(k, _)| k.as_bytes().as_bstr() == key)
                .map(|(_, v)| *v)
        })
    }

    #[test]
    fn comparisons_read_key_then_value() {
        let props = [("rank", Value::Number(3.0)), ("class", Value::from("road"))];

        assert!(eval(&filter(json!(["<", "rank", 5])), &props));
        assert!(!eval(&filter(json!([">", "rank", 5])), &props));
        assert!(eval(&filter(json!([">=", "rank", 3])), &props));
        assert!(eval(&filter(json!(["==", "class", "road"])), &props));
        assert!(eval(&filter(json!(["!=", "missing", "road"])), &props));
        assert!(!eval(&filter(json!(["==", "missing", "road"])), &props));
    }

    #[test]
    fn combinators_and_membership() {
        let props = [("class", Value::from("rail"))];

        assert!(eval(&filter(json!(["in", "class", "road", "rail"])), &props));
        assert!(!eval(&filter(json!(["!in", "class", "road", "rail"])), &props));
        assert!(eval(&filter(json!(["!in", "other", "road"])), &props));
        assert!(eval(&filter(json!(["has", "class"])), &props));
        assert!(eval(&filter(json!(["!has", "name"])), &props));
        assert!(eval(
            &filter(json!(["all", ["has", "class"], ["any", ["==", "class", "x"], ["==", "class", "rail"]]])),
            &props
        ));
        assert!(!eval(&filter(json!(["none", ["has", "class"]])), &props));
        assert!(eval(&FilterExpression::default(), &props));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        assert!(serde_json::from_value::<FilterExpression>(json!(["within", "x"])).is_err());
    }
}
