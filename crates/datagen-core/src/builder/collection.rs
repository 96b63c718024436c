//! Lenient readers for collection-level keys. Problems with these keys are
//! reported while declaring; here malformed entries are skipped.

use serde_json::{Map, Value};

use crate::keywords::{COUNT, PICK, TAGS};
use crate::node::PickDecl;

pub(super) fn count_of(definition: &Map<String, Value>) -> Option<u64> {
    match definition.get(COUNT) {
        None => Some(1),
        Some(value) => value.as_u64(),
    }
}

pub(super) fn tags_of(definition: &Map<String, Value>) -> Vec<String> {
    let Some(Value::Array(tags)) = definition.get(TAGS) else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().filter_map(Value::as_str) {
        if !out.iter().any(|seen| seen == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

pub(super) fn picks_of(definition: &Map<String, Value>) -> Vec<PickDecl> {
    let Some(Value::Object(picks)) = definition.get(PICK) else {
        return Vec::new();
    };
    let count = count_of(definition);
    picks
        .iter()
        .filter_map(|(alias, index)| {
            let index = index.as_u64()?;
            if count.is_some_and(|count| index >= count) {
                return None;
            }
            Some(PickDecl {
                alias: alias.clone(),
                index,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn count_defaults_to_one() {
        assert_eq!(count_of(&object(json!({"item": {}}))), Some(1));
        assert_eq!(count_of(&object(json!({"count": -2}))), None);
    }

    #[test]
    fn out_of_range_picks_are_dropped() {
        let picks = picks_of(&object(json!({"count": 2, "pick": {"a": 0, "b": 5}})));
        assert_eq!(
            picks,
            vec![PickDecl {
                alias: "a".to_string(),
                index: 0
            }]
        );
    }
}
