use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::errors::GenerationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    String,
    Array,
    Date,
    /// Accepted as-is; the generator interprets it.
    Any,
}

#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub key: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn new(key: &'static str, kind: ParamKind, required: bool) -> Self {
        Self {
            key,
            kind,
            required,
        }
    }
}

pub struct ParamMap<'a> {
    map: Option<&'a Map<String, Value>>,
}

pub fn validate_params<'a>(
    params: Option<&'a Value>,
    specs: &[ParamSpec],
    ctx: &'static str,
) -> Result<ParamMap<'a>, GenerationError> {
    let map = match params {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            return Err(GenerationError::generator(
                ctx,
                "options must be a JSON object",
            ));
        }
    };

    if let Some(map) = map {
        for (key, value) in map {
            let Some(spec) = specs.iter().find(|spec| spec.key == key.as_str()) else {
                return Err(GenerationError::generator(
                    ctx,
                    format!("unknown option '{key}'"),
                ));
            };
            validate_kind(ctx, key, spec.kind, value)?;
        }
    }

    for spec in specs {
        if spec.required && !map.is_some_and(|map| map.contains_key(spec.key)) {
            return Err(GenerationError::generator(
                ctx,
                format!("missing required option '{}'", spec.key),
            ));
        }
    }

    Ok(ParamMap { map })
}

impl<'a> ParamMap<'a> {
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|map| map.get(key))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|value| value.as_i64())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key)
            .and_then(|value| value.as_u64())
            .and_then(|value| u32::try_from(value).ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|value| value.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|value| value.as_bool())
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(|value| value.as_str())
    }

    pub fn get_array(&self, key: &str) -> Option<&'a Vec<Value>> {
        self.get(key).and_then(|value| value.as_array())
    }
}

fn validate_kind(
    ctx: &'static str,
    key: &str,
    kind: ParamKind,
    value: &Value,
) -> Result<(), GenerationError> {
    let valid = match kind {
        ParamKind::Bool => value.is_boolean(),
        ParamKind::Int => value.as_i64().is_some(),
        ParamKind::Float => value.as_f64().is_some(),
        ParamKind::String => value.is_string(),
        ParamKind::Array => value.is_array(),
        ParamKind::Date => value.as_str().and_then(parse_date_value).is_some(),
        ParamKind::Any => true,
    };

    if valid {
        Ok(())
    } else {
        Err(GenerationError::generator(
            ctx,
            format!("invalid value for option '{key}'"),
        ))
    }
}

pub fn parse_date_value(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp_value(value).map(|timestamp| timestamp.date()))
}

pub fn parse_timestamp_value(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.naive_utc())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const SPECS: &[ParamSpec] = &[
        ParamSpec::new("min", ParamKind::Int, false),
        ParamSpec::new("pattern", ParamKind::String, true),
    ];

    #[test]
    fn unknown_and_missing_options_are_rejected() {
        let unknown = json!({"pattern": "x", "nope": 1});
        assert!(validate_params(Some(&unknown), SPECS, "test").is_err());

        let missing = json!({"min": 1});
        let err = validate_params(Some(&missing), SPECS, "test")
            .err()
            .expect("missing pattern");
        assert_eq!(
            err.to_string(),
            "generator 'test' failed: missing required option 'pattern'"
        );
    }

    #[test]
    fn typed_getters_read_values() {
        let params = json!({"min": 4, "pattern": "[a-z]{2}"});
        let map = validate_params(Some(&params), SPECS, "test").expect("valid");
        assert_eq!(map.get_i64("min"), Some(4));
        assert_eq!(map.get_str("pattern"), Some("[a-z]{2}"));
        assert_eq!(map.get_bool("min"), None);
    }

    #[test]
    fn dates_accept_plain_and_rfc3339_forms() {
        assert!(parse_date_value("2024-02-29").is_some());
        assert!(parse_date_value("2024-02-29T10:00:00Z").is_some());
        assert!(parse_date_value("29/02/2024").is_none());
    }
}
