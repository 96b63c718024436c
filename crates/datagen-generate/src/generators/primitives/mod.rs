use std::fmt::Write as _;

use chrono::{Duration, NaiveDate};
use rand::Rng;
use rand_regex::Regex as RandRegex;
use serde_json::{Number, Value};

use crate::errors::GenerationError;
use crate::generators::{Generator, GeneratorContext, GeneratorRegistry};
use crate::params::{ParamKind, ParamMap, ParamSpec, parse_date_value, validate_params};

const DEFAULT_INT_MIN: i64 = 0;
const DEFAULT_INT_MAX: i64 = 10000;
const DEFAULT_DECIMALS: i64 = 2;
const MAX_DECIMALS: i64 = 10;
const DEFAULT_MIN_LENGTH: i64 = 1;
const DEFAULT_MAX_LENGTH: i64 = 20;
const DEFAULT_MAX_REPEAT: u32 = 32;
const DEFAULT_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const DEFAULT_LOREM_WORDS: i64 = 5;
const SENTENCE_WORDS: (usize, usize) = (4, 10);
const PARAGRAPH_SENTENCES: (usize, usize) = (3, 6);

const NUMBER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("min", ParamKind::Int, false),
    ParamSpec::new("max", ParamKind::Int, false),
];
const FLOAT_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("min", ParamKind::Float, false),
    ParamSpec::new("max", ParamKind::Float, false),
    ParamSpec::new("decimals", ParamKind::Int, false),
];
const BOOLEAN_PARAMS: &[ParamSpec] = &[ParamSpec::new("probability", ParamKind::Float, false)];
const SEQUENCE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("start", ParamKind::Int, false),
    ParamSpec::new("increment", ParamKind::Int, false),
];
const STRING_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("length", ParamKind::Int, false),
    ParamSpec::new("minLength", ParamKind::Int, false),
    ParamSpec::new("maxLength", ParamKind::Int, false),
    ParamSpec::new("allowedChars", ParamKind::String, false),
    ParamSpec::new("pattern", ParamKind::String, false),
    ParamSpec::new("regex", ParamKind::String, false),
    ParamSpec::new("maxRepeat", ParamKind::Int, false),
];
const DATE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("from", ParamKind::Date, false),
    ParamSpec::new("to", ParamKind::Date, false),
    ParamSpec::new("format", ParamKind::String, false),
];
const LOREM_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("words", ParamKind::Int, false),
    ParamSpec::new("sentences", ParamKind::Int, false),
    ParamSpec::new("paragraphs", ParamKind::Int, false),
];

pub fn register(registry: &mut GeneratorRegistry) {
    registry.register_generator(Box::new(NumberGenerator));
    registry.register_generator(Box::new(FloatGenerator));
    registry.register_generator(Box::new(BooleanGenerator));
    registry.register_generator(Box::new(UuidGenerator));
    registry.register_generator(Box::new(SequenceGenerator));
    registry.register_generator(Box::new(StringGenerator));
    registry.register_generator(Box::new(DateGenerator));
    registry.register_generator(Box::new(LoremGenerator));
}

struct NumberGenerator;

impl Generator for NumberGenerator {
    fn id(&self) -> &'static str {
        "number"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, NUMBER_PARAMS, "number")?;
        let min = params.get_i64("min").unwrap_or(DEFAULT_INT_MIN);
        let max = params.get_i64("max").unwrap_or(DEFAULT_INT_MAX);
        if min > max {
            return Err(GenerationError::generator("number", "min must be <= max"));
        }
        Ok(Value::from(rng.random_range(min..=max)))
    }
}

struct FloatGenerator;

impl Generator for FloatGenerator {
    fn id(&self) -> &'static str {
        "float"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, FLOAT_PARAMS, "float")?;
        let min = params.get_f64("min").unwrap_or(DEFAULT_INT_MIN as f64);
        let max = params.get_f64("max").unwrap_or(DEFAULT_INT_MAX as f64);
        if min > max {
            return Err(GenerationError::generator("float", "min must be <= max"));
        }
        let decimals = params
            .get_i64("decimals")
            .unwrap_or(DEFAULT_DECIMALS)
            .clamp(0, MAX_DECIMALS) as i32;
        let factor = 10_f64.powi(decimals);
        let rounded = (rng.random_range(min..=max) * factor).round() / factor;
        Number::from_f64(rounded)
            .map(Value::Number)
            .ok_or_else(|| GenerationError::generator("float", "range produced a non-finite value"))
    }
}

struct BooleanGenerator;

impl Generator for BooleanGenerator {
    fn id(&self) -> &'static str {
        "boolean"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, BOOLEAN_PARAMS, "boolean")?;
        let probability = params.get_f64("probability").unwrap_or(0.5);
        if !probability.is_finite() {
            return Err(GenerationError::generator(
                "boolean",
                "probability must be a finite number",
            ));
        }
        Ok(Value::Bool(rng.random_bool(probability.clamp(0.0, 1.0))))
    }
}

struct UuidGenerator;

impl Generator for UuidGenerator {
    fn id(&self) -> &'static str {
        "uuid"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        validate_params(params, &[], "uuid")?;
        let mut bytes = [0_u8; 16];
        rng.fill_bytes(&mut bytes);
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Ok(Value::String(uuid::Uuid::from_bytes(bytes).to_string()))
    }
}

/// Counts per field node: `start`, `start + increment`, ...
struct SequenceGenerator;

impl Generator for SequenceGenerator {
    fn id(&self) -> &'static str {
        "sequence"
    }

    fn generate(
        &self,
        ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        _rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, SEQUENCE_PARAMS, "sequence")?;
        let start = params.get_i64("start").unwrap_or(0);
        let increment = params.get_i64("increment").unwrap_or(1);
        let step = i64::try_from(ctx.invocation).unwrap_or(i64::MAX);
        Ok(Value::from(
            start.saturating_add(step.saturating_mul(increment)),
        ))
    }

    fn is_stateful(&self) -> bool {
        true
    }
}

struct StringGenerator;

impl Generator for StringGenerator {
    fn id(&self) -> &'static str {
        "string"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, STRING_PARAMS, "string")?;
        let pattern = match (params.get_str("pattern"), params.get_str("regex")) {
            (Some(_), Some(_)) => {
                return Err(GenerationError::generator(
                    "string",
                    "use either pattern or regex, not both",
                ));
            }
            (pattern, regex) => pattern.or(regex),
        };

        if let Some(pattern) = pattern {
            if params.get("allowedChars").is_some() {
                return Err(GenerationError::generator(
                    "string",
                    "cannot combine pattern with allowedChars",
                ));
            }
            let max_repeat = match params.get_i64("maxRepeat") {
                Some(value) if value > 0 => u32::try_from(value).map_err(|_| {
                    GenerationError::generator("string", "maxRepeat must fit u32")
                })?,
                Some(_) => {
                    return Err(GenerationError::generator("string", "maxRepeat must be > 0"));
                }
                None => DEFAULT_MAX_REPEAT,
            };
            let regex = RandRegex::compile(pattern, max_repeat).map_err(|err| {
                GenerationError::generator("string", format!("invalid regex pattern: {err}"))
            })?;
            let value: String = rng.sample(regex);
            return Ok(Value::String(value));
        }

        let chars: Vec<char> = params
            .get_str("allowedChars")
            .unwrap_or(DEFAULT_CHARSET)
            .chars()
            .collect();
        if chars.is_empty() {
            return Err(GenerationError::generator(
                "string",
                "allowedChars must not be empty",
            ));
        }
        let len = string_length(&params, rng)?;
        let value: String = (0..len)
            .map(|_| chars[rng.random_range(0..chars.len())])
            .collect();
        Ok(Value::String(value))
    }
}

fn string_length(
    params: &ParamMap<'_>,
    rng: &mut dyn rand::RngCore,
) -> Result<usize, GenerationError> {
    let to_len = |value: i64, key: &str| {
        usize::try_from(value)
            .map_err(|_| GenerationError::generator("string", format!("{key} must be >= 0")))
    };
    if let Some(length) = params.get_i64("length") {
        return to_len(length, "length");
    }
    let max = to_len(
        params.get_i64("maxLength").unwrap_or(DEFAULT_MAX_LENGTH),
        "maxLength",
    )?;
    let min = to_len(
        params.get_i64("minLength").unwrap_or(DEFAULT_MIN_LENGTH),
        "minLength",
    )?
    .min(max);
    Ok(rng.random_range(min..=max))
}

struct DateGenerator;

impl DateGenerator {
    fn default_range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default(),
            NaiveDate::from_ymd_opt(2030, 12, 31).unwrap_or_default(),
        )
    }
}

impl Generator for DateGenerator {
    fn id(&self) -> &'static str {
        "date"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, DATE_PARAMS, "date")?;
        let (default_from, default_to) = Self::default_range();
        let from = params
            .get_str("from")
            .and_then(parse_date_value)
            .unwrap_or(default_from);
        let to = params
            .get_str("to")
            .and_then(parse_date_value)
            .unwrap_or(default_to);
        if from > to {
            return Err(GenerationError::generator("date", "from must be <= to"));
        }
        let span = (to - from).num_days();
        let date = from + Duration::days(rng.random_range(0..=span));
        format_date(date, params.get_str("format")).map(Value::String)
    }
}

fn format_date(date: NaiveDate, format: Option<&str>) -> Result<String, GenerationError> {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let formatted = match format.map(str::to_ascii_lowercase).as_deref() {
        None | Some("iso") => date.to_string(),
        Some("iso_datetime") => midnight.format("%Y-%m-%dT%H:%M:%S").to_string(),
        Some("epoch") => midnight.and_utc().timestamp().to_string(),
        Some("timestamp") => midnight.and_utc().timestamp_millis().to_string(),
        Some(_) => {
            let pattern = format.unwrap_or_default();
            let mut out = String::new();
            write!(out, "{}", date.format(pattern)).map_err(|_| {
                GenerationError::generator("date", format!("invalid date format '{pattern}'"))
            })?;
            out
        }
    };
    Ok(formatted)
}

struct LoremGenerator;

impl Generator for LoremGenerator {
    fn id(&self) -> &'static str {
        "lorem"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let params = validate_params(params, LOREM_PARAMS, "lorem")?;
        let count = |key: &str, default: i64| params.get_i64(key).unwrap_or(default).max(1) as usize;

        let text = if params.get("paragraphs").is_some() {
            (0..count("paragraphs", 1))
                .map(|_| paragraph(rng))
                .collect::<Vec<_>>()
                .join("\n\n")
        } else if params.get("sentences").is_some() {
            (0..count("sentences", 1))
                .map(|_| sentence(rng))
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            words(rng, count("words", DEFAULT_LOREM_WORDS))
        };
        Ok(Value::String(text))
    }
}

fn words(rng: &mut dyn rand::RngCore, count: usize) -> String {
    let mut value = String::new();
    for idx in 0..count {
        if idx > 0 {
            value.push(' ');
        }
        value.push_str(LOREM_WORDS[rng.random_range(0..LOREM_WORDS.len())]);
    }
    value
}

fn sentence(rng: &mut dyn rand::RngCore) -> String {
    let len = rng.random_range(SENTENCE_WORDS.0..=SENTENCE_WORDS.1);
    let text = words(rng, len);
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}.", first.to_ascii_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

fn paragraph(rng: &mut dyn rand::RngCore) -> String {
    let len = rng.random_range(PARAGRAPH_SENTENCES.0..=PARAGRAPH_SENTENCES.1);
    (0..len).map(|_| sentence(rng)).collect::<Vec<_>>().join(" ")
}

const LOREM_WORDS: &[&str] = &[
    "lorem",
    "ipsum",
    "dolor",
    "sit",
    "amet",
    "consectetur",
    "adipiscing",
    "elit",
    "sed",
    "do",
    "eiusmod",
    "tempor",
    "incididunt",
    "ut",
    "labore",
    "et",
    "dolore",
    "magna",
    "aliqua",
];

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    use super::*;

    fn run(generator: &dyn Generator, params: Value, invocation: u64) -> Value {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut ctx = GeneratorContext {
            field: "f",
            invocation,
        };
        let params = (!params.is_null()).then_some(params);
        generator
            .generate(&mut ctx, params.as_ref(), &mut rng)
            .expect("generate")
    }

    #[test]
    fn number_respects_bounds() {
        for seed in 0..50 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut ctx = GeneratorContext {
                field: "n",
                invocation: 0,
            };
            let params = json!({"min": 3, "max": 5});
            let value = NumberGenerator
                .generate(&mut ctx, Some(&params), &mut rng)
                .expect("number");
            let value = value.as_i64().expect("integer");
            assert!((3..=5).contains(&value));
        }
    }

    #[test]
    fn number_rejects_inverted_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = GeneratorContext {
            field: "n",
            invocation: 0,
        };
        let params = json!({"min": 9, "max": 1});
        assert!(NumberGenerator.generate(&mut ctx, Some(&params), &mut rng).is_err());
    }

    #[test]
    fn float_rounds_to_decimals() {
        let value = run(&FloatGenerator, json!({"min": 1, "max": 2, "decimals": 1}), 0);
        let value = value.as_f64().expect("float");
        assert!((1.0..=2.0).contains(&value));
        assert_eq!((value * 10.0).round() / 10.0, value);
    }

    #[test]
    fn sequence_follows_invocation() {
        let params = json!({"start": 10, "increment": 5});
        assert_eq!(run(&SequenceGenerator, params.clone(), 0), json!(10));
        assert_eq!(run(&SequenceGenerator, params, 3), json!(25));
    }

    #[test]
    fn string_honours_length_and_charset() {
        let value = run(&StringGenerator, json!({"length": 8, "allowedChars": "ab"}), 0);
        let value = value.as_str().expect("string");
        assert_eq!(value.len(), 8);
        assert!(value.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn string_pattern_uses_regex() {
        let value = run(&StringGenerator, json!({"pattern": "[A-Z]{3}-[0-9]{2}"}), 0);
        let value = value.as_str().expect("string");
        assert_eq!(value.len(), 6);
        assert_eq!(&value[3..4], "-");
    }

    #[test]
    fn date_stays_in_range_and_formats() {
        let value = run(
            &DateGenerator,
            json!({"from": "2024-01-01", "to": "2024-01-31"}),
            0,
        );
        let date = parse_date_value(value.as_str().expect("date")).expect("iso date");
        assert!(date >= NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"));
        assert!(date <= NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"));

        let value = run(
            &DateGenerator,
            json!({"from": "2024-01-01", "to": "2024-01-01", "format": "%d/%m/%Y"}),
            0,
        );
        assert_eq!(value, json!("01/01/2024"));

        let value = run(
            &DateGenerator,
            json!({"from": "1970-01-02", "to": "1970-01-02", "format": "epoch"}),
            0,
        );
        assert_eq!(value, json!("86400"));
    }

    #[test]
    fn lorem_counts_words() {
        let value = run(&LoremGenerator, json!({"words": 4}), 0);
        assert_eq!(value.as_str().expect("text").split(' ').count(), 4);
    }

    #[test]
    fn uuid_is_version_four() {
        let value = run(&UuidGenerator, Value::Null, 0);
        let parsed = uuid::Uuid::parse_str(value.as_str().expect("uuid")).expect("valid uuid");
        assert_eq!(parsed.get_version_num(), 4);
    }
}
