//! Bracket predicates used by conditional references, e.g.
//! `users[status='active' and age>=18].id`.

use std::fmt;

use serde_json::{Number, Value};

use crate::keywords::SHADOW_PREFIX;

/// Comparison operators, listed longest first so `<=` wins over `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    LessOrEqual,
    GreaterOrEqual,
    NotEqual,
    Less,
    Greater,
    Equal,
}

impl ComparisonOperator {
    const ALL: [ComparisonOperator; 6] = [
        ComparisonOperator::LessOrEqual,
        ComparisonOperator::GreaterOrEqual,
        ComparisonOperator::NotEqual,
        ComparisonOperator::Less,
        ComparisonOperator::Greater,
        ComparisonOperator::Equal,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::Less => "<",
            ComparisonOperator::Greater => ">",
            ComparisonOperator::Equal => "=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn keyword(self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Literal(Value),
    /// `$binding` or `$binding.path`, read from the current item.
    Binding { name: String, path: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub path: String,
    pub operator: ComparisonOperator,
    pub value: ConditionValue,
}

/// A single comparison or a chain folded strictly left to right.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison(Comparison),
    Logical {
        first: Comparison,
        rest: Vec<(LogicalOperator, Comparison)>,
    },
}

impl Condition {
    /// Every comparison in source order.
    pub fn comparisons(&self) -> Vec<&Comparison> {
        match self {
            Condition::Comparison(comparison) => vec![comparison],
            Condition::Logical { first, rest } => std::iter::once(first)
                .chain(rest.iter().map(|(_, comparison)| comparison))
                .collect(),
        }
    }

    /// Field paths of the candidate item read by this condition.
    pub fn referenced_paths(&self) -> Vec<&str> {
        self.comparisons()
            .into_iter()
            .map(|comparison| comparison.path.as_str())
            .collect()
    }

    /// Shadow bindings read by this condition.
    pub fn bindings(&self) -> Vec<&str> {
        self.comparisons()
            .into_iter()
            .filter_map(|comparison| match &comparison.value {
                ConditionValue::Binding { name, .. } => Some(name.as_str()),
                ConditionValue::Literal(_) => None,
            })
            .collect()
    }

    /// Evaluate with `test` deciding each comparison. `a and b or c` is
    /// `(a and b) or c`; there is no precedence between `and` and `or`.
    pub fn evaluate<F>(&self, mut test: F) -> bool
    where
        F: FnMut(&Comparison) -> bool,
    {
        match self {
            Condition::Comparison(comparison) => test(comparison),
            Condition::Logical { first, rest } => {
                let mut acc = test(first);
                for (operator, comparison) in rest {
                    acc = match operator {
                        LogicalOperator::And => acc && test(comparison),
                        LogicalOperator::Or => acc || test(comparison),
                    };
                }
                acc
            }
        }
    }

    /// Same as [`Condition::evaluate`] for fallible tests.
    pub fn try_evaluate<F, E>(&self, mut test: F) -> Result<bool, E>
    where
        F: FnMut(&Comparison) -> Result<bool, E>,
    {
        match self {
            Condition::Comparison(comparison) => test(comparison),
            Condition::Logical { first, rest } => {
                let mut acc = test(first)?;
                for (operator, comparison) in rest {
                    acc = match operator {
                        LogicalOperator::And => acc && test(comparison)?,
                        LogicalOperator::Or => acc || test(comparison)?,
                    };
                }
                Ok(acc)
            }
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path, self.operator.symbol())?;
        match &self.value {
            ConditionValue::Literal(Value::String(text)) => write!(f, "'{text}'"),
            ConditionValue::Literal(value) => write!(f, "{value}"),
            ConditionValue::Binding { name, path: None } => write!(f, "${name}"),
            ConditionValue::Binding {
                name,
                path: Some(path),
            } => write!(f, "${name}.{path}"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Comparison(comparison) => write!(f, "{comparison}"),
            Condition::Logical { first, rest } => {
                write!(f, "{first}")?;
                for (operator, comparison) in rest {
                    write!(f, " {} {comparison}", operator.keyword())?;
                }
                Ok(())
            }
        }
    }
}

/// Parse the text between the brackets of a conditional reference.
pub fn parse_condition(input: &str) -> Result<Condition, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty condition".to_string());
    }

    let (parts, operators) = split_logical(input)?;
    let mut comparisons = parts
        .into_iter()
        .map(parse_comparison)
        .collect::<Result<Vec<_>, _>>()?;

    if operators.is_empty() {
        return Ok(Condition::Comparison(comparisons.remove(0)));
    }

    let first = comparisons.remove(0);
    let rest = operators.into_iter().zip(comparisons).collect();
    Ok(Condition::Logical { first, rest })
}

fn split_logical(input: &str) -> Result<(Vec<&str>, Vec<LogicalOperator>), String> {
    let mut parts = Vec::new();
    let mut operators = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut word_start: Option<usize> = None;

    let mut flush_word = |word_start: usize,
                          word_end: usize,
                          start: &mut usize|
     -> Result<(), String> {
        let word = &input[word_start..word_end];
        let operator = match word {
            "and" => LogicalOperator::And,
            "or" => LogicalOperator::Or,
            other
                if other.eq_ignore_ascii_case("and") || other.eq_ignore_ascii_case("or") =>
            {
                return Err("logical operators must be lowercase".to_string());
            }
            _ => return Ok(()),
        };
        let part = input[*start..word_start].trim();
        if part.is_empty() {
            return Err(format!("missing comparison before '{}'", operator.keyword()));
        }
        parts.push(part);
        operators.push(operator);
        *start = word_end;
        Ok(())
    };

    for (idx, ch) in input.char_indices() {
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            continue;
        }
        if ch == '\'' || ch == '"' {
            quote = Some(ch);
            word_start = None;
            continue;
        }
        if ch.is_whitespace() {
            if let Some(begin) = word_start.take() {
                flush_word(begin, idx, &mut start)?;
            }
            continue;
        }
        if word_start.is_none() {
            let preceded_by_space = input[..idx]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace);
            if preceded_by_space {
                word_start = Some(idx);
            }
        } else if !ch.is_ascii_alphabetic() {
            word_start = None;
        }
    }

    if quote.is_some() {
        return Err("unterminated quoted value".to_string());
    }

    let last = input[start..].trim();
    if last.is_empty() {
        return Err("condition ends with a logical operator".to_string());
    }
    parts.push(last);
    Ok((parts, operators))
}

fn parse_comparison(part: &str) -> Result<Comparison, String> {
    let (position, operator) =
        find_operator(part).ok_or_else(|| format!("missing comparison operator in '{part}'"))?;

    let path = part[..position].trim();
    if path.is_empty() {
        return Err(format!("missing field name in '{part}'"));
    }
    if path
        .chars()
        .any(|ch| ch.is_whitespace() || ch == '\'' || ch == '"')
    {
        return Err(format!("invalid field name '{path}'"));
    }

    let raw_value = part[position + operator.symbol().len()..].trim();
    let value = parse_value(raw_value).map_err(|reason| format!("{reason} in '{part}'"))?;

    Ok(Comparison {
        path: path.to_string(),
        operator,
        value,
    })
}

fn find_operator(part: &str) -> Option<(usize, ComparisonOperator)> {
    let mut quote: Option<char> = None;
    for (idx, ch) in part.char_indices() {
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            continue;
        }
        if ch == '\'' || ch == '"' {
            quote = Some(ch);
            continue;
        }
        let rest = &part[idx..];
        if let Some(operator) = ComparisonOperator::ALL
            .into_iter()
            .find(|operator| rest.starts_with(operator.symbol()))
        {
            return Some((idx, operator));
        }
    }
    None
}

fn parse_value(raw: &str) -> Result<ConditionValue, String> {
    if raw.is_empty() {
        return Err("missing value".to_string());
    }

    for quote in ['\'', '"'] {
        if raw.starts_with(quote) {
            if raw.len() < 2 || !raw.ends_with(quote) {
                return Err(format!("unterminated string {raw}"));
            }
            let inner = &raw[1..raw.len() - 1];
            return Ok(ConditionValue::Literal(Value::String(inner.to_string())));
        }
    }

    if let Some(binding) = raw.strip_prefix(SHADOW_PREFIX) {
        let (name, path) = match binding.split_once('.') {
            Some((name, path)) => (name, Some(path.to_string())),
            None => (binding, None),
        };
        if name.is_empty() || path.as_deref().is_some_and(str::is_empty) {
            return Err(format!("invalid binding reference '{raw}'"));
        }
        return Ok(ConditionValue::Binding {
            name: name.to_string(),
            path,
        });
    }

    match raw {
        "null" => return Ok(ConditionValue::Literal(Value::Null)),
        "true" => return Ok(ConditionValue::Literal(Value::Bool(true))),
        "false" => return Ok(ConditionValue::Literal(Value::Bool(false))),
        _ => {}
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Ok(ConditionValue::Literal(Value::Number(int.into())));
    }
    if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Ok(ConditionValue::Literal(Value::Number(number)));
    }

    Err(format!("invalid value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_longest_operator_first() {
        let condition = parse_condition("age<=30").expect("parse");
        let Condition::Comparison(comparison) = condition else {
            panic!("expected single comparison");
        };
        assert_eq!(comparison.path, "age");
        assert_eq!(comparison.operator, ComparisonOperator::LessOrEqual);
        assert_eq!(comparison.value, ConditionValue::Literal(json!(30)));
    }

    #[test]
    fn operator_inside_quotes_is_ignored() {
        let condition = parse_condition("label='a=b' and x!=null").expect("parse");
        let comparisons = condition.comparisons();
        assert_eq!(comparisons.len(), 2);
        assert_eq!(comparisons[0].value, ConditionValue::Literal(json!("a=b")));
        assert_eq!(comparisons[1].operator, ComparisonOperator::NotEqual);
        assert_eq!(comparisons[1].value, ConditionValue::Literal(Value::Null));
    }

    #[test]
    fn quoted_logical_words_do_not_split() {
        let condition = parse_condition("name='tom and jerry'").expect("parse");
        assert_eq!(condition.comparisons().len(), 1);
    }

    #[test]
    fn uppercase_logical_operators_are_rejected() {
        let err = parse_condition("a=1 AND b=2").expect_err("uppercase");
        assert_eq!(err, "logical operators must be lowercase");
        let err = parse_condition("a=1 Or b=2").expect_err("mixed case");
        assert_eq!(err, "logical operators must be lowercase");
    }

    #[test]
    fn binding_values_are_recognized() {
        let condition = parse_condition("country=$user.country").expect("parse");
        assert_eq!(condition.bindings(), vec!["user"]);
        assert_eq!(condition.to_string(), "country=$user.country");
    }

    #[test]
    fn mixed_chain_folds_left_to_right() {
        let condition = parse_condition("a=1 or b=1 and c=1").expect("parse");
        // (true or false) and false => false; with and-precedence it would be true.
        let result = condition.evaluate(|comparison| comparison.path == "a");
        assert!(!result);

        let condition = parse_condition("a=1 and b=1 or c=1").expect("parse");
        // (false and _) or true => true
        let result = condition.evaluate(|comparison| comparison.path == "c");
        assert!(result);
    }

    #[test]
    fn malformed_comparisons_are_reported() {
        assert!(parse_condition("status").is_err());
        assert!(parse_condition("='x'").is_err());
        assert!(parse_condition("a=").is_err());
        assert!(parse_condition("a='x").is_err());
        assert!(parse_condition("a=1 and").is_err());
    }
}
