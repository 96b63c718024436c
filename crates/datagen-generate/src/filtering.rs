//! Value comparison used by exclusion filters and conditional references,
//! plus the bounded retry loop for generators without native filtering.

use std::cmp::Ordering;

use serde_json::Value;

use datagen_core::ComparisonOperator;

/// Tolerance for numeric equality in conditions.
pub const NUMERIC_TOLERANCE: f64 = 1e-4;

/// Result of [`retry_filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome<T> {
    Accepted { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> FilterOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            FilterOutcome::Accepted { attempts, .. } | FilterOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }
}

/// Draw with `produce` until `reject` accepts a value or `max_attempts`
/// draws were made.
pub fn retry_filter<T, E, P, R>(
    max_attempts: u32,
    mut produce: P,
    mut reject: R,
) -> Result<FilterOutcome<T>, E>
where
    P: FnMut() -> Result<T, E>,
    R: FnMut(&T) -> bool,
{
    let mut attempts = 0;
    while attempts < max_attempts {
        attempts += 1;
        let value = produce()?;
        if !reject(&value) {
            return Ok(FilterOutcome::Accepted { value, attempts });
        }
    }
    Ok(FilterOutcome::Exhausted { attempts })
}

/// Equality for exclusion lists. Numbers compare by value across integer
/// and float representations.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

pub fn is_excluded(value: &Value, filter: &[Value]) -> bool {
    filter.iter().any(|excluded| values_equal(value, excluded))
}

/// Decide one comparison of a conditional reference. `field` is the value
/// read from the candidate item, `None` when the path is missing.
pub fn compare(field: Option<&Value>, operator: ComparisonOperator, expected: &Value) -> bool {
    let field = field.unwrap_or(&Value::Null);

    match (field, expected) {
        (Value::Null, Value::Null) => return matches_equality(operator, true),
        (Value::Null, _) | (_, Value::Null) => return operator == ComparisonOperator::NotEqual,
        _ => {}
    }

    match (field, expected) {
        (Value::String(a), Value::String(b)) => matches_ordering(operator, a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) if (a - b).abs() < NUMERIC_TOLERANCE => {
                matches_ordering(operator, Ordering::Equal)
            }
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .is_some_and(|ordering| matches_ordering(operator, ordering)),
            _ => false,
        },
        (Value::Bool(a), Value::Bool(b)) => matches_equality(operator, a == b),
        _ => operator == ComparisonOperator::NotEqual,
    }
}

fn matches_equality(operator: ComparisonOperator, equal: bool) -> bool {
    match operator {
        ComparisonOperator::Equal => equal,
        ComparisonOperator::NotEqual => !equal,
        _ => false,
    }
}

fn matches_ordering(operator: ComparisonOperator, ordering: Ordering) -> bool {
    match operator {
        ComparisonOperator::Equal => ordering == Ordering::Equal,
        ComparisonOperator::NotEqual => ordering != Ordering::Equal,
        ComparisonOperator::Less => ordering == Ordering::Less,
        ComparisonOperator::LessOrEqual => ordering != Ordering::Greater,
        ComparisonOperator::Greater => ordering == Ordering::Greater,
        ComparisonOperator::GreaterOrEqual => ordering != Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use ComparisonOperator::*;

    #[test]
    fn retry_stops_at_first_accepted_value() {
        let mut next = 0;
        let outcome = retry_filter::<_, (), _, _>(
            10,
            || {
                next += 1;
                Ok(next)
            },
            |value| *value < 3,
        )
        .expect("no error");
        assert_eq!(outcome, FilterOutcome::Accepted { value: 3, attempts: 3 });
    }

    #[test]
    fn retry_exhausts_after_exactly_max_attempts() {
        let mut calls = 0;
        let outcome = retry_filter::<i32, (), _, _>(
            7,
            || {
                calls += 1;
                Ok(1)
            },
            |_| true,
        )
        .expect("no error");
        assert_eq!(outcome, FilterOutcome::Exhausted { attempts: 7 });
        assert_eq!(calls, 7);
    }

    #[test]
    fn exclusion_equality_ignores_number_representation() {
        assert!(values_equal(&json!(2), &json!(2.0)));
        assert!(!values_equal(&json!("2"), &json!(2)));
        assert!(is_excluded(&json!({"a": 1}), &[json!(null), json!({"a": 1})]));
    }

    #[test]
    fn null_only_equals_null() {
        assert!(compare(None, Equal, &Value::Null));
        assert!(compare(Some(&Value::Null), Equal, &Value::Null));
        assert!(!compare(None, Equal, &json!("x")));
        assert!(compare(None, NotEqual, &json!("x")));
        assert!(!compare(Some(&Value::Null), Less, &json!(1)));
    }

    #[test]
    fn numbers_use_tolerance_and_order() {
        assert!(compare(Some(&json!(1.00001)), Equal, &json!(1)));
        assert!(compare(Some(&json!(18)), GreaterOrEqual, &json!(18)));
        assert!(!compare(Some(&json!(17)), GreaterOrEqual, &json!(18)));
        assert!(compare(Some(&json!(2.5)), Less, &json!(3)));
    }

    #[test]
    fn strings_compare_lexically() {
        assert!(compare(Some(&json!("apple")), Less, &json!("banana")));
        assert!(compare(Some(&json!("active")), Equal, &json!("active")));
    }

    #[test]
    fn booleans_and_mixed_types() {
        assert!(compare(Some(&json!(true)), Equal, &json!(true)));
        assert!(!compare(Some(&json!(true)), Greater, &json!(false)));
        assert!(!compare(Some(&json!("1")), Equal, &json!(1)));
        assert!(compare(Some(&json!("1")), NotEqual, &json!(1)));
    }
}
