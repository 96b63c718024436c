use rand::Rng;
use serde_json::Value;

use crate::errors::GenerationError;
use crate::filtering::is_excluded;
use crate::generators::{Generator, GeneratorContext, GeneratorRegistry};
use crate::params::{ParamKind, ParamSpec, validate_params};

const CHOICE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("options", ParamKind::Array, true),
    ParamSpec::new("weights", ParamKind::Array, false),
];

pub fn register(registry: &mut GeneratorRegistry) {
    registry.register_generator(Box::new(ChoiceGenerator));
}

/// Picks one of `options`, uniformly or by `weights`. Filters natively by
/// dropping excluded options before drawing.
pub struct ChoiceGenerator;

impl ChoiceGenerator {
    fn candidates(params: Option<&Value>) -> Result<Vec<(Value, f64)>, GenerationError> {
        let params = validate_params(params, CHOICE_PARAMS, "choice")?;
        let options = params.get_array("options").map(Vec::as_slice).unwrap_or_default();
        if options.is_empty() {
            return Err(GenerationError::generator(
                "choice",
                "options must be a non-empty array",
            ));
        }

        let weights = match params.get_array("weights") {
            None => vec![1.0; options.len()],
            Some(weights) if weights.len() != options.len() => {
                return Err(GenerationError::generator(
                    "choice",
                    "weights must have the same length as options",
                ));
            }
            Some(weights) => weights
                .iter()
                .map(|weight| {
                    weight
                        .as_f64()
                        .filter(|weight| *weight > 0.0 && weight.is_finite())
                        .ok_or_else(|| {
                            GenerationError::generator("choice", "weights must be positive numbers")
                        })
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(options.iter().cloned().zip(weights).collect())
    }
}

impl Generator for ChoiceGenerator {
    fn id(&self) -> &'static str {
        "choice"
    }

    fn generate(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        rng: &mut dyn rand::RngCore,
    ) -> Result<Value, GenerationError> {
        let candidates = Self::candidates(params)?;
        Ok(pick_weighted(candidates, rng).unwrap_or(Value::Null))
    }

    fn supports_filtering(&self) -> bool {
        true
    }

    fn generate_with_filter(
        &self,
        _ctx: &mut GeneratorContext<'_>,
        params: Option<&Value>,
        filter: &[Value],
        rng: &mut dyn rand::RngCore,
    ) -> Result<Option<Value>, GenerationError> {
        let candidates = Self::candidates(params)?
            .into_iter()
            .filter(|(option, _)| !is_excluded(option, filter))
            .collect();
        Ok(pick_weighted(candidates, rng))
    }
}

/// Draw one value proportionally to its weight.
pub(crate) fn pick_weighted(
    mut candidates: Vec<(Value, f64)>,
    rng: &mut dyn rand::RngCore,
) -> Option<Value> {
    let weights: Vec<f64> = candidates.iter().map(|(_, weight)| *weight).collect();
    let index = weighted_index(&weights, rng)?;
    Some(candidates.swap_remove(index).0)
}

/// Index drawn proportionally to `weights`. `None` when nothing has
/// positive weight.
pub(crate) fn weighted_index(weights: &[f64], rng: &mut dyn rand::RngCore) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || total <= 0.0 {
        return None;
    }
    let mut target = rng.random::<f64>() * total;
    let last = weights.len() - 1;
    for (index, weight) in weights.iter().enumerate() {
        if target < *weight || index == last {
            return Some(index);
        }
        target -= weight;
    }
    None
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    use super::*;

    fn ctx() -> GeneratorContext<'static> {
        GeneratorContext {
            field: "status",
            invocation: 0,
        }
    }

    #[test]
    fn native_filter_never_returns_excluded_options() {
        let params = json!({"options": ["a", "b", "c"]});
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..50 {
            let value = ChoiceGenerator
                .generate_with_filter(&mut ctx(), Some(&params), &[json!("a"), json!("c")], &mut rng)
                .expect("choice");
            assert_eq!(value, Some(json!("b")));
        }
    }

    #[test]
    fn filtering_every_option_yields_none() {
        let params = json!({"options": [1, 2]});
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let value = ChoiceGenerator
            .generate_with_filter(&mut ctx(), Some(&params), &[json!(1), json!(2.0)], &mut rng)
            .expect("choice");
        assert_eq!(value, None);
    }

    #[test]
    fn weights_bias_the_draw() {
        let params = json!({"options": ["common", "rare"], "weights": [9, 1]});
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let common = (0..1000)
            .filter(|_| {
                ChoiceGenerator
                    .generate(&mut ctx(), Some(&params), &mut rng)
                    .expect("choice")
                    == json!("common")
            })
            .count();
        assert!(common > 800, "common drawn {common} times");
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let params = json!({"options": ["a", "b"], "weights": [1]});
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(ChoiceGenerator.generate(&mut ctx(), Some(&params), &mut rng).is_err());
    }
}
