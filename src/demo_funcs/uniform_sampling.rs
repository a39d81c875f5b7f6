//! A uniform-random-sample generator, grounded on
//! `uniform_random_sample` in the historical reference system's bundled
//! generator functions: draw `batch_size` points uniformly from a
//! user-declared box `[lb, ub]` and emit them as the `x` field.

use std::collections::HashMap;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::error::{EnsembleError, EnsembleResult};
use crate::history::FieldValue;

/// `user` must be a JSON object with `"lb"` and `"ub"` arrays of equal,
/// nonzero length (the box bounds); `batch_size` points are drawn
/// independently per call.
pub fn uniform_sample_batch(
    user: &serde_json::Value,
    batch_size: usize,
    rng: &mut impl Rng,
) -> EnsembleResult<Vec<HashMap<String, FieldValue>>> {
    let lb = read_bounds(user, "lb")?;
    let ub = read_bounds(user, "ub")?;
    if lb.len() != ub.len() || lb.is_empty() {
        return Err(EnsembleError::Config(
            "uniform_sample_batch requires lb/ub of equal, nonzero length".into(),
        ));
    }

    let dists: Vec<Uniform<f64>> = lb
        .iter()
        .zip(ub.iter())
        .map(|(&l, &u)| Uniform::new_inclusive(l, u))
        .collect();

    let mut rows = Vec::with_capacity(batch_size);
    for _ in 0..batch_size {
        let x: Vec<f64> = dists.iter().map(|d| d.sample(rng)).collect();
        let mut row = HashMap::new();
        row.insert("x".to_string(), FieldValue::F64Vec(x));
        rows.push(row);
    }
    Ok(rows)
}

fn read_bounds(user: &serde_json::Value, key: &str) -> EnsembleResult<Vec<f64>> {
    user.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
        .ok_or_else(|| EnsembleError::MissingSpecKey(format!("gen_specs.user.{key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn draws_points_within_bounds() {
        let user = serde_json::json!({ "lb": [0.0, -1.0], "ub": [1.0, 1.0] });
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let rows = uniform_sample_batch(&user, 5, &mut rng).unwrap();
        assert_eq!(rows.len(), 5);
        for row in &rows {
            let FieldValue::F64Vec(x) = row.get("x").unwrap() else {
                panic!("expected F64Vec");
            };
            assert!(x[0] >= 0.0 && x[0] <= 1.0);
            assert!(x[1] >= -1.0 && x[1] <= 1.0);
        }
    }

    #[test]
    fn missing_bounds_is_a_config_error() {
        let user = serde_json::json!({ "lb": [0.0] });
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        assert!(uniform_sample_batch(&user, 1, &mut rng).is_err());
    }

    #[test]
    fn mismatched_bound_lengths_is_a_config_error() {
        let user = serde_json::json!({ "lb": [0.0, 0.0], "ub": [1.0] });
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        assert!(uniform_sample_batch(&user, 1, &mut rng).is_err());
    }
}
