//! A minimal simulator: evaluates a separable quadratic over the point `x`
//! into the scalar output `f`. Standard placeholder workload shape used
//! across the bundled sim functions of the historical reference system's
//! example suite — real deployments supply their own.

use indexmap::IndexMap;

use crate::error::{EnsembleError, EnsembleResult};
use crate::history::{Column, FieldValue, HistorySlice};

pub fn quadratic_sim(input: &HistorySlice) -> EnsembleResult<HistorySlice> {
    let x_column = input
        .columns
        .get("x")
        .ok_or_else(|| EnsembleError::UnknownField("x".into()))?;
    let Column::F64Vec(points) = x_column else {
        return Err(EnsembleError::ColumnTypeMismatch("x".into()));
    };

    let f: Vec<f64> = points
        .iter()
        .map(|x| x.iter().map(|v| v * v).sum())
        .collect();

    let mut columns = IndexMap::new();
    columns.insert("f".to_string(), Column::F64(f));
    Ok(HistorySlice::new(input.rows.clone(), columns))
}

/// Convenience used by reference code that builds one point at a time.
pub fn quadratic_value(x: &[f64]) -> FieldValue {
    FieldValue::F64(x.iter().map(|v| v * v).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_sum_of_squares() {
        let mut columns = IndexMap::new();
        columns.insert(
            "x".to_string(),
            Column::F64Vec(vec![vec![1.0, 2.0], vec![0.0, 0.0]]),
        );
        let input = HistorySlice::new(vec![0, 1], columns);
        let out = quadratic_sim(&input).unwrap();
        let Column::F64(f) = out.columns.get("f").unwrap() else {
            panic!("expected F64 column");
        };
        assert_eq!(f, &vec![5.0, 0.0]);
    }

    #[test]
    fn missing_x_column_is_an_error() {
        let input = HistorySlice::new(vec![0], IndexMap::new());
        assert!(quadratic_sim(&input).is_err());
    }
}
