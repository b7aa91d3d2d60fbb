//! Row-shape helpers for result assertions.

use common::Row;
use database::QueryResult;

/// Flatten a result's rows into integer vectors; panics on non-integers.
pub fn int_rows(result: &QueryResult) -> Vec<Vec<i64>> {
    rows_to_ints(result.rows())
}

/// Like [`int_rows`] but sorted, for order-insensitive comparisons.
pub fn sorted_int_rows(result: &QueryResult) -> Vec<Vec<i64>> {
    let mut rows = rows_to_ints(result.rows());
    rows.sort();
    rows
}

fn rows_to_ints(rows: &[Row]) -> Vec<Vec<i64>> {
    rows.iter()
        .map(|r| {
            r.values
                .iter()
                .map(|v| v.as_int().unwrap_or_else(|| panic!("non-integer value {v}")))
                .collect()
        })
        .collect()
}
