use super::*;
use std::io::Write;
use types::Value;

#[test]
fn row_concat_appends_right_values() {
    let l = Row::new(vec![Value::Int(1), Value::Int(2)]);
    let r = Row::new(vec![Value::Str("x".into())]);
    let joined = Row::concat(&l, &r);
    assert_eq!(
        joined.values,
        vec![Value::Int(1), Value::Int(2), Value::Str("x".into())]
    );
}

#[test]
fn null_rows_have_requested_width() {
    let row = Row::nulls(4);
    assert_eq!(row.len(), 4);
    assert!(row.values.iter().all(Value::is_null));
}

#[test]
fn read_csv_splits_on_pipe_and_skips_blank_lines() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "1|alice|10").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "2|bob|20|").unwrap(); // trailing delimiter
    file.flush().unwrap();

    let mut seen = Vec::new();
    read_csv(file.path(), '|', |fields| {
        seen.push(fields.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        Ok(())
    })
    .unwrap();

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], vec!["1", "alice", "10"]);
    assert_eq!(seen[1], vec!["2", "bob", "20"]);
}

#[test]
fn read_csv_propagates_callback_errors() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "bad").unwrap();
    file.flush().unwrap();

    let result = read_csv(file.path(), '|', |_| Err(DbError::Eval("boom".into())));
    assert!(matches!(result, Err(DbError::Eval(_))));
}

#[test]
fn default_options_keep_both_join_strategies_on() {
    let opts = QueryOptions::default();
    assert!(opts.optimize.enable_hashjoin);
    assert!(opts.optimize.enable_nljoin);
    assert!(!opts.optimize.use_memo);
    assert!(!opts.profile);
}

#[test]
fn errors_render_their_phase() {
    let err = DbError::AmbiguousColumn("x1".into());
    assert_eq!(err.to_string(), "ambiguous column 'x1'");
    let err = DbError::SubqueryShape(3);
    assert_eq!(err.to_string(), "subquery must return one column, got 3");
}
