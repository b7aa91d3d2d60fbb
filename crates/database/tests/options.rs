//! The enumerated option surface threads through compilation.

use common::{ExplainOptions, QueryOptions};
use pretty_assertions::assert_eq;
use testsupport::prelude::*;

#[test]
fn join_strategy_toggles_change_the_plan() {
    let db = demo_database();
    let eopts = ExplainOptions {
        show_tablename: true,
        ..ExplainOptions::default()
    };
    let sql = "SELECT a1 FROM a JOIN b ON a1 = b1";

    let hash_plan = db.explain(sql, &QueryOptions::default(), &eopts).unwrap();
    assert!(hash_plan.starts_with("HashJoin"));

    let mut opts = QueryOptions::default();
    opts.optimize.enable_hashjoin = false;
    let nl_plan = db.explain(sql, &opts, &eopts).unwrap();
    assert!(nl_plan.starts_with("NLJoin"));
}

#[test]
fn disabling_both_join_strategies_fails_to_plan() {
    let mut db = demo_database();
    let mut opts = QueryOptions::default();
    opts.optimize.enable_hashjoin = false;
    opts.optimize.enable_nljoin = false;
    assert!(db
        .run_with("SELECT a1 FROM a JOIN b ON a1 < b1", &opts)
        .is_err());
}

#[test]
fn pass_through_flags_do_not_change_results() {
    let mut db = demo_database();
    let sql = "SELECT a1 FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b1 = a1)";
    let baseline = sorted_int_rows(&db.run(sql).unwrap());

    // Flags whose machinery lives outside this core parse and thread but
    // select nothing.
    let mut opts = QueryOptions::default();
    opts.optimize.enable_subquery_to_markjoin = true;
    opts.optimize.remove_from = true;
    opts.optimize.enable_indexseek = true;
    opts.optimize.use_codegen = true;
    let flagged = sorted_int_rows(&db.run_with(sql, &opts).unwrap());
    assert_eq!(baseline, flagged);
}

#[test]
fn profile_wraps_plans_when_enabled() {
    let db = demo_database();
    let mut opts = QueryOptions::default();
    opts.profile = true;
    let eopts = ExplainOptions::default();
    let plan = db
        .explain("SELECT a1 FROM a", &opts, &eopts)
        .unwrap();
    assert!(plan.starts_with("Profile"));
}
