//! The four-table demo fixture used across the suites.
//!
//! Tables `a`, `b`, `c`, `d` each carry integer columns `<t>1..<t>4` and the
//! three rows `(0,1,2,3)`, `(1,2,3,4)`, `(2,3,4,5)`.

use database::Database;

/// Create the demo tables on an existing engine through its SQL surface.
pub fn install_demo_tables(db: &mut Database) {
    for t in ["a", "b", "c", "d"] {
        db.run(&format!(
            "CREATE TABLE {t} ({t}1 INT, {t}2 INT, {t}3 INT, {t}4 INT)"
        ))
        .expect("create demo table");
        for base in 0..3 {
            db.run(&format!(
                "INSERT INTO {t} VALUES ({}, {}, {}, {})",
                base,
                base + 1,
                base + 2,
                base + 3
            ))
            .expect("insert demo row");
        }
    }
}

/// A fresh engine with the demo tables installed.
pub fn demo_database() -> Database {
    let mut db = Database::new();
    install_demo_tables(&mut db);
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_tables_have_three_rows_each() {
        let db = demo_database();
        for t in ["a", "b", "c", "d"] {
            assert_eq!(db.catalog().table(t).unwrap().heap.len(), 3);
            assert_eq!(db.catalog().table(t).unwrap().arity(), 4);
        }
    }
}
