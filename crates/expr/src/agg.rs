//! Aggregate functions and their accumulators.

use common::{DbError, DbResult};
use std::fmt;
use types::{ArithOp, SqlType, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AggKind {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggKind {
    /// Parse an aggregate call by name. `COUNT(*)` arrives with `star`.
    pub fn parse(name: &str, star: bool) -> Option<AggKind> {
        match (name, star) {
            ("count", true) => Some(AggKind::CountStar),
            ("count", false) => Some(AggKind::Count),
            ("sum", false) => Some(AggKind::Sum),
            ("min", false) => Some(AggKind::Min),
            ("max", false) => Some(AggKind::Max),
            ("avg", false) => Some(AggKind::Avg),
            _ => None,
        }
    }

    /// Result type given the argument type (checked by the binder).
    pub fn result_type(&self, arg: Option<SqlType>) -> DbResult<SqlType> {
        match self {
            AggKind::CountStar | AggKind::Count => Ok(SqlType::Int),
            AggKind::Sum => match arg {
                Some(t) if t.is_numeric() => Ok(t),
                other => Err(DbError::TypeMismatch(format!(
                    "sum() needs a numeric argument, got {other:?}"
                ))),
            },
            AggKind::Avg => match arg {
                Some(t) if t.is_numeric() => Ok(SqlType::Double),
                other => Err(DbError::TypeMismatch(format!(
                    "avg() needs a numeric argument, got {other:?}"
                ))),
            },
            AggKind::Min | AggKind::Max => {
                arg.ok_or_else(|| DbError::TypeMismatch("min/max need an argument".into()))
            }
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggKind::CountStar | AggKind::Count => "count",
            AggKind::Sum => "sum",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::Avg => "avg",
        };
        write!(f, "{s}")
    }
}

/// Running state for one aggregate in one group. `avg` keeps `(sum, n)` and
/// divides at finish; nulls are ignored everywhere except `count(*)`.
#[derive(Clone, Debug)]
pub struct AggAcc {
    kind: AggKind,
    acc: Value,
    count: i64,
}

impl AggAcc {
    pub fn new(kind: AggKind) -> Self {
        Self {
            kind,
            acc: Value::Null,
            count: 0,
        }
    }

    pub fn accumulate(&mut self, v: &Value) -> DbResult<()> {
        match self.kind {
            AggKind::CountStar => {
                self.count += 1;
            }
            AggKind::Count => {
                if !v.is_null() {
                    self.count += 1;
                }
            }
            AggKind::Sum | AggKind::Avg => {
                if !v.is_null() {
                    self.count += 1;
                    self.acc = if self.acc.is_null() {
                        v.clone()
                    } else {
                        Value::arith(ArithOp::Add, &self.acc, v)
                            .map_err(|_| DbError::Eval("non-numeric input to sum/avg".into()))?
                    };
                }
            }
            AggKind::Min => {
                if !v.is_null() && (self.acc.is_null() || is_less(v, &self.acc)) {
                    self.acc = v.clone();
                }
            }
            AggKind::Max => {
                if !v.is_null() && (self.acc.is_null() || is_less(&self.acc, v)) {
                    self.acc = v.clone();
                }
            }
        }
        Ok(())
    }

    pub fn finish(&self) -> Value {
        match self.kind {
            AggKind::CountStar | AggKind::Count => Value::Int(self.count),
            AggKind::Sum | AggKind::Min | AggKind::Max => self.acc.clone(),
            AggKind::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    match Value::arith(ArithOp::Div, &self.acc, &Value::double(self.count as f64))
                    {
                        Ok(v) => v,
                        Err(_) => Value::Null,
                    }
                }
            }
        }
    }
}

fn is_less(a: &Value, b: &Value) -> bool {
    matches!(a.cmp_values(b), Some(std::cmp::Ordering::Less))
}
