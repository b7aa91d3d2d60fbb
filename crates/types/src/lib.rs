use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use ordered_float::OrderedFloat;

/// Days used when normalizing interval literals. Calendar-correct arithmetic
/// is out of scope; callers that need it must adjust.
pub const DAYS_PER_MONTH: i32 = 30;
pub const DAYS_PER_YEAR: i32 = 365;

/// Column types known to the binder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int,
    Double,
    Char(usize),
    Bool,
    Date,
    Interval,
}

impl SqlType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, SqlType::Int | SqlType::Double)
    }

    /// Whether two types may meet in a comparison or arithmetic expression.
    /// Numerics mix freely; `Date` and `Interval` mix with each other;
    /// everything else requires an exact tag match.
    pub fn compatible(&self, other: &SqlType) -> bool {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (SqlType::Char(_), SqlType::Char(_)) => true,
            (SqlType::Date, SqlType::Interval) | (SqlType::Interval, SqlType::Date) => true,
            (a, b) => a == b,
        }
    }

    /// Parse a type name as written in DDL, e.g. `INT`, `CHAR(10)`, `DOUBLE`.
    pub fn parse(name: &str) -> Option<SqlType> {
        let upper = name.trim().to_uppercase();
        match upper.as_str() {
            "INT" | "INTEGER" | "BIGINT" => return Some(SqlType::Int),
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "REAL" | "NUMERIC" => {
                return Some(SqlType::Double)
            }
            "BOOL" | "BOOLEAN" => return Some(SqlType::Bool),
            "DATE" => return Some(SqlType::Date),
            "INTERVAL" => return Some(SqlType::Interval),
            _ => {}
        }
        if let Some(rest) = upper
            .strip_prefix("CHAR(")
            .or_else(|| upper.strip_prefix("VARCHAR("))
        {
            let len = rest.strip_suffix(')')?.trim().parse::<usize>().ok()?;
            return Some(SqlType::Char(len));
        }
        if upper == "CHAR" || upper == "VARCHAR" || upper == "TEXT" {
            return Some(SqlType::Char(64));
        }
        None
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Int => write!(f, "int"),
            SqlType::Double => write!(f, "double"),
            SqlType::Char(n) => write!(f, "char({n})"),
            SqlType::Bool => write!(f, "bool"),
            SqlType::Date => write!(f, "date"),
            SqlType::Interval => write!(f, "interval"),
        }
    }
}

/// Why an arithmetic step failed at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithError {
    Incompatible,
    DivideByZero,
}

/// Arithmetic operators dispatched over the value domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Dynamic scalar domain. `Interval` is a day count (see `DAYS_PER_MONTH`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i64),
    Double(OrderedFloat<f64>),
    Str(String),
    Bool(bool),
    Date(NaiveDate),
    Interval(i32),
    Null,
}

impl Value {
    pub fn double(v: f64) -> Value {
        Value::Double(OrderedFloat(v))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Runtime type tag; `None` for `Null`.
    pub fn ty(&self) -> Option<SqlType> {
        match self {
            Value::Int(_) => Some(SqlType::Int),
            Value::Double(_) => Some(SqlType::Double),
            Value::Str(s) => Some(SqlType::Char(s.len())),
            Value::Bool(_) => Some(SqlType::Bool),
            Value::Date(_) => Some(SqlType::Date),
            Value::Interval(_) => Some(SqlType::Interval),
            Value::Null => None,
        }
    }

    /// Arithmetic with numeric promotion: `Int op Double` lands on `Double`,
    /// `Date ± Interval` on `Date`. `Null` propagates.
    pub fn arith(op: ArithOp, l: &Value, r: &Value) -> Result<Value, ArithError> {
        use Value::*;
        if l.is_null() || r.is_null() {
            return Ok(Null);
        }
        match (l, r) {
            (Int(a), Int(b)) => match op {
                ArithOp::Add => Ok(Int(a + b)),
                ArithOp::Sub => Ok(Int(a - b)),
                ArithOp::Mul => Ok(Int(a * b)),
                ArithOp::Div => {
                    if *b == 0 {
                        Err(ArithError::DivideByZero)
                    } else {
                        Ok(Int(a / b))
                    }
                }
            },
            (Double(_), Int(_)) | (Int(_), Double(_)) | (Double(_), Double(_)) => {
                let a = l.to_f64().unwrap_or(0.0);
                let b = r.to_f64().unwrap_or(0.0);
                match op {
                    ArithOp::Add => Ok(Value::double(a + b)),
                    ArithOp::Sub => Ok(Value::double(a - b)),
                    ArithOp::Mul => Ok(Value::double(a * b)),
                    ArithOp::Div => {
                        if b == 0.0 {
                            Err(ArithError::DivideByZero)
                        } else {
                            Ok(Value::double(a / b))
                        }
                    }
                }
            }
            (Date(d), Interval(days)) => match op {
                ArithOp::Add => Ok(Date(*d + chrono::Duration::days(*days as i64))),
                ArithOp::Sub => Ok(Date(*d - chrono::Duration::days(*days as i64))),
                _ => Err(ArithError::Incompatible),
            },
            (Interval(days), Date(d)) if op == ArithOp::Add => {
                Ok(Date(*d + chrono::Duration::days(*days as i64)))
            }
            (Interval(a), Interval(b)) => match op {
                ArithOp::Add => Ok(Interval(a + b)),
                ArithOp::Sub => Ok(Interval(a - b)),
                _ => Err(ArithError::Incompatible),
            },
            _ => Err(ArithError::Incompatible),
        }
    }

    fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Double(v) => Some(v.0),
            _ => None,
        }
    }

    /// Compare two non-null values, promoting mixed numerics.
    /// `None` means the types are incomparable.
    pub fn cmp_values(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Double(a), Double(b)) => Some(a.cmp(b)),
            (Int(_), Double(_)) | (Double(_), Int(_)) => {
                let a = OrderedFloat(self.to_f64()?);
                let b = OrderedFloat(other.to_f64()?);
                Some(a.cmp(&b))
            }
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Interval(a), Interval(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality under the same promotion rules as `cmp_values`.
    pub fn eq_values(&self, other: &Value) -> Option<bool> {
        self.cmp_values(other).map(|ord| ord == Ordering::Equal)
    }

    /// Total order used by ORDER BY: `Null` sorts first, comparable values
    /// by `cmp_values`, anything else by type tag so the sort stays stable.
    pub fn cmp_for_sort(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        self.cmp_values(other)
            .unwrap_or_else(|| type_rank(self).cmp(&type_rank(other)))
    }

    /// SQL `LIKE` with `%` (any run) and `_` (one char).
    pub fn like(&self, pattern: &Value) -> Option<bool> {
        match (self, pattern) {
            (Value::Str(s), Value::Str(p)) => Some(like_match(
                &s.chars().collect::<Vec<_>>(),
                &p.chars().collect::<Vec<_>>(),
            )),
            _ => None,
        }
    }

    /// Parse a CSV field into the given type. Empty fields become `Null`.
    pub fn parse_as(ty: SqlType, text: &str) -> Option<Value> {
        let text = text.trim();
        if text.is_empty() {
            return Some(Value::Null);
        }
        match ty {
            SqlType::Int => text.parse::<i64>().ok().map(Value::Int),
            SqlType::Double => text.parse::<f64>().ok().map(Value::double),
            SqlType::Char(_) => Some(Value::Str(text.to_string())),
            SqlType::Bool => match text {
                "true" | "t" | "1" => Some(Value::Bool(true)),
                "false" | "f" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            SqlType::Date => parse_date(text).map(Value::Date),
            SqlType::Interval => parse_interval(text).map(Value::Interval),
        }
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 2,
        Value::Double(_) => 3,
        Value::Str(_) => 4,
        Value::Date(_) => 5,
        Value::Interval(_) => 6,
    }
}

/// Parse a `date'…'` literal body, `YYYY-MM-DD`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

/// Parse an `interval'…'` literal body such as `3 days`, `1 month`,
/// `2 years`, normalized to days.
pub fn parse_interval(text: &str) -> Option<i32> {
    let mut parts = text.trim().split_whitespace();
    let n = parts.next()?.parse::<i32>().ok()?;
    let unit = parts.next().unwrap_or("days").to_lowercase();
    if parts.next().is_some() {
        return None;
    }
    let days = match unit.as_str() {
        "day" | "days" => n,
        "month" | "months" => n * DAYS_PER_MONTH,
        "year" | "years" => n * DAYS_PER_YEAR,
        _ => return None,
    };
    Some(days)
}

fn like_match(s: &[char], p: &[char]) -> bool {
    match (p.first(), s.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some('%'), _) => {
            // '%' absorbs zero or more characters.
            like_match(s, &p[1..]) || (!s.is_empty() && like_match(&s[1..], p))
        }
        (Some('_'), Some(_)) => like_match(&s[1..], &p[1..]),
        (Some(pc), Some(sc)) => pc == sc && like_match(&s[1..], &p[1..]),
        (Some(_), None) => false,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{}", v.0),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Interval(days) => write!(f, "{days} days"),
            Value::Null => write!(f, "NULL"),
        }
    }
}
