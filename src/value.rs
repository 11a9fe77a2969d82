/*!
# Dynamic Value Engine

The loosely-typed value system every other stage of the pipeline is built
on. Documents coming back from the search backend, literals in query text,
and aggregation results all normalize into [`Value`], a closed tagged union
with one variant per supported kind.

The engine reproduces the numeric-tower semantics dashboards depend on:

- integers widen to `Int`/`Uint`, floats widen to `Float`; mixed pairs
  promote pairwise per operator
- a null operand behaves like an additive/multiplicative identity
  (`null + x = x`, `null * x = 0`), so a missing field reads as zero
- division and modulo by a zero-valued divisor yield `Null`, not an error;
  a blank cell must never abort an otherwise-valid row
- strings participate in arithmetic via best-effort numeric parsing
  (except `+`, which concatenates); a non-numeric string in a numeric
  position is a hard error
*/

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{TsqlError, TsqlResult};

/// Binary operators understood by the value engine and the query grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    // logical
    And,
    Or,
    // comparison
    Eq,
    Neq,
    EqRegex,
    NeqRegex,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Operator {
    /// The operator text as written in query source.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::BitAnd => "&",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::EqRegex => "=~",
            Operator::NeqRegex => "!~",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
        }
    }

    /// True for comparison operators (including regex matches).
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::Neq
                | Operator::EqRegex
                | Operator::NeqRegex
                | Operator::Lt
                | Operator::Lte
                | Operator::Gt
                | Operator::Gte
        )
    }

    /// Mirror a comparison so `literal OP field` can be rewritten as
    /// `field OP' literal`.
    pub fn reversed(&self) -> Operator {
        match self {
            Operator::Lt => Operator::Gt,
            Operator::Lte => Operator::Gte,
            Operator::Gt => Operator::Lt,
            Operator::Gte => Operator::Lte,
            other => *other,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically-typed value.
///
/// The variant set is closed: every kind the engine can ever see is listed
/// here, which turns "unsupported operator/kind pair" into an exhaustive
/// match instead of a reflective fallthrough.
#[derive(Debug, Clone)]
pub enum Value {
    /// Missing value; behaves as a zero-like identity in arithmetic.
    Null,
    Bool(bool),
    /// 64-bit signed integer; every signed integer width widens to this.
    Int(i64),
    /// 64-bit unsigned integer; every unsigned width widens to this.
    Uint(u64),
    /// 64-bit float; every float width widens to this.
    Float(f64),
    String(String),
    /// An instant in time.
    Time(DateTime<Utc>),
    /// A span of time in nanoseconds.
    Duration(i64),
    /// A compiled regular expression, shared cheaply between operands.
    Regex(Arc<Regex>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Uint(a), Value::Uint(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::Duration(d) => write!(f, "{}", format_duration_ns(*d)),
            Value::Regex(r) => write!(f, "{}", r.as_str()),
        }
    }
}

impl Value {
    /// The kind name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Time(_) => "time",
            Value::Duration(_) => "duration",
            Value::Regex(_) => "regexp",
        }
    }

    /// True for the int/uint/float family.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Uint(_) | Value::Float(_))
    }

    /// Lossy numeric view used by functions that only care about magnitude.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Uint(u) => Some(*u as f64),
            Value::Float(v) => Some(*v),
            Value::Duration(d) => Some(*d as f64),
            _ => None,
        }
    }

    /// Integer view for timestamps and durations.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            Value::Uint(u) => Some(*u as i64),
            Value::Float(v) => Some(*v as i64),
            Value::Duration(d) => Some(*d),
            Value::Time(t) => t.timestamp_nanos_opt(),
            _ => None,
        }
    }

    /// Build a `Value` from a backend JSON scalar. Arrays and objects have
    /// no scalar counterpart and map to `Null`.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            _ => Value::Null,
        }
    }

    /// Render the value as formatter-facing JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Uint(u) => serde_json::Value::from(*u),
            Value::Float(v) => {
                serde_json::Number::from_f64(*v).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::String(s) => serde_json::Value::from(s.clone()),
            Value::Time(t) => {
                serde_json::Value::from(t.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Value::Duration(d) => serde_json::Value::from(*d),
            Value::Regex(r) => serde_json::Value::from(r.as_str()),
        }
    }
}

/// Coerce a value into a boolean for `AND`/`OR`.
///
/// Null, zero-valued numbers, the empty string, the zero time and the zero
/// duration are false; everything else (a present regex included) is true.
pub fn truthiness(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Uint(u) => *u != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Time(t) => t.timestamp_nanos_opt().unwrap_or(0) != 0,
        Value::Duration(d) => *d != 0,
        Value::Regex(_) => true,
    }
}

fn bool_to_int(b: bool) -> i64 {
    if b {
        1
    } else {
        0
    }
}

/// Parse a string operand for a numeric position; the empty string reads
/// as zero, anything unparseable is a hard error.
fn parse_numeric_str(s: &str) -> TsqlResult<f64> {
    if s.is_empty() {
        return Ok(0.0);
    }
    s.parse::<f64>()
        .map_err(|_| TsqlError::type_error("number", "string", Some(s.to_string())))
}

fn parse_integer_str(s: &str) -> TsqlResult<i64> {
    if s.is_empty() {
        return Ok(0);
    }
    s.parse::<i64>()
        .map_err(|_| TsqlError::type_error("integer", "string", Some(s.to_string())))
}

fn shift_time(t: DateTime<Utc>, ns: i64) -> Value {
    Value::Time(t + chrono::Duration::nanoseconds(ns))
}

fn time_nanos(t: &DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(0)
}

fn unsupported(a: &Value, op: Operator, b: &Value) -> TsqlError {
    TsqlError::evaluation_error(format!(
        "not support {} {} {}",
        a.kind_name(),
        op,
        b.kind_name()
    ))
}

/// Apply a binary operator to two values.
///
/// The pairwise kind table is exhaustive; any pair falling through is an
/// "operator not supported for kinds" error naming both operands.
pub fn operate(a: &Value, op: Operator, b: &Value) -> TsqlResult<Value> {
    match op {
        Operator::Add => add(a, b),
        Operator::Sub => sub(a, b),
        Operator::Mul => mul(a, b),
        Operator::Div => div(a, b),
        Operator::Mod => modulo(a, b),
        Operator::BitAnd | Operator::BitOr | Operator::BitXor => bitwise(a, op, b),
        Operator::And => Ok(Value::Bool(truthiness(a) && truthiness(b))),
        Operator::Or => Ok(Value::Bool(truthiness(a) || truthiness(b))),
        Operator::Eq => Ok(Value::Bool(a == b)),
        Operator::Neq => Ok(Value::Bool(a != b)),
        Operator::EqRegex | Operator::NeqRegex => regex_match(a, op, b),
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => relational(a, op, b),
    }
}

fn add(a: &Value, b: &Value) -> TsqlResult<Value> {
    use Value::*;
    Ok(match (a, b) {
        // null is an additive identity
        (Null, Null) => Int(0),
        (Null, Bool(b)) => Int(bool_to_int(*b)),
        (Null, v) => v.clone(),
        (Bool(a), Null) => Int(bool_to_int(*a)),
        (v, Null) => v.clone(),

        (Bool(a), Bool(b)) => Int(bool_to_int(*a) + bool_to_int(*b)),
        (Bool(a), Int(b)) => Int(bool_to_int(*a) + b),
        (Int(a), Bool(b)) => Int(a + bool_to_int(*b)),
        (Bool(a), Uint(b)) => Uint(bool_to_int(*a) as u64 + b),
        (Uint(a), Bool(b)) => Uint(a + bool_to_int(*b) as u64),
        (Bool(a), Float(b)) => Float(bool_to_int(*a) as f64 + b),
        (Float(a), Bool(b)) => Float(a + bool_to_int(*b) as f64),
        (Bool(a), Duration(b)) => Duration(bool_to_int(*a) + b),
        (Duration(a), Bool(b)) => Duration(a + bool_to_int(*b)),

        (Int(a), Int(b)) => Int(a.wrapping_add(*b)),
        (Int(a), Uint(b)) => Uint((*a as u64).wrapping_add(*b)),
        (Uint(a), Int(b)) => Uint(a.wrapping_add(*b as u64)),
        (Uint(a), Uint(b)) => Uint(a.wrapping_add(*b)),
        (Int(a), Float(b)) => Float(*a as f64 + b),
        (Float(a), Int(b)) => Float(a + *b as f64),
        (Uint(a), Float(b)) => Float(*a as f64 + b),
        (Float(a), Uint(b)) => Float(a + *b as f64),
        (Float(a), Float(b)) => Float(a + b),

        // `+` with a string concatenates; numbers format into the string
        (String(a), b) => String(format!("{}{}", a, b)),
        (a, String(b)) => String(format!("{}{}", a, b)),

        (Int(a), Time(t)) => shift_time(*t, *a),
        (Uint(a), Time(t)) => shift_time(*t, *a as i64),
        (Float(a), Time(t)) => shift_time(*t, *a as i64),
        (Time(t), Int(b)) => shift_time(*t, *b),
        (Time(t), Uint(b)) => shift_time(*t, *b as i64),
        (Time(t), Float(b)) => shift_time(*t, *b as i64),
        (Time(t), Duration(d)) => shift_time(*t, *d),
        (Duration(d), Time(t)) => shift_time(*t, *d),

        (Int(a), Duration(b)) => Duration(a + b),
        (Duration(a), Int(b)) => Duration(a + b),
        (Uint(a), Duration(b)) => Duration(*a as i64 + b),
        (Duration(a), Uint(b)) => Duration(a + *b as i64),
        (Float(a), Duration(b)) => Duration(*a as i64 + b),
        (Duration(a), Float(b)) => Duration(a + *b as i64),
        (Duration(a), Duration(b)) => Duration(a + b),

        (a, b) => return Err(unsupported(a, Operator::Add, b)),
    })
}

fn sub(a: &Value, b: &Value) -> TsqlResult<Value> {
    use Value::*;
    Ok(match (a, b) {
        // null - x = -x
        (Null, Null) => Int(0),
        (Null, Bool(b)) => Int(-bool_to_int(*b)),
        (Null, Int(b)) => Int(-b),
        (Null, Uint(b)) => Int(-(*b as i64)),
        (Null, Float(b)) => Float(-b),
        (Null, String(s)) => Float(-parse_numeric_str(s)?),
        (Null, Duration(d)) => Duration(-d),
        (Null, Time(t)) => Duration(-time_nanos(t)),
        (Bool(a), Null) => Int(bool_to_int(*a)),
        (Time(t), Null) => Duration(time_nanos(t)),
        (v, Null) => v.clone(),

        (Bool(a), Bool(b)) => Int(bool_to_int(*a) - bool_to_int(*b)),
        (Bool(a), Int(b)) => Int(bool_to_int(*a) - b),
        (Int(a), Bool(b)) => Int(a - bool_to_int(*b)),
        (Bool(a), Uint(b)) => Uint((bool_to_int(*a) as u64).wrapping_sub(*b)),
        (Uint(a), Bool(b)) => Uint(a.wrapping_sub(bool_to_int(*b) as u64)),
        (Bool(a), Float(b)) => Float(bool_to_int(*a) as f64 - b),
        (Float(a), Bool(b)) => Float(a - bool_to_int(*b) as f64),
        (Bool(a), Duration(b)) => Duration(bool_to_int(*a) - b),
        (Duration(a), Bool(b)) => Duration(a - bool_to_int(*b)),

        (Int(a), Int(b)) => Int(a.wrapping_sub(*b)),
        (Int(a), Uint(b)) => Uint((*a as u64).wrapping_sub(*b)),
        (Uint(a), Int(b)) => Uint(a.wrapping_sub(*b as u64)),
        (Uint(a), Uint(b)) => Uint(a.wrapping_sub(*b)),
        (Int(a), Float(b)) => Float(*a as f64 - b),
        (Float(a), Int(b)) => Float(a - *b as f64),
        (Uint(a), Float(b)) => Float(*a as f64 - b),
        (Float(a), Uint(b)) => Float(a - *b as f64),
        (Float(a), Float(b)) => Float(a - b),

        // strings parse as numbers in subtraction position
        (Int(a), String(s)) => Float(*a as f64 - parse_numeric_str(s)?),
        (Uint(a), String(s)) => Float(*a as f64 - parse_numeric_str(s)?),
        (Float(a), String(s)) => Float(a - parse_numeric_str(s)?),
        (Bool(a), String(s)) => Float(bool_to_int(*a) as f64 - parse_numeric_str(s)?),
        (String(s), Int(b)) => Float(parse_numeric_str(s)? - *b as f64),
        (String(s), Uint(b)) => Float(parse_numeric_str(s)? - *b as f64),
        (String(s), Float(b)) => Float(parse_numeric_str(s)? - b),
        (String(s), Bool(b)) => Float(parse_numeric_str(s)? - bool_to_int(*b) as f64),
        (String(a), String(b)) => Float(parse_numeric_str(a)? - parse_numeric_str(b)?),
        (String(s), Duration(b)) => Duration(parse_duration_str(s)? - b),

        (Time(t), Int(b)) => shift_time(*t, -b),
        (Time(t), Uint(b)) => shift_time(*t, -(*b as i64)),
        (Time(t), Float(b)) => shift_time(*t, -(*b as i64)),
        (Time(t), Duration(d)) => shift_time(*t, -d),
        (Time(a), Time(b)) => Duration(time_nanos(a) - time_nanos(b)),
        (Time(t), String(s)) => shift_time(*t, -parse_duration_str(s)?),

        (Int(a), Duration(b)) => Duration(a - b),
        (Duration(a), Int(b)) => Duration(a - b),
        (Uint(a), Duration(b)) => Duration(*a as i64 - b),
        (Duration(a), Uint(b)) => Duration(a - *b as i64),
        (Float(a), Duration(b)) => Duration(*a as i64 - b),
        (Duration(a), Float(b)) => Duration(a - *b as i64),
        (Duration(a), Duration(b)) => Duration(a - b),
        (Duration(a), String(s)) => Duration(a - parse_duration_str(s)?),
        (Duration(a), Time(t)) => Duration(a - time_nanos(t)),

        (a, b) => return Err(unsupported(a, Operator::Sub, b)),
    })
}

fn mul(a: &Value, b: &Value) -> TsqlResult<Value> {
    use Value::*;
    Ok(match (a, b) {
        // null * x = zero of x's kind (after validating string operands)
        (Null, Null) | (Null, Bool(_)) | (Null, Int(_)) | (Bool(_), Null) | (Int(_), Null) => {
            Int(0)
        }
        (Null, Uint(_)) | (Uint(_), Null) => Uint(0),
        (Null, Float(_)) | (Float(_), Null) => Float(0.0),
        (Null, String(s)) | (String(s), Null) => {
            parse_numeric_str(s)?;
            Float(0.0)
        }
        (Null, Duration(_)) | (Duration(_), Null) => Duration(0),

        (Bool(a), Bool(b)) => Int(bool_to_int(*a) * bool_to_int(*b)),
        (Bool(a), Int(b)) => Int(bool_to_int(*a) * b),
        (Int(a), Bool(b)) => Int(a * bool_to_int(*b)),
        (Bool(a), Uint(b)) => Uint(bool_to_int(*a) as u64 * b),
        (Uint(a), Bool(b)) => Uint(a * bool_to_int(*b) as u64),
        (Bool(a), Float(b)) => Float(bool_to_int(*a) as f64 * b),
        (Float(a), Bool(b)) => Float(a * bool_to_int(*b) as f64),
        (Bool(a), Duration(b)) => Duration(bool_to_int(*a) * b),
        (Duration(a), Bool(b)) => Duration(a * bool_to_int(*b)),

        (Int(a), Int(b)) => Int(a.wrapping_mul(*b)),
        (Int(a), Uint(b)) => Uint((*a as u64).wrapping_mul(*b)),
        (Uint(a), Int(b)) => Uint(a.wrapping_mul(*b as u64)),
        (Uint(a), Uint(b)) => Uint(a.wrapping_mul(*b)),
        (Int(a), Float(b)) => Float(*a as f64 * b),
        (Float(a), Int(b)) => Float(a * *b as f64),
        (Uint(a), Float(b)) => Float(*a as f64 * b),
        (Float(a), Uint(b)) => Float(a * *b as f64),
        (Float(a), Float(b)) => Float(a * b),

        (Int(a), String(s)) => Float(*a as f64 * parse_numeric_str(s)?),
        (Uint(a), String(s)) => Float(*a as f64 * parse_numeric_str(s)?),
        (Float(a), String(s)) => Float(a * parse_numeric_str(s)?),
        (Bool(a), String(s)) => Float(bool_to_int(*a) as f64 * parse_numeric_str(s)?),
        (String(s), Int(b)) => Float(parse_numeric_str(s)? * *b as f64),
        (String(s), Uint(b)) => Float(parse_numeric_str(s)? * *b as f64),
        (String(s), Float(b)) => Float(parse_numeric_str(s)? * b),
        (String(s), Bool(b)) => Float(parse_numeric_str(s)? * bool_to_int(*b) as f64),
        (String(a), String(b)) => Float(parse_numeric_str(a)? * parse_numeric_str(b)?),
        (String(s), Duration(b)) => Duration((parse_numeric_str(s)? * *b as f64) as i64),

        (Int(a), Duration(b)) => Duration(a * b),
        (Duration(a), Int(b)) => Duration(a * b),
        (Uint(a), Duration(b)) => Duration(*a as i64 * b),
        (Duration(a), Uint(b)) => Duration(a * *b as i64),
        (Float(a), Duration(b)) => Duration((a * *b as f64) as i64),
        (Duration(a), Float(b)) => Duration((*a as f64 * b) as i64),
        (Duration(a), Duration(b)) => Duration(a * b),

        (a, b) => return Err(unsupported(a, Operator::Mul, b)),
    })
}

/// True when the divisor reads as zero: numeric zero, false, null, the
/// empty string, a string parsing to zero, the zero duration.
fn zero_divisor(b: &Value) -> TsqlResult<bool> {
    Ok(match b {
        Value::Null => true,
        Value::Bool(v) => !*v,
        Value::Int(v) => *v == 0,
        Value::Uint(v) => *v == 0,
        Value::Float(v) => *v == 0.0,
        Value::String(s) => {
            if s.is_empty() {
                true
            } else {
                parse_numeric_str(s)? == 0.0
            }
        }
        Value::Duration(d) => *d == 0,
        _ => return Err(TsqlError::evaluation_error(format!("invalid divisor kind {}", b.kind_name()))),
    })
}

fn div(a: &Value, b: &Value) -> TsqlResult<Value> {
    use Value::*;
    // divide by zero yields null, not an error; see module docs
    if zero_divisor(b)? {
        return Ok(Null);
    }
    Ok(match (a, b) {
        (Null, Uint(_)) => Uint(0),
        (Null, Float(_)) | (Null, String(_)) => Float(0.0),
        (Null, Duration(_)) => Duration(0),
        (Null, _) => Int(0),

        (Bool(a), Bool(b)) => Int(bool_to_int(*a) / bool_to_int(*b)),
        (Bool(a), Int(b)) => Int(bool_to_int(*a) / b),
        (Int(a), Bool(b)) => Int(a / bool_to_int(*b)),
        (Bool(a), Uint(b)) => Uint(bool_to_int(*a) as u64 / b),
        (Uint(a), Bool(b)) => Uint(a / bool_to_int(*b) as u64),
        (Bool(a), Float(b)) => Float(bool_to_int(*a) as f64 / b),
        (Float(a), Bool(b)) => Float(a / bool_to_int(*b) as f64),
        (Bool(a), Duration(b)) => Duration(bool_to_int(*a) / b),

        (Int(a), Int(b)) => Int(a / b),
        (Int(a), Uint(b)) => Uint(*a as u64 / b),
        (Uint(a), Int(b)) => Uint(a / *b as u64),
        (Uint(a), Uint(b)) => Uint(a / b),
        (Int(a), Float(b)) => Float(*a as f64 / b),
        (Float(a), Int(b)) => Float(a / *b as f64),
        (Uint(a), Float(b)) => Float(*a as f64 / b),
        (Float(a), Uint(b)) => Float(a / *b as f64),
        (Float(a), Float(b)) => Float(a / b),

        (Int(a), String(s)) => Float(*a as f64 / parse_numeric_str(s)?),
        (Uint(a), String(s)) => Float(*a as f64 / parse_numeric_str(s)?),
        (Float(a), String(s)) => Float(a / parse_numeric_str(s)?),
        (Bool(a), String(s)) => Float(bool_to_int(*a) as f64 / parse_numeric_str(s)?),
        (String(s), Int(b)) => Float(parse_numeric_str(s)? / *b as f64),
        (String(s), Uint(b)) => Float(parse_numeric_str(s)? / *b as f64),
        (String(s), Float(b)) => Float(parse_numeric_str(s)? / b),
        (String(s), Bool(b)) => Float(parse_numeric_str(s)? / bool_to_int(*b) as f64),
        (String(a), String(b)) => Float(parse_numeric_str(a)? / parse_numeric_str(b)?),
        (String(s), Duration(b)) => Duration((parse_numeric_str(s)? / *b as f64) as i64),

        (Int(a), Duration(b)) => Duration(a / b),
        (Duration(a), Int(b)) => Duration(a / b),
        (Uint(a), Duration(b)) => Duration(*a as i64 / b),
        (Duration(a), Uint(b)) => Duration(a / *b as i64),
        (Float(a), Duration(b)) => Duration((a / *b as f64) as i64),
        (Duration(a), Float(b)) => Duration((*a as f64 / b) as i64),
        (Duration(a), Duration(b)) => Duration(a / b),

        (a, b) => return Err(unsupported(a, Operator::Div, b)),
    })
}

fn modulo(a: &Value, b: &Value) -> TsqlResult<Value> {
    use Value::*;
    if zero_divisor(b)? {
        return Ok(Null);
    }
    // modulo works in integer space; floats truncate first
    Ok(match (a, b) {
        (Null, Uint(_)) => Uint(0),
        (Null, Float(_)) | (Null, String(_)) => Float(0.0),
        (Null, Duration(_)) => Duration(0),
        (Null, _) => Int(0),

        (Bool(a), b) => Int(bool_to_int(*a) % int_divisor(b)?),
        (Int(a), Uint(b)) => Uint(*a as u64 % b),
        (Int(a), b) => Int(a % int_divisor(b)?),
        (Uint(a), Uint(b)) => Uint(a % b),
        (Uint(a), b) => Uint(a % int_divisor(b)? as u64),
        (Float(a), Uint(b)) => Uint(*a as u64 % b),
        (Float(a), b) => Int(*a as i64 % int_divisor(b)?),
        (String(s), Uint(b)) => Uint(parse_integer_str(s)? as u64 % b),
        (String(s), b) => Int(parse_integer_str(s)? % int_divisor(b)?),
        (Duration(a), b) => Duration(a % int_divisor(b)?),

        (a, b) => return Err(unsupported(a, Operator::Mod, b)),
    })
}

fn int_divisor(b: &Value) -> TsqlResult<i64> {
    match b {
        Value::Bool(v) => Ok(bool_to_int(*v)),
        Value::Int(v) => Ok(*v),
        Value::Uint(v) => Ok(*v as i64),
        Value::Float(v) => Ok(*v as i64),
        Value::String(s) => parse_integer_str(s),
        Value::Duration(d) => Ok(*d),
        other => Err(TsqlError::evaluation_error(format!(
            "invalid divisor kind {}",
            other.kind_name()
        ))),
    }
}

fn bitwise(a: &Value, op: Operator, b: &Value) -> TsqlResult<Value> {
    use Value::*;
    // null is absorbing for AND, identity for OR/XOR
    if matches!(a, Null) || matches!(b, Null) {
        let other = if matches!(a, Null) { b } else { a };
        return Ok(match (op, other) {
            (Operator::BitAnd, Uint(_)) => Uint(0),
            (Operator::BitAnd, Float(_)) => Float(0.0),
            (Operator::BitAnd, Duration(_)) => Duration(0),
            (Operator::BitAnd, _) => Int(0),
            (_, Null) => Int(0),
            (_, Bool(v)) => Int(bool_to_int(*v)),
            (_, v) => v.clone(),
        });
    }
    let apply = |x: u64, y: u64| match op {
        Operator::BitAnd => x & y,
        Operator::BitOr => x | y,
        _ => x ^ y,
    };
    Ok(match (a, b) {
        (Bool(a), Bool(b)) => Int(apply(bool_to_int(*a) as u64, bool_to_int(*b) as u64) as i64),
        (Bool(a), Int(b)) => Int(apply(bool_to_int(*a) as u64, *b as u64) as i64),
        (Int(a), Bool(b)) => Int(apply(*a as u64, bool_to_int(*b) as u64) as i64),
        (Bool(a), Uint(b)) => Uint(apply(bool_to_int(*a) as u64, *b)),
        (Uint(a), Bool(b)) => Uint(apply(*a, bool_to_int(*b) as u64)),
        (Int(a), Int(b)) => Int(apply(*a as u64, *b as u64) as i64),
        (Int(a), Uint(b)) => Uint(apply(*a as u64, *b)),
        (Uint(a), Int(b)) => Uint(apply(*a, *b as u64)),
        (Uint(a), Uint(b)) => Uint(apply(*a, *b)),
        // floats go through their bit representation, as surprising as it
        // reads this is the documented behavior
        (Float(a), Float(b)) => Float(f64::from_bits(apply(a.to_bits(), b.to_bits()))),
        (Float(a), Int(b)) => Float(f64::from_bits(apply(a.to_bits(), *b as u64))),
        (Int(a), Float(b)) => Float(f64::from_bits(apply(*a as u64, b.to_bits()))),
        (Float(a), Uint(b)) => Float(f64::from_bits(apply(a.to_bits(), *b))),
        (Uint(a), Float(b)) => Float(f64::from_bits(apply(*a, b.to_bits()))),
        (Duration(a), Int(b)) => Duration(apply(*a as u64, *b as u64) as i64),
        (Int(a), Duration(b)) => Duration(apply(*a as u64, *b as u64) as i64),
        (Duration(a), Uint(b)) => Duration(apply(*a as u64, *b) as i64),
        (Uint(a), Duration(b)) => Duration(apply(*a, *b as u64) as i64),
        (Duration(a), Duration(b)) => Duration(apply(*a as u64, *b as u64) as i64),
        (a, b) => return Err(unsupported(a, op, b)),
    })
}

fn regex_match(a: &Value, op: Operator, b: &Value) -> TsqlResult<Value> {
    let matched = match (a, b) {
        (Value::String(s), Value::Regex(r)) => r.is_match(s),
        (Value::Regex(r), Value::String(s)) => r.is_match(s),
        (a, b) => return Err(unsupported(a, op, b)),
    };
    Ok(Value::Bool(if op == Operator::EqRegex {
        matched
    } else {
        !matched
    }))
}

/// Total ordering used by the relational operators. Numeric kinds (bool
/// and duration included) compare by magnitude, null reads as zero against
/// them, strings compare lexically against formatted operands, times by
/// their nanosecond timestamp.
fn compare(a: &Value, b: &Value) -> TsqlResult<Ordering> {
    use Value::*;
    let ord = match (a, b) {
        (Null, Null) => Ordering::Equal,
        (String(x), String(y)) => x.cmp(y),
        (String(x), Null) => x.as_str().cmp(""),
        (Null, String(y)) => "".cmp(y.as_str()),
        (String(x), y) => x.clone().cmp(&y.to_string()),
        (x, String(y)) => x.to_string().cmp(y),
        (Regex(x), Regex(y)) => x.as_str().cmp(y.as_str()),
        (Time(x), Time(y)) => x.cmp(y),
        (Time(x), y) => {
            return numeric_compare(time_nanos(x) as f64, y)
                .ok_or_else(|| unsupported(a, Operator::Lt, b))
        }
        (x, Time(y)) => {
            return numeric_compare(time_nanos(y) as f64, x)
                .map(Ordering::reverse)
                .ok_or_else(|| unsupported(a, Operator::Lt, b))
        }
        (Regex(_), _) | (_, Regex(_)) => return Err(unsupported(a, Operator::Lt, b)),
        (x, y) => {
            let xv = match x {
                Null => 0.0,
                other => other
                    .as_f64()
                    .ok_or_else(|| unsupported(a, Operator::Lt, b))?,
            };
            return numeric_compare(xv, y).ok_or_else(|| unsupported(a, Operator::Lt, b));
        }
    };
    Ok(ord)
}

fn numeric_compare(x: f64, y: &Value) -> Option<Ordering> {
    let yv = match y {
        Value::Null => 0.0,
        other => other.as_f64()?,
    };
    x.partial_cmp(&yv).or(Some(Ordering::Equal))
}

fn relational(a: &Value, op: Operator, b: &Value) -> TsqlResult<Value> {
    let ord = compare(a, b)?;
    let result = match op {
        Operator::Lt => ord == Ordering::Less,
        Operator::Lte => ord != Ordering::Greater,
        Operator::Gt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    };
    Ok(Value::Bool(result))
}

/// Parse an influx-style duration literal like `1h30m`, `500ms`, `10s`
/// into nanoseconds.
pub fn parse_duration_str(s: &str) -> TsqlResult<i64> {
    if s.is_empty() {
        return Err(TsqlError::evaluation_error("empty duration"));
    }
    let mut total: i64 = 0;
    let mut chars = s.chars().peekable();
    let mut negative = false;
    if let Some('-') = chars.peek() {
        negative = true;
        chars.next();
    }
    let mut matched = false;
    while chars.peek().is_some() {
        let mut num = std::string::String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                num.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let mut unit = std::string::String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphabetic() || c == 'µ' {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if num.is_empty() || unit.is_empty() {
            return Err(TsqlError::evaluation_error(format!(
                "invalid duration '{}'",
                s
            )));
        }
        let n: f64 = num
            .parse()
            .map_err(|_| TsqlError::evaluation_error(format!("invalid duration '{}'", s)))?;
        let scale = match unit.as_str() {
            "ns" => 1.0,
            "u" | "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            "d" => 86_400.0 * 1_000_000_000.0,
            "w" => 7.0 * 86_400.0 * 1_000_000_000.0,
            _ => {
                return Err(TsqlError::evaluation_error(format!(
                    "unknown duration unit '{}'",
                    unit
                )))
            }
        };
        total += (n * scale) as i64;
        matched = true;
    }
    if !matched {
        return Err(TsqlError::evaluation_error(format!(
            "invalid duration '{}'",
            s
        )));
    }
    Ok(if negative { -total } else { total })
}

/// Format nanoseconds as a human duration: `90s` -> `1m30s`, `1500ms` ->
/// `1.5s`, sub-second values pick the finest natural unit.
pub fn format_duration_ns(ns: i64) -> String {
    if ns == 0 {
        return "0s".to_string();
    }
    let neg = ns < 0;
    let mut v = ns.unsigned_abs();
    let mut out = String::new();
    if v < 1_000 {
        out = format!("{}ns", v);
    } else if v < 1_000_000 {
        out = trim_float(v as f64 / 1_000.0, "µs");
    } else if v < 1_000_000_000 {
        out = trim_float(v as f64 / 1_000_000.0, "ms");
    } else {
        let hours = v / 3_600_000_000_000;
        v %= 3_600_000_000_000;
        let minutes = v / 60_000_000_000;
        v %= 60_000_000_000;
        let seconds = v as f64 / 1_000_000_000.0;
        if hours > 0 {
            out.push_str(&format!("{}h", hours));
        }
        if minutes > 0 || hours > 0 {
            out.push_str(&format!("{}m", minutes));
        }
        out.push_str(&trim_float(seconds, "s"));
    }
    if neg {
        format!("-{}", out)
    } else {
        out
    }
}

fn trim_float(v: f64, unit: &str) -> String {
    let s = format!("{:.3}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", s, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn regex(p: &str) -> Value {
        Value::Regex(Arc::new(Regex::new(p).unwrap()))
    }

    #[test]
    fn test_add_widening_table() {
        // (lhs, rhs, expected) with the reverse direction checked for
        // every commutative pair
        let cases = vec![
            (Value::Int(1), Value::Int(2), Value::Int(3)),
            (Value::Int(1), Value::Uint(2), Value::Uint(3)),
            (Value::Int(1), Value::Float(2.0), Value::Float(3.0)),
            (Value::Uint(1), Value::Uint(2), Value::Uint(3)),
            (Value::Uint(1), Value::Float(2.0), Value::Float(3.0)),
            (Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)),
            (Value::Bool(true), Value::Int(2), Value::Int(3)),
            (Value::Null, Value::Int(2), Value::Int(2)),
            (Value::Null, Value::Float(2.5), Value::Float(2.5)),
            (Value::Duration(5), Value::Int(2), Value::Duration(7)),
        ];
        for (a, b, want) in cases {
            let got = operate(&a, Operator::Add, &b).unwrap();
            assert_eq!(got, want, "{:?} + {:?}", a, b);
            let got = operate(&b, Operator::Add, &a).unwrap();
            assert_eq!(got, want, "{:?} + {:?} (reversed)", b, a);
        }
    }

    #[test]
    fn test_add_string_concatenates() {
        let got = operate(
            &Value::Int(5),
            Operator::Add,
            &Value::String("ms".to_string()),
        )
        .unwrap();
        assert_eq!(got, Value::String("5ms".to_string()));
        let got = operate(
            &Value::String("v=".to_string()),
            Operator::Add,
            &Value::Float(1.5),
        )
        .unwrap();
        assert_eq!(got, Value::String("v=1.5".to_string()));
    }

    #[test]
    fn test_null_identities() {
        assert_eq!(
            operate(&Value::Null, Operator::Sub, &Value::Int(3)).unwrap(),
            Value::Int(-3)
        );
        assert_eq!(
            operate(&Value::Null, Operator::Mul, &Value::Float(3.0)).unwrap(),
            Value::Float(0.0)
        );
        assert_eq!(
            operate(&Value::Null, Operator::Mul, &Value::Uint(3)).unwrap(),
            Value::Uint(0)
        );
    }

    #[test]
    fn test_divide_by_zero_is_null() {
        let zeros = vec![
            Value::Int(0),
            Value::Uint(0),
            Value::Float(0.0),
            Value::String(String::new()),
            Value::String("0".to_string()),
            Value::Duration(0),
            Value::Bool(false),
            Value::Null,
        ];
        let lhs = vec![Value::Int(10), Value::Uint(10), Value::Float(10.0)];
        for a in &lhs {
            for b in &zeros {
                assert_eq!(
                    operate(a, Operator::Div, b).unwrap(),
                    Value::Null,
                    "{:?} / {:?}",
                    a,
                    b
                );
                assert_eq!(
                    operate(a, Operator::Mod, b).unwrap(),
                    Value::Null,
                    "{:?} % {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_string_numeric_parsing() {
        let got = operate(
            &Value::Int(10),
            Operator::Sub,
            &Value::String("4".to_string()),
        )
        .unwrap();
        assert_eq!(got, Value::Float(6.0));
        // non-numeric string in a numeric position is a hard error
        assert!(operate(
            &Value::Int(10),
            Operator::Sub,
            &Value::String("abc".to_string())
        )
        .is_err());
        // empty string reads as zero
        let got = operate(
            &Value::Int(10),
            Operator::Sub,
            &Value::String(String::new()),
        )
        .unwrap();
        assert_eq!(got, Value::Float(10.0));
    }

    #[test]
    fn test_equality_is_strict_on_kind() {
        assert_eq!(
            operate(&Value::Int(1), Operator::Eq, &Value::Float(1.0)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            operate(&Value::Int(1), Operator::Eq, &Value::Int(1)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            operate(&Value::Null, Operator::Eq, &Value::Null).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_relational_widens_numerics() {
        assert_eq!(
            operate(&Value::Int(1), Operator::Lt, &Value::Float(1.5)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            operate(&Value::Uint(3), Operator::Gte, &Value::Int(3)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            operate(&Value::Null, Operator::Lt, &Value::Int(1)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_regex_match_operand_kinds() {
        let r = regex("^ho.*");
        let s = Value::String("host-1".to_string());
        assert_eq!(
            operate(&s, Operator::EqRegex, &r).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            operate(&r, Operator::NeqRegex, &s).unwrap(),
            Value::Bool(false)
        );
        assert!(operate(&Value::Int(1), Operator::EqRegex, &r).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthiness(&Value::Null));
        assert!(!truthiness(&Value::Int(0)));
        assert!(!truthiness(&Value::Float(0.0)));
        assert!(!truthiness(&Value::String(String::new())));
        assert!(!truthiness(&Value::Duration(0)));
        assert!(truthiness(&Value::Int(-1)));
        assert!(truthiness(&Value::String("x".to_string())));
        assert!(truthiness(&regex(".*")));
    }

    #[test]
    fn test_logical_operators_coerce() {
        assert_eq!(
            operate(&Value::Int(1), Operator::And, &Value::String("x".into())).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            operate(&Value::Int(0), Operator::Or, &Value::Null).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_str("5m").unwrap(), 300_000_000_000);
        assert_eq!(parse_duration_str("1h30m").unwrap(), 5_400_000_000_000);
        assert_eq!(parse_duration_str("500ms").unwrap(), 500_000_000);
        assert!(parse_duration_str("5x").is_err());
        assert!(parse_duration_str("m").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ns(0), "0s");
        assert_eq!(format_duration_ns(90_000_000_000), "1m30s");
        assert_eq!(format_duration_ns(1_500_000_000), "1.5s");
        assert_eq!(format_duration_ns(500_000), "500µs");
    }

    #[test]
    fn test_time_arithmetic() {
        let t = Utc.timestamp_opt(1_000, 0).unwrap();
        let got = operate(&Value::Time(t), Operator::Add, &Value::Duration(1_000_000_000)).unwrap();
        assert_eq!(got, Value::Time(Utc.timestamp_opt(1_001, 0).unwrap()));
        let t2 = Utc.timestamp_opt(2_000, 0).unwrap();
        let got = operate(&Value::Time(t2), Operator::Sub, &Value::Time(t)).unwrap();
        assert_eq!(got, Value::Duration(1_000_000_000_000));
    }
}
