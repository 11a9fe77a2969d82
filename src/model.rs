/*!
# Data Model

Shared vocabulary between the translator, the assembler and the
formatters: document key conventions, time units, column metadata and the
flat result set.

Documents in the backend follow the metric envelope convention: the
timestamp lives under `timestamp`, the series name under `name`, tags
under `tags.<key>` and fields under `fields.<key>`.
*/

use serde::Serialize;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::ast::{Expr, IdentifierType, Reference};
use crate::error::{TsqlError, TsqlResult};
use crate::value::Value;

/// Document key of the timestamp field.
pub const TIMESTAMP_KEY: &str = "timestamp";
/// Alias accepted in query text for the timestamp field.
pub const TIME_KEY: &str = "time";
/// Document key of the series name.
pub const NAME_KEY: &str = "name";
/// Key prefix of the tag namespace.
pub const TAGS_PREFIX: &str = "tags.";
/// Key prefix of the field namespace.
pub const FIELDS_PREFIX: &str = "fields.";

/// Default page size when a statement carries no LIMIT.
pub const DEFAULT_LIMIT: i64 = 100;

/// Unit of stored or displayed timestamps, expressed as a nanosecond
/// multiplier. `Unset` means "leave values as they are".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Unset,
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Nanoseconds in one unit; `Unset` counts as 1 so it is safe to
    /// multiply and divide by unconditionally.
    pub fn nanos(&self) -> i64 {
        match self {
            TimeUnit::Unset | TimeUnit::Nanosecond => 1,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Second => 1_000_000_000,
            TimeUnit::Minute => 60 * 1_000_000_000,
            TimeUnit::Hour => 3_600 * 1_000_000_000,
            TimeUnit::Day => 86_400 * 1_000_000_000,
        }
    }

    /// Parse a unit name as written in query arguments (`'ms'`, `'s'`, ...).
    pub fn parse(s: &str) -> TsqlResult<TimeUnit> {
        match s {
            "ns" => Ok(TimeUnit::Nanosecond),
            "us" | "µs" => Ok(TimeUnit::Microsecond),
            "ms" => Ok(TimeUnit::Millisecond),
            "s" => Ok(TimeUnit::Second),
            "m" | "min" => Ok(TimeUnit::Minute),
            "h" => Ok(TimeUnit::Hour),
            "d" => Ok(TimeUnit::Day),
            other => Err(TsqlError::evaluation_error(format!(
                "invalid time unit '{}'",
                other
            ))),
        }
    }
}

/// Convert a timestamp between units. An unset target leaves the value
/// in its original unit.
pub fn convert_timestamp(t: i64, from: TimeUnit, to: TimeUnit) -> i64 {
    t * from.nanos() / to.nanos()
}

/// Bitmask describing how a column was produced and how downstream
/// consumers should treat it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ColumnFlag(pub u32);

impl ColumnFlag {
    pub const NONE: ColumnFlag = ColumnFlag(0);
    /// Excluded from output rows.
    pub const HIDDEN: ColumnFlag = ColumnFlag(1);
    /// The series-name column.
    pub const NAME: ColumnFlag = ColumnFlag(1 << 1);
    /// The timestamp column.
    pub const TIMESTAMP: ColumnFlag = ColumnFlag(1 << 2);
    /// Resolves through the tag namespace.
    pub const TAG: ColumnFlag = ColumnFlag(1 << 3);
    /// Resolves through the field namespace.
    pub const FIELD: ColumnFlag = ColumnFlag(1 << 4);
    /// A pure literal (no document access).
    pub const LITERAL: ColumnFlag = ColumnFlag(1 << 5);
    /// Contains a scalar function call.
    pub const FUNC: ColumnFlag = ColumnFlag(1 << 6);
    /// Contains an aggregate call.
    pub const AGG: ColumnFlag = ColumnFlag(1 << 7);
    /// Produced by a GROUP BY dimension.
    pub const GROUP_BY: ColumnFlag = ColumnFlag(1 << 8);
    /// Grouped by the `time()` histogram.
    pub const GROUP_BY_INTERVAL: ColumnFlag = ColumnFlag(1 << 9);
    /// Grouped by the `range()` aggregation.
    pub const GROUP_BY_RANGE: ColumnFlag = ColumnFlag(1 << 10);
    /// Used as a sort key.
    pub const ORDER_BY: ColumnFlag = ColumnFlag(1 << 11);

    pub fn contains(&self, other: ColumnFlag) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ColumnFlag {
    type Output = ColumnFlag;
    fn bitor(self, rhs: ColumnFlag) -> ColumnFlag {
        ColumnFlag(self.0 | rhs.0)
    }
}

impl BitOrAssign for ColumnFlag {
    fn bitor_assign(&mut self, rhs: ColumnFlag) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ColumnFlag {
    type Output = ColumnFlag;
    fn bitand(self, rhs: ColumnFlag) -> ColumnFlag {
        ColumnFlag(self.0 & rhs.0)
    }
}

impl fmt::Display for ColumnFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: [(ColumnFlag, &str); 12] = [
            (ColumnFlag::HIDDEN, "hidden"),
            (ColumnFlag::NAME, "name"),
            (ColumnFlag::TIMESTAMP, "timestamp"),
            (ColumnFlag::TAG, "tag"),
            (ColumnFlag::FIELD, "field"),
            (ColumnFlag::LITERAL, "literal"),
            (ColumnFlag::FUNC, "func"),
            (ColumnFlag::AGG, "agg"),
            (ColumnFlag::GROUP_BY, "groupby"),
            (ColumnFlag::GROUP_BY_INTERVAL, "interval"),
            (ColumnFlag::GROUP_BY_RANGE, "range"),
            (ColumnFlag::ORDER_BY, "orderby"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// One data series referenced in `FROM`; immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub database: String,
    pub name: String,
}

/// A result column: display name, backend document key, behavior flags.
///
/// The key is stable once first computed; recomputing it against a
/// different context is a programming error, so it is never recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub key: String,
    pub flag: ColumnFlag,
}

/// The flat, column-oriented result of one query.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Total matching documents reported by the backend.
    pub total: i64,
    /// Adjusted time-bucket width in nanoseconds when grouping by time,
    /// zero otherwise.
    pub interval: i64,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

/// Resolve a reference to its backend document key and the column flag
/// describing the namespace it landed in.
///
/// Unhinted names resolve to the timestamp/name specials first, then to
/// `deftyp`'s namespace (tags in filter positions, fields elsewhere).
pub fn key_name_and_flag(r: &Reference, deftyp: IdentifierType) -> (String, ColumnFlag) {
    const UNDERSCORE_NAME: &str = "_name";
    match r.hint {
        IdentifierType::Any => {
            if r.name == TIMESTAMP_KEY || r.name == TIME_KEY {
                return (TIMESTAMP_KEY.to_string(), ColumnFlag::TIMESTAMP);
            }
            if r.name == NAME_KEY || r.name == UNDERSCORE_NAME {
                return (NAME_KEY.to_string(), ColumnFlag::NAME);
            }
            if deftyp == IdentifierType::Tag {
                return (format!("{}{}", TAGS_PREFIX, r.name), ColumnFlag::TAG);
            }
            (format!("{}{}", FIELDS_PREFIX, r.name), ColumnFlag::FIELD)
        }
        IdentifierType::Tag => (format!("{}{}", TAGS_PREFIX, r.name), ColumnFlag::TAG),
        IdentifierType::Field => (format!("{}{}", FIELDS_PREFIX, r.name), ColumnFlag::FIELD),
    }
}

/// Shorthand for the key half of [`key_name_and_flag`].
pub fn key_name(r: &Reference, deftyp: IdentifierType) -> String {
    key_name_and_flag(r, deftyp).0
}

/// Canonical text of an expression plus the union of every column flag
/// touched while walking it. This is what both the column metadata and
/// the aggregate-call identity are derived from.
pub fn expr_string_and_flag(expr: &Expr, deftyp: IdentifierType) -> (String, ColumnFlag) {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let (left, lf) = expr_string_and_flag(lhs, deftyp);
            let (right, rf) = expr_string_and_flag(rhs, deftyp);
            (format!("{}{}{}", left, op, right), lf | rf)
        }
        Expr::Call { name, args } => {
            let mut flag = ColumnFlag::FUNC;
            if name == "time" || name == "timestamp" {
                flag |= ColumnFlag::GROUP_BY_INTERVAL;
            } else if name == "range" {
                flag |= ColumnFlag::GROUP_BY_RANGE;
            }
            let mut parts = Vec::with_capacity(args.len());
            for arg in args {
                let (k, f) = expr_string_and_flag(arg, deftyp);
                parts.push(k);
                flag |= f;
            }
            (format!("{}({})", name, parts.join(",")), flag)
        }
        Expr::Paren(inner) => expr_string_and_flag(inner, deftyp),
        Expr::Reference(r) => key_name_and_flag(r, deftyp),
        Expr::Wildcard => ("*".to_string(), ColumnFlag::NONE),
        literal => (literal.to_string(), ColumnFlag::LITERAL),
    }
}

/// Identity of a function-call occurrence: a structural hash over the
/// expression tree (call name and arguments, operators, literal values,
/// references resolved to their document keys) plus the default-type
/// hint. Two structurally identical calls in one statement share one
/// identity, and therefore one backend aggregation node.
pub fn call_id(expr: &Expr, deftyp: IdentifierType) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    hash_expr(expr, deftyp, &mut hasher);
    deftyp.hash(&mut hasher);
    format!("a{:016x}", hasher.finish())
}

// References hash by resolved key so `max(x)` and `max(x::field)` are the
// same call when both land in the field namespace.
fn hash_expr<H: std::hash::Hasher>(expr: &Expr, deftyp: IdentifierType, state: &mut H) {
    use std::hash::Hash;
    match expr {
        Expr::Reference(r) => {
            let (key, _) = key_name_and_flag(r, deftyp);
            key.hash(state);
        }
        Expr::Paren(inner) => hash_expr(inner, deftyp, state),
        Expr::Call { name, args } => {
            "call".hash(state);
            name.hash(state);
            for arg in args {
                hash_expr(arg, deftyp, state);
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            "binary".hash(state);
            op.hash(state);
            hash_expr(lhs, deftyp, state);
            hash_expr(rhs, deftyp, state);
        }
        other => other.hash(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_identity() {
        let parse = |text: &str| -> Expr {
            let stmts = crate::parser::parse_statements(
                &format!("SELECT {} FROM m", text),
                &Default::default(),
            )
            .unwrap();
            stmts[0].fields[0].expr.clone()
        };
        let a = parse("max(x::field)");
        let b = parse("max(x::field)");
        let c = parse("max(x)");
        let d = parse("max(y::field)");
        assert_eq!(call_id(&a, IdentifierType::Any), call_id(&b, IdentifierType::Any));
        // an unhinted reference resolves to the field namespace here, so
        // the hint spelling does not split the identity
        assert_eq!(call_id(&a, IdentifierType::Any), call_id(&c, IdentifierType::Any));
        assert_ne!(call_id(&a, IdentifierType::Any), call_id(&d, IdentifierType::Any));
    }

    #[test]
    fn test_key_name_resolution() {
        let (key, flag) = key_name_and_flag(&Reference::new("time"), IdentifierType::Any);
        assert_eq!(key, "timestamp");
        assert_eq!(flag, ColumnFlag::TIMESTAMP);

        let (key, flag) = key_name_and_flag(&Reference::new("host"), IdentifierType::Tag);
        assert_eq!(key, "tags.host");
        assert_eq!(flag, ColumnFlag::TAG);

        let (key, flag) = key_name_and_flag(&Reference::new("usage"), IdentifierType::Any);
        assert_eq!(key, "fields.usage");
        assert_eq!(flag, ColumnFlag::FIELD);

        let (key, flag) = key_name_and_flag(
            &Reference::tagged("host", IdentifierType::Tag),
            IdentifierType::Field,
        );
        assert_eq!(key, "tags.host");
        assert_eq!(flag, ColumnFlag::TAG);
    }

    #[test]
    fn test_expr_flags_union() {
        let expr = Expr::Binary {
            op: crate::value::Operator::Div,
            lhs: Box::new(Expr::Call {
                name: "max".to_string(),
                args: vec![Expr::Reference(Reference::new("x"))],
            }),
            rhs: Box::new(Expr::Integer(10)),
        };
        let (text, flag) = expr_string_and_flag(&expr, IdentifierType::Any);
        assert_eq!(text, "max(fields.x)/10");
        assert!(flag.contains(ColumnFlag::FUNC));
        assert!(flag.contains(ColumnFlag::FIELD));
        assert!(flag.contains(ColumnFlag::LITERAL));
    }

    #[test]
    fn test_flag_display() {
        let f = ColumnFlag::TAG | ColumnFlag::GROUP_BY;
        assert_eq!(f.to_string(), "tag|groupby");
        assert_eq!(ColumnFlag::NONE.to_string(), "none");
    }

    #[test]
    fn test_convert_timestamp() {
        assert_eq!(
            convert_timestamp(1_500, TimeUnit::Millisecond, TimeUnit::Second),
            1
        );
        assert_eq!(
            convert_timestamp(2, TimeUnit::Second, TimeUnit::Millisecond),
            2_000
        );
        assert_eq!(convert_timestamp(42, TimeUnit::Unset, TimeUnit::Unset), 42);
    }
}
