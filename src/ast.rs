/*!
# Query Abstract Syntax Tree

AST for the InfluxQL-style select dialect. The tree is deliberately small:
one statement shape (`SELECT`) with fields, sources, an optional condition,
grouping dimensions, sort fields and paging.

Expressions hash structurally (operator, literal values, call name and
arguments, reference names with their type hints), which is what gives two
textually identical aggregate calls the same identity and therefore a
single backend aggregation node.
*/

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::value::Operator;

/// The namespace hint attached to an identifier: `cpu::field`,
/// `host::tag`, or nothing (resolved by position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierType {
    /// No hint; the consumer decides (fields by default, tags in filters).
    Any,
    Tag,
    Field,
}

/// A named reference with its optional namespace hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub name: String,
    pub hint: IdentifierType,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Reference {
            name: name.into(),
            hint: IdentifierType::Any,
        }
    }

    pub fn tagged(name: impl Into<String>, hint: IdentifierType) -> Self {
        Reference {
            name: name.into(),
            hint,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hint {
            IdentifierType::Any => write!(f, "{}", self.name),
            IdentifierType::Tag => write!(f, "{}::tag", self.name),
            IdentifierType::Field => write!(f, "{}::field", self.name),
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field or tag reference.
    Reference(Reference),
    /// `*` — every column; only legal in raw, ungrouped selects.
    Wildcard,
    Integer(i64),
    Number(f64),
    Unsigned(u64),
    Bool(bool),
    StringLit(String),
    /// Duration literal in nanoseconds (`5m`, `1h30m`).
    DurationLit(i64),
    /// Regex literal pattern (`/cpu.*/`), compiled lazily.
    RegexLit(String),
    Nil,
    /// Function call: scalar, literal, or aggregate.
    Call { name: String, args: Vec<Expr> },
    Binary {
        op: Operator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Paren(Box<Expr>),
}

impl Eq for Expr {}

// f64 literals hash by bit representation so structurally identical
// expressions produce identical identities (NaN and -0.0 included).
impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Expr::Reference(r) => r.hash(state),
            Expr::Wildcard | Expr::Nil => {}
            Expr::Integer(i) => i.hash(state),
            Expr::Number(n) => n.to_bits().hash(state),
            Expr::Unsigned(u) => u.hash(state),
            Expr::Bool(b) => b.hash(state),
            Expr::StringLit(s) => s.hash(state),
            Expr::DurationLit(d) => d.hash(state),
            Expr::RegexLit(p) => p.hash(state),
            Expr::Call { name, args } => {
                name.hash(state);
                args.hash(state);
            }
            Expr::Binary { op, lhs, rhs } => {
                op.hash(state);
                lhs.hash(state);
                rhs.hash(state);
            }
            Expr::Paren(inner) => inner.hash(state),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Reference(r) => write!(f, "{}", r),
            Expr::Wildcard => write!(f, "*"),
            Expr::Integer(i) => write!(f, "{}", i),
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Unsigned(u) => write!(f, "{}", u),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::StringLit(s) => write!(f, "'{}'", s),
            Expr::DurationLit(d) => write!(f, "{}", crate::value::format_duration_ns(*d)),
            Expr::RegexLit(p) => write!(f, "/{}/", p),
            Expr::Nil => write!(f, "null"),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Expr::Paren(inner) => write!(f, "({})", inner),
        }
    }
}

impl Expr {
    /// Strip redundant parentheses.
    pub fn unwrap_paren(&self) -> &Expr {
        match self {
            Expr::Paren(inner) => inner.unwrap_paren(),
            other => other,
        }
    }

    /// True for literal nodes (not references, calls, or operators).
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Integer(_)
                | Expr::Number(_)
                | Expr::Unsigned(_)
                | Expr::Bool(_)
                | Expr::StringLit(_)
                | Expr::DurationLit(_)
                | Expr::RegexLit(_)
                | Expr::Nil
        )
    }
}

/// A projected field with optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Field {
    /// Display name of the resulting column: the alias when present,
    /// the canonical expression text otherwise.
    pub fn column_name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expr.to_string(),
        }
    }
}

/// One ORDER BY entry. A missing expression sorts by the time key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub expr: Option<Expr>,
    pub ascending: bool,
}

/// One FROM entry: `measurement` or `db.measurement`. A regex source
/// parses but is rejected during translation.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSource {
    pub database: Option<String>,
    pub name: String,
    pub regex: Option<String>,
}

/// A parsed SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub fields: Vec<Field>,
    pub sources: Vec<MeasurementSource>,
    pub condition: Option<Expr>,
    pub dimensions: Vec<Expr>,
    pub sorts: Vec<SortField>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(e: &Expr) -> u64 {
        let mut h = DefaultHasher::new();
        e.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_structural_hash_is_stable() {
        let a = Expr::Call {
            name: "max".to_string(),
            args: vec![Expr::Reference(Reference::tagged("x", IdentifierType::Field))],
        };
        let b = Expr::Call {
            name: "max".to_string(),
            args: vec![Expr::Reference(Reference::tagged("x", IdentifierType::Field))],
        };
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = Expr::Call {
            name: "max".to_string(),
            args: vec![Expr::Reference(Reference::tagged("y", IdentifierType::Field))],
        };
        assert_ne!(hash_of(&a), hash_of(&c));
    }

    #[test]
    fn test_display_round_trips_shape() {
        let e = Expr::Binary {
            op: crate::value::Operator::Div,
            lhs: Box::new(Expr::Call {
                name: "max".to_string(),
                args: vec![Expr::Reference(Reference::new("used"))],
            }),
            rhs: Box::new(Expr::Integer(100)),
        };
        assert_eq!(e.to_string(), "max(used) / 100");
    }
}
