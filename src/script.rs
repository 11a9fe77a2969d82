/*!
# Scripted Expression Lowering

When a filter, dimension, sort key or aggregate argument cannot be
expressed as a plain field reference, it is lowered to a backend-native
script evaluated per document. This module renders expression trees into
that script dialect, folding literal sub-expressions first so
`interval('m') * 2` reaches the backend as a constant.

Field references inside a script collect into a set the translator turns
into `exists` filters: a document missing the field would make the script
error, so those documents are excluded up front.
*/

use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::ast::{Expr, IdentifierType};
use crate::error::{TsqlError, TsqlResult};
use crate::functions::{FuncContext, FunctionRegistry};
use crate::model::key_name;
use crate::value::{operate, Value};

/// Try to reduce an expression to a constant.
///
/// Literals, literal-table function calls with literal arguments, and
/// operator trees over those all fold; anything touching a document or a
/// bucket returns `None`.
pub fn literal_value(
    ctx: &dyn FuncContext,
    functions: &FunctionRegistry,
    expr: &Expr,
) -> TsqlResult<Option<Value>> {
    match expr {
        Expr::Integer(i) => Ok(Some(Value::Int(*i))),
        Expr::Number(n) => Ok(Some(Value::Float(*n))),
        Expr::Unsigned(u) => Ok(Some(Value::Uint(*u))),
        Expr::Bool(b) => Ok(Some(Value::Bool(*b))),
        Expr::StringLit(s) => Ok(Some(Value::String(s.clone()))),
        Expr::DurationLit(d) => Ok(Some(Value::Duration(*d))),
        Expr::Nil => Ok(Some(Value::Null)),
        Expr::RegexLit(pattern) => {
            let re = Regex::new(pattern).map_err(|e| {
                TsqlError::evaluation_error(format!("invalid regexp '{}': {}", pattern, e))
            })?;
            Ok(Some(Value::Regex(Arc::new(re))))
        }
        Expr::Call { name, args } => {
            let func = match functions.literal(name) {
                Some(f) => f,
                None => return Ok(None),
            };
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                match literal_value(ctx, functions, arg)? {
                    Some(v) => values.push(v),
                    None => {
                        return Err(TsqlError::function_error(
                            name.clone(),
                            "invalid args in literal function",
                        ))
                    }
                }
            }
            func(ctx, &values).map(Some)
        }
        Expr::Binary { op, lhs, rhs } => {
            let left = match literal_value(ctx, functions, lhs)? {
                Some(v) => v,
                None => return Ok(None),
            };
            let right = match literal_value(ctx, functions, rhs)? {
                Some(v) => v,
                None => return Ok(None),
            };
            operate(&left, *op, &right).map(Some)
        }
        Expr::Paren(inner) => literal_value(ctx, functions, inner),
        Expr::Reference(_) | Expr::Wildcard => Ok(None),
    }
}

/// Render an expression into the backend script dialect.
///
/// `fields` collects every document key the script dereferences; when
/// absent, references render with a contains-key guard instead.
pub fn script_expression(
    ctx: &dyn FuncContext,
    functions: &FunctionRegistry,
    expr: &Expr,
    deftyp: IdentifierType,
    mut fields: Option<&mut HashSet<String>>,
) -> TsqlResult<String> {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let left = script_expression(ctx, functions, lhs, deftyp, fields.as_deref_mut())?;
            let right = script_expression(ctx, functions, rhs, deftyp, fields)?;
            let op_text = match op {
                crate::value::Operator::And => "&&",
                crate::value::Operator::Or => "||",
                crate::value::Operator::Eq => "==",
                crate::value::Operator::EqRegex | crate::value::Operator::NeqRegex => {
                    return Err(TsqlError::translate_error(format!(
                        "not support operator '{}' in script expression",
                        op
                    )))
                }
                other => other.as_str(),
            };
            Ok(format!("{} {} {}", left, op_text, right))
        }
        Expr::Call { name, .. } => {
            if functions.literal(name).is_some() {
                let val = literal_value(ctx, functions, expr)?;
                if let Some(v) = val {
                    return script_value(&v);
                }
            }
            if let Some(script) = painless_call(ctx, functions, expr, deftyp, fields)? {
                return Ok(script);
            }
            Err(TsqlError::translate_error(format!(
                "not support function '{}' in script expression",
                name
            )))
        }
        Expr::Paren(inner) => {
            let s = script_expression(ctx, functions, inner, deftyp, fields)?;
            Ok(format!("({})", s))
        }
        Expr::Integer(i) => Ok(i.to_string()),
        Expr::Number(n) => Ok(n.to_string()),
        Expr::Unsigned(u) => Ok(u.to_string()),
        Expr::Bool(b) => Ok(b.to_string()),
        Expr::StringLit(s) => Ok(quote_script_string(s)),
        Expr::Nil => Ok("null".to_string()),
        Expr::DurationLit(d) => Ok(d.to_string()),
        Expr::Reference(r) => {
            let key = key_name(r, deftyp);
            match fields {
                Some(set) => {
                    set.insert(key.clone());
                    Ok(format!("doc['{}'].value", key))
                }
                // '' stands in for a missing field
                None => Ok(format!(
                    "(doc.containsKey('{}')?doc['{}'].value:'')",
                    key, key
                )),
            }
        }
        Expr::RegexLit(_) => Err(TsqlError::translate_error(
            "not support regexp in script expression",
        )),
        Expr::Wildcard => Err(TsqlError::translate_error("invalid expression")),
    }
}

fn quote_script_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "\\'"))
}

fn script_value(v: &Value) -> TsqlResult<String> {
    match v {
        Value::Null => Ok("null".to_string()),
        Value::String(s) => Ok(quote_script_string(s)),
        Value::Regex(_) => Err(TsqlError::translate_error(
            "not support regexp in script expression",
        )),
        Value::Duration(d) => Ok(d.to_string()),
        other => Ok(other.to_string()),
    }
}

/// Script rendering for the function subset the backend can evaluate
/// natively. Returns `None` for functions with no script counterpart.
fn painless_call(
    ctx: &dyn FuncContext,
    functions: &FunctionRegistry,
    expr: &Expr,
    deftyp: IdentifierType,
    mut fields: Option<&mut HashSet<String>>,
) -> TsqlResult<Option<String>> {
    let (name, args) = match expr {
        Expr::Call { name, args } => (name.as_str(), args),
        _ => return Ok(None),
    };
    match name {
        // method-style calls on a receiver expression
        "substring" | "tostring" => {
            if args.is_empty() {
                return Err(TsqlError::function_error(name, "invalid function"));
            }
            let method = if name == "substring" {
                "substring"
            } else {
                "toString"
            };
            let obj = script_expression(ctx, functions, &args[0], deftyp, fields.as_deref_mut())?;
            let mut rendered = Vec::with_capacity(args.len() - 1);
            for arg in &args[1..] {
                rendered.push(script_expression(
                    ctx,
                    functions,
                    arg,
                    deftyp,
                    fields.as_deref_mut(),
                )?);
            }
            Ok(Some(format!(
                "({}).{}({})",
                obj,
                method,
                rendered.join(", ")
            )))
        }
        "if" => {
            TsqlError::check_args_num("if", args.len(), 3)?;
            let cond = script_expression(ctx, functions, &args[0], deftyp, fields.as_deref_mut())?;
            let when_true =
                script_expression(ctx, functions, &args[1], deftyp, fields.as_deref_mut())?;
            let when_false = script_expression(ctx, functions, &args[2], deftyp, fields)?;
            Ok(Some(format!(
                "(({})?({}):({}))",
                cond, when_true, when_false
            )))
        }
        "eq" => {
            TsqlError::check_args_num("eq", args.len(), 2)?;
            let left = script_expression(ctx, functions, &args[0], deftyp, fields.as_deref_mut())?;
            let right = script_expression(ctx, functions, &args[1], deftyp, fields)?;
            Ok(Some(format!("(({})==({}))", left, right)))
        }
        "include" => {
            TsqlError::check_args_min("include", args.len(), 2)?;
            let val = script_expression(ctx, functions, &args[0], deftyp, fields.as_deref_mut())?;
            let mut parts = Vec::with_capacity(args.len() - 1);
            for item in &args[1..] {
                let s = script_expression(ctx, functions, item, deftyp, fields.as_deref_mut())?;
                parts.push(format!("({})==({})", val, s));
            }
            Ok(Some(format!("({})", parts.join(" || "))))
        }
        _ => Ok(None),
    }
}
