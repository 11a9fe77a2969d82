/*!
# Scalar & Literal Function Registry

Two function tables behind one explicit registry object:

- **runtime functions** may depend on per-row or per-bucket context —
  `time()`, `range()`, `row_num()`, string/format/conversion helpers
- **literal functions** are constant-foldable at translation time —
  `now()`, `interval()`, `max_int64()`, ...

The registry is constructed once at startup and shared by reference;
nothing here is a process-wide mutable map. Functions see their
surroundings only through [`FuncContext`], implemented by the translator
(no buckets, literal folding only) and by the assembler's per-leaf scope.
*/

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

use crate::ast::Expr;
use crate::error::{TsqlError, TsqlResult};
use crate::model::{convert_timestamp, TimeUnit};
use crate::value::{format_duration_ns, operate, parse_duration_str, Operator, Value};

/// Everything a function may ask of its surroundings.
///
/// Bucket accessors return `None` outside result assembly, so a
/// translation-time call of `time()` fails with a clear error instead of
/// reading stale state.
pub trait FuncContext {
    fn now(&self) -> DateTime<Utc>;
    /// Query time range in nanoseconds; `convert` divides both ends into
    /// the original storage unit.
    fn range(&self, convert: bool) -> (i64, i64);
    fn original_time_unit(&self) -> TimeUnit;
    fn target_time_unit(&self) -> TimeUnit;
    fn time_key(&self) -> &str;
    /// Index of the row currently being assembled.
    fn row_num(&self) -> i64;
    /// Key of the enclosing time bucket when grouping by `time()`.
    fn time_bucket_key(&self) -> Option<i64>;
    /// Edges of the enclosing `range()` bucket.
    fn range_bucket(&self) -> Option<(Option<f64>, Option<f64>)>;
    /// Resolve a named shared aggregation for the given inner call.
    fn scope_value(&self, scope: &str, call: &Expr) -> TsqlResult<Value>;
}

pub type ScalarFn = fn(&dyn FuncContext, &[Value]) -> TsqlResult<Value>;

/// The scalar and literal function tables.
pub struct FunctionRegistry {
    runtime: HashMap<&'static str, ScalarFn>,
    literal: HashMap<&'static str, ScalarFn>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut runtime: HashMap<&'static str, ScalarFn> = HashMap::new();
        runtime.insert("time", fn_time);
        runtime.insert("timestamp", fn_timestamp);
        runtime.insert("range", fn_range);
        runtime.insert("scope", fn_scope_placeholder);
        runtime.insert("row_num", fn_row_num);
        runtime.insert("default_value", fn_default_value);
        runtime.insert("format", fn_format);
        runtime.insert("format_time", fn_format_time);
        runtime.insert("format_date", fn_format_date);
        runtime.insert("format_bytes", fn_format_bytes);
        runtime.insert("format_duration", fn_format_duration);
        runtime.insert("map", fn_map);
        runtime.insert("round_float", fn_round_float);
        runtime.insert("trim", fn_trim);
        runtime.insert("trim_left", fn_trim_left);
        runtime.insert("trim_right", fn_trim_right);
        runtime.insert("trim_space", fn_trim_space);
        runtime.insert("trim_prefix", fn_trim_prefix);
        runtime.insert("trim_suffix", fn_trim_suffix);
        runtime.insert("max_value", fn_max_value);
        runtime.insert("min_value", fn_min_value);
        runtime.insert("int", fn_int);
        runtime.insert("bool", fn_bool);
        runtime.insert("float", fn_float);
        runtime.insert("string", fn_string);
        runtime.insert("duration", fn_duration);
        runtime.insert("parse_time", fn_parse_time);
        runtime.insert("substring", fn_substring);
        runtime.insert("tostring", fn_tostring);
        runtime.insert("if", fn_if);
        runtime.insert("eq", fn_eq);
        runtime.insert("neq", fn_neq);
        runtime.insert("include", fn_include);
        runtime.insert("gt", fn_gt);
        runtime.insert("gte", fn_gte);
        runtime.insert("lt", fn_lt);
        runtime.insert("lte", fn_lte);
        runtime.insert("andf", fn_andf);
        runtime.insert("orf", fn_orf);

        let mut literal: HashMap<&'static str, ScalarFn> = HashMap::new();
        literal.insert("interval", fn_interval);
        literal.insert("now", fn_now);
        literal.insert("now_sec", fn_now_sec);
        literal.insert("now_ms", fn_now_ms);
        literal.insert("unix", fn_unix);
        literal.insert("unix_ns", fn_unix_ns);
        literal.insert("date", fn_date);
        literal.insert("max_uint8", |_, _| Ok(Value::Int(u8::MAX as i64)));
        literal.insert("max_uint16", |_, _| Ok(Value::Int(u16::MAX as i64)));
        literal.insert("max_uint32", |_, _| Ok(Value::Int(u32::MAX as i64)));
        literal.insert("max_uint64", |_, _| Ok(Value::Uint(u64::MAX)));
        literal.insert("max_int8", |_, _| Ok(Value::Int(i8::MAX as i64)));
        literal.insert("max_int16", |_, _| Ok(Value::Int(i16::MAX as i64)));
        literal.insert("max_int32", |_, _| Ok(Value::Int(i32::MAX as i64)));
        literal.insert("max_int64", |_, _| Ok(Value::Int(i64::MAX)));
        literal.insert("max_float32", |_, _| Ok(Value::Float(f32::MAX as f64)));
        literal.insert("max_float64", |_, _| Ok(Value::Float(f64::MAX)));
        literal.insert("min_int8", |_, _| Ok(Value::Int(i8::MIN as i64)));
        literal.insert("min_int16", |_, _| Ok(Value::Int(i16::MIN as i64)));
        literal.insert("min_int32", |_, _| Ok(Value::Int(i32::MIN as i64)));
        literal.insert("min_int64", |_, _| Ok(Value::Int(i64::MIN)));

        FunctionRegistry { runtime, literal }
    }

    /// Look up a runtime function.
    pub fn runtime(&self, name: &str) -> Option<ScalarFn> {
        self.runtime.get(name).copied()
    }

    /// Look up a literal (constant-foldable) function.
    pub fn literal(&self, name: &str) -> Option<ScalarFn> {
        self.literal.get(name).copied()
    }

    /// True when the name is any registered scalar or literal function.
    pub fn is_function(&self, name: &str) -> bool {
        self.runtime.contains_key(name) || self.literal.contains_key(name)
    }
}

// ---- argument helpers ----

fn string_arg(name: &str, i: usize, args: &[Value]) -> TsqlResult<String> {
    match args.get(i) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(TsqlError::function_error(
            name,
            format!("args[{}] {} is not a string", i, other),
        )),
        None => Err(TsqlError::function_error(
            name,
            format!("args[{}] is missing", i),
        )),
    }
}

const TIME_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d"];

fn time_from_value(v: &Value, layouts: &[&str]) -> Option<DateTime<Utc>> {
    match v {
        Value::Time(t) => Some(*t),
        Value::String(s) => {
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Some(t.with_timezone(&Utc));
            }
            for layout in layouts {
                if let Ok(t) = DateTime::parse_from_str(s, layout) {
                    return Some(t.with_timezone(&Utc));
                }
                if let Ok(t) = chrono::NaiveDateTime::parse_from_str(s, layout) {
                    return Some(t.and_utc());
                }
                if let Ok(d) = chrono::NaiveDate::parse_from_str(s, layout) {
                    return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
                }
            }
            let n = s.parse::<i64>().ok()?;
            nanos_to_time(n)
        }
        other => {
            let n = other.as_i64()?;
            nanos_to_time(n)
        }
    }
}

fn nanos_to_time(n: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(n / 1_000_000_000, (n % 1_000_000_000) as u32)
        .single()
}

fn time_arg(name: &str, i: usize, args: &[Value], layouts: &[&str]) -> TsqlResult<DateTime<Utc>> {
    let v = args.get(i).ok_or_else(|| {
        TsqlError::function_error(name, format!("args[{}] is missing", i))
    })?;
    time_from_value(v, layouts).ok_or_else(|| {
        TsqlError::function_error(name, format!("args[{}] {} is not a time", i, v))
    })
}

fn numeric_args(name: &str, args: &[Value]) -> TsqlResult<Vec<f64>> {
    let mut out = Vec::with_capacity(args.len());
    for (i, v) in args.iter().enumerate() {
        match v.as_f64() {
            Some(f) => out.push(f),
            None => {
                return Err(TsqlError::function_error(
                    name,
                    format!("args[{}] is not numerical type", i),
                ))
            }
        }
    }
    Ok(out)
}

// ---- bucket context functions ----

fn fn_time(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    let key = ctx.time_bucket_key().ok_or_else(|| {
        TsqlError::function_error("time", "not in group or not found time bucket")
    })?;
    let target = ctx.target_time_unit();
    if target == TimeUnit::Unset {
        let mut t = key;
        if ctx.original_time_unit() != TimeUnit::Unset {
            t *= ctx.original_time_unit().nanos();
        }
        let formatted = nanos_to_time(t)
            .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_default();
        return Ok(Value::String(formatted));
    }
    Ok(Value::Int(convert_timestamp(
        key,
        ctx.original_time_unit(),
        target,
    )))
}

fn fn_timestamp(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    let key = ctx.time_bucket_key().ok_or_else(|| {
        TsqlError::function_error("timestamp", "not in group or not found time bucket")
    })?;
    Ok(Value::Int(convert_timestamp(
        key,
        ctx.original_time_unit(),
        ctx.target_time_unit(),
    )))
}

fn fn_range(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    let (from, to) = ctx.range_bucket().ok_or_else(|| {
        TsqlError::function_error("range", "not in group or not found range bucket")
    })?;
    let fmt = |v: Option<f64>| v.map(|f| format_float(f)).unwrap_or_default();
    Ok(Value::String(format!("{}-{}", fmt(from), fmt(to))))
}

fn format_float(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

fn fn_scope_placeholder(_ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    // the expression evaluator resolves scope() before dispatch lands here
    Err(TsqlError::function_error("scope", "invalid args"))
}

fn fn_row_num(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    Ok(Value::Int(ctx.row_num()))
}

fn fn_default_value(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("default_value", args.len(), 2)?;
    if matches!(args[0], Value::Null) {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

// ---- string formatting ----

fn fn_format(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("format", args.len(), 1)?;
    let text = string_arg("format", 0, args)?;
    let mut out = String::with_capacity(text.len());
    let mut rest = args[1..].iter();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb) => {
                let arg = rest.next().cloned().unwrap_or(Value::Null);
                match verb {
                    'd' => out.push_str(&arg.as_i64().unwrap_or(0).to_string()),
                    'f' => out.push_str(&arg.as_f64().unwrap_or(0.0).to_string()),
                    _ => out.push_str(&arg.to_string()),
                }
            }
            None => out.push('%'),
        }
    }
    Ok(Value::String(out))
}

fn fn_format_time(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("format_time", args.len(), 2)?;
    let t = time_arg("format_time", 0, args, TIME_LAYOUTS)?;
    let layout = string_arg("format_time", 1, args)?;
    Ok(Value::String(t.format(&layout).to_string()))
}

fn fn_format_date(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("format_date", args.len(), 1)?;
    let t = time_arg("format_date", 0, args, TIME_LAYOUTS)?;
    Ok(Value::String(t.format("%Y-%m-%d").to_string()))
}

fn fn_format_bytes(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("format_bytes", args.len(), 1)?;
    let mut v = args[0].as_f64().unwrap_or(0.0);
    let units = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut idx = 0;
    while v.abs() >= 1024.0 && idx < units.len() - 1 {
        v /= 1024.0;
        idx += 1;
    }
    let s = format!("{:.2}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    Ok(Value::String(format!("{}{}", s, units[idx])))
}

fn fn_format_duration(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("format_duration", args.len(), 1)?;
    let mut v = args[0].as_f64().unwrap_or(0.0);
    if args.len() > 1 {
        let unit = string_arg("format_duration", 1, args)?;
        v *= match unit.as_str() {
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" | "min" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            "d" => 86_400.0 * 1_000_000_000.0,
            _ => 1.0,
        };
    }
    let ns = v as i64;
    if args.len() > 2 {
        let precision = args[2].as_i64().unwrap_or(2);
        return Ok(Value::String(format_duration_rounded(ns, precision as u32)));
    }
    Ok(Value::String(format_duration_ns(ns)))
}

/// Round a duration to `precision` decimal places of its natural unit
/// before formatting.
fn format_duration_rounded(ns: i64, precision: u32) -> String {
    let val = ns;
    let base: i64 = if val <= 1_000 {
        return format_duration_ns(val);
    } else if val <= 1_000_000 {
        1_000
    } else if val <= 1_000_000_000 {
        1_000_000
    } else {
        1_000_000_000
    };
    let base = base / 10_i64.pow(precision.min(9));
    if base > 1 {
        let rounded = if (val % base) >= (base / 2) {
            (val / base + 1) * base
        } else {
            val / base * base
        };
        return format_duration_ns(rounded);
    }
    format_duration_ns(val)
}

fn fn_map(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("map", args.len(), 3)?;
    if args.len() % 2 != 1 {
        return Err(TsqlError::function_error("map", "invalid key-value pairs"));
    }
    let target = &args[0];
    let mut i = 1;
    while i < args.len() {
        if coerce_like(target, &args[i]) == *target {
            return Ok(args[i + 1].clone());
        }
        i += 2;
    }
    Ok(target.clone())
}

/// Bring a candidate key into the numeric family of the lookup value so
/// `map(1, 1.0, 'one')` matches.
fn coerce_like(target: &Value, v: &Value) -> Value {
    match target {
        Value::Int(_) => v.as_i64().map(Value::Int).unwrap_or_else(|| v.clone()),
        Value::Uint(_) => v
            .as_i64()
            .map(|n| Value::Uint(n as u64))
            .unwrap_or_else(|| v.clone()),
        Value::Float(_) => v.as_f64().map(Value::Float).unwrap_or_else(|| v.clone()),
        _ => v.clone(),
    }
}

fn fn_round_float(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("round_float", args.len(), 2)?;
    match args[0] {
        Value::Float(v) => {
            let digits = args[1].as_i64().unwrap_or(2).clamp(0, 12) as u32;
            let scale = 10f64.powi(digits as i32);
            Ok(Value::Float((v * scale).round() / scale))
        }
        ref other => Ok(other.clone()),
    }
}

// ---- trim family ----

fn trim_with(
    name: &'static str,
    args: &[Value],
    f: impl Fn(&str, &str) -> String,
) -> TsqlResult<Value> {
    TsqlError::check_args_num(name, args.len(), 2)?;
    let text = string_arg(name, 0, args)?;
    let arg = string_arg(name, 1, args)?;
    Ok(Value::String(f(&text, &arg)))
}

fn fn_trim(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    trim_with("trim", args, |s, cutset| {
        s.trim_matches(|c| cutset.contains(c)).to_string()
    })
}

fn fn_trim_left(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    trim_with("trim_left", args, |s, cutset| {
        s.trim_start_matches(|c| cutset.contains(c)).to_string()
    })
}

fn fn_trim_right(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    trim_with("trim_right", args, |s, cutset| {
        s.trim_end_matches(|c| cutset.contains(c)).to_string()
    })
}

fn fn_trim_space(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("trim_space", args.len(), 1)?;
    let text = string_arg("trim_space", 0, args)?;
    Ok(Value::String(text.trim().to_string()))
}

fn fn_trim_prefix(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    trim_with("trim_prefix", args, |s, p| {
        s.strip_prefix(p).unwrap_or(s).to_string()
    })
}

fn fn_trim_suffix(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    trim_with("trim_suffix", args, |s, p| {
        s.strip_suffix(p).unwrap_or(s).to_string()
    })
}

// ---- math ----

fn fn_max_value(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("max_value", args.len(), 2)?;
    match operate(&args[0], Operator::Lt, &args[1])? {
        Value::Bool(true) => Ok(args[1].clone()),
        _ => Ok(args[0].clone()),
    }
}

fn fn_min_value(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("min_value", args.len(), 2)?;
    match operate(&args[0], Operator::Gt, &args[1])? {
        Value::Bool(true) => Ok(args[1].clone()),
        _ => Ok(args[0].clone()),
    }
}

// ---- conversions ----

fn fn_int(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("int", args.len(), 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Int(0)),
        Value::String(s) => s.parse::<i64>().map(Value::Int).map_err(|_| {
            TsqlError::function_error("int", format!("can't convert '{}' to int", s))
        }),
        other => other.as_i64().map(Value::Int).ok_or_else(|| {
            TsqlError::function_error(
                "int",
                format!("can't convert {} to int", other.kind_name()),
            )
        }),
    }
}

fn fn_bool(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("bool", args.len(), 1)?;
    Ok(Value::Bool(crate::value::truthiness(&args[0])))
}

fn fn_float(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("float", args.len(), 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Float(0.0)),
        Value::String(s) => s.parse::<f64>().map(Value::Float).map_err(|_| {
            TsqlError::function_error("float", format!("can't convert '{}' to float", s))
        }),
        Value::Time(t) => Ok(Value::Float(t.timestamp_nanos_opt().unwrap_or(0) as f64)),
        other => other.as_f64().map(Value::Float).ok_or_else(|| {
            TsqlError::function_error(
                "float",
                format!("can't convert {} to float", other.kind_name()),
            )
        }),
    }
}

fn fn_string(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("string", args.len(), 1)?;
    Ok(Value::String(args[0].to_string()))
}

fn fn_duration(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("duration", args.len(), 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Duration(0)),
        Value::String(s) => parse_duration_str(s).map(Value::Duration).map_err(|_| {
            TsqlError::function_error(
                "duration",
                format!("can't convert '{}' to duration", s),
            )
        }),
        other => other.as_i64().map(Value::Duration).ok_or_else(|| {
            TsqlError::function_error(
                "duration",
                format!("can't convert {} to duration", other.kind_name()),
            )
        }),
    }
}

fn fn_parse_time(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("parse_time", args.len(), 1)?;
    let layout_holder;
    let layouts: Vec<&str>;
    if args.len() > 1 {
        layout_holder = string_arg("parse_time", 1, args)?;
        layouts = vec![layout_holder.as_str()];
    } else {
        layouts = TIME_LAYOUTS.to_vec();
    }
    let t = time_arg("parse_time", 0, args, &layouts)?;
    Ok(Value::Time(t))
}

// ---- script-compatible helpers ----

fn fn_substring(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("substring", args.len(), 2)?;
    let s = string_arg("substring", 0, args)?;
    let mut start = args[1].as_i64().unwrap_or(0).max(0) as usize;
    let mut end = if args.len() > 2 {
        args[2].as_i64().unwrap_or(s.len() as i64).max(0) as usize
    } else {
        s.len()
    };
    if start > s.len() {
        start = s.len();
    }
    if end > s.len() {
        end = s.len();
    }
    if start > end {
        start = end;
    }
    Ok(Value::String(s[start..end].to_string()))
}

fn fn_tostring(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("tostring", args.len(), 1)?;
    if matches!(args[0], Value::Null) {
        return Ok(Value::String(String::new()));
    }
    Ok(Value::String(args[0].to_string()))
}

fn fn_if(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("if", args.len(), 3)?;
    match args[0] {
        Value::Bool(b) => Ok(args[if b { 1 } else { 2 }].clone()),
        _ => Err(TsqlError::function_error("if", "args[0] is not boolean")),
    }
}

fn fn_eq(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("eq", args.len(), 2)?;
    Ok(Value::Bool(args[0] == args[1]))
}

fn fn_neq(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("neq", args.len(), 2)?;
    Ok(Value::Bool(args[0] != args[1]))
}

fn fn_include(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("include", args.len(), 2)?;
    let val = &args[0];
    Ok(Value::Bool(args[1..].iter().any(|candidate| candidate == val)))
}

fn fn_gt(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("gt", args.len(), 2)?;
    let nums = numeric_args("gt", args)?;
    Ok(Value::Bool(nums[0] > nums[1]))
}

fn fn_gte(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("gte", args.len(), 2)?;
    let nums = numeric_args("gte", args)?;
    Ok(Value::Bool(nums[0] >= nums[1]))
}

fn fn_lt(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("lt", args.len(), 2)?;
    let nums = numeric_args("lt", args)?;
    Ok(Value::Bool(nums[0] < nums[1]))
}

fn fn_lte(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_num("lte", args.len(), 2)?;
    let nums = numeric_args("lte", args)?;
    Ok(Value::Bool(nums[0] <= nums[1]))
}

fn fn_andf(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("andf", args.len(), 2)?;
    for (i, v) in args.iter().enumerate() {
        match v {
            Value::Bool(true) => {}
            Value::Bool(false) => return Ok(Value::Bool(false)),
            _ => {
                return Err(TsqlError::function_error(
                    "andf",
                    format!("args[{}] is not boolean", i),
                ))
            }
        }
    }
    Ok(Value::Bool(true))
}

fn fn_orf(_ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    TsqlError::check_args_min("orf", args.len(), 2)?;
    for (i, v) in args.iter().enumerate() {
        match v {
            Value::Bool(true) => return Ok(Value::Bool(true)),
            Value::Bool(false) => {}
            _ => {
                return Err(TsqlError::function_error(
                    "orf",
                    format!("args[{}] is not boolean", i),
                ))
            }
        }
    }
    Ok(Value::Bool(false))
}

// ---- literal functions ----

fn fn_interval(ctx: &dyn FuncContext, args: &[Value]) -> TsqlResult<Value> {
    let (start, end) = ctx.range(false);
    if start >= end {
        return Ok(Value::Int(1));
    }
    let interval = end - start;
    if let Some(arg) = args.first() {
        let unit = match arg {
            Value::String(s) => s.clone(),
            _ => {
                return Err(TsqlError::function_error("interval", "invalid time unit"));
            }
        };
        if !unit.is_empty() {
            let u = TimeUnit::parse(&unit)?;
            return Ok(Value::Int(interval / u.nanos()));
        }
    }
    Ok(Value::Int(interval))
}

fn fn_now(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    Ok(Value::Int(ctx.now().timestamp_nanos_opt().unwrap_or(0)))
}

fn fn_now_sec(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    Ok(Value::Int(ctx.now().timestamp()))
}

fn fn_now_ms(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    Ok(Value::Int(ctx.now().timestamp_millis()))
}

fn fn_unix(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    Ok(Value::Int(ctx.now().timestamp()))
}

fn fn_unix_ns(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    Ok(Value::Int(ctx.now().timestamp_nanos_opt().unwrap_or(0)))
}

fn fn_date(ctx: &dyn FuncContext, _args: &[Value]) -> TsqlResult<Value> {
    Ok(Value::String(ctx.now().format("%Y-%m-%d").to_string()))
}

#[cfg(test)]
pub(crate) mod testctx {
    use super::*;

    /// Minimal context for exercising functions outside a query.
    pub struct StaticContext {
        pub start: i64,
        pub end: i64,
        pub time_bucket: Option<i64>,
        pub range_bucket: Option<(Option<f64>, Option<f64>)>,
        pub target_unit: TimeUnit,
        pub original_unit: TimeUnit,
    }

    impl Default for StaticContext {
        fn default() -> Self {
            StaticContext {
                start: 0,
                end: 0,
                time_bucket: None,
                range_bucket: None,
                target_unit: TimeUnit::Unset,
                original_unit: TimeUnit::Nanosecond,
            }
        }
    }

    impl FuncContext for StaticContext {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(1_600_000_000, 0).unwrap()
        }
        fn range(&self, convert: bool) -> (i64, i64) {
            if convert && self.original_unit != TimeUnit::Unset {
                (
                    self.start / self.original_unit.nanos(),
                    self.end / self.original_unit.nanos(),
                )
            } else {
                (self.start, self.end)
            }
        }
        fn original_time_unit(&self) -> TimeUnit {
            self.original_unit
        }
        fn target_time_unit(&self) -> TimeUnit {
            self.target_unit
        }
        fn time_key(&self) -> &str {
            crate::model::TIMESTAMP_KEY
        }
        fn row_num(&self) -> i64 {
            7
        }
        fn time_bucket_key(&self) -> Option<i64> {
            self.time_bucket
        }
        fn range_bucket(&self) -> Option<(Option<f64>, Option<f64>)> {
            self.range_bucket
        }
        fn scope_value(&self, scope: &str, _call: &Expr) -> TsqlResult<Value> {
            Err(TsqlError::evaluation_error(format!(
                "not found scope '{}'",
                scope
            )))
        }
    }
}
