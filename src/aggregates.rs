/*!
# Aggregate Function Registry

Maps aggregate calls (`max`, `avg`, `percentiles`, `diff`, ...) to the
backend aggregations they need and to extractors that pull a value back
out of a completed result.

Every handler instance is bound to one call occurrence. Emission into the
shared [`AggMap`] is idempotent on the call identity, so two identical
calls anywhere in a statement produce exactly one backend aggregation
node.

`diff` and `diffps` are pairwise: they need the *next* time bucket's
sibling aggregations, which the assembler threads in explicitly through
[`BucketInfo`] rather than through any ambient state.
*/

use std::collections::HashMap;

use crate::ast::{Expr, IdentifierType, Reference};
use crate::error::{TsqlError, TsqlResult};
use crate::functions::{FuncContext, FunctionRegistry};
use crate::model::key_name;
use crate::response::{Aggregations, FlatDoc};
use crate::script::{literal_value, script_expression};
use crate::search::{Agg, AggMap, AggSource, MetricKind};
use crate::value::Value;

/// Where an aggregate call may legally appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncFlag(pub u32);

impl FuncFlag {
    pub const SELECT: FuncFlag = FuncFlag(1);
    pub const ORDER_BY: FuncFlag = FuncFlag(1 << 1);

    pub fn contains(&self, other: FuncFlag) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FuncFlag {
    type Output = FuncFlag;
    fn bitor(self, rhs: FuncFlag) -> FuncFlag {
        FuncFlag(self.0 | rhs.0)
    }
}

/// Sibling-bucket context handed to extractors during assembly.
///
/// `next` is the following time bucket's aggregations when walking a
/// histogram; pairwise functions derive their inter-bucket delta from it.
#[derive(Clone, Copy, Default)]
pub struct BucketInfo<'a> {
    pub prev: Option<&'a Aggregations>,
    pub next: Option<&'a Aggregations>,
    /// Adjusted histogram bucket width in nanoseconds.
    pub interval_ns: i64,
}

/// One aggregate call occurrence: declares its backend aggregations and
/// extracts its value from a completed result.
pub trait AggHandler: std::fmt::Debug {
    fn id(&self) -> &str;
    /// Emit the backend aggregation(s) this call needs. Inserting under
    /// an identity already present is a no-op by construction.
    fn aggregations(&self, aggs: &mut AggMap) -> TsqlResult<()>;
    fn extract(&self, aggs: &Aggregations, bucket: &BucketInfo) -> TsqlResult<Value>;
    /// True when the value depends on the next sibling bucket.
    fn pairwise(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggKind {
    Metric(MetricKind),
    Median,
    Percentiles,
    Diff,
    DiffPs,
    First,
    Last,
    ValueOf,
}

/// Registered definition: legal positions plus the handler constructor.
pub struct AggFuncDefine {
    pub flag: FuncFlag,
    kind: AggKind,
}

/// Construction context handed to handler constructors: literal folding
/// plus the time-key configuration.
pub struct AggEnv<'a> {
    pub ctx: &'a dyn FuncContext,
    pub functions: &'a FunctionRegistry,
}

/// The aggregate-function table; constructed once, read-only after.
pub struct AggRegistry {
    defs: HashMap<&'static str, AggFuncDefine>,
}

impl Default for AggRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AggRegistry {
    pub fn new() -> Self {
        let mut defs = HashMap::new();
        let both = FuncFlag::SELECT | FuncFlag::ORDER_BY;
        defs.insert(
            "max",
            AggFuncDefine {
                flag: both,
                kind: AggKind::Metric(MetricKind::Max),
            },
        );
        defs.insert(
            "min",
            AggFuncDefine {
                flag: both,
                kind: AggKind::Metric(MetricKind::Min),
            },
        );
        defs.insert(
            "avg",
            AggFuncDefine {
                flag: both,
                kind: AggKind::Metric(MetricKind::Avg),
            },
        );
        defs.insert(
            "mean",
            AggFuncDefine {
                flag: both,
                kind: AggKind::Metric(MetricKind::Avg),
            },
        );
        defs.insert(
            "sum",
            AggFuncDefine {
                flag: both,
                kind: AggKind::Metric(MetricKind::Sum),
            },
        );
        defs.insert(
            "count",
            AggFuncDefine {
                flag: both,
                kind: AggKind::Metric(MetricKind::ValueCount),
            },
        );
        defs.insert(
            "distinct",
            AggFuncDefine {
                flag: both,
                kind: AggKind::Metric(MetricKind::Cardinality),
            },
        );
        defs.insert(
            "median",
            AggFuncDefine {
                flag: FuncFlag::SELECT,
                kind: AggKind::Median,
            },
        );
        defs.insert(
            "percentiles",
            AggFuncDefine {
                flag: FuncFlag::SELECT,
                kind: AggKind::Percentiles,
            },
        );
        defs.insert(
            "diff",
            AggFuncDefine {
                flag: FuncFlag::SELECT,
                kind: AggKind::Diff,
            },
        );
        defs.insert(
            "diffps",
            AggFuncDefine {
                flag: FuncFlag::SELECT,
                kind: AggKind::DiffPs,
            },
        );
        defs.insert(
            "first",
            AggFuncDefine {
                flag: FuncFlag::SELECT,
                kind: AggKind::First,
            },
        );
        defs.insert(
            "last",
            AggFuncDefine {
                flag: FuncFlag::SELECT,
                kind: AggKind::Last,
            },
        );
        defs.insert(
            "value",
            AggFuncDefine {
                flag: FuncFlag::SELECT,
                kind: AggKind::ValueOf,
            },
        );
        AggRegistry { defs }
    }

    pub fn get(&self, name: &str) -> Option<&AggFuncDefine> {
        self.defs.get(name)
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Construct the handler for one call occurrence.
    pub fn create(
        &self,
        env: &AggEnv,
        name: &str,
        id: &str,
        call_args: &[Expr],
    ) -> TsqlResult<Box<dyn AggHandler>> {
        let define = self
            .get(name)
            .ok_or_else(|| TsqlError::translate_error(format!("unknown function '{}'", name)))?;
        match define.kind {
            AggKind::Metric(kind) => {
                TsqlError::check_args_num(name, call_args.len(), 1)?;
                let source = resolve_source(env, &call_args[0])?;
                Ok(Box::new(MetricHandler {
                    name: name.to_string(),
                    id: id.to_string(),
                    kind,
                    source,
                }))
            }
            AggKind::Median => {
                TsqlError::check_args_num(name, call_args.len(), 1)?;
                let source = resolve_source(env, &call_args[0])?;
                Ok(Box::new(PercentileHandler {
                    name: name.to_string(),
                    id: id.to_string(),
                    percent: 50.0,
                    source,
                }))
            }
            AggKind::Percentiles => {
                TsqlError::check_args_min(name, call_args.len(), 2)?;
                let source = resolve_source(env, &call_args[0])?;
                let percent = match literal_value(env.ctx, env.functions, &call_args[1])? {
                    Some(v) => v.as_f64().ok_or_else(|| {
                        TsqlError::function_error(name, "invalid percent type error")
                    })?,
                    None => {
                        return Err(TsqlError::function_error(name, "invalid percent type error"))
                    }
                };
                if !(0.0..=100.0).contains(&percent) {
                    return Err(TsqlError::function_error(name, "percent was out of range"));
                }
                Ok(Box::new(PercentileHandler {
                    name: name.to_string(),
                    id: id.to_string(),
                    percent,
                    source,
                }))
            }
            AggKind::Diff | AggKind::DiffPs => {
                TsqlError::check_args_num(name, call_args.len(), 1)?;
                let source = resolve_source(env, &call_args[0])?;
                Ok(Box::new(DiffHandler {
                    id: id.to_string(),
                    rate: define.kind == AggKind::DiffPs,
                    source,
                }))
            }
            AggKind::First | AggKind::Last | AggKind::ValueOf => {
                TsqlError::check_args_num(name, call_args.len(), 1)?;
                let field = match call_args[0].unwrap_paren() {
                    Expr::Reference(r) => field_key(r),
                    _ => {
                        return Err(TsqlError::function_error(name, "not support script"));
                    }
                };
                Ok(Box::new(SourceFieldHandler {
                    name: name.to_string(),
                    id: id.to_string(),
                    field,
                    sort_field: env.ctx.time_key().to_string(),
                    ascending: define.kind == AggKind::First,
                }))
            }
        }
    }
}

fn field_key(r: &Reference) -> String {
    key_name(r, IdentifierType::Any)
}

/// A bare reference becomes a field aggregation; anything else lowers to
/// a script.
fn resolve_source(env: &AggEnv, arg: &Expr) -> TsqlResult<AggSource> {
    match arg.unwrap_paren() {
        Expr::Reference(r) => Ok(AggSource::Field(field_key(r))),
        other => {
            let script =
                script_expression(env.ctx, env.functions, other, IdentifierType::Any, None)?;
            Ok(AggSource::Script(script))
        }
    }
}

#[derive(Debug)]
struct MetricHandler {
    name: String,
    id: String,
    kind: MetricKind,
    source: AggSource,
}

impl AggHandler for MetricHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn aggregations(&self, aggs: &mut AggMap) -> TsqlResult<()> {
        aggs.entry(self.id.clone()).or_insert_with(|| Agg::Metric {
            kind: self.kind,
            source: self.source.clone(),
        });
        Ok(())
    }

    fn extract(&self, aggs: &Aggregations, _bucket: &BucketInfo) -> TsqlResult<Value> {
        match aggs.value_metric(&self.id) {
            None => Err(TsqlError::assemble_error(format!(
                "invalid {} aggregation {}",
                self.name, self.id
            ))),
            // a bucket with no values reads as zero
            Some(None) => Ok(Value::Float(0.0)),
            Some(Some(v)) => Ok(Value::Float(v)),
        }
    }
}

#[derive(Debug)]
struct PercentileHandler {
    name: String,
    id: String,
    percent: f64,
    source: AggSource,
}

impl AggHandler for PercentileHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn aggregations(&self, aggs: &mut AggMap) -> TsqlResult<()> {
        aggs.entry(self.id.clone()).or_insert_with(|| Agg::Percentiles {
            source: self.source.clone(),
            percents: vec![self.percent],
        });
        Ok(())
    }

    fn extract(&self, aggs: &Aggregations, _bucket: &BucketInfo) -> TsqlResult<Value> {
        match aggs.percentile(&self.id) {
            None => Err(TsqlError::assemble_error(format!(
                "invalid {} aggregation {}",
                self.name, self.id
            ))),
            Some(None) => Ok(Value::Null),
            Some(Some(v)) => Ok(Value::Float(v)),
        }
    }
}

/// Inter-bucket difference of a counter-style field, backed by a `min`
/// metric per bucket. `rate` divides the delta by the bucket width in
/// seconds.
#[derive(Debug)]
struct DiffHandler {
    id: String,
    rate: bool,
    source: AggSource,
}

impl AggHandler for DiffHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn aggregations(&self, aggs: &mut AggMap) -> TsqlResult<()> {
        aggs.entry(self.id.clone()).or_insert_with(|| Agg::Metric {
            kind: MetricKind::Min,
            source: self.source.clone(),
        });
        Ok(())
    }

    fn extract(&self, aggs: &Aggregations, bucket: &BucketInfo) -> TsqlResult<Value> {
        let this = match aggs.value_metric(&self.id) {
            None => {
                return Err(TsqlError::assemble_error(format!(
                    "invalid diff aggregation {}",
                    self.id
                )))
            }
            Some(None) => return Ok(Value::Int(0)),
            Some(Some(v)) => v,
        };
        let next = match bucket.next {
            Some(next) => next,
            None => return Ok(Value::Int(0)),
        };
        match next.value_metric(&self.id) {
            Some(Some(nv)) => {
                if self.rate {
                    let seconds = bucket.interval_ns as f64 / 1_000_000_000.0;
                    if seconds == 0.0 {
                        return Ok(Value::Null);
                    }
                    Ok(Value::Float((nv - this) / seconds))
                } else {
                    Ok(Value::Float(nv - this))
                }
            }
            _ => Ok(Value::Int(0)),
        }
    }

    fn pairwise(&self) -> bool {
        true
    }
}

/// `first` / `last` / `value`: a size-1 top-hits sorted by the time key,
/// extracting one field from the representative document.
#[derive(Debug)]
struct SourceFieldHandler {
    name: String,
    id: String,
    field: String,
    sort_field: String,
    ascending: bool,
}

impl AggHandler for SourceFieldHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn aggregations(&self, aggs: &mut AggMap) -> TsqlResult<()> {
        aggs.entry(self.id.clone()).or_insert_with(|| Agg::TopHits {
            size: 1,
            sort_field: self.sort_field.clone(),
            ascending: self.ascending,
            include: Some(vec![self.field.clone()]),
        });
        Ok(())
    }

    fn extract(&self, aggs: &Aggregations, _bucket: &BucketInfo) -> TsqlResult<Value> {
        let docs = aggs.top_hits(&self.id).ok_or_else(|| {
            TsqlError::assemble_error(format!(
                "invalid {} aggregation {}",
                self.name, self.id
            ))
        })?;
        match docs.first() {
            Some(doc) => {
                let flat = FlatDoc::from_json(doc);
                Ok(flat.get(&self.field).cloned().unwrap_or(Value::Null))
            }
            None => Ok(Value::Null),
        }
    }
}
