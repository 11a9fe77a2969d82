/*!
# Statement Translator

Compiles a parsed select statement into a [`Query`]: the sources, the
boolean filter, the search request with its nested aggregation tree, and
one column handler per projected field.

The translation walk mirrors the statement shape:

1. `FROM` resolves to a flat measurement list (sub-queries and regex
   sources are rejected)
2. the base filter combines the mandatory time-range clause, the
   externally supplied filter, and the translated `WHERE` condition
3. `SELECT` fields register aggregate calls (deduplicated by call
   identity) and collect the projection column set
4. `GROUP BY` builds at most one of `time()` / `range()` plus one terms
   aggregation over the remaining dimensions
5. `ORDER BY` orders terms groups by registered aggregates, or sorts raw
   documents by fields and scripts
6. the final request is `size=0` plus aggregations when anything groups
   or aggregates, a paged document search otherwise
*/

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;

use crate::aggregates::{AggEnv, AggHandler, AggRegistry, FuncFlag};
use crate::ast::{
    Expr, Field, IdentifierType, MeasurementSource, Reference, SelectStatement, SortField,
};
use crate::error::{TsqlError, TsqlResult};
use crate::functions::{FuncContext, FunctionRegistry};
use crate::model::{
    call_id, expr_string_and_flag, key_name, Column, ColumnFlag, Source, TimeUnit, DEFAULT_LIMIT,
    TIMESTAMP_KEY,
};
use crate::script::{literal_value, script_expression};
use crate::search::{
    Agg, AggMap, BoolQuery, RangeQuery, SearchQuery, SearchSource, SortSpec,
};
use crate::value::{Operator, Value};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: i64 = 3_600 * NANOS_PER_SECOND;

/// Default cap on the number of time buckets one query may produce.
pub const DEFAULT_MAX_TIME_POINTS: i64 = 512;

/// Bitmask of the translation paths a statement took.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlag(pub u32);

impl QueryFlag {
    pub const NONE: QueryFlag = QueryFlag(0);
    /// At least one plain document field is projected.
    pub const COLUMNS: QueryFlag = QueryFlag(1);
    /// A `*` projection.
    pub const ALL_COLUMNS: QueryFlag = QueryFlag(1 << 1);
    /// The statement groups by at least one dimension.
    pub const DIMENSIONS: QueryFlag = QueryFlag(1 << 2);
    /// The statement calls at least one aggregate.
    pub const AGGS: QueryFlag = QueryFlag(1 << 3);
    /// Grouped by the `time()` histogram.
    pub const GROUP_BY_TIME: QueryFlag = QueryFlag(1 << 4);
    /// Grouped by the `range()` aggregation.
    pub const GROUP_BY_RANGE: QueryFlag = QueryFlag(1 << 5);

    pub fn contains(&self, other: QueryFlag) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: QueryFlag) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for QueryFlag {
    type Output = QueryFlag;
    fn bitor(self, rhs: QueryFlag) -> QueryFlag {
        QueryFlag(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryFlag {
    fn bitor_assign(&mut self, rhs: QueryFlag) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for QueryFlag {
    type Output = QueryFlag;
    fn bitand(self, rhs: QueryFlag) -> QueryFlag {
        QueryFlag(self.0 & rhs.0)
    }
}

/// A named shared aggregation registered through `scope(call, 'name')`.
pub(crate) struct ScopeField {
    pub call: Expr,
    pub handler: Option<Box<dyn AggHandler>>,
}

/// Per-query state threaded from translation into result assembly.
///
/// A context belongs to exactly one query execution; it is not reusable.
pub struct QueryContext {
    pub(crate) start: i64,
    pub(crate) end: i64,
    pub(crate) original_time_unit: TimeUnit,
    pub(crate) target_time_unit: TimeUnit,
    pub(crate) time_key: String,
    pub(crate) max_time_points: i64,
    /// Adjusted histogram bucket width in nanoseconds; zero when the
    /// statement does not group by time.
    pub(crate) interval_ns: i64,
    pub(crate) now: DateTime<Utc>,
    /// Canonical texts of grouped dimension expressions.
    pub(crate) dimensions: HashSet<String>,
    pub(crate) scopes: HashMap<String, HashMap<String, ScopeField>>,
    /// Live row counter during assembly.
    pub(crate) row: i64,
}

impl QueryContext {
    fn new(cfg: &ContextConfig) -> Self {
        QueryContext {
            start: cfg.start,
            end: cfg.end,
            original_time_unit: cfg.original_time_unit,
            target_time_unit: cfg.target_time_unit,
            time_key: cfg.time_key.clone(),
            max_time_points: cfg.max_time_points,
            interval_ns: 0,
            now: Utc::now(),
            dimensions: HashSet::new(),
            scopes: HashMap::new(),
            row: 0,
        }
    }

    pub fn interval_ns(&self) -> i64 {
        self.interval_ns
    }
}

impl FuncContext for QueryContext {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn range(&self, convert: bool) -> (i64, i64) {
        if convert && self.original_time_unit != TimeUnit::Unset {
            (
                self.start / self.original_time_unit.nanos(),
                self.end / self.original_time_unit.nanos(),
            )
        } else {
            (self.start, self.end)
        }
    }

    fn original_time_unit(&self) -> TimeUnit {
        self.original_time_unit
    }

    fn target_time_unit(&self) -> TimeUnit {
        self.target_time_unit
    }

    fn time_key(&self) -> &str {
        &self.time_key
    }

    fn row_num(&self) -> i64 {
        self.row
    }

    fn time_bucket_key(&self) -> Option<i64> {
        None
    }

    fn range_bucket(&self) -> Option<(Option<f64>, Option<f64>)> {
        None
    }

    fn scope_value(&self, scope: &str, _call: &Expr) -> TsqlResult<Value> {
        Err(TsqlError::evaluation_error(format!(
            "not found scope '{}'",
            scope
        )))
    }
}

/// One projected field bound to its column metadata and the aggregate
/// handlers its expression references.
pub struct ColumnHandler {
    pub(crate) field: Field,
    pub(crate) col: Column,
    pub(crate) fns: HashMap<String, Box<dyn AggHandler>>,
    pub(crate) all_columns: bool,
}

/// Schema callback used by the all-columns raw path; returning `None`
/// falls back to inferring columns from the returned documents.
pub type SchemaProvider = Arc<dyn Fn(&[Source]) -> Option<Vec<Column>> + Send + Sync>;

struct ContextConfig {
    start: i64,
    end: i64,
    original_time_unit: TimeUnit,
    target_time_unit: TimeUnit,
    time_key: String,
    max_time_points: i64,
}

/// The translated unit: one select statement compiled into a search
/// request plus everything assembly needs afterwards.
pub struct Query {
    pub(crate) sources: Vec<Source>,
    pub(crate) stmt: SelectStatement,
    pub(crate) search: Option<SearchSource>,
    pub(crate) bool_query: BoolQuery,
    pub(crate) columns: Vec<ColumnHandler>,
    pub(crate) flag: QueryFlag,
    pub(crate) ctx: QueryContext,
    pub(crate) functions: Arc<FunctionRegistry>,
    pub(crate) aggregates: Arc<AggRegistry>,
    pub(crate) schema_provider: Option<SchemaProvider>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sources", &self.sources)
            .field("flag", &self.flag)
            .finish_non_exhaustive()
    }
}

impl Query {
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The compiled request, or `None` when the statement needs no
    /// backend round-trip.
    pub fn search_source(&self) -> Option<&SearchSource> {
        self.search.as_ref()
    }

    /// JSON request body for the backend.
    pub fn request_body(&self) -> Option<serde_json::Value> {
        self.search.as_ref().map(|s| s.to_json())
    }

    /// The compiled boolean filter alone.
    pub fn bool_query(&self) -> &BoolQuery {
        &self.bool_query
    }

    pub fn flag(&self) -> QueryFlag {
        self.flag
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }
}

/// Entry point: configures and runs translation for one query text.
///
/// `start`/`end` are always nanoseconds; unit conversions happen inside.
pub struct Parser {
    text: String,
    params: HashMap<String, Value>,
    filter: Option<BoolQuery>,
    cfg: ContextConfig,
    functions: Arc<FunctionRegistry>,
    aggregates: Arc<AggRegistry>,
    schema_provider: Option<SchemaProvider>,
}

impl Parser {
    pub fn new(start: i64, end: i64, text: impl Into<String>) -> Self {
        Parser {
            text: text.into(),
            params: HashMap::new(),
            filter: None,
            cfg: ContextConfig {
                start,
                end,
                original_time_unit: TimeUnit::Nanosecond,
                target_time_unit: TimeUnit::Unset,
                time_key: TIMESTAMP_KEY.to_string(),
                max_time_points: DEFAULT_MAX_TIME_POINTS,
            },
            functions: Arc::new(FunctionRegistry::new()),
            aggregates: Arc::new(AggRegistry::new()),
            schema_provider: None,
        }
    }

    /// Externally supplied filter ANDed into every statement.
    pub fn with_filter(mut self, filter: BoolQuery) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Bound parameters substituted for `$name` placeholders.
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Unit stored timestamps are expressed in.
    pub fn with_original_time_unit(mut self, unit: TimeUnit) -> Self {
        self.cfg.original_time_unit = unit;
        self
    }

    /// Unit caller-facing timestamps should be converted to.
    pub fn with_target_time_unit(mut self, unit: TimeUnit) -> Self {
        self.cfg.target_time_unit = unit;
        self
    }

    /// Name of the timestamp field in stored documents.
    pub fn with_time_key(mut self, key: impl Into<String>) -> Self {
        self.cfg.time_key = key.into();
        self
    }

    /// Cap on the bucket count when grouping by time.
    pub fn with_max_time_points(mut self, points: i64) -> Self {
        self.cfg.max_time_points = points;
        self
    }

    /// Inject non-default function/aggregate registries.
    pub fn with_registries(
        mut self,
        functions: Arc<FunctionRegistry>,
        aggregates: Arc<AggRegistry>,
    ) -> Self {
        self.functions = functions;
        self.aggregates = aggregates;
        self
    }

    /// Schema callback for wildcard projections.
    pub fn with_schema_provider(mut self, provider: SchemaProvider) -> Self {
        self.schema_provider = Some(provider);
        self
    }

    /// Translate every statement in the query text.
    pub fn parse_query(&self) -> TsqlResult<Vec<Query>> {
        let statements = crate::parser::parse_statements(&self.text, &self.params)?;
        let mut queries = Vec::with_capacity(statements.len());
        for stmt in statements {
            queries.push(self.translate_select(stmt)?);
        }
        Ok(queries)
    }

    /// Translate only FROM / WHERE / ORDER BY / paging of the first
    /// statement: a raw document search with no column machinery.
    pub fn parse_raw_query(&self) -> TsqlResult<(Vec<Source>, BoolQuery, SearchSource)> {
        let statements = crate::parser::parse_statements(&self.text, &self.params)?;
        let stmt = statements.into_iter().next().ok_or_else(|| {
            TsqlError::translate_error("not found query statements")
        })?;
        let ctx = QueryContext::new(&self.cfg);
        let sources = translate_sources(&stmt.sources)?;
        let query = self.base_filter(&ctx, &stmt)?;
        let mut search = SearchSource::new(query.clone());
        search.from = Some(stmt.offset.unwrap_or(0).max(0));
        search.size = Some(stmt.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT));
        search.sorts = self.raw_sorts(&ctx, &stmt.sorts)?;
        Ok((sources, query, search))
    }

    fn base_filter(&self, ctx: &QueryContext, stmt: &SelectStatement) -> TsqlResult<BoolQuery> {
        let (start, end) = ctx.range(true);
        let mut query = BoolQuery::new();
        query.filter(SearchQuery::Range(
            RangeQuery::new(ctx.time_key.clone()).gte(start).lte(end),
        ));
        if let Some(filter) = &self.filter {
            query.filter(SearchQuery::Bool(filter.clone()));
        }
        if let Some(cond) = &stmt.condition {
            let mut bq = BoolQuery::new();
            self.translate_condition(ctx, cond, &mut bq)?;
            query.filter(SearchQuery::Bool(bq));
        }
        Ok(query)
    }

    fn translate_select(&self, stmt: SelectStatement) -> TsqlResult<Query> {
        let mut ctx = QueryContext::new(&self.cfg);

        let sources = translate_sources(&stmt.sources)?;
        let bool_query = self.base_filter(&ctx, &stmt)?;

        let limit = stmt.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT);
        let offset = stmt.offset.filter(|o| *o > 0).unwrap_or(0);

        // select fields
        let mut select_aggs = AggMap::new();
        let mut projection: BTreeSet<String> = BTreeSet::new();
        let mut handlers: Vec<ColumnHandler> = Vec::with_capacity(stmt.fields.len());
        let mut all_columns = false;
        for field in &stmt.fields {
            let h = self.translate_field(&mut ctx, field, &mut select_aggs, &mut projection)?;
            if h.all_columns {
                all_columns = true;
            }
            handlers.push(h);
        }

        let mut flag = QueryFlag::NONE;

        // group by and order by
        let mut group: Option<GroupSpec> = None;
        if !stmt.dimensions.is_empty() {
            flag |= QueryFlag::DIMENSIONS;
            let spec = self.translate_dimensions(
                &mut ctx,
                &stmt.dimensions,
                &stmt.sorts,
                offset,
                limit,
                &mut select_aggs,
            )?;
            if spec.flag.contains(ColumnFlag::GROUP_BY_INTERVAL) {
                flag |= QueryFlag::GROUP_BY_TIME;
            } else if spec.flag.contains(ColumnFlag::GROUP_BY_RANGE) {
                flag |= QueryFlag::GROUP_BY_RANGE;
            }
            group = Some(spec);
        }

        if !select_aggs.is_empty() {
            flag |= QueryFlag::AGGS;
        }
        if !projection.is_empty() {
            flag |= QueryFlag::COLUMNS;
        }
        if all_columns {
            flag |= QueryFlag::ALL_COLUMNS;
            if flag.intersects(QueryFlag::DIMENSIONS | QueryFlag::AGGS) {
                return Err(TsqlError::translate_error(
                    "wildcard field is not supported with aggregation or grouping",
                ));
            }
        }

        // global scopes attach at the top level
        let mut global_aggs = AggMap::new();
        self.setup_scope_aggs(&mut ctx, "global", &mut global_aggs)?;

        // mark grouped and sorted columns, prepend the synthetic lead column
        for h in &mut handlers {
            if ctx.dimensions.contains(&h.col.key) {
                h.col.flag |= ColumnFlag::GROUP_BY;
            }
        }
        for sort in &stmt.sorts {
            if let Some(expr) = &sort.expr {
                let (key, _) = expr_string_and_flag(expr, IdentifierType::Any);
                for h in &mut handlers {
                    if h.col.key == key {
                        h.col.flag |= ColumnFlag::ORDER_BY;
                    }
                }
            }
        }
        if flag.contains(QueryFlag::GROUP_BY_TIME) {
            handlers.insert(0, synthetic_column("time"));
        } else if flag.contains(QueryFlag::GROUP_BY_RANGE) {
            handlers.insert(0, synthetic_column("range"));
        }

        // final request
        let search = if flag == QueryFlag::NONE {
            None
        } else if flag.intersects(QueryFlag::DIMENSIONS | QueryFlag::AGGS) {
            let mut innermost = select_aggs;
            if flag.contains(QueryFlag::ALL_COLUMNS) {
                innermost.insert(
                    "columns".to_string(),
                    columns_top_hits(&ctx.time_key, None),
                );
            } else if flag.contains(QueryFlag::COLUMNS) {
                let cols: Vec<String> = projection.iter().cloned().collect();
                innermost.insert(
                    "columns".to_string(),
                    columns_top_hits(&ctx.time_key, Some(cols)),
                );
            }

            let mut root = AggMap::new();
            match group {
                None => {
                    root = innermost;
                    root.append(&mut global_aggs);
                }
                Some(g) => {
                    root.append(&mut global_aggs);
                    attach_group(&mut root, g, innermost);
                }
            }
            let mut search = SearchSource::new(bool_query.clone());
            search.size = Some(0);
            search.aggs = root;
            Some(search)
        } else {
            let mut search = SearchSource::new(bool_query.clone());
            search.from = Some(offset);
            search.size = Some(limit);
            search.sorts = self.raw_sorts(&ctx, &stmt.sorts)?;
            Some(search)
        };

        Ok(Query {
            sources,
            stmt,
            search,
            bool_query,
            columns: handlers,
            flag,
            ctx,
            functions: Arc::clone(&self.functions),
            aggregates: Arc::clone(&self.aggregates),
            schema_provider: self.schema_provider.clone(),
        })
    }

    fn translate_field(
        &self,
        ctx: &mut QueryContext,
        field: &Field,
        aggs: &mut AggMap,
        projection: &mut BTreeSet<String>,
    ) -> TsqlResult<ColumnHandler> {
        if matches!(field.expr.unwrap_paren(), Expr::Wildcard) {
            return Ok(ColumnHandler {
                field: field.clone(),
                col: Column {
                    name: "*".to_string(),
                    key: "*".to_string(),
                    flag: ColumnFlag::NONE,
                },
                fns: HashMap::new(),
                all_columns: true,
            });
        }

        let mut fns: HashMap<String, Box<dyn AggHandler>> = HashMap::new();
        self.collect_field_aggs(ctx, &field.expr, aggs, &mut fns)?;
        collect_field_refs(&field.expr, self.aggregates.as_ref(), projection);

        let (key, mut col_flag) = expr_string_and_flag(&field.expr, IdentifierType::Any);
        if !fns.is_empty() {
            col_flag |= ColumnFlag::AGG;
        }
        Ok(ColumnHandler {
            field: field.clone(),
            col: Column {
                name: field.column_name(),
                key,
                flag: col_flag,
            },
            fns,
            all_columns: false,
        })
    }

    /// Register every aggregate call under the field expression, keyed by
    /// call identity so duplicates collapse onto one aggregation node.
    fn collect_field_aggs(
        &self,
        ctx: &mut QueryContext,
        expr: &Expr,
        aggs: &mut AggMap,
        fns: &mut HashMap<String, Box<dyn AggHandler>>,
    ) -> TsqlResult<()> {
        match expr {
            Expr::Call { name, args } => {
                if name == "scope" {
                    return self.register_scope(ctx, args);
                }
                if let Some(define) = self.aggregates.get(name) {
                    if !define.flag.contains(FuncFlag::SELECT) {
                        return Err(TsqlError::translate_error(format!(
                            "not support function '{}' in select",
                            name
                        )));
                    }
                    let id = call_id(expr, IdentifierType::Any);
                    if !fns.contains_key(&id) {
                        let env = AggEnv {
                            ctx,
                            functions: self.functions.as_ref(),
                        };
                        let handler = self.aggregates.create(&env, name, &id, args)?;
                        handler.aggregations(aggs)?;
                        fns.insert(id, handler);
                    }
                } else if self.functions.is_function(name) {
                    for arg in args {
                        self.collect_field_aggs(ctx, arg, aggs, fns)?;
                    }
                }
                Ok(())
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.collect_field_aggs(ctx, lhs, aggs, fns)?;
                self.collect_field_aggs(ctx, rhs, aggs, fns)
            }
            Expr::Paren(inner) => self.collect_field_aggs(ctx, inner, aggs, fns),
            _ => Ok(()),
        }
    }

    /// `scope(call [, 'name'])` defers the inner call to a named shared
    /// aggregation instead of the current level.
    fn register_scope(&self, ctx: &mut QueryContext, args: &[Expr]) -> TsqlResult<()> {
        if args.is_empty() || args.len() > 2 {
            return Err(TsqlError::translate_error("invalid scope args"));
        }
        let inner = match args[0].unwrap_paren() {
            call @ Expr::Call { .. } => call.clone(),
            _ => return Err(TsqlError::translate_error("invalid scope args")),
        };
        let mut scope = "terms".to_string();
        if args.len() == 2 {
            match &args[1] {
                Expr::StringLit(s) if !s.is_empty() => scope = s.clone(),
                Expr::StringLit(_) => {}
                _ => return Err(TsqlError::translate_error("invalid scope args")),
            }
        }
        let id = call_id(&inner, IdentifierType::Any);
        ctx.scopes
            .entry(scope)
            .or_default()
            .entry(id)
            .or_insert_with(|| ScopeField {
                call: inner,
                handler: None,
            });
        Ok(())
    }

    /// Create handlers for every scope field registered under `scope`,
    /// emitting their aggregations into `target`.
    fn setup_scope_aggs(
        &self,
        ctx: &mut QueryContext,
        scope: &str,
        target: &mut AggMap,
    ) -> TsqlResult<()> {
        // the scope table moves aside so the context can serve as the
        // literal-folding environment while handlers are constructed
        let mut scopes = std::mem::take(&mut ctx.scopes);
        let result = self.setup_scope_fields(ctx, scope, scopes.get_mut(scope), target);
        ctx.scopes = scopes;
        result
    }

    fn setup_scope_fields(
        &self,
        ctx: &QueryContext,
        scope: &str,
        fields: Option<&mut HashMap<String, ScopeField>>,
        target: &mut AggMap,
    ) -> TsqlResult<()> {
        let fields = match fields {
            Some(f) => f,
            None => return Ok(()),
        };
        for (id, field) in fields.iter_mut() {
            let (name, args) = match &field.call {
                Expr::Call { name, args } => (name.clone(), args.clone()),
                _ => {
                    return Err(TsqlError::translate_error(format!(
                        "invalid expression for scope '{}'",
                        scope
                    )))
                }
            };
            let define = self.aggregates.get(&name).ok_or_else(|| {
                TsqlError::translate_error(format!("invalid expression for scope '{}'", scope))
            })?;
            if !define.flag.contains(FuncFlag::SELECT) {
                return Err(TsqlError::translate_error(format!(
                    "not support function '{}' in scope '{}'",
                    name, scope
                )));
            }
            let env = AggEnv {
                ctx,
                functions: self.functions.as_ref(),
            };
            let handler = self.aggregates.create(&env, &name, id, &args)?;
            handler.aggregations(target)?;
            field.handler = Some(handler);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn translate_dimensions(
        &self,
        ctx: &mut QueryContext,
        dimensions: &[Expr],
        sorts: &[SortField],
        offset: i64,
        limit: i64,
        select_aggs: &mut AggMap,
    ) -> TsqlResult<GroupSpec> {
        let mut histogram: Option<Agg> = None;
        let mut range: Option<Agg> = None;
        let mut scripts: Vec<String> = Vec::new();
        let mut flag = ColumnFlag::NONE;

        for dim in dimensions {
            if let Expr::Call { name, args } = dim.unwrap_paren() {
                if name == "time" {
                    if histogram.is_some() {
                        return Err(TsqlError::translate_error(
                            "not support multi 'time' function in group by",
                        ));
                    }
                    if range.is_some() {
                        return Err(TsqlError::translate_error(
                            "'time' and 'range' function conflict in group by",
                        ));
                    }
                    let mut interval = 0i64;
                    if args.len() == 1 {
                        match &args[0] {
                            Expr::DurationLit(d) if *d >= NANOS_PER_SECOND => interval = *d,
                            other => {
                                return Err(TsqlError::translate_error(format!(
                                    "invalid arg '{}' in function 'time'",
                                    other
                                )))
                            }
                        }
                    }
                    let (start, end) = ctx.range(true);
                    let interval =
                        adjust_interval(ctx.start, ctx.end, interval, ctx.max_time_points);
                    ctx.interval_ns = interval;
                    let es_interval = interval / ctx.original_time_unit.nanos();
                    histogram = Some(Agg::Histogram {
                        field: ctx.time_key.clone(),
                        interval: es_interval as f64,
                        offset: start as f64,
                        min_doc_count: 0,
                        extended_bounds: (start as f64, end as f64),
                        subs: AggMap::new(),
                    });
                    flag |= ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL;
                    continue;
                } else if name == "range" {
                    if range.is_some() {
                        return Err(TsqlError::translate_error(
                            "not support multi 'range' function in group by",
                        ));
                    }
                    if histogram.is_some() {
                        return Err(TsqlError::translate_error(
                            "'time' and 'range' function conflict in group by",
                        ));
                    }
                    TsqlError::check_args_min("range", args.len(), 2)?;
                    let key = match args[0].unwrap_paren() {
                        Expr::Reference(r) => key_name(r, IdentifierType::Any),
                        _ => {
                            return Err(TsqlError::translate_error(
                                "args[0] is not reference in 'range' function",
                            ))
                        }
                    };
                    let mut ranges: Vec<(Option<f64>, Option<f64>)> = Vec::new();
                    let mut from: Option<f64> = None;
                    for (i, item) in args[1..].iter().enumerate() {
                        let val = literal_value(ctx, self.functions.as_ref(), item)?
                            .and_then(|v| v.as_f64())
                            .ok_or_else(|| {
                                TsqlError::translate_error(format!(
                                    "args[{}] is not literal in 'range' function",
                                    i + 1
                                ))
                            })?;
                        if i % 2 == 0 {
                            from = Some(val);
                        } else {
                            ranges.push((from.take(), Some(val)));
                        }
                    }
                    if let Some(f) = from.take() {
                        ranges.push((Some(f), None));
                    }
                    range = Some(Agg::Range {
                        field: key,
                        ranges,
                        subs: AggMap::new(),
                    });
                    flag |= ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_RANGE;
                    continue;
                }
            }
            let script =
                script_expression(ctx, self.functions.as_ref(), dim, IdentifierType::Tag, None)?;
            scripts.push(script);
            let (key, _) = expr_string_and_flag(dim, IdentifierType::Tag);
            ctx.dimensions.insert(key);
            flag |= ColumnFlag::GROUP_BY;
        }

        let grouped = histogram.is_some() || range.is_some();
        let mut terms: Option<(String, i64)> = None;
        let mut terms_aggs = AggMap::new();
        let mut terms_orders: Vec<(String, bool)> = Vec::new();
        if !scripts.is_empty() {
            let script = scripts.join(" + '/' + ");
            terms = Some((script, offset + limit));
            // time/range grouping keeps its own leaf aggregations; the
            // terms level then carries only ordering and scope aggs
            let order_target: &mut AggMap = if grouped {
                &mut terms_aggs
            } else {
                select_aggs
            };
            for sort in sorts {
                let expr = sort.expr.as_ref().ok_or_else(|| {
                    TsqlError::translate_error("invalid order by expression")
                })?;
                let id = self.setup_terms_order(ctx, expr, order_target)?;
                terms_orders.push((id, sort.ascending));
            }
            self.setup_scope_aggs(ctx, "terms", order_target)?;
        } else if grouped && !sorts.is_empty() {
            return Err(TsqlError::translate_error(
                "not support order by in this case",
            ));
        }

        Ok(GroupSpec {
            terms,
            terms_aggs,
            terms_orders,
            histogram,
            range,
            flag,
        })
    }

    /// Register the aggregate an ORDER BY entry sorts groups by.
    fn setup_terms_order(
        &self,
        ctx: &mut QueryContext,
        expr: &Expr,
        aggs: &mut AggMap,
    ) -> TsqlResult<String> {
        match expr.unwrap_paren() {
            call @ Expr::Call { name, args } => {
                let define = self.aggregates.get(name).ok_or_else(|| {
                    TsqlError::translate_error("invalid order by expression")
                })?;
                if !define.flag.contains(FuncFlag::ORDER_BY) {
                    return Err(TsqlError::translate_error(format!(
                        "not support function '{}' in order by",
                        name
                    )));
                }
                let id = call_id(call, IdentifierType::Any);
                if !aggs.contains_key(&id) {
                    let env = AggEnv {
                        ctx,
                        functions: self.functions.as_ref(),
                    };
                    let handler = self.aggregates.create(&env, name, &id, args)?;
                    handler.aggregations(aggs)?;
                }
                Ok(id)
            }
            _ => Err(TsqlError::translate_error("invalid order by expression")),
        }
    }

    /// Sort clauses for the raw (ungrouped) document search.
    fn raw_sorts(&self, ctx: &QueryContext, sorts: &[SortField]) -> TsqlResult<Vec<SortSpec>> {
        if sorts.is_empty() {
            return Ok(vec![SortSpec::Field {
                field: ctx.time_key.clone(),
                ascending: false,
            }]);
        }
        let mut out = Vec::with_capacity(sorts.len());
        for sort in sorts {
            match &sort.expr {
                None => out.push(SortSpec::Field {
                    field: ctx.time_key.clone(),
                    ascending: sort.ascending,
                }),
                Some(expr) => match expr.unwrap_paren() {
                    Expr::Reference(r) => out.push(SortSpec::Field {
                        field: key_name(r, IdentifierType::Any),
                        ascending: sort.ascending,
                    }),
                    other => {
                        // hand anything else to the backend as a script
                        let script = script_expression(
                            ctx,
                            self.functions.as_ref(),
                            other,
                            IdentifierType::Any,
                            None,
                        )?;
                        out.push(SortSpec::Script {
                            script,
                            ascending: sort.ascending,
                        });
                    }
                },
            }
        }
        Ok(out)
    }

    fn translate_condition(
        &self,
        ctx: &QueryContext,
        cond: &Expr,
        query: &mut BoolQuery,
    ) -> TsqlResult<()> {
        match cond {
            Expr::Binary { op, lhs, rhs } => {
                if *op == Operator::And || *op == Operator::Or {
                    let mut left = BoolQuery::new();
                    self.translate_condition(ctx, lhs, &mut left)?;
                    let mut right = BoolQuery::new();
                    self.translate_condition(ctx, rhs, &mut right)?;
                    if *op == Operator::And {
                        query.filter(SearchQuery::Bool(left));
                        query.filter(SearchQuery::Bool(right));
                    } else {
                        query.should(SearchQuery::Bool(left));
                        query.should(SearchQuery::Bool(right));
                    }
                    return Ok(());
                }
                if op.is_comparison() {
                    let lref = as_reference(lhs);
                    let rref = as_reference(rhs);
                    if let (Some(r), None) = (lref, rref) {
                        if self.key_condition(ctx, r, *op, rhs, query)? {
                            return Ok(());
                        }
                    } else if let (None, Some(r)) = (lref, rref) {
                        if self.key_condition(ctx, r, op.reversed(), lhs, query)? {
                            return Ok(());
                        }
                    }
                }
            }
            Expr::Paren(inner) => return self.translate_condition(ctx, inner, query),
            _ => {}
        }
        self.script_condition(ctx, cond, query)
    }

    /// Try the native clause for `field OP literal`; false means the
    /// caller must fall back to a script.
    fn key_condition(
        &self,
        ctx: &QueryContext,
        r: &Reference,
        op: Operator,
        val: &Expr,
        query: &mut BoolQuery,
    ) -> TsqlResult<bool> {
        let value = match literal_value(ctx, self.functions.as_ref(), val)? {
            Some(v) => v,
            None => return Ok(false),
        };
        // tags win when the reference is ambiguous
        let key = key_name(r, IdentifierType::Tag);
        match op {
            Operator::Eq => {
                query.filter(SearchQuery::Term {
                    field: key,
                    value: value.to_json(),
                });
            }
            Operator::Neq => {
                query.must_not(SearchQuery::Term {
                    field: key,
                    value: value.to_json(),
                });
            }
            Operator::EqRegex | Operator::NeqRegex => {
                let pattern = match &value {
                    Value::Regex(re) => re.as_str().replace('/', "\\/"),
                    other => {
                        return Err(TsqlError::translate_error(format!(
                            "invalid regexp '{}'",
                            other
                        )))
                    }
                };
                if op == Operator::EqRegex {
                    query.filter(SearchQuery::Regexp {
                        field: key,
                        pattern,
                    });
                } else {
                    query.must_not(SearchQuery::Regexp {
                        field: key,
                        pattern,
                    });
                }
            }
            Operator::Lt => {
                query.filter(SearchQuery::Range(RangeQuery::new(key).lt(value.to_json())));
            }
            Operator::Lte => {
                query.filter(SearchQuery::Range(
                    RangeQuery::new(key).lte(value.to_json()),
                ));
            }
            Operator::Gt => {
                query.filter(SearchQuery::Range(RangeQuery::new(key).gt(value.to_json())));
            }
            Operator::Gte => {
                query.filter(SearchQuery::Range(
                    RangeQuery::new(key).gte(value.to_json()),
                ));
            }
            other => {
                return Err(TsqlError::translate_error(format!(
                    "not support operator '{}'",
                    other
                )))
            }
        }
        Ok(true)
    }

    /// Scripted fallback for conditions the native clauses cannot carry.
    /// Every field the script touches gains an exists filter.
    fn script_condition(
        &self,
        ctx: &QueryContext,
        cond: &Expr,
        query: &mut BoolQuery,
    ) -> TsqlResult<()> {
        let mut fields = HashSet::new();
        let script = script_expression(
            ctx,
            self.functions.as_ref(),
            cond,
            IdentifierType::Tag,
            Some(&mut fields),
        )?;
        if !script.is_empty() {
            let mut sorted: Vec<String> = fields.into_iter().collect();
            sorted.sort();
            for field in sorted {
                query.filter(SearchQuery::Exists { field });
            }
            query.filter(SearchQuery::Script { script });
        }
        Ok(())
    }
}

fn as_reference(expr: &Expr) -> Option<&Reference> {
    match expr.unwrap_paren() {
        Expr::Reference(r) => Some(r),
        _ => None,
    }
}

/// Collect every document key the field expression reads outside of
/// aggregate calls; this is the source projection for the representative
/// top-hits document.
fn collect_field_refs(expr: &Expr, aggregates: &AggRegistry, cols: &mut BTreeSet<String>) {
    match expr {
        Expr::Call { name, args } => {
            if name == "scope" || aggregates.is_aggregate(name) {
                return;
            }
            for arg in args {
                collect_field_refs(arg, aggregates, cols);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_field_refs(lhs, aggregates, cols);
            collect_field_refs(rhs, aggregates, cols);
        }
        Expr::Paren(inner) => collect_field_refs(inner, aggregates, cols),
        Expr::Reference(r) => {
            cols.insert(key_name(r, IdentifierType::Any));
        }
        _ => {}
    }
}

/// Everything GROUP BY produced, before the aggregation tree is nested.
struct GroupSpec {
    terms: Option<(String, i64)>,
    terms_aggs: AggMap,
    terms_orders: Vec<(String, bool)>,
    histogram: Option<Agg>,
    range: Option<Agg>,
    flag: ColumnFlag,
}

/// Nest the grouping levels: terms wraps histogram/range wraps the leaf
/// aggregations; without terms the time/range grouping is the root.
fn attach_group(root: &mut AggMap, spec: GroupSpec, innermost: AggMap) {
    let GroupSpec {
        terms,
        mut terms_aggs,
        terms_orders,
        histogram,
        range,
        ..
    } = spec;
    match terms {
        Some((script, size)) => {
            let mut subs = AggMap::new();
            if let Some(mut hist) = histogram {
                if let Agg::Histogram { subs: hs, .. } = &mut hist {
                    *hs = innermost;
                }
                subs.append(&mut terms_aggs);
                subs.insert("histogram".to_string(), hist);
            } else if let Some(mut rng) = range {
                if let Agg::Range { subs: rs, .. } = &mut rng {
                    *rs = innermost;
                }
                subs.append(&mut terms_aggs);
                subs.insert("range".to_string(), rng);
            } else {
                subs = innermost;
                subs.append(&mut terms_aggs);
            }
            root.insert(
                "term".to_string(),
                Agg::Terms {
                    script,
                    size,
                    orders: terms_orders,
                    subs,
                },
            );
        }
        None => {
            if let Some(mut hist) = histogram {
                if let Agg::Histogram { subs: hs, .. } = &mut hist {
                    *hs = innermost;
                }
                root.insert("histogram".to_string(), hist);
            } else if let Some(mut rng) = range {
                if let Agg::Range { subs: rs, .. } = &mut rng {
                    *rs = innermost;
                }
                root.insert("range".to_string(), rng);
            }
        }
    }
}

fn columns_top_hits(time_key: &str, include: Option<Vec<String>>) -> Agg {
    Agg::TopHits {
        size: 1,
        sort_field: time_key.to_string(),
        ascending: false,
        include,
    }
}

fn synthetic_column(name: &str) -> ColumnHandler {
    let flag = if name == "time" {
        ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL
    } else {
        ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_RANGE
    };
    ColumnHandler {
        field: Field {
            expr: Expr::Call {
                name: name.to_string(),
                args: Vec::new(),
            },
            alias: Some(name.to_string()),
        },
        col: Column {
            name: name.to_string(),
            key: name.to_string(),
            flag,
        },
        fns: HashMap::new(),
        all_columns: false,
    }
}

fn translate_sources(sources: &[MeasurementSource]) -> TsqlResult<Vec<Source>> {
    let mut list = Vec::with_capacity(sources.len());
    for source in sources {
        if source.regex.is_some() {
            return Err(TsqlError::translate_error("not support regex source"));
        }
        list.push(Source {
            database: source.database.clone().unwrap_or_default(),
            name: source.name.clone(),
        });
    }
    if list.is_empty() {
        return Err(TsqlError::translate_error("sources not found"));
    }
    Ok(list)
}

/// Widen (or derive) the time-bucket interval so the query never returns
/// more than `points` buckets.
///
/// An unspecified interval scales with the span: under two hours it is
/// one minute, beyond that one minute per two hours of span.
pub fn adjust_interval(start: i64, end: i64, interval: i64, points: i64) -> i64 {
    let duration = end - start;
    if interval == 0 {
        if duration < 2 * NANOS_PER_HOUR {
            return NANOS_PER_MINUTE;
        }
        let d = duration / (2 * NANOS_PER_HOUR);
        return d * NANOS_PER_MINUTE;
    }
    let points = if points <= 0 { 1000 } else { points };
    if interval < duration / points {
        log::debug!(
            "widening interval {}ns to {}ns to honor the {}-point cap",
            interval,
            duration / points,
            points
        );
        return duration / points;
    }
    interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_interval_defaults() {
        // two-hour span falls back to the one-minute minimum
        assert_eq!(
            adjust_interval(0, 2 * NANOS_PER_HOUR, 0, 512),
            NANOS_PER_MINUTE
        );
        // under two hours as well
        assert_eq!(adjust_interval(0, NANOS_PER_HOUR, 0, 512), NANOS_PER_MINUTE);
        // ten hours scales to five minutes
        assert_eq!(
            adjust_interval(0, 10 * NANOS_PER_HOUR, 0, 512),
            5 * NANOS_PER_MINUTE
        );
    }

    #[test]
    fn test_adjust_interval_honors_point_cap() {
        let span = 1000 * NANOS_PER_MINUTE;
        // 1m buckets over 1000 minutes with a 100-point cap widen to 10m
        assert_eq!(
            adjust_interval(0, span, NANOS_PER_MINUTE, 100),
            10 * NANOS_PER_MINUTE
        );
        // a wide-enough interval is untouched
        assert_eq!(
            adjust_interval(0, span, 20 * NANOS_PER_MINUTE, 100),
            20 * NANOS_PER_MINUTE
        );
    }

    #[test]
    fn test_literal_only_select_needs_no_backend() {
        let qs = Parser::new(0, 1_000, "SELECT 1 + 2 FROM m")
            .parse_query()
            .unwrap();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].flag(), QueryFlag::NONE);
        assert!(qs[0].search_source().is_none());
    }

    #[test]
    fn test_raw_query_paging_and_sort() {
        let qs = Parser::new(0, 1_000, "SELECT cpu FROM m LIMIT 5 OFFSET 10")
            .parse_query()
            .unwrap();
        let search = qs[0].search_source().unwrap();
        assert_eq!(search.size, Some(5));
        assert_eq!(search.from, Some(10));
        assert_eq!(
            search.sorts,
            vec![SortSpec::Field {
                field: TIMESTAMP_KEY.to_string(),
                ascending: false,
            }]
        );
        assert!(qs[0].flag().contains(QueryFlag::COLUMNS));
    }

    #[test]
    fn test_where_prefers_native_clauses() {
        let qs = Parser::new(0, 1_000, "SELECT cpu FROM m WHERE host = 'web-1' AND cpu::field > 5")
            .parse_query()
            .unwrap();
        let body = qs[0].request_body().unwrap();
        let cond = &body["query"]["bool"]["filter"][1]["bool"];
        // AND splits into two nested filters
        let left = &cond["filter"][0]["bool"]["filter"][0];
        assert_eq!(left["term"]["tags.host"], "web-1");
        let right = &cond["filter"][1]["bool"]["filter"][0];
        assert_eq!(right["range"]["fields.cpu"]["gt"], 5);
    }

    #[test]
    fn test_where_script_fallback_adds_exists() {
        let qs = Parser::new(0, 1_000, "SELECT cpu FROM m WHERE a::field + b::field > 5")
            .parse_query()
            .unwrap();
        let body = qs[0].request_body().unwrap();
        let clauses = body["query"]["bool"]["filter"][1]["bool"]["filter"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0]["exists"]["field"], "fields.a");
        assert_eq!(clauses[1]["exists"]["field"], "fields.b");
        assert!(clauses[2]["script"]["script"]["source"]
            .as_str()
            .unwrap()
            .contains("doc['fields.a'].value"));
    }

    #[test]
    fn test_group_by_time_histogram_shape() {
        let end = 2 * NANOS_PER_HOUR;
        let qs = Parser::new(0, end, "SELECT max(cpu) FROM m GROUP BY time()")
            .parse_query()
            .unwrap();
        let q = &qs[0];
        assert!(q.flag().contains(QueryFlag::GROUP_BY_TIME));
        assert_eq!(q.context().interval_ns(), NANOS_PER_MINUTE);
        let body = q.request_body().unwrap();
        assert_eq!(body["size"], 0);
        let hist = &body["aggs"]["histogram"]["histogram"];
        assert_eq!(hist["field"], "timestamp");
        assert_eq!(hist["interval"], NANOS_PER_MINUTE as f64);
        assert_eq!(hist["min_doc_count"], 0);
        assert_eq!(hist["extended_bounds"]["max"], end as f64);
        // the synthetic lead column comes first
        assert_eq!(q.columns[0].col.name, "time");
        assert!(q.columns[0]
            .col
            .flag
            .contains(ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL));
        assert!(q.columns[1].col.flag.contains(ColumnFlag::AGG));
    }

    #[test]
    fn test_identical_calls_share_one_aggregation() {
        let qs = Parser::new(
            0,
            1_000,
            "SELECT max(x::field), max(x::field) + 1 FROM m GROUP BY host ORDER BY max(x::field) DESC",
        )
        .parse_query()
        .unwrap();
        let body = qs[0].request_body().unwrap();
        let subs = body["aggs"]["term"]["aggs"].as_object().unwrap();
        // one shared metric node plus the columns top-hits
        let metric_nodes: Vec<_> = subs.keys().filter(|k| k.as_str() != "columns").collect();
        assert_eq!(metric_nodes.len(), 1);
        let order = &body["aggs"]["term"]["terms"]["order"][0];
        assert_eq!(order[metric_nodes[0].as_str()], "desc");
    }

    #[test]
    fn test_group_by_terms_and_time_nests() {
        let qs = Parser::new(
            0,
            10 * NANOS_PER_HOUR,
            "SELECT avg(cpu) FROM m GROUP BY host, time(5m) LIMIT 10",
        )
        .parse_query()
        .unwrap();
        let body = qs[0].request_body().unwrap();
        let terms = &body["aggs"]["term"]["terms"];
        assert!(terms["script"]["source"]
            .as_str()
            .unwrap()
            .contains("tags.host"));
        assert_eq!(terms["size"], 10);
        let hist = &body["aggs"]["term"]["aggs"]["histogram"];
        assert!(hist["histogram"].is_object());
        assert!(hist["aggs"].as_object().unwrap().len() >= 1);
    }

    #[test]
    fn test_conflicting_group_functions_rejected() {
        let err = Parser::new(0, 1_000, "SELECT max(x) FROM m GROUP BY time(1m), range(x, 1.0, 2.0)")
            .parse_query()
            .unwrap_err();
        assert!(err.to_string().contains("conflict"));

        let err = Parser::new(0, 1_000, "SELECT max(x) FROM m GROUP BY time(1m), time(2m)")
            .parse_query()
            .unwrap_err();
        assert!(err.to_string().contains("multi 'time'"));
    }

    #[test]
    fn test_order_by_unregistered_aggregate_rejected() {
        let err = Parser::new(0, 1_000, "SELECT max(x) FROM m GROUP BY host ORDER BY bogus(x)")
            .parse_query()
            .unwrap_err();
        assert!(err.to_string().contains("invalid order by"));

        // diff may not order groups
        let err = Parser::new(0, 1_000, "SELECT max(x) FROM m GROUP BY host ORDER BY diff(x)")
            .parse_query()
            .unwrap_err();
        assert!(err.to_string().contains("not support function 'diff'"));
    }

    #[test]
    fn test_wildcard_with_aggregation_rejected() {
        let err = Parser::new(0, 1_000, "SELECT *, max(x) FROM m")
            .parse_query()
            .unwrap_err();
        assert!(err.to_string().contains("wildcard"));
    }

    #[test]
    fn test_regex_source_rejected() {
        let err = Parser::new(0, 1_000, "SELECT x FROM /cpu.*/")
            .parse_query()
            .unwrap_err();
        assert!(err.to_string().contains("regex source"));
    }

    #[test]
    fn test_time_range_filter_converts_units() {
        let qs = Parser::new(
            1_000_000_000,
            2_000_000_000,
            "SELECT cpu FROM m",
        )
        .parse_query()
        .unwrap();
        let body = qs[0].request_body().unwrap();
        assert_eq!(
            body["query"]["bool"]["filter"][0]["range"]["timestamp"]["gte"],
            1_000_000_000i64
        );

        let qs = Parser::new(1_000_000_000, 2_000_000_000, "SELECT cpu FROM m")
            .with_original_time_unit(TimeUnit::Millisecond)
            .parse_query()
            .unwrap();
        let body = qs[0].request_body().unwrap();
        assert_eq!(
            body["query"]["bool"]["filter"][0]["range"]["timestamp"]["gte"],
            1_000i64
        );
    }

    #[test]
    fn test_scope_global_attaches_at_root() {
        let qs = Parser::new(
            0,
            1_000,
            "SELECT max(x) / scope(max(total::field), 'global') FROM m GROUP BY host",
        )
        .parse_query()
        .unwrap();
        let body = qs[0].request_body().unwrap();
        let root = body["aggs"].as_object().unwrap();
        // the terms tree plus one root-level scope aggregation
        assert!(root.contains_key("term"));
        assert_eq!(root.len(), 2);
    }

    #[test]
    fn test_parse_raw_query_skips_columns() {
        let (sources, _query, search) = Parser::new(0, 1_000, "SELECT max(x) FROM db1.m")
            .parse_raw_query()
            .unwrap();
        assert_eq!(sources[0].database, "db1");
        assert_eq!(sources[0].name, "m");
        assert!(search.aggs.is_empty());
        assert_eq!(search.size, Some(DEFAULT_LIMIT));
    }
}
