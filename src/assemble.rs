/*!
# Result Assembler

Walks a backend response back into the flat, column-oriented
[`ResultSet`] the formatters consume.

Two paths:

- **raw**: every returned document becomes one row; column expressions
  evaluate against the document's flattened dotted-path view, and a
  wildcard projection discovers its column set from a schema callback or,
  failing that, from the returned documents themselves
- **aggregated**: the response's aggregation tree is converted once into
  an explicit [`BucketTree`] and walked by a single visitor — terms
  buckets honor the statement offset, histogram buckets thread their
  previous/next siblings into the extractors, and every leaf yields
  exactly one row

Sibling-bucket context for `diff`/`diffps` travels through explicit
[`BucketInfo`] parameters on the visitor, never through shared state.
*/

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::aggregates::{AggHandler, BucketInfo};
use crate::ast::{Expr, IdentifierType, Reference};
use crate::error::{TsqlError, TsqlResult};
use crate::functions::FuncContext;
use crate::model::{
    call_id, convert_timestamp, key_name, Column, ColumnFlag, ResultSet, TimeUnit,
    FIELDS_PREFIX, TAGS_PREFIX,
};
use crate::response::{
    Aggregations, BucketTree, FlatDoc, SearchResponse, TermsBucket,
};
use crate::translate::{Query, QueryContext, QueryFlag};
use crate::value::{operate, Value};

/// Evaluation surroundings of one output row: the query context plus the
/// bucket path that led to this leaf.
struct EvalScope<'a> {
    ctx: &'a QueryContext,
    doc: Option<&'a FlatDoc>,
    /// Aggregations at the current leaf.
    aggs: Option<&'a Aggregations>,
    /// Aggregations at the response root, for `scope(..., 'global')`.
    root_aggs: &'a Aggregations,
    /// Aggregations of the enclosing terms bucket, for `scope(..., 'terms')`.
    terms_aggs: Option<&'a Aggregations>,
    time_bucket: Option<i64>,
    range_bucket: Option<(Option<f64>, Option<f64>)>,
    bucket: BucketInfo<'a>,
    row: i64,
}

impl FuncContext for EvalScope<'_> {
    fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    fn range(&self, convert: bool) -> (i64, i64) {
        self.ctx.range(convert)
    }

    fn original_time_unit(&self) -> TimeUnit {
        self.ctx.original_time_unit()
    }

    fn target_time_unit(&self) -> TimeUnit {
        self.ctx.target_time_unit()
    }

    fn time_key(&self) -> &str {
        self.ctx.time_key()
    }

    fn row_num(&self) -> i64 {
        self.row
    }

    fn time_bucket_key(&self) -> Option<i64> {
        self.time_bucket
    }

    fn range_bucket(&self) -> Option<(Option<f64>, Option<f64>)> {
        self.range_bucket
    }

    fn scope_value(&self, scope: &str, call: &Expr) -> TsqlResult<Value> {
        let id = call_id(call, IdentifierType::Any);
        let field = self
            .ctx
            .scopes
            .get(scope)
            .and_then(|fields| fields.get(&id))
            .ok_or_else(|| {
                TsqlError::evaluation_error(format!("not found scope '{}'", scope))
            })?;
        let handler = field.handler.as_ref().ok_or_else(|| {
            TsqlError::evaluation_error(format!("not found scope '{}'", scope))
        })?;
        let aggs = if scope == "terms" {
            self.terms_aggs.unwrap_or(self.root_aggs)
        } else {
            self.root_aggs
        };
        handler.extract(aggs, &self.bucket)
    }
}

impl Query {
    /// Assemble the backend response into a result set.
    ///
    /// Consumes the query's single execution: the row counter advances
    /// and the context must not be reused for another response.
    pub fn parse_result(&mut self, resp: &SearchResponse) -> TsqlResult<ResultSet> {
        let (columns, rows, total) = self.assemble(resp)?;
        self.ctx.row = rows.len() as i64;
        Ok(ResultSet {
            total,
            interval: self.ctx.interval_ns(),
            columns,
            rows,
        })
    }

    fn assemble(
        &self,
        resp: &SearchResponse,
    ) -> TsqlResult<(Vec<Column>, Vec<Vec<Value>>, i64)> {
        if self.search.is_none() {
            return self.assemble_literal();
        }
        if self
            .flag
            .intersects(QueryFlag::DIMENSIONS | QueryFlag::AGGS)
        {
            self.assemble_aggregated(resp)
        } else {
            self.assemble_raw(resp)
        }
    }

    /// No backend round-trip happened; emit the single literal row.
    fn assemble_literal(&self) -> TsqlResult<(Vec<Column>, Vec<Vec<Value>>, i64)> {
        let empty = Aggregations::default();
        let scope = EvalScope {
            ctx: &self.ctx,
            doc: None,
            aggs: None,
            root_aggs: &empty,
            terms_aggs: None,
            time_bucket: None,
            range_bucket: None,
            bucket: BucketInfo::default(),
            row: 0,
        };
        let mut row = Vec::with_capacity(self.columns.len());
        for handler in &self.columns {
            row.push(self.eval_expr(&scope, &handler.fns, &handler.field.expr)?);
        }
        let columns = self.columns.iter().map(|h| h.col.clone()).collect();
        Ok((columns, vec![row], 1))
    }

    fn assemble_raw(
        &self,
        resp: &SearchResponse,
    ) -> TsqlResult<(Vec<Column>, Vec<Vec<Value>>, i64)> {
        // expand wildcard handlers into concrete reference columns
        let no_fns: HashMap<String, Box<dyn AggHandler>> = HashMap::new();
        let mut output: Vec<(Column, Expr, &HashMap<String, Box<dyn AggHandler>>)> = Vec::new();
        for handler in &self.columns {
            if handler.all_columns {
                for (col, expr) in self.discover_columns(resp) {
                    output.push((col, expr, &no_fns));
                }
            } else {
                output.push((handler.col.clone(), handler.field.expr.clone(), &handler.fns));
            }
        }

        let empty = Aggregations::default();
        let mut rows = Vec::with_capacity(resp.hits.hits.len());
        for hit in &resp.hits.hits {
            let flat = FlatDoc::from_json(&hit.source);
            let scope = EvalScope {
                ctx: &self.ctx,
                doc: Some(&flat),
                aggs: None,
                root_aggs: &empty,
                terms_aggs: None,
                time_bucket: None,
                range_bucket: None,
                bucket: BucketInfo::default(),
                row: rows.len() as i64,
            };
            let mut row = Vec::with_capacity(output.len());
            for (_, expr, fns) in &output {
                row.push(self.eval_expr(&scope, fns, expr)?);
            }
            rows.push(row);
        }
        let columns = output.into_iter().map(|(col, _, _)| col).collect();
        Ok((columns, rows, resp.hits.total.0))
    }

    /// Column set for a wildcard projection: the schema callback when one
    /// is configured and answers, otherwise the union of every returned
    /// document's keys, sorted by namespace then name.
    fn discover_columns(&self, resp: &SearchResponse) -> Vec<(Column, Expr)> {
        if let Some(provider) = &self.schema_provider {
            if let Some(cols) = provider(&self.sources) {
                return cols
                    .into_iter()
                    .map(|col| {
                        let expr = Expr::Reference(reference_for_key(&col.key));
                        (col, expr)
                    })
                    .collect();
            }
        }
        let mut discovered: Vec<(u8, String, String, ColumnFlag)> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for hit in &resp.hits.hits {
            let flat = FlatDoc::from_json(&hit.source);
            for key in flat.keys() {
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(name) = key.strip_prefix(TAGS_PREFIX) {
                    // internal tags are not user columns
                    if name.starts_with('_') {
                        continue;
                    }
                    discovered.push((
                        0,
                        name.to_string(),
                        key.clone(),
                        ColumnFlag::TAG,
                    ));
                } else if let Some(name) = key.strip_prefix(FIELDS_PREFIX) {
                    discovered.push((
                        1,
                        name.to_string(),
                        key.clone(),
                        ColumnFlag::FIELD,
                    ));
                }
            }
        }
        discovered.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        discovered
            .into_iter()
            .map(|(rank, name, key, flag)| {
                let hint = if rank == 0 {
                    IdentifierType::Tag
                } else {
                    IdentifierType::Field
                };
                let display = match hint {
                    IdentifierType::Tag => format!("{}::tag", name),
                    _ => format!("{}::field", name),
                };
                (
                    Column {
                        name: display,
                        key,
                        flag,
                    },
                    Expr::Reference(Reference::tagged(name, hint)),
                )
            })
            .collect()
    }

    fn assemble_aggregated(
        &self,
        resp: &SearchResponse,
    ) -> TsqlResult<(Vec<Column>, Vec<Vec<Value>>, i64)> {
        let tree = BucketTree::from_aggregations(&resp.aggregations);
        let mut rows: Vec<Vec<Value>> = Vec::new();
        self.walk(&tree, &resp.aggregations, &resp.aggregations, None, &mut rows)?;
        let columns = self.columns.iter().map(|h| h.col.clone()).collect();
        Ok((columns, rows, resp.hits.total.0))
    }

    /// The single visitor over the bucket tree. `aggs` is the
    /// aggregation level the current node was built from.
    fn walk(
        &self,
        node: &BucketTree,
        aggs: &Aggregations,
        root: &Aggregations,
        terms: Option<&TermsBucket>,
        rows: &mut Vec<Vec<Value>>,
    ) -> TsqlResult<()> {
        match node {
            BucketTree::Terms(buckets) => {
                // terms pagination: the request asked for offset+limit
                // groups, the leading offset groups are skipped here
                let offset = self.stmt.offset.unwrap_or(0).max(0) as usize;
                for (bucket, child) in buckets.iter().skip(offset) {
                    self.walk(child, &bucket.aggs, root, Some(bucket), rows)?;
                }
                Ok(())
            }
            BucketTree::Histogram(buckets) => {
                let last = buckets.len().saturating_sub(1);
                for (i, (bucket, _)) in buckets.iter().enumerate() {
                    if i == last && (bucket.doc_count == 0 || self.has_pairwise()) {
                        // the extended-bounds rounding produces a
                        // dangling final bucket; pairwise functions also
                        // have no successor to diff against
                        log::debug!("dropping trailing histogram bucket at {}", bucket.key);
                        continue;
                    }
                    let info = BucketInfo {
                        prev: if i > 0 { Some(&buckets[i - 1].0.aggs) } else { None },
                        next: buckets.get(i + 1).map(|(b, _)| &b.aggs),
                        interval_ns: self.ctx.interval_ns(),
                    };
                    self.emit_row(
                        &bucket.aggs,
                        root,
                        terms,
                        Some(bucket.key as i64),
                        None,
                        info,
                        rows,
                    )?;
                }
                Ok(())
            }
            BucketTree::Range(buckets) => {
                for (bucket, _) in buckets {
                    self.emit_row(
                        &bucket.aggs,
                        root,
                        terms,
                        None,
                        Some((bucket.from, bucket.to)),
                        BucketInfo::default(),
                        rows,
                    )?;
                }
                Ok(())
            }
            BucketTree::Leaf => self.emit_row(
                aggs,
                root,
                terms,
                None,
                None,
                BucketInfo::default(),
                rows,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_row(
        &self,
        aggs: &Aggregations,
        root: &Aggregations,
        terms: Option<&TermsBucket>,
        time_bucket: Option<i64>,
        range_bucket: Option<(Option<f64>, Option<f64>)>,
        bucket: BucketInfo,
        rows: &mut Vec<Vec<Value>>,
    ) -> TsqlResult<()> {
        let doc = aggs
            .top_hits("columns")
            .and_then(|docs| docs.first().cloned())
            .map(FlatDoc::from_json);
        if doc.is_none()
            && terms.is_none()
            && time_bucket.is_none()
            && range_bucket.is_none()
            && !self.columns.iter().any(|h| {
                h.col.flag.contains(ColumnFlag::AGG) || h.col.flag.contains(ColumnFlag::GROUP_BY)
            })
        {
            log::debug!("dropping empty leaf row");
            return Ok(());
        }
        let scope = EvalScope {
            ctx: &self.ctx,
            doc: doc.as_ref(),
            aggs: Some(aggs),
            root_aggs: root,
            terms_aggs: terms.map(|t| &t.aggs),
            time_bucket,
            range_bucket,
            bucket,
            row: rows.len() as i64,
        };
        let mut row = Vec::with_capacity(self.columns.len());
        for handler in &self.columns {
            row.push(self.eval_expr(&scope, &handler.fns, &handler.field.expr)?);
        }
        rows.push(row);
        Ok(())
    }

    fn has_pairwise(&self) -> bool {
        self.columns
            .iter()
            .any(|h| h.fns.values().any(|f| f.pairwise()))
    }

    fn eval_expr(
        &self,
        scope: &EvalScope,
        fns: &HashMap<String, Box<dyn AggHandler>>,
        expr: &Expr,
    ) -> TsqlResult<Value> {
        match expr {
            Expr::Reference(r) => {
                let key = key_name(r, IdentifierType::Any);
                let value = scope
                    .doc
                    .and_then(|doc| doc.get(&key))
                    .cloned()
                    .unwrap_or(Value::Null);
                // stored timestamps surface in the caller-facing unit
                if key == self.ctx.time_key()
                    && self.ctx.target_time_unit() != TimeUnit::Unset
                {
                    if let Some(ts) = value.as_i64() {
                        return Ok(Value::Int(convert_timestamp(
                            ts,
                            self.ctx.original_time_unit(),
                            self.ctx.target_time_unit(),
                        )));
                    }
                }
                Ok(value)
            }
            Expr::Integer(i) => Ok(Value::Int(*i)),
            Expr::Number(n) => Ok(Value::Float(*n)),
            Expr::Unsigned(u) => Ok(Value::Uint(*u)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::StringLit(s) => Ok(Value::String(s.clone())),
            Expr::DurationLit(d) => Ok(Value::Duration(*d)),
            Expr::Nil => Ok(Value::Null),
            Expr::RegexLit(pattern) => {
                let re = regex::Regex::new(pattern).map_err(|e| {
                    TsqlError::evaluation_error(format!(
                        "invalid regexp '{}': {}",
                        pattern, e
                    ))
                })?;
                Ok(Value::Regex(std::sync::Arc::new(re)))
            }
            Expr::Paren(inner) => self.eval_expr(scope, fns, inner),
            Expr::Binary { op, lhs, rhs } => {
                let left = self.eval_expr(scope, fns, lhs)?;
                let right = self.eval_expr(scope, fns, rhs)?;
                operate(&left, *op, &right)
            }
            Expr::Call { name, args } => {
                if name == "scope" {
                    if args.is_empty() {
                        return Err(TsqlError::function_error("scope", "invalid args"));
                    }
                    let inner = args[0].unwrap_paren();
                    let scope_name = match args.get(1) {
                        Some(Expr::StringLit(s)) if !s.is_empty() => s.as_str(),
                        _ => "terms",
                    };
                    return scope.scope_value(scope_name, inner);
                }
                if self.aggregates.is_aggregate(name) {
                    let id = call_id(expr, IdentifierType::Any);
                    let handler = fns.get(&id).ok_or_else(|| {
                        TsqlError::evaluation_error(format!(
                            "aggregate '{}' was not registered during translation",
                            name
                        ))
                    })?;
                    let aggs = scope.aggs.ok_or_else(|| {
                        TsqlError::evaluation_error(format!(
                            "aggregate '{}' outside an aggregated result",
                            name
                        ))
                    })?;
                    return handler.extract(aggs, &scope.bucket);
                }
                if let Some(func) = self.functions.runtime(name) {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval_expr(scope, fns, arg)?);
                    }
                    return func(scope, &values);
                }
                if let Some(func) = self.functions.literal(name) {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval_expr(scope, fns, arg)?);
                    }
                    return func(scope, &values);
                }
                Err(TsqlError::evaluation_error(format!(
                    "unknown function '{}'",
                    name
                )))
            }
            Expr::Wildcard => Err(TsqlError::evaluation_error("invalid expression")),
        }
    }
}

fn reference_for_key(key: &str) -> Reference {
    if let Some(name) = key.strip_prefix(TAGS_PREFIX) {
        Reference::tagged(name, IdentifierType::Tag)
    } else if let Some(name) = key.strip_prefix(FIELDS_PREFIX) {
        Reference::tagged(name, IdentifierType::Field)
    } else {
        Reference::new(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::Parser;
    use serde_json::json;

    const HOUR: i64 = 3_600_000_000_000;

    fn response(v: serde_json::Value) -> SearchResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_literal_only_result() {
        let mut q = Parser::new(0, 1_000, "SELECT 1 + 2 FROM m")
            .parse_query()
            .unwrap()
            .remove(0);
        let rs = q.parse_result(&SearchResponse::default()).unwrap();
        assert_eq!(rs.rows, vec![vec![Value::Int(3)]]);
        assert_eq!(rs.columns[0].name, "1 + 2");
    }

    #[test]
    fn test_raw_rows_evaluate_documents() {
        let mut q = Parser::new(0, 2 * HOUR, "SELECT host::tag, usage * 100 FROM cpu")
            .parse_query()
            .unwrap()
            .remove(0);
        let resp = response(json!({
            "hits": {
                "total": 2,
                "hits": [
                    { "_source": { "tags": { "host": "a" }, "fields": { "usage": 0.5 } } },
                    { "_source": { "tags": { "host": "b" }, "fields": { "usage": 0.25 } } }
                ]
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.total, 2);
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0][0], Value::String("a".to_string()));
        assert_eq!(rs.rows[0][1], Value::Float(50.0));
        assert_eq!(rs.rows[1][1], Value::Float(25.0));
    }

    #[test]
    fn test_missing_field_reads_as_null_zero() {
        let mut q = Parser::new(0, 2 * HOUR, "SELECT usage + 1 FROM cpu")
            .parse_query()
            .unwrap()
            .remove(0);
        let resp = response(json!({
            "hits": { "total": 1, "hits": [ { "_source": { "fields": {} } } ] }
        }));
        let rs = q.parse_result(&resp).unwrap();
        // null + 1 behaves as the additive identity
        assert_eq!(rs.rows[0][0], Value::Int(1));
    }

    #[test]
    fn test_wildcard_discovers_sorted_columns() {
        let mut q = Parser::new(0, 2 * HOUR, "SELECT * FROM cpu")
            .parse_query()
            .unwrap()
            .remove(0);
        let resp = response(json!({
            "hits": {
                "total": 1,
                "hits": [
                    { "_source": { "tags": { "a": "1", "_meta": "x" }, "fields": { "b": 2 } } }
                ]
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        let names: Vec<&str> = rs.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a::tag", "b::field"]);
        assert_eq!(rs.rows[0][0], Value::String("1".to_string()));
        assert_eq!(rs.rows[0][1], Value::Int(2));
    }

    #[test]
    fn test_group_by_time_round_trip() {
        let mut q = Parser::new(0, 2 * HOUR, "SELECT max(x) FROM m GROUP BY time(5m)")
            .parse_query()
            .unwrap()
            .remove(0);
        let id = {
            let body = q.request_body().unwrap();
            let aggs = body["aggs"]["histogram"]["aggs"].as_object().unwrap();
            aggs.keys().next().unwrap().clone()
        };
        let resp = response(json!({
            "hits": { "total": 9, "hits": [] },
            "aggregations": {
                "histogram": {
                    "buckets": [
                        { "key": 0.0, "doc_count": 3, id.clone(): { "value": 1.5 } }
                    ]
                }
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.columns.len(), 2);
        assert!(rs.columns[0]
            .flag
            .contains(ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL));
        assert!(rs.columns[1].flag.contains(ColumnFlag::AGG));
        assert!(rs.columns[1].flag.contains(ColumnFlag::FUNC));
        assert_eq!(rs.rows[0][1], Value::Float(1.5));
        assert_eq!(rs.interval, 300_000_000_000);
    }

    #[test]
    fn test_trailing_empty_histogram_bucket_dropped() {
        let mut q = Parser::new(0, 2 * HOUR, "SELECT avg(x) FROM m GROUP BY time(1h)")
            .parse_query()
            .unwrap()
            .remove(0);
        let id = {
            let body = q.request_body().unwrap();
            let aggs = body["aggs"]["histogram"]["aggs"].as_object().unwrap();
            aggs.keys().next().unwrap().clone()
        };
        let resp = response(json!({
            "hits": { "total": 4, "hits": [] },
            "aggregations": {
                "histogram": {
                    "buckets": [
                        { "key": 0.0, "doc_count": 2, id.clone(): { "value": 1.0 } },
                        { "key": 3.6e12, "doc_count": 2, id.clone(): { "value": 2.0 } },
                        { "key": 7.2e12, "doc_count": 0, id.clone(): { "value": null } }
                    ]
                }
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows.len(), 2);
    }

    #[test]
    fn test_diff_three_buckets_yields_two_rows() {
        let mut q = Parser::new(0, 3 * HOUR, "SELECT diff(n) FROM m GROUP BY time(1h)")
            .parse_query()
            .unwrap()
            .remove(0);
        let id = {
            let body = q.request_body().unwrap();
            let aggs = body["aggs"]["histogram"]["aggs"].as_object().unwrap();
            aggs.keys().next().unwrap().clone()
        };
        let resp = response(json!({
            "hits": { "total": 30, "hits": [] },
            "aggregations": {
                "histogram": {
                    "buckets": [
                        { "key": 0.0, "doc_count": 10, id.clone(): { "value": 100.0 } },
                        { "key": 3.6e12, "doc_count": 10, id.clone(): { "value": 130.0 } },
                        { "key": 7.2e12, "doc_count": 10, id.clone(): { "value": 190.0 } }
                    ]
                }
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0][1], Value::Float(30.0));
        assert_eq!(rs.rows[1][1], Value::Float(60.0));
    }

    #[test]
    fn test_terms_offset_skips_groups() {
        let mut q = Parser::new(
            0,
            2 * HOUR,
            "SELECT max(x) FROM m GROUP BY host LIMIT 10 OFFSET 1",
        )
        .parse_query()
        .unwrap()
        .remove(0);
        let id = {
            let body = q.request_body().unwrap();
            let aggs = body["aggs"]["term"]["aggs"].as_object().unwrap();
            aggs.keys().find(|k| k.as_str() != "columns").unwrap().clone()
        };
        let resp = response(json!({
            "hits": { "total": 6, "hits": [] },
            "aggregations": {
                "term": {
                    "buckets": [
                        { "key": "a", "doc_count": 3, id.clone(): { "value": 1.0 } },
                        { "key": "b", "doc_count": 3, id.clone(): { "value": 2.0 } }
                    ]
                }
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0][0], Value::Float(2.0));
    }

    #[test]
    fn test_scope_terms_ratio() {
        let mut q = Parser::new(
            0,
            2 * HOUR,
            "SELECT max(x) / scope(sum(x::field)) FROM m GROUP BY host",
        )
        .parse_query()
        .unwrap()
        .remove(0);
        let body = q.request_body().unwrap();
        let subs = body["aggs"]["term"]["aggs"].as_object().unwrap();
        let ids: Vec<String> = subs
            .keys()
            .filter(|k| k.as_str() != "columns")
            .cloned()
            .collect();
        assert_eq!(ids.len(), 2);
        // identify which id is the max aggregation
        let max_id = ids
            .iter()
            .find(|id| subs[id.as_str()].get("max").is_some())
            .unwrap()
            .clone();
        let sum_id = ids.iter().find(|id| **id != max_id).unwrap().clone();
        let resp = response(json!({
            "hits": { "total": 4, "hits": [] },
            "aggregations": {
                "term": {
                    "buckets": [
                        {
                            "key": "a",
                            "doc_count": 4,
                            max_id.clone(): { "value": 5.0 },
                            sum_id.clone(): { "value": 20.0 }
                        }
                    ]
                }
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows[0][0], Value::Float(0.25));
    }

    #[test]
    fn test_aggregated_leaf_reads_columns_top_hits() {
        let mut q = Parser::new(0, 2 * HOUR, "SELECT host::tag, max(x) FROM m GROUP BY host")
            .parse_query()
            .unwrap()
            .remove(0);
        let id = {
            let body = q.request_body().unwrap();
            let aggs = body["aggs"]["term"]["aggs"].as_object().unwrap();
            aggs.keys().find(|k| k.as_str() != "columns").unwrap().clone()
        };
        let resp = response(json!({
            "hits": { "total": 3, "hits": [] },
            "aggregations": {
                "term": {
                    "buckets": [
                        {
                            "key": "web-1",
                            "doc_count": 3,
                            id.clone(): { "value": 9.0 },
                            "columns": {
                                "hits": { "hits": [
                                    { "_source": { "tags": { "host": "web-1" } } }
                                ] }
                            }
                        }
                    ]
                }
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows[0][0], Value::String("web-1".to_string()));
        assert_eq!(rs.rows[0][1], Value::Float(9.0));
    }

    #[test]
    fn test_range_grouping_rows() {
        let mut q = Parser::new(
            0,
            2 * HOUR,
            "SELECT count(x) FROM m GROUP BY range(x, 0.0, 50.0, 100.0)",
        )
        .parse_query()
        .unwrap()
        .remove(0);
        let id = {
            let body = q.request_body().unwrap();
            let aggs = body["aggs"]["range"]["aggs"].as_object().unwrap();
            aggs.keys().next().unwrap().clone()
        };
        let resp = response(json!({
            "hits": { "total": 5, "hits": [] },
            "aggregations": {
                "range": {
                    "buckets": [
                        { "from": 0.0, "to": 50.0, "doc_count": 3, id.clone(): { "value": 3.0 } },
                        { "from": 50.0, "to": 100.0, "doc_count": 2, id.clone(): { "value": 2.0 } }
                    ]
                }
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows.len(), 2);
        // synthetic range column leads
        assert_eq!(rs.rows[0][0], Value::String("0-50".to_string()));
        assert_eq!(rs.rows[1][0], Value::String("50-100".to_string()));
    }

    #[test]
    fn test_row_num_advances() {
        let mut q = Parser::new(0, 2 * HOUR, "SELECT row_num(), usage::field FROM cpu")
            .parse_query()
            .unwrap()
            .remove(0);
        let resp = response(json!({
            "hits": {
                "total": 2,
                "hits": [
                    { "_source": { "fields": { "usage": 1 } } },
                    { "_source": { "fields": { "usage": 2 } } }
                ]
            }
        }));
        let rs = q.parse_result(&resp).unwrap();
        assert_eq!(rs.rows[0][0], Value::Int(0));
        assert_eq!(rs.rows[1][0], Value::Int(1));
    }
}
