/*!
# Search Request DSL

Typed builders for the backend's query model: a boolean filter tree plus a
nested aggregation tree (terms / histogram / range / top-hits / metric
aggregations, scripted fields and sorts). Everything serializes to the
backend's JSON request body through [`SearchSource::to_json`].

Sub-aggregations live in `BTreeMap`s so emitted request bodies are
deterministic, which keeps request-level tests byte-stable.
*/

use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

/// A leaf or compound filter clause.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Bool(BoolQuery),
    Term { field: String, value: Json },
    Regexp { field: String, pattern: String },
    Exists { field: String },
    Script { script: String },
    Range(RangeQuery),
}

impl SearchQuery {
    pub fn to_json(&self) -> Json {
        match self {
            SearchQuery::Bool(b) => b.to_json(),
            SearchQuery::Term { field, value } => json!({ "term": { field.clone(): value } }),
            SearchQuery::Regexp { field, pattern } => {
                json!({ "regexp": { field.clone(): pattern } })
            }
            SearchQuery::Exists { field } => json!({ "exists": { "field": field } }),
            SearchQuery::Script { script } => {
                json!({ "script": { "script": { "source": script } } })
            }
            SearchQuery::Range(r) => r.to_json(),
        }
    }
}

/// A `bool` compound query with filter / must_not / should branches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub filter: Vec<SearchQuery>,
    pub must_not: Vec<SearchQuery>,
    pub should: Vec<SearchQuery>,
}

impl BoolQuery {
    pub fn new() -> Self {
        BoolQuery::default()
    }

    pub fn filter(&mut self, q: SearchQuery) -> &mut Self {
        self.filter.push(q);
        self
    }

    pub fn must_not(&mut self, q: SearchQuery) -> &mut Self {
        self.must_not.push(q);
        self
    }

    pub fn should(&mut self, q: SearchQuery) -> &mut Self {
        self.should.push(q);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.must_not.is_empty() && self.should.is_empty()
    }

    pub fn to_json(&self) -> Json {
        let mut body = Map::new();
        if !self.filter.is_empty() {
            body.insert(
                "filter".to_string(),
                Json::Array(self.filter.iter().map(|q| q.to_json()).collect()),
            );
        }
        if !self.must_not.is_empty() {
            body.insert(
                "must_not".to_string(),
                Json::Array(self.must_not.iter().map(|q| q.to_json()).collect()),
            );
        }
        if !self.should.is_empty() {
            body.insert(
                "should".to_string(),
                Json::Array(self.should.iter().map(|q| q.to_json()).collect()),
            );
        }
        json!({ "bool": body })
    }
}

/// A range filter on one field; unset edges are omitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeQuery {
    pub field: String,
    pub gte: Option<Json>,
    pub gt: Option<Json>,
    pub lte: Option<Json>,
    pub lt: Option<Json>,
}

impl RangeQuery {
    pub fn new(field: impl Into<String>) -> Self {
        RangeQuery {
            field: field.into(),
            ..Default::default()
        }
    }

    pub fn gte(mut self, v: impl Into<Json>) -> Self {
        self.gte = Some(v.into());
        self
    }

    pub fn gt(mut self, v: impl Into<Json>) -> Self {
        self.gt = Some(v.into());
        self
    }

    pub fn lte(mut self, v: impl Into<Json>) -> Self {
        self.lte = Some(v.into());
        self
    }

    pub fn lt(mut self, v: impl Into<Json>) -> Self {
        self.lt = Some(v.into());
        self
    }

    pub fn to_json(&self) -> Json {
        let mut body = Map::new();
        if let Some(v) = &self.gte {
            body.insert("gte".to_string(), v.clone());
        }
        if let Some(v) = &self.gt {
            body.insert("gt".to_string(), v.clone());
        }
        if let Some(v) = &self.lte {
            body.insert("lte".to_string(), v.clone());
        }
        if let Some(v) = &self.lt {
            body.insert("lt".to_string(), v.clone());
        }
        json!({ "range": { self.field.clone(): body } })
    }
}

/// The field-or-script target of a metric aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum AggSource {
    Field(String),
    Script(String),
}

impl AggSource {
    fn fill(&self, body: &mut Map<String, Json>) {
        match self {
            AggSource::Field(f) => {
                body.insert("field".to_string(), Json::from(f.clone()));
            }
            AggSource::Script(s) => {
                body.insert("script".to_string(), json!({ "source": s }));
            }
        }
    }
}

/// Which metric a [`Agg::Metric`] computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Max,
    Min,
    Avg,
    Sum,
    ValueCount,
    Cardinality,
}

impl MetricKind {
    pub fn agg_name(&self) -> &'static str {
        match self {
            MetricKind::Max => "max",
            MetricKind::Min => "min",
            MetricKind::Avg => "avg",
            MetricKind::Sum => "sum",
            MetricKind::ValueCount => "value_count",
            MetricKind::Cardinality => "cardinality",
        }
    }
}

/// Named collection of aggregations; the request and every bucket level
/// use the same shape.
pub type AggMap = BTreeMap<String, Agg>;

/// One aggregation node.
#[derive(Debug, Clone, PartialEq)]
pub enum Agg {
    /// Single-value metric (max/min/avg/sum/value_count/cardinality).
    Metric { kind: MetricKind, source: AggSource },
    /// Percentiles metric with explicit percents.
    Percentiles {
        source: AggSource,
        percents: Vec<f64>,
    },
    /// Representative documents per bucket.
    TopHits {
        size: i64,
        sort_field: String,
        ascending: bool,
        include: Option<Vec<String>>,
    },
    /// Distinct-key grouping on a scripted key.
    Terms {
        script: String,
        size: i64,
        orders: Vec<(String, bool)>,
        subs: AggMap,
    },
    /// Fixed-width numeric interval grouping on a field.
    Histogram {
        field: String,
        interval: f64,
        offset: f64,
        min_doc_count: i64,
        extended_bounds: (f64, f64),
        subs: AggMap,
    },
    /// User-defined numeric edge grouping on a field.
    Range {
        field: String,
        ranges: Vec<(Option<f64>, Option<f64>)>,
        subs: AggMap,
    },
}

fn subs_json(subs: &AggMap) -> Option<Json> {
    if subs.is_empty() {
        return None;
    }
    let mut m = Map::new();
    for (name, agg) in subs {
        m.insert(name.clone(), agg.to_json());
    }
    Some(Json::Object(m))
}

impl Agg {
    /// Attach a sub-aggregation; only bucket aggregations accept one.
    pub fn sub(&mut self, name: impl Into<String>, agg: Agg) {
        match self {
            Agg::Terms { subs, .. } | Agg::Histogram { subs, .. } | Agg::Range { subs, .. } => {
                subs.insert(name.into(), agg);
            }
            _ => {}
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Agg::Metric { kind, source } => {
                let mut body = Map::new();
                source.fill(&mut body);
                json!({ kind.agg_name(): body })
            }
            Agg::Percentiles { source, percents } => {
                let mut body = Map::new();
                source.fill(&mut body);
                body.insert("percents".to_string(), json!(percents));
                json!({ "percentiles": body })
            }
            Agg::TopHits {
                size,
                sort_field,
                ascending,
                include,
            } => {
                let mut body = Map::new();
                body.insert("size".to_string(), Json::from(*size));
                body.insert(
                    "sort".to_string(),
                    json!([{ sort_field.clone(): { "order": if *ascending { "asc" } else { "desc" } } }]),
                );
                if let Some(cols) = include {
                    body.insert("_source".to_string(), json!({ "includes": cols }));
                }
                json!({ "top_hits": body })
            }
            Agg::Terms {
                script,
                size,
                orders,
                subs,
            } => {
                let mut body = Map::new();
                body.insert("script".to_string(), json!({ "source": script }));
                body.insert("size".to_string(), Json::from(*size));
                if !orders.is_empty() {
                    let entries: Vec<Json> = orders
                        .iter()
                        .map(|(key, asc)| {
                            json!({ key.clone(): if *asc { "asc" } else { "desc" } })
                        })
                        .collect();
                    body.insert("order".to_string(), Json::Array(entries));
                }
                let mut out = Map::new();
                out.insert("terms".to_string(), Json::Object(body));
                if let Some(subs) = subs_json(subs) {
                    out.insert("aggs".to_string(), subs);
                }
                Json::Object(out)
            }
            Agg::Histogram {
                field,
                interval,
                offset,
                min_doc_count,
                extended_bounds,
                subs,
            } => {
                let body = json!({
                    "field": field,
                    "interval": interval,
                    "offset": offset,
                    "min_doc_count": min_doc_count,
                    "extended_bounds": { "min": extended_bounds.0, "max": extended_bounds.1 },
                });
                let mut out = Map::new();
                out.insert("histogram".to_string(), body);
                if let Some(subs) = subs_json(subs) {
                    out.insert("aggs".to_string(), subs);
                }
                Json::Object(out)
            }
            Agg::Range {
                field,
                ranges,
                subs,
            } => {
                let entries: Vec<Json> = ranges
                    .iter()
                    .map(|(from, to)| {
                        let mut m = Map::new();
                        if let Some(f) = from {
                            m.insert("from".to_string(), json!(f));
                        }
                        if let Some(t) = to {
                            m.insert("to".to_string(), json!(t));
                        }
                        Json::Object(m)
                    })
                    .collect();
                let body = json!({ "field": field, "ranges": entries });
                let mut out = Map::new();
                out.insert("range".to_string(), body);
                if let Some(subs) = subs_json(subs) {
                    out.insert("aggs".to_string(), subs);
                }
                Json::Object(out)
            }
        }
    }
}

/// Sort specification for document searches.
#[derive(Debug, Clone, PartialEq)]
pub enum SortSpec {
    Field { field: String, ascending: bool },
    Script { script: String, ascending: bool },
}

impl SortSpec {
    fn to_json(&self) -> Json {
        match self {
            SortSpec::Field { field, ascending } => {
                json!({ field.clone(): { "order": if *ascending { "asc" } else { "desc" } } })
            }
            SortSpec::Script { script, ascending } => json!({
                "_script": {
                    "type": "string",
                    "script": { "source": script },
                    "order": if *ascending { "asc" } else { "desc" },
                }
            }),
        }
    }
}

/// The complete request body for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSource {
    pub query: BoolQuery,
    pub size: Option<i64>,
    pub from: Option<i64>,
    pub sorts: Vec<SortSpec>,
    pub aggs: AggMap,
}

impl SearchSource {
    pub fn new(query: BoolQuery) -> Self {
        SearchSource {
            query,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Json {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.to_json());
        if let Some(size) = self.size {
            body.insert("size".to_string(), Json::from(size));
        }
        if let Some(from) = self.from {
            body.insert("from".to_string(), Json::from(from));
        }
        if !self.sorts.is_empty() {
            body.insert(
                "sort".to_string(),
                Json::Array(self.sorts.iter().map(|s| s.to_json()).collect()),
            );
        }
        if let Some(aggs) = subs_json(&self.aggs) {
            body.insert("aggs".to_string(), aggs);
        }
        Json::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_query_shape() {
        let mut q = BoolQuery::new();
        q.filter(SearchQuery::Term {
            field: "tags.host".to_string(),
            value: Json::from("web-1"),
        });
        q.must_not(SearchQuery::Regexp {
            field: "tags.env".to_string(),
            pattern: "dev.*".to_string(),
        });
        let j = q.to_json();
        assert_eq!(j["bool"]["filter"][0]["term"]["tags.host"], "web-1");
        assert_eq!(j["bool"]["must_not"][0]["regexp"]["tags.env"], "dev.*");
    }

    #[test]
    fn test_metric_agg_field_vs_script() {
        let agg = Agg::Metric {
            kind: MetricKind::Max,
            source: AggSource::Field("fields.cpu".to_string()),
        };
        assert_eq!(agg.to_json()["max"]["field"], "fields.cpu");

        let agg = Agg::Metric {
            kind: MetricKind::Avg,
            source: AggSource::Script("doc['fields.a'].value * 2".to_string()),
        };
        assert_eq!(
            agg.to_json()["avg"]["script"]["source"],
            "doc['fields.a'].value * 2"
        );
    }

    #[test]
    fn test_histogram_with_subs() {
        let mut h = Agg::Histogram {
            field: "timestamp".to_string(),
            interval: 60.0,
            offset: 0.0,
            min_doc_count: 0,
            extended_bounds: (0.0, 600.0),
            subs: AggMap::new(),
        };
        h.sub(
            "m1",
            Agg::Metric {
                kind: MetricKind::Max,
                source: AggSource::Field("fields.x".to_string()),
            },
        );
        let j = h.to_json();
        assert_eq!(j["histogram"]["interval"], 60.0);
        assert_eq!(j["histogram"]["extended_bounds"]["max"], 600.0);
        assert_eq!(j["aggs"]["m1"]["max"]["field"], "fields.x");
    }

    #[test]
    fn test_search_source_layout() {
        let mut q = BoolQuery::new();
        q.filter(SearchQuery::Range(
            RangeQuery::new("timestamp").gte(0).lte(100),
        ));
        let mut src = SearchSource::new(q);
        src.size = Some(0);
        src.aggs.insert(
            "term".to_string(),
            Agg::Terms {
                script: "doc['tags.host'].value".to_string(),
                size: 20,
                orders: vec![("abc123".to_string(), false)],
                subs: AggMap::new(),
            },
        );
        let j = src.to_json();
        assert_eq!(j["size"], 0);
        assert_eq!(j["query"]["bool"]["filter"][0]["range"]["timestamp"]["gte"], 0);
        assert_eq!(j["aggs"]["term"]["terms"]["order"][0]["abc123"], "desc");
    }
}
