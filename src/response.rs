/*!
# Backend Response Model

Typed view over the backend's raw JSON response: the hit list, the named
aggregation map, and the bucket shapes the assembler walks.

The nested aggregation result is converted **once** into an explicit
[`BucketTree`] (`Leaf | Terms | Histogram | Range`) and then walked by a
single visitor, instead of probing bucket shapes at every level of the
recursion.
*/

use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::value::Value;

/// A raw search response. `hits.total` accepts both the bare-number and
/// the `{value}` envelope the backend emits depending on version.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: SearchHits,
    #[serde(default)]
    pub aggregations: Aggregations,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHits {
    #[serde(default)]
    pub total: TotalHits,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_source", default)]
    pub source: Json,
}

/// Total hit count; tolerant of both response envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalHits(pub i64);

impl<'de> Deserialize<'de> for TotalHits {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = Json::deserialize(deserializer)?;
        let total = match &v {
            Json::Number(n) => n.as_i64().unwrap_or(0),
            Json::Object(m) => m.get("value").and_then(Json::as_i64).unwrap_or(0),
            _ => 0,
        };
        Ok(TotalHits(total))
    }
}

/// Named aggregation results at one level of the response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Aggregations(pub serde_json::Map<String, Json>);

impl Aggregations {
    pub fn get(&self, name: &str) -> Option<&Json> {
        self.0.get(name)
    }

    /// Single-value metric result (`{"value": ...}`); outer `Option` is
    /// presence of the aggregation, inner is presence of a value.
    pub fn value_metric(&self, name: &str) -> Option<Option<f64>> {
        let obj = self.0.get(name)?.as_object()?;
        Some(obj.get("value").and_then(Json::as_f64))
    }

    /// First percentile value of a percentiles result.
    pub fn percentile(&self, name: &str) -> Option<Option<f64>> {
        let obj = self.0.get(name)?.as_object()?;
        let values = obj.get("values")?.as_object()?;
        Some(values.values().next().and_then(Json::as_f64))
    }

    /// Documents of a top-hits result.
    pub fn top_hits(&self, name: &str) -> Option<Vec<&Json>> {
        let obj = self.0.get(name)?.as_object()?;
        let hits = obj.get("hits")?.as_object()?.get("hits")?.as_array()?;
        Some(hits.iter().filter_map(|h| h.get("_source")).collect())
    }

    fn buckets(&self, name: &str) -> Option<&Vec<Json>> {
        self.0.get(name)?.as_object()?.get("buckets")?.as_array()
    }
}

/// One bucket of a terms aggregation.
#[derive(Debug, Clone)]
pub struct TermsBucket {
    pub key: Value,
    pub doc_count: i64,
    pub aggs: Aggregations,
}

/// One bucket of a histogram aggregation.
#[derive(Debug, Clone)]
pub struct HistogramBucket {
    pub key: f64,
    pub doc_count: i64,
    pub aggs: Aggregations,
}

/// One bucket of a range aggregation.
#[derive(Debug, Clone)]
pub struct RangeBucket {
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub doc_count: i64,
    pub aggs: Aggregations,
}

/// Split a bucket object into its key metadata and its sub-aggregations.
fn bucket_aggs(obj: &serde_json::Map<String, Json>) -> Aggregations {
    let mut aggs = serde_json::Map::new();
    for (k, v) in obj {
        match k.as_str() {
            "key" | "key_as_string" | "doc_count" | "from" | "to" => {}
            _ => {
                aggs.insert(k.clone(), v.clone());
            }
        }
    }
    Aggregations(aggs)
}

/// The explicit shape of one level of a nested aggregation result.
///
/// Built once from the raw response; the grouping aggregation names
/// (`term`, `histogram`, `range`) are the ones the translator emitted, so
/// probing them here is shape-complete by construction.
#[derive(Debug, Clone)]
pub enum BucketTree {
    Leaf,
    Terms(Vec<(TermsBucket, BucketTree)>),
    Histogram(Vec<(HistogramBucket, BucketTree)>),
    Range(Vec<(RangeBucket, BucketTree)>),
}

impl BucketTree {
    pub fn from_aggregations(aggs: &Aggregations) -> BucketTree {
        if let Some(buckets) = aggs.buckets("term") {
            let mut out = Vec::with_capacity(buckets.len());
            for b in buckets {
                if let Some(obj) = b.as_object() {
                    let sub = bucket_aggs(obj);
                    let child = BucketTree::from_aggregations(&sub);
                    out.push((
                        TermsBucket {
                            key: obj.get("key").map(Value::from_json).unwrap_or(Value::Null),
                            doc_count: obj.get("doc_count").and_then(Json::as_i64).unwrap_or(0),
                            aggs: sub,
                        },
                        child,
                    ));
                }
            }
            return BucketTree::Terms(out);
        }
        if let Some(buckets) = aggs.buckets("histogram") {
            let mut out = Vec::with_capacity(buckets.len());
            for b in buckets {
                if let Some(obj) = b.as_object() {
                    let sub = bucket_aggs(obj);
                    out.push((
                        HistogramBucket {
                            key: obj.get("key").and_then(Json::as_f64).unwrap_or(0.0),
                            doc_count: obj.get("doc_count").and_then(Json::as_i64).unwrap_or(0),
                            aggs: sub,
                        },
                        BucketTree::Leaf,
                    ));
                }
            }
            return BucketTree::Histogram(out);
        }
        if let Some(buckets) = aggs.buckets("range") {
            let mut out = Vec::with_capacity(buckets.len());
            for b in buckets {
                if let Some(obj) = b.as_object() {
                    let sub = bucket_aggs(obj);
                    out.push((
                        RangeBucket {
                            from: obj.get("from").and_then(Json::as_f64),
                            to: obj.get("to").and_then(Json::as_f64),
                            doc_count: obj.get("doc_count").and_then(Json::as_i64).unwrap_or(0),
                            aggs: sub,
                        },
                        BucketTree::Leaf,
                    ));
                }
            }
            return BucketTree::Range(out);
        }
        BucketTree::Leaf
    }
}

/// A document flattened into dotted-path keys: `{"tags":{"host":"a"}}`
/// becomes `tags.host -> "a"`. Ordered for deterministic discovery.
#[derive(Debug, Clone, Default)]
pub struct FlatDoc(pub BTreeMap<String, Value>);

impl FlatDoc {
    pub fn from_json(doc: &Json) -> FlatDoc {
        let mut map = BTreeMap::new();
        flatten_into("", doc, &mut map);
        FlatDoc(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

fn flatten_into(prefix: &str, v: &Json, out: &mut BTreeMap<String, Value>) {
    match v {
        Json::Object(m) => {
            for (k, child) in m {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(&key, child, out);
            }
        }
        Json::Array(_) => {}
        scalar => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), Value::from_json(scalar));
            }
        }
    }
}
