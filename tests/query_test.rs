//! End-to-end scenarios: translate a statement, feed a synthetic backend
//! response through assembly, and shape the result with a formatter.

use std::collections::HashMap;

use serde_json::json;
use tsql::model::ColumnFlag;
use tsql::{FormatRegistry, Parser, QueryFlag, SearchResponse, TimeUnit, Value};

const MINUTE: i64 = 60_000_000_000;
const HOUR: i64 = 60 * MINUTE;

fn response(v: serde_json::Value) -> SearchResponse {
    serde_json::from_value(v).unwrap()
}

/// Pull the generated aggregation id out of a request body at the given
/// path of nested agg names.
fn agg_id(body: &serde_json::Value, path: &[&str]) -> String {
    let mut node = &body["aggs"];
    for p in path {
        node = &node[*p]["aggs"];
    }
    node.as_object()
        .unwrap()
        .keys()
        .find(|k| k.as_str() != "columns")
        .unwrap()
        .clone()
}

#[test]
fn test_time_grouping_round_trip() {
    let mut query = Parser::new(0, 2 * HOUR, "SELECT max(x) FROM m GROUP BY time(5m)")
        .parse_query()
        .unwrap()
        .remove(0);
    assert!(query.flag().contains(QueryFlag::GROUP_BY_TIME));

    let body = query.request_body().unwrap();
    assert_eq!(body["size"], 0);
    let id = agg_id(&body, &["histogram"]);
    assert_eq!(
        body["aggs"]["histogram"]["aggs"][&id]["max"]["field"],
        "fields.x"
    );

    let resp = response(json!({
        "hits": { "total": 12, "hits": [] },
        "aggregations": {
            "histogram": {
                "buckets": [
                    { "key": 0.0, "doc_count": 12, id.clone(): { "value": 7.5 } }
                ]
            }
        }
    }));
    let rs = query.parse_result(&resp).unwrap();
    assert_eq!(rs.rows.len(), 1);
    assert_eq!(rs.columns.len(), 2);
    assert!(rs.columns[0]
        .flag
        .contains(ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL));
    assert!(rs.columns[1].flag.contains(ColumnFlag::AGG));
    assert!(rs.columns[1].flag.contains(ColumnFlag::FUNC));
    assert_eq!(rs.rows[0][1], Value::Float(7.5));
    assert_eq!(rs.interval, 5 * MINUTE);
}

#[test]
fn test_interval_adjustment_from_span() {
    // a two-hour span with no explicit interval buckets by one minute
    let query = Parser::new(0, 2 * HOUR, "SELECT avg(x) FROM m GROUP BY time()")
        .parse_query()
        .unwrap()
        .remove(0);
    assert_eq!(query.context().interval_ns(), MINUTE);

    // a ten-hour span scales to five minutes
    let query = Parser::new(0, 10 * HOUR, "SELECT avg(x) FROM m GROUP BY time()")
        .parse_query()
        .unwrap()
        .remove(0);
    assert_eq!(query.context().interval_ns(), 5 * MINUTE);
}

#[test]
fn test_diffps_rate_over_histogram() {
    let mut query = Parser::new(0, 3 * HOUR, "SELECT diffps(requests) FROM m GROUP BY time(1h)")
        .parse_query()
        .unwrap()
        .remove(0);
    let id = agg_id(&query.request_body().unwrap(), &["histogram"]);
    let resp = response(json!({
        "hits": { "total": 100, "hits": [] },
        "aggregations": {
            "histogram": {
                "buckets": [
                    { "key": 0.0, "doc_count": 10, id.clone(): { "value": 0.0 } },
                    { "key": 3.6e12, "doc_count": 10, id.clone(): { "value": 3600.0 } },
                    { "key": 7.2e12, "doc_count": 10, id.clone(): { "value": 10800.0 } }
                ]
            }
        }
    }));
    let rs = query.parse_result(&resp).unwrap();
    // the last bucket has no successor and is dropped
    assert_eq!(rs.rows.len(), 2);
    assert_eq!(rs.rows[0][1], Value::Float(1.0));
    assert_eq!(rs.rows[1][1], Value::Float(2.0));
}

#[test]
fn test_terms_with_time_series_chart() {
    let mut query = Parser::new(
        0,
        2 * HOUR,
        "SELECT host::tag, avg(cpu) FROM system GROUP BY host, time(1h)",
    )
    .with_target_time_unit(TimeUnit::Millisecond)
    .parse_query()
    .unwrap()
    .remove(0);
    let id = agg_id(&query.request_body().unwrap(), &["term", "histogram"]);
    let hits_for = |host: &str| {
        json!({ "hits": { "hits": [ { "_source": { "tags": { "host": host } } } ] } })
    };
    let resp = response(json!({
        "hits": { "total": 8, "hits": [] },
        "aggregations": {
            "term": {
                "buckets": [
                    {
                        "key": "web-1",
                        "doc_count": 4,
                        "histogram": { "buckets": [
                            { "key": 0.0, "doc_count": 2, id.clone(): { "value": 0.25 },
                              "columns": hits_for("web-1") },
                            { "key": 3.6e12, "doc_count": 2, id.clone(): { "value": 0.5 },
                              "columns": hits_for("web-1") }
                        ] }
                    },
                    {
                        "key": "web-2",
                        "doc_count": 4,
                        "histogram": { "buckets": [
                            { "key": 0.0, "doc_count": 2, id.clone(): { "value": 0.75 },
                              "columns": hits_for("web-2") },
                            { "key": 3.6e12, "doc_count": 2, id.clone(): { "value": 1.0 },
                              "columns": hits_for("web-2") }
                        ] }
                    }
                ]
            }
        }
    }));
    let rs = query.parse_result(&resp).unwrap();
    assert_eq!(rs.rows.len(), 4);
    // timestamps surface in the caller-facing unit
    assert_eq!(rs.rows[0][0], Value::Int(0));
    assert_eq!(rs.rows[1][0], Value::Int(3_600_000));
    assert_eq!(rs.rows[0][1], Value::String("web-1".to_string()));

    let formats = FormatRegistry::new();
    let chart = formats
        .format("line", &query, &rs, &HashMap::new())
        .unwrap();
    let time = chart["time"].as_array().unwrap();
    assert_eq!(time.len(), 2);
    let series = chart["series"].as_array().unwrap();
    assert_eq!(series.len(), 2);
    for s in series {
        assert_eq!(s["data"].as_array().unwrap().len(), time.len());
    }
    assert_eq!(series[0]["data"], json!([0.25, 0.5]));
    assert_eq!(series[1]["data"], json!([0.75, 1.0]));
}

#[test]
fn test_wildcard_raw_discovery_and_wire_format() {
    let mut query = Parser::new(0, 2 * HOUR, "SELECT * FROM weather")
        .parse_query()
        .unwrap()
        .remove(0);
    let resp = response(json!({
        "hits": {
            "total": 1,
            "hits": [
                { "_source": { "tags": { "a": "1" }, "fields": { "b": 2 } } }
            ]
        }
    }));
    let rs = query.parse_result(&resp).unwrap();
    let names: Vec<&str> = rs.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a::tag", "b::field"]);

    let formats = FormatRegistry::new();
    let wire = formats
        .format("influxdb", &query, &rs, &HashMap::new())
        .unwrap();
    let series = &wire["results"][0]["series"][0];
    assert_eq!(series["name"], "weather");
    assert_eq!(series["columns"], json!(["a::tag", "b::field"]));
    assert_eq!(series["values"], json!([["1", 2]]));
}

#[test]
fn test_literal_select_skips_backend() {
    let mut query = Parser::new(0, HOUR, "SELECT max_int64() FROM m")
        .parse_query()
        .unwrap()
        .remove(0);
    assert!(query.search_source().is_none());
    let rs = query.parse_result(&SearchResponse::default()).unwrap();
    assert_eq!(rs.rows, vec![vec![Value::Int(i64::MAX)]]);
}

#[test]
fn test_where_translation_shapes() {
    let query = Parser::new(
        0,
        HOUR,
        "SELECT cpu FROM m WHERE host = 'a' AND name =~ /sys.*/ AND usage::field * 2 > 1",
    )
    .parse_query()
    .unwrap()
    .remove(0);
    let body = query.request_body().unwrap();
    let text = body.to_string();
    assert!(text.contains("\"term\""));
    assert!(text.contains("\"regexp\""));
    assert!(text.contains("\"exists\""));
    assert!(text.contains("\"script\""));
}

#[test]
fn test_aggregate_identity_shared_between_select_and_order() {
    let query = Parser::new(
        0,
        HOUR,
        "SELECT max(x::field) FROM m GROUP BY host ORDER BY max(x::field) DESC",
    )
    .parse_query()
    .unwrap()
    .remove(0);
    let body = query.request_body().unwrap();
    let subs = body["aggs"]["term"]["aggs"].as_object().unwrap();
    let metric_ids: Vec<&String> = subs.keys().filter(|k| k.as_str() != "columns").collect();
    assert_eq!(metric_ids.len(), 1);
    assert_eq!(
        body["aggs"]["term"]["terms"]["order"][0][metric_ids[0].as_str()],
        "desc"
    );
}
