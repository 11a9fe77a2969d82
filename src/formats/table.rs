//! Tabular output: the positional v1 shape and the name-keyed v2 shape
//! with per-header column flags.

use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;

use crate::error::TsqlResult;
use crate::model::ResultSet;
use crate::translate::Query;
use crate::value::Value;

use super::Formatter;

/// Positional rows; columns are index-named (`c0`, `c1`, ...) with the
/// display name carried as the title.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format(
        &self,
        _query: &Query,
        rs: &ResultSet,
        _opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let cols: Vec<Json> = rs
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| json!({ "key": format!("c{}", i), "title": col.name }))
            .collect();
        let rows: Vec<Json> = rs
            .rows
            .iter()
            .map(|row| Json::Array(row.iter().map(Value::to_json).collect()))
            .collect();
        Ok(json!({
            "total": rs.total,
            "cols": cols,
            "data": rows,
        }))
    }
}

fn type_name_of(v: &Value) -> &'static str {
    match v {
        Value::Bool(_) => "boolean",
        Value::Int(_) | Value::Uint(_) => "number",
        Value::Float(_) => "number",
        Value::Duration(_) => "number",
        _ => "string",
    }
}

/// Name-keyed rows plus a flag string per header; the `typed` option adds
/// a data type per header inferred from the first row.
pub struct TableV2Formatter;

impl Formatter for TableV2Formatter {
    fn format(
        &self,
        _query: &Query,
        rs: &ResultSet,
        opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let typed = opts.get("typed").map(|v| v == "true").unwrap_or(false);
        let headers: Vec<Json> = rs
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let mut h = Map::new();
                h.insert("key".to_string(), Json::from(col.name.clone()));
                h.insert("flag".to_string(), Json::from(col.flag.to_string()));
                if typed {
                    let t = rs
                        .rows
                        .first()
                        .map(|row| type_name_of(&row[i]))
                        .unwrap_or("string");
                    h.insert("type".to_string(), Json::from(t));
                }
                Json::Object(h)
            })
            .collect();
        let rows: Vec<Json> = rs
            .rows
            .iter()
            .map(|row| {
                let mut m = Map::new();
                for (col, v) in rs.columns.iter().zip(row.iter()) {
                    m.insert(col.name.clone(), v.to_json());
                }
                Json::Object(m)
            })
            .collect();
        Ok(json!({
            "total": rs.total,
            "headers": headers,
            "rows": rows,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ColumnFlag};
    use crate::translate::Parser;

    fn fixture() -> (Query, ResultSet) {
        let q = Parser::new(0, 1_000, "SELECT host::tag, avg(cpu) FROM m GROUP BY host")
            .parse_query()
            .unwrap()
            .remove(0);
        let rs = ResultSet {
            total: 2,
            interval: 0,
            columns: vec![
                Column {
                    name: "host".to_string(),
                    key: "tags.host".to_string(),
                    flag: ColumnFlag::TAG | ColumnFlag::GROUP_BY,
                },
                Column {
                    name: "avg(cpu)".to_string(),
                    key: "avg(fields.cpu)".to_string(),
                    flag: ColumnFlag::AGG | ColumnFlag::FUNC,
                },
            ],
            rows: vec![
                vec![Value::String("a".to_string()), Value::Float(1.5)],
                vec![Value::String("b".to_string()), Value::Float(2.5)],
            ],
        };
        (q, rs)
    }

    #[test]
    fn test_table_positional() {
        let (q, rs) = fixture();
        let out = TableFormatter
            .format(&q, &rs, &HashMap::new())
            .unwrap();
        assert_eq!(out["cols"][0]["key"], "c0");
        assert_eq!(out["cols"][1]["title"], "avg(cpu)");
        assert_eq!(out["data"][0][1], 1.5);
        assert_eq!(out["total"], 2);
    }

    #[test]
    fn test_table2_flags_and_types() {
        let (q, rs) = fixture();
        let mut opts = HashMap::new();
        opts.insert("typed".to_string(), "true".to_string());
        let out = TableV2Formatter.format(&q, &rs, &opts).unwrap();
        assert_eq!(out["headers"][0]["flag"], "tag|groupby");
        assert_eq!(out["headers"][1]["flag"], "func|agg");
        assert_eq!(out["headers"][1]["type"], "number");
        assert_eq!(out["rows"][1]["host"], "b");
        assert_eq!(out["rows"][1]["avg(cpu)"], 2.5);
    }
}
