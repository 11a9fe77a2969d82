//! Wire-compatible output: the statement/series/values envelope used by
//! consumers written against the upstream time-series HTTP API.

use serde_json::{json, Value as Json};
use std::collections::HashMap;

use crate::error::TsqlResult;
use crate::model::ResultSet;
use crate::translate::Query;
use crate::value::Value;

use super::Formatter;

pub struct InfluxdbFormatter;

impl Formatter for InfluxdbFormatter {
    fn format(
        &self,
        query: &Query,
        rs: &ResultSet,
        _opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let name = query
            .sources()
            .first()
            .map(|s| {
                if s.database.is_empty() {
                    s.name.clone()
                } else {
                    format!("{}.{}", s.database, s.name)
                }
            })
            .unwrap_or_default();
        let columns: Vec<Json> = rs
            .columns
            .iter()
            .map(|c| Json::from(c.name.clone()))
            .collect();
        let values: Vec<Json> = rs
            .rows
            .iter()
            .map(|row| Json::Array(row.iter().map(Value::to_json).collect()))
            .collect();
        Ok(json!({
            "results": [
                {
                    "statement_id": 0,
                    "series": [
                        {
                            "name": name,
                            "columns": columns,
                            "values": values,
                        }
                    ]
                }
            ]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ColumnFlag};

    #[test]
    fn test_wire_envelope() {
        let q = crate::translate::Parser::new(0, 1_000, "SELECT cpu FROM telegraf.system")
            .parse_query()
            .unwrap()
            .remove(0);
        let rs = ResultSet {
            total: 1,
            interval: 0,
            columns: vec![Column {
                name: "cpu".to_string(),
                key: "fields.cpu".to_string(),
                flag: ColumnFlag::FIELD,
            }],
            rows: vec![vec![Value::Float(0.5)]],
        };
        let out = InfluxdbFormatter.format(&q, &rs, &HashMap::new()).unwrap();
        let series = &out["results"][0]["series"][0];
        assert_eq!(series["name"], "telegraf.system");
        assert_eq!(series["columns"], json!(["cpu"]));
        assert_eq!(series["values"], json!([[0.5]]));
        assert_eq!(out["results"][0]["statement_id"], 0);
    }
}
