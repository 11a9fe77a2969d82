//! Dictionary output: one key-value map per row.

use serde_json::{json, Map, Value as Json};
use std::collections::HashMap;

use crate::error::TsqlResult;
use crate::model::ResultSet;
use crate::translate::Query;

use super::Formatter;

pub struct DictFormatter;

impl Formatter for DictFormatter {
    fn format(
        &self,
        _query: &Query,
        rs: &ResultSet,
        _opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let data: Vec<Json> = rs
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
        Ok(json!({ "total": rs.total, "data": data }))
    }
}
