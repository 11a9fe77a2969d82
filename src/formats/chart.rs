//! Charting output: line/bar series grouped by dimension, plus the card
//! and list shapes.

use serde_json::{json, Value as Json};
use std::collections::HashMap;

use crate::error::{TsqlError, TsqlResult};
use crate::model::{ColumnFlag, ResultSet};
use crate::translate::Query;
use crate::value::Value;

use super::Formatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Bar,
}

impl ChartKind {
    fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
        }
    }
}

/// Group rows into one series per distinct combination of non-time
/// dimension values; series data align 1:1 with the shared axis.
///
/// Grouping by time yields a time axis; otherwise the group keys form the
/// axis and each series spans one point per key occurrence.
pub struct ChartFormatter {
    kind: ChartKind,
}

impl ChartFormatter {
    pub fn new(kind: ChartKind) -> Self {
        ChartFormatter { kind }
    }
}

/// Column roles within a chart: the time axis, grouping dimensions, and
/// plotted values.
fn split_columns(rs: &ResultSet) -> (Option<usize>, Vec<usize>, Vec<usize>) {
    let mut time_idx = None;
    let mut dims = Vec::new();
    let mut values = Vec::new();
    for (i, col) in rs.columns.iter().enumerate() {
        if col.flag.contains(ColumnFlag::HIDDEN) {
            continue;
        }
        if col.flag.contains(ColumnFlag::GROUP_BY_INTERVAL) && time_idx.is_none() {
            time_idx = Some(i);
        } else if col.flag.contains(ColumnFlag::AGG) {
            values.push(i);
        } else if col.flag.contains(ColumnFlag::GROUP_BY)
            || col.flag.contains(ColumnFlag::TAG)
            || col.flag.contains(ColumnFlag::NAME)
            || col.flag.contains(ColumnFlag::GROUP_BY_RANGE)
        {
            dims.push(i);
        } else {
            values.push(i);
        }
    }
    (time_idx, dims, values)
}

impl Formatter for ChartFormatter {
    fn format(
        &self,
        _query: &Query,
        rs: &ResultSet,
        opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let (time_idx, dims, values) = split_columns(rs);
        if values.is_empty() {
            return Err(TsqlError::format_error(
                self.kind.as_str(),
                "no value column to chart",
            ));
        }

        // the shared axis: distinct time points in row order
        let mut axis: Vec<Value> = Vec::new();
        let mut axis_index: HashMap<String, usize> = HashMap::new();
        if let Some(t) = time_idx {
            for row in &rs.rows {
                let key = row[t].to_string();
                if !axis_index.contains_key(&key) {
                    axis_index.insert(key, axis.len());
                    axis.push(row[t].clone());
                }
            }
        }

        // group rows by dimension combination, preserving first-seen order
        let mut group_order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&Vec<Value>>> = HashMap::new();
        for row in &rs.rows {
            let key = dims
                .iter()
                .map(|&d| row[d].to_string())
                .collect::<Vec<_>>()
                .join("/");
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
            }
            groups.entry(key).or_default().push(row);
        }

        let mut series = Vec::new();
        for group_key in &group_order {
            let rows = &groups[group_key];
            for &v in &values {
                let col_name = &rs.columns[v].name;
                let name = if group_key.is_empty() {
                    col_name.clone()
                } else if values.len() > 1 {
                    format!("{} {}", group_key, col_name)
                } else {
                    group_key.clone()
                };
                let data: Vec<Json> = match time_idx {
                    Some(t) => {
                        let mut slots: Vec<Json> = vec![Json::Null; axis.len()];
                        for row in rows {
                            let key = row[t].to_string();
                            if let Some(&i) = axis_index.get(&key) {
                                slots[i] = row[v].to_json();
                            }
                        }
                        slots
                    }
                    None => rows.iter().map(|row| row[v].to_json()).collect(),
                };
                series.push(json!({ "name": name, "data": data }));
            }
        }

        let xaxis: Vec<Json> = if time_idx.is_some() {
            axis.iter().map(Value::to_json).collect()
        } else {
            group_order.iter().map(|k| Json::from(k.clone())).collect()
        };

        let mut out = serde_json::Map::new();
        if let Some(title) = opts.get("title") {
            out.insert("title".to_string(), Json::from(title.clone()));
        }
        out.insert("type".to_string(), Json::from(self.kind.as_str()));
        out.insert("time".to_string(), Json::Array(xaxis));
        out.insert("series".to_string(), Json::Array(series));
        out.insert("interval".to_string(), Json::from(rs.interval));
        Ok(Json::Object(out))
    }
}

/// One `{name, value}` pair from the sole column of the first row.
pub struct CardFormatter;

impl Formatter for CardFormatter {
    fn format(
        &self,
        _query: &Query,
        rs: &ResultSet,
        _opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let col = rs
            .columns
            .first()
            .ok_or_else(|| TsqlError::format_error("card", "no columns"))?;
        let value = rs
            .rows
            .first()
            .and_then(|row| row.first())
            .map(Value::to_json)
            .unwrap_or(Json::Null);
        Ok(json!({ "name": col.name, "value": value }))
    }
}

/// `{title, value}` pairs per row. The `title` option names the columns
/// joined into each title; without it rows are numbered sequentially.
pub struct ListFormatter;

impl Formatter for ListFormatter {
    fn format(
        &self,
        _query: &Query,
        rs: &ResultSet,
        opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let title_cols: Vec<usize> = match opts.get("title") {
            Some(names) => names
                .split(',')
                .filter_map(|name| {
                    let name = name.trim();
                    rs.columns.iter().position(|c| c.name == name)
                })
                .collect(),
            None => Vec::new(),
        };
        let mut list = Vec::with_capacity(rs.rows.len());
        for (i, row) in rs.rows.iter().enumerate() {
            let title = if title_cols.is_empty() {
                format!("{}", i + 1)
            } else {
                title_cols
                    .iter()
                    .map(|&c| row[c].to_string())
                    .collect::<Vec<_>>()
                    .join("/")
            };
            let value = row
                .iter()
                .enumerate()
                .find(|(j, _)| !title_cols.contains(j))
                .map(|(_, v)| v.to_json())
                .unwrap_or(Json::Null);
            list.push(json!({ "title": title, "value": value }));
        }
        Ok(json!({ "total": rs.total, "list": list }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;
    use crate::translate::Parser;

    fn query() -> Query {
        Parser::new(0, 1_000, "SELECT avg(cpu) FROM m GROUP BY host, time(1m)")
            .parse_query()
            .unwrap()
            .remove(0)
    }

    fn column(name: &str, flag: ColumnFlag) -> Column {
        Column {
            name: name.to_string(),
            key: name.to_string(),
            flag,
        }
    }

    #[test]
    fn test_line_series_align_to_time_axis() {
        let rs = ResultSet {
            total: 4,
            interval: 60_000_000_000,
            columns: vec![
                column("time", ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL),
                column("host", ColumnFlag::TAG | ColumnFlag::GROUP_BY),
                column("avg(cpu)", ColumnFlag::AGG | ColumnFlag::FUNC),
            ],
            rows: vec![
                vec![Value::Int(0), Value::String("a".into()), Value::Float(1.0)],
                vec![Value::Int(60), Value::String("a".into()), Value::Float(2.0)],
                vec![Value::Int(0), Value::String("b".into()), Value::Float(3.0)],
                vec![Value::Int(60), Value::String("b".into()), Value::Float(4.0)],
            ],
        };
        let out = ChartFormatter::new(ChartKind::Line)
            .format(&query(), &rs, &HashMap::new())
            .unwrap();
        let time = out["time"].as_array().unwrap();
        assert_eq!(time.len(), 2);
        let series = out["series"].as_array().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0]["name"], "a");
        assert_eq!(series[0]["data"].as_array().unwrap().len(), time.len());
        assert_eq!(series[1]["data"], json!([3.0, 4.0]));
    }

    #[test]
    fn test_line_without_time_uses_group_axis() {
        let rs = ResultSet {
            total: 2,
            interval: 0,
            columns: vec![
                column("host", ColumnFlag::TAG | ColumnFlag::GROUP_BY),
                column("avg(cpu)", ColumnFlag::AGG),
            ],
            rows: vec![
                vec![Value::String("a".into()), Value::Float(1.0)],
                vec![Value::String("b".into()), Value::Float(2.0)],
            ],
        };
        let out = ChartFormatter::new(ChartKind::Line)
            .format(&query(), &rs, &HashMap::new())
            .unwrap();
        let series = out["series"].as_array().unwrap();
        // one series per distinct host
        assert_eq!(series.len(), 2);
        assert_eq!(series[0]["name"], "a");
        assert_eq!(series[0]["data"], json!([1.0]));
        assert_eq!(out["time"], json!(["a", "b"]));
    }

    #[test]
    fn test_bar_marks_type() {
        let rs = ResultSet {
            total: 1,
            interval: 0,
            columns: vec![column("count(x)", ColumnFlag::AGG)],
            rows: vec![vec![Value::Float(5.0)]],
        };
        let out = ChartFormatter::new(ChartKind::Bar)
            .format(&query(), &rs, &HashMap::new())
            .unwrap();
        assert_eq!(out["type"], "bar");
        assert_eq!(out["series"][0]["name"], "count(x)");
    }

    #[test]
    fn test_card_sole_column() {
        let rs = ResultSet {
            total: 1,
            interval: 0,
            columns: vec![column("max(mem)", ColumnFlag::AGG)],
            rows: vec![vec![Value::Float(512.0)]],
        };
        let out = CardFormatter
            .format(&query(), &rs, &HashMap::new())
            .unwrap();
        assert_eq!(out, json!({ "name": "max(mem)", "value": 512.0 }));
    }

    #[test]
    fn test_list_with_title_columns() {
        let rs = ResultSet {
            total: 2,
            interval: 0,
            columns: vec![
                column("host", ColumnFlag::TAG),
                column("avg(cpu)", ColumnFlag::AGG),
            ],
            rows: vec![
                vec![Value::String("a".into()), Value::Float(1.0)],
                vec![Value::String("b".into()), Value::Float(2.0)],
            ],
        };
        let mut opts = HashMap::new();
        opts.insert("title".to_string(), "host".to_string());
        let out = ListFormatter.format(&query(), &rs, &opts).unwrap();
        assert_eq!(out["list"][0], json!({ "title": "a", "value": 1.0 }));
        assert_eq!(out["list"][1]["title"], "b");

        // without the option rows number sequentially
        let out = ListFormatter
            .format(&query(), &rs, &HashMap::new())
            .unwrap();
        assert_eq!(out["list"][1]["title"], "2");
    }
}
