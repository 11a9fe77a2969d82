/*!
# Output Formatters

A named registry of transforms from `(Query, ResultSet, options)` to the
JSON shapes consumers were written against:

| name | shape |
|---|---|
| `table` | positional rows with index-named columns |
| `table2` | name-keyed rows plus a flag string per header |
| `line` / `bar` | series grouped by dimension, aligned to a shared axis |
| `card` | one `{name, value}` pair from the sole column |
| `list` | `{title, value}` pairs |
| `dict` | one key-value map per row |
| `influxdb` | the wire-compatible statement/series envelope |

The registry is an explicit object populated once at construction; inject
a custom one to add formats.
*/

mod chart;
mod dict;
mod influxdb;
mod table;

use serde_json::Value as Json;
use std::collections::HashMap;

use crate::error::{TsqlError, TsqlResult};
use crate::model::ResultSet;
use crate::translate::Query;

pub use chart::{CardFormatter, ChartFormatter, ChartKind, ListFormatter};
pub use dict::DictFormatter;
pub use influxdb::InfluxdbFormatter;
pub use table::{TableFormatter, TableV2Formatter};

/// One output transform.
pub trait Formatter: Send + Sync {
    fn format(
        &self,
        query: &Query,
        rs: &ResultSet,
        opts: &HashMap<String, String>,
    ) -> TsqlResult<Json>;
}

/// Name-to-formatter table.
pub struct FormatRegistry {
    formats: HashMap<&'static str, Box<dyn Formatter>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    pub fn new() -> Self {
        let mut formats: HashMap<&'static str, Box<dyn Formatter>> = HashMap::new();
        formats.insert("table", Box::new(TableFormatter));
        formats.insert("table2", Box::new(TableV2Formatter));
        formats.insert("line", Box::new(ChartFormatter::new(ChartKind::Line)));
        formats.insert("bar", Box::new(ChartFormatter::new(ChartKind::Bar)));
        formats.insert("card", Box::new(CardFormatter));
        formats.insert("list", Box::new(ListFormatter));
        formats.insert("dict", Box::new(DictFormatter));
        formats.insert("influxdb", Box::new(InfluxdbFormatter));
        FormatRegistry { formats }
    }

    /// Register (or replace) a format under a name.
    pub fn register(&mut self, name: &'static str, formatter: Box<dyn Formatter>) {
        self.formats.insert(name, formatter);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.formats.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run the named format over a result set.
    pub fn format(
        &self,
        name: &str,
        query: &Query,
        rs: &ResultSet,
        opts: &HashMap<String, String>,
    ) -> TsqlResult<Json> {
        let formatter = self
            .formats
            .get(name)
            .ok_or_else(|| TsqlError::format_error(name, "unknown format"))?;
        formatter.format(query, rs, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names() {
        let reg = FormatRegistry::new();
        assert_eq!(
            reg.names(),
            vec!["bar", "card", "dict", "influxdb", "line", "list", "table", "table2"]
        );
    }

    #[test]
    fn test_unknown_format_errors() {
        let reg = FormatRegistry::new();
        let q = crate::translate::Parser::new(0, 1_000, "SELECT 1 FROM m")
            .parse_query()
            .unwrap()
            .remove(0);
        let rs = ResultSet::default();
        let err = reg
            .format("bogus", &q, &rs, &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("unknown format"));
    }
}
