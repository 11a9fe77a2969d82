//! # tsql
//!
//! A query-translation and result-assembly engine for time-series
//! analytics over a document-store search backend. Accepts an
//! InfluxQL-style select dialect, compiles it into a boolean filter plus
//! a nested aggregation tree, walks the backend's bucket results back
//! into flat rows, and reshapes those rows into the output contracts
//! consumers expect (table, chart, dict, wire format).
//!
//! The engine itself performs no I/O: the caller executes the compiled
//! request against the backend and hands the raw response back.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsql::{FormatRegistry, Parser, SearchResponse};
//! use std::collections::HashMap;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queries = Parser::new(0, 3_600_000_000_000, // nanoseconds
//!         "SELECT host::tag, avg(cpu) FROM system GROUP BY host, time(1m)")
//!         .parse_query()?;
//!
//!     let formats = FormatRegistry::new();
//!     for mut query in queries {
//!         let body = query.request_body(); // execute against the backend...
//!         let _ = body;
//!         let raw: SearchResponse = serde_json::from_str("{}")?; // ...response here
//!         let result = query.parse_result(&raw)?;
//!         let chart = formats.format("line", &query, &result, &HashMap::new())?;
//!         println!("{}", chart);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregates;
pub mod assemble;
pub mod ast;
pub mod error;
pub mod formats;
pub mod functions;
pub mod model;
pub mod parser;
pub mod response;
pub mod script;
pub mod search;
pub mod translate;
pub mod value;

// Re-export the main API
pub use aggregates::AggRegistry;
pub use error::{TsqlError, TsqlResult};
pub use formats::{FormatRegistry, Formatter};
pub use functions::FunctionRegistry;
pub use model::{Column, ColumnFlag, ResultSet, Source, TimeUnit};
pub use response::SearchResponse;
pub use search::{BoolQuery, SearchSource};
pub use translate::{Parser, Query, QueryFlag};
pub use value::{Operator, Value};

// Version and feature info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FEATURES: &[&str] = &[
    "select_statements",
    "type_hints",          // field::field, field::tag disambiguation
    "time_grouping",       // GROUP BY time(interval) with point capping
    "range_grouping",      // GROUP BY range(field, edges...)
    "terms_grouping",      // GROUP BY plain dimensions
    "scoped_aggregations", // scope(call, 'name') shared aggregations
    "pairwise_functions",  // diff, diffps over sibling time buckets
    "scalar_functions",    // string/time/math/conditional helpers
    "literal_functions",   // now, interval, numeric-limit constants
    "scripted_fallback",   // scripted filters, sorts and dimensions
    "wildcard_discovery",  // SELECT * column inference
    "formatters",          // table, table2, line, bar, card, list, dict, influxdb
];
