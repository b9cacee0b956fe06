//! Kinvey Query - storage-independent query model and local evaluator.
//!
//! This crate holds everything needed to run a Kinvey-style query against
//! documents that have already been loaded into memory. It has no storage or
//! network dependencies, so both the persistence adapters and the request
//! layer of the SDK share it.
//!
//! # Main Components
//!
//! - **Query**: filter tree plus sort / skip / limit / fields modifiers
//! - **Filter evaluator**: turns a MongoDB-style filter into a predicate
//! - **Aggregation**: client-side group/reduce keyed by a field set
//!
//! # Example
//!
//! ```rust
//! use kinvey_query::Query;
//! use serde_json::json;
//!
//! let docs = vec![
//!     json!({"_id": "1", "name": "Alice", "age": 30}),
//!     json!({"_id": "2", "name": "Bob", "age": 25}),
//! ];
//!
//! let query = Query::new().greater_than("age", json!(26)).ascending("name");
//! let results = query.process(docs).unwrap();
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0]["name"], "Alice");
//! ```

pub mod aggregation;
pub mod error;
pub mod filter;
pub mod helpers;
pub mod query;

pub use aggregation::{Aggregation, Reduce, ReduceFn};
pub use error::{QueryError, QueryResult};
pub use filter::matches;
pub use helpers::{compare_values, get_field_value, values_equal};
pub use query::{Query, SortField, SortOrder};
