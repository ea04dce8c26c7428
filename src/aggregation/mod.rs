//! Declarative aggregation pipelines
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s evaluated left to right,
//! each stage consuming the previous stage's output. Pipelines are plain data:
//! they can be written in the JSON stage syntax, built with constructors, and
//! evaluated against any [`CollectionResolver`].
//!
//! # Example
//!
//! ```rust,ignore
//! use docstore_migrate::aggregation::Pipeline;
//! use serde_json::json;
//!
//! let top_renters = Pipeline::from_json(&json!([
//!     {"$group": {"_id": "$customer_id", "count": {"$sum": 1}}},
//!     {"$sort": {"count": -1}},
//!     {"$limit": 10}
//! ]))?;
//!
//! for doc in store.aggregate("rental", &top_renters)? {
//!     println!("{:?}", doc?);
//! }
//! ```
//!
//! # Stages
//!
//! | Stage | Effect |
//! |---|---|
//! | `$match` | keep documents matching a [`Filter`](crate::document::Filter) |
//! | `$group` | partition by a key expression, fold with accumulators |
//! | `$sort` | stable multi-key sort |
//! | `$limit` | keep the first N documents |
//! | `$lookup` | attach matching foreign documents as an array |
//! | `$unwind` | one document per array element, optionally keeping empties |
//! | `$addFields` / `$project` | per-document reshaping |
//! | `$count` | a single `{name: n}` document |

mod engine;
mod error;
mod expr;
mod parse;
mod stage;

pub use engine::{CollectionResolver, Cursor, MAX_VIEW_DEPTH, evaluate, run};
pub use error::{PipelineError, PipelineResult};
pub use expr::{Accumulator, CompareOp, Expression, round_half_even};
pub use stage::{
    GroupSpec, LookupSpec, Pipeline, Projection, SortDirection, SortKey, Stage, UnwindSpec,
};
