//! Persistence of cluster specs.
//!
//! Rows are stored as `{name, kind, region, environment, status, crd}` where
//! `kind` is always `"cluster"`. The secondary index keyed on `kind` lets a
//! listing enumerate every row without a table scan.

pub mod dynamodb;
pub mod errors;
pub mod memory;
pub mod metrics_defs;
pub mod row;
pub mod store;

pub use dynamodb::{DynamoDbConfig, DynamoDbStore};
pub use errors::StoreError;
pub use memory::MemoryStore;
pub use store::{ClusterPage, ClusterStore, ListFilter};
