//! Shared data model of the cluster registry.
//!
//! Everything in this crate is pure: no I/O, no async. The edge controllers
//! and the apiserver both depend on it so that fingerprints, merges and
//! filters behave identically on both sides of the queue.

pub mod errors;
pub mod filter;
pub mod fingerprint;
pub mod merge;
pub mod shortname;
pub mod time;
pub mod types;

pub use errors::{FilterError, MergeError, ModelError};
pub use types::ClusterSpec;

/// Event type carrying a full `ClusterSpec` body.
pub const EVENT_CLUSTER_UPDATE: &str = "cluster-update";
/// Event type carrying a merge patch relative to the zero `ClusterSpec`.
pub const EVENT_PARTIAL_CLUSTER_UPDATE: &str = "partial-cluster-update";

/// Annotation holding the cluster descriptor fingerprint.
pub const HASH_ANNOTATION: &str = "registry.ethos.adobe.com/hash";
/// Annotation holding the sync object fingerprint.
pub const FINGERPRINT_ANNOTATION: &str = "registry.ethos.adobe.com/fingerprint";
/// Opt-out of CA bundle injection when set to `"true"`.
pub const SKIP_CA_CERT_ANNOTATION: &str = "registry.ethos.adobe.com/skip-ca-cert";
/// Comma separated tag keys that must not be written through the API.
pub const EXCLUDED_TAGS_ANNOTATION: &str = "registry.ethos.adobe.com/excluded-tags";
