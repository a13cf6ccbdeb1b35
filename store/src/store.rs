use crate::errors::StoreError;
use crate::metrics_defs::STORE_ROWS_SCANNED;
use crate::row;
use async_trait::async_trait;
use model::ClusterSpec;
use model::filter::{self, Condition, Operator, Predicate};
use shared::histogram;

/// Equality filters of the v1 listing. Empty fields are ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListFilter {
    pub region: String,
    pub environment: String,
    pub business_unit: String,
    pub status: String,
    /// RFC3339 lower bound (exclusive) on `lastUpdated`.
    pub last_updated: String,
}

impl ListFilter {
    /// Compiles the filter, excluding deleted clusters unless a status is
    /// requested explicitly.
    pub fn to_predicate(&self) -> Result<Predicate, StoreError> {
        let mut predicate = if self.status.is_empty() {
            Predicate::not_deleted()
        } else {
            Predicate::compare(vec![row::STATUS.into()], Operator::Eq, self.status.clone())
        };

        if !self.region.is_empty() {
            predicate = predicate.and(Predicate::compare(
                vec![row::REGION.into()],
                Operator::Eq,
                self.region.clone(),
            ));
        }
        if !self.environment.is_empty() {
            predicate = predicate.and(Predicate::compare(
                vec![row::ENVIRONMENT.into()],
                Operator::Eq,
                self.environment.clone(),
            ));
        }
        if !self.business_unit.is_empty() {
            predicate = predicate.and(Predicate::spec_eq("businessUnit", self.business_unit.clone()));
        }
        if !self.last_updated.is_empty() {
            model::time::parse_rfc3339(&self.last_updated).map_err(|_| {
                StoreError::Validation(format!(
                    "lastUpdated {} is not an RFC3339 timestamp",
                    self.last_updated
                ))
            })?;
            predicate = predicate.and(Predicate::compare(
                vec![row::CRD.into(), "lastUpdated".into()],
                Operator::Gt,
                self.last_updated.clone(),
            ));
        }

        Ok(match predicate {
            Predicate::Compare { .. } => Predicate::And(vec![predicate]),
            and => and,
        })
    }
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterPage {
    pub items: Vec<ClusterSpec>,
    /// Number of items in this page.
    pub count: usize,
    /// Whether rows exist past this page.
    pub more: bool,
}

impl ClusterPage {
    /// Slices `[offset, offset + limit)` out of a full enumeration.
    pub fn slice(mut all: Vec<ClusterSpec>, offset: usize, limit: usize) -> Self {
        let total = all.len();
        let start = offset.min(total);
        let end = offset.saturating_add(limit).min(total);
        let items: Vec<ClusterSpec> = all.drain(start..end).collect();
        ClusterPage {
            count: items.len(),
            items,
            more: end < total,
        }
    }
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Point lookup. An absent key is `Ok(None)`.
    async fn get_cluster(&self, name: &str) -> Result<Option<ClusterSpec>, StoreError>;

    /// Upsert, regenerating the indexed columns.
    async fn put_cluster(&self, spec: &ClusterSpec) -> Result<(), StoreError>;

    async fn delete_cluster(&self, name: &str) -> Result<(), StoreError>;

    /// Enumerates every row of the `cluster` index partition matching
    /// `predicate`, following continuation tokens to the end.
    async fn query(&self, predicate: &Predicate) -> Result<Vec<ClusterSpec>, StoreError>;

    /// Liveness probe, bounded at five seconds.
    async fn status(&self) -> Result<(), StoreError>;

    async fn list_clusters(
        &self,
        offset: usize,
        limit: usize,
        filter: &ListFilter,
    ) -> Result<ClusterPage, StoreError> {
        let predicate = filter.to_predicate()?;
        let all = self.query(&predicate).await?;
        histogram!(STORE_ROWS_SCANNED).record(all.len() as f64);
        Ok(ClusterPage::slice(all, offset, limit))
    }

    /// Lists rows matching every condition. Deleted clusters are never
    /// returned.
    async fn list_clusters_with_filter(
        &self,
        offset: usize,
        limit: usize,
        conditions: &[Condition],
    ) -> Result<ClusterPage, StoreError> {
        let predicate = Predicate::not_deleted().and(filter::compile(conditions));
        let all = self.query(&predicate).await?;
        histogram!(STORE_ROWS_SCANNED).record(all.len() as f64);
        Ok(ClusterPage::slice(all, offset, limit))
    }
}
