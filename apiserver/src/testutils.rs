use crate::auth::{AuthError, Claims, TokenVerifier};
use crate::errors::ApiError;
use crate::patch_router::{ClusterPatch, EdgePatcher};
use async_trait::async_trait;
use model::ClusterSpec;
use parking_lot::Mutex;

/// Accepts two fixed tokens: a plain reader and a member of `admins`.
#[derive(Default)]
pub struct StaticVerifier;

impl StaticVerifier {
    pub const READER: &'static str = "reader-token";
    pub const ADMIN: &'static str = "admin-token";
}

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        match token {
            Self::READER => Ok(Claims::with_groups(Some("reader"), &["readers"])),
            Self::ADMIN => Ok(Claims::with_groups(Some("admin"), &["admins"])),
            _ => Err(AuthError::InvalidToken("unknown test token".into())),
        }
    }
}

/// Records forwarded patches instead of calling an edge cluster.
#[derive(Default)]
pub struct RecordingPatcher {
    calls: Mutex<Vec<(String, ClusterPatch)>>,
}

impl RecordingPatcher {
    pub fn calls(&self) -> Vec<(String, ClusterPatch)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EdgePatcher for RecordingPatcher {
    async fn patch(&self, target: &ClusterSpec, patch: &ClusterPatch) -> Result<(), ApiError> {
        self.calls.lock().push((target.name.clone(), patch.clone()));
        Ok(())
    }
}
