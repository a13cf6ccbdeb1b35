//! Bearer token verification.
//!
//! Tokens are verified against the issuer's JWKS, fetched through OIDC
//! discovery and cached. The verified claims are stored in the request
//! extensions for the rate limiter and the PATCH group check.

use crate::errors::ApiError;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
// unknown key ids refetch at most this often
const JWKS_UNKNOWN_KID_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("no key matches kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("failed to fetch signing keys: {0}")]
    Jwks(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        AuthError::InvalidToken(e.to_string())
    }
}

/// Claims of a verified token.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    /// Object id of the caller, used as the rate limiting identity.
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    groups: GroupsClaim,
    #[serde(default)]
    pub appid: Option<String>,
}

impl Claims {
    pub fn with_groups(oid: Option<&str>, groups: &[&str]) -> Self {
        Claims {
            oid: oid.map(str::to_string),
            groups: GroupsClaim::Multiple(groups.iter().map(|g| g.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn groups(&self) -> Vec<String> {
        self.groups.clone().into_vec()
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        !group.is_empty() && self.groups().iter().any(|g| g == group)
    }
}

/// Groups claim can be array or single string
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(untagged)]
enum GroupsClaim {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl GroupsClaim {
    fn into_vec(self) -> Vec<String> {
        match self {
            GroupsClaim::None => vec![],
            GroupsClaim::Single(s) => vec![s],
            GroupsClaim::Multiple(v) => v,
        }
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Deserialize)]
struct JwkKey {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    last_refresh: Instant,
}

/// Verifies RS256 tokens issued by `issuer_url` for audience `client_id`.
pub struct OidcVerifier {
    issuer_url: String,
    client_id: String,
    jwks_cache: RwLock<Option<JwksCache>>,
    http_client: reqwest::Client,
}

impl OidcVerifier {
    pub fn new(issuer_url: &str, client_id: &str) -> Self {
        OidcVerifier {
            issuer_url: issuer_url.to_string(),
            client_id: client_id.to_string(),
            jwks_cache: RwLock::new(None),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        let needs_refresh = match &*self.jwks_cache.read().await {
            None => true,
            Some(cache) => {
                let elapsed = cache.last_refresh.elapsed();
                elapsed > JWKS_REFRESH_INTERVAL
                    || (elapsed > JWKS_UNKNOWN_KID_COOLDOWN
                        && kid.is_some_and(|k| !cache.keys.contains_key(k)))
            }
        };
        if needs_refresh {
            self.refresh_jwks().await?;
        }

        let cache = self.jwks_cache.read().await;
        let keys = cache.as_ref().map(|c| &c.keys);
        let key = match kid {
            Some(kid) => keys.and_then(|k| k.get(kid)),
            None => keys.and_then(|k| k.values().next()),
        };
        key.cloned()
            .ok_or_else(|| AuthError::UnknownKey(kid.map(str::to_string)))
    }

    async fn refresh_jwks(&self) -> Result<(), AuthError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            self.issuer_url.trim_end_matches('/')
        );
        tracing::debug!(url = %discovery_url, "Fetching OIDC discovery document");

        let discovery: OidcDiscovery = self
            .http_client
            .get(&discovery_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?;

        let jwks: JwksDocument = self
            .http_client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                continue;
            };
            let key = DecodingKey::from_rsa_components(n, e)?;
            keys.insert(jwk.kid.unwrap_or_else(|| "default".to_string()), key);
        }
        if keys.is_empty() {
            return Err(AuthError::Jwks("no usable keys in JWKS".into()));
        }

        tracing::info!(key_count = keys.len(), "Refreshed JWKS cache");
        *self.jwks_cache.write().await = Some(JwksCache {
            keys,
            last_refresh: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for OidcVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token)?;
        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer_url]);
        validation.set_audience(&[&self.client_id]);

        Ok(decode::<Claims>(token, &key, &validation)?.claims)
    }
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Rejects requests without a valid bearer token.
pub async fn require_bearer(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers()).ok_or(ApiError::MissingToken)?;
    let claims = verifier.verify(token).await.map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        ApiError::Unauthorized(e.to_string())
    })?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SIGNING_KEY: &str = include_str!("../testdata/jwt_signing_key.pem");
    const MODULUS: &str = "nzLXsUJc-I7m7Xf4AYLXwHoo9EY6edYZrS2dNayUSnyTViG1tT1YLmupkfanrW9Iiask4fkeoqqNm9VaaKsTYgauYeHsAYcs1qVu-spxiVdGD7JxeTlAZoApXidONbUVLvKVK6heIx-Ti6UkOpDFjxWu4FFKoTIuvvGbSPOnSagphDXnMUv2woFeuqeRRj0tPviJIYpOcGGx4CnbdFfIVC1Ao3nBtXBsKthxhzTo_y-TkAmMRNlBAEqJ-Uudc9_3J1TunUKK-ibN0YLTTvbnOIzzZMnrUO7lrOxB7mbqPTWIBV89B4WdNC9wjrM1ax5JJ6O_jgNG7Ug8-CE0LwI_xw";

    async fn issuer() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": server.uri(),
                "jwks_uri": format!("{}/keys", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{"kty": "RSA", "kid": "k1", "n": MODULUS, "e": "AQAB"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn token(issuer: &str, audience: &str, exp_offset: i64) -> String {
        token_with_kid(issuer, audience, exp_offset, "k1")
    }

    fn token_with_kid(issuer: &str, audience: &str, exp_offset: i64, kid: &str) -> String {
        let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(kid.into());
        let claims = json!({
            "iss": issuer,
            "aud": audience,
            "exp": chrono::Utc::now().timestamp() + exp_offset,
            "oid": "user-1",
            "groups": ["admins", "readers"],
        });
        encode(&header, &claims, &EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let server = issuer().await;
        let verifier = OidcVerifier::new(&server.uri(), "client");

        let claims = verifier.verify(&token(&server.uri(), "client", 300)).await.unwrap();
        assert_eq!(claims.oid.as_deref(), Some("user-1"));
        assert!(claims.is_member_of("admins"));
        assert!(!claims.is_member_of("writers"));

        // keys are cached: the JWKS mock expects a single fetch
        verifier.verify(&token(&server.uri(), "client", 300)).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_tokens() {
        let server = issuer().await;
        let verifier = OidcVerifier::new(&server.uri(), "client");

        assert!(verifier.verify(&token(&server.uri(), "other", 300)).await.is_err());
        assert!(verifier.verify(&token("https://evil.example", "client", 300)).await.is_err());
        assert!(verifier.verify(&token(&server.uri(), "client", -3600)).await.is_err());
        assert!(verifier.verify("not-a-jwt").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_kid_does_not_refetch_keys() {
        let server = issuer().await;
        let verifier = OidcVerifier::new(&server.uri(), "client");

        verifier.verify(&token(&server.uri(), "client", 300)).await.unwrap();
        for _ in 0..3 {
            let rotated = token_with_kid(&server.uri(), "client", 300, "k2");
            assert!(matches!(
                verifier.verify(&rotated).await,
                Err(AuthError::UnknownKey(Some(kid))) if kid == "k2"
            ));
        }
        // the JWKS mock expects a single fetch
        server.verify().await;
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("Authorization", "Basic abc123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_groups_claim_forms() {
        let single: Claims = serde_json::from_value(json!({"groups": "admins"})).unwrap();
        assert_eq!(single.groups(), vec!["admins"]);
        let none: Claims = serde_json::from_value(json!({})).unwrap();
        assert!(none.groups().is_empty());
        assert!(!none.is_member_of(""));
    }
}
