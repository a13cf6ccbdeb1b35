//! Byte-level HTTP response cache.
//!
//! Successful `GET` responses are stored under the FNV-64a hash of the
//! request URL with its query values sorted, so parameter order does not
//! split the cache. Every entry carries the `clusters` tag, which the
//! ingestion dispatcher invalidates after each write.

pub mod memory;
pub mod redis;

use crate::metrics_defs::{CACHE_ERRORS, CACHE_HIT, CACHE_INVALIDATE, CACHE_MISS};
use async_trait::async_trait;
use axum::body::{Body, HttpBody};
use axum::extract::{OriginalUri, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use shared::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryCacheStore;
pub use redis::RedisCacheStore;

/// Tag attached to every cached response.
pub const CLUSTERS_TAG: &str = "clusters";

const MAX_CACHED_BODY: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Keyed byte store with tag based invalidation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: u64) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: u64, value: Vec<u8>, ttl: Duration, tags: &[&str]) -> Result<(), CacheError>;

    async fn delete(&self, key: u64) -> Result<(), CacheError>;

    /// Deletes every key stored with `tag`.
    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError>;
}

/// Serialized form of a cached response. Times are unix milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub value: Vec<u8>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub expiration: i64,
    pub last_access: i64,
    pub frequency: u64,
}

impl CacheEntry {
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let (entry, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(entry)
    }

    fn from_parts(status: StatusCode, headers: &HeaderMap, body: &Bytes, ttl: Duration, now: i64) -> Self {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                map.entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        CacheEntry {
            status: status.as_u16(),
            value: body.to_vec(),
            headers: map,
            expiration: now + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            last_access: now,
            frequency: 0,
        }
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.value));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let headers = response.headers_mut();
        for (name, values) in self.headers {
            let Ok(name) = HeaderName::try_from(name) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::try_from(value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        response
    }
}

/// 64-bit FNV-1a.
pub fn fnv64a(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in data {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

/// Path plus query with keys and each key's values sorted.
pub fn canonical_url(uri: &Uri) -> String {
    let Some(query) = uri.query().filter(|q| !q.is_empty()) else {
        return uri.path().to_string();
    };
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in params.iter_mut() {
        values.sort();
        for value in values.iter() {
            serializer.append_pair(key, value);
        }
    }
    format!("{}?{}", uri.path(), serializer.finish())
}

pub fn cache_key(uri: &Uri) -> u64 {
    fnv64a(canonical_url(uri).as_bytes())
}

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    // Bumped before every invalidation. A response rendered under an older
    // generation is never stored.
    generation: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        ResponseCache {
            store,
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub async fn invalidate(&self, tag: &str) -> Result<(), CacheError> {
        counter!(CACHE_INVALIDATE).increment(1);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.store.invalidate_tag(tag).await
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn lookup(&self, key: u64) -> Result<Option<Response>, CacheError> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };
        let mut entry = CacheEntry::decode(&bytes)?;
        let now = Utc::now().timestamp_millis();
        if entry.expiration <= now {
            self.store.delete(key).await?;
            return Ok(None);
        }

        entry.last_access = now;
        entry.frequency += 1;
        let remaining = Duration::from_millis(u64::try_from(entry.expiration - now).unwrap_or(0));
        self.store
            .set(key, entry.encode()?, remaining, &[CLUSTERS_TAG])
            .await?;
        Ok(Some(entry.into_response()))
    }

    /// Stores the response unless an invalidation ran after `generation`
    /// was read.
    async fn insert(
        &self,
        key: u64,
        generation: u64,
        status: StatusCode,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<(), CacheError> {
        if self.generation() != generation {
            return Ok(());
        }
        let entry = CacheEntry::from_parts(status, headers, body, self.ttl, Utc::now().timestamp_millis());
        self.store
            .set(key, entry.encode()?, self.ttl, &[CLUSTERS_TAG])
            .await?;
        // an invalidation may have landed between the check and the write
        if self.generation() != generation {
            self.store.delete(key).await?;
        }
        Ok(())
    }
}

enum Buffered {
    Complete(Bytes),
    Oversized(Body),
}

/// Collects `body` up to `limit` bytes. Past the limit the chunks read so far
/// are chained back in front of the rest of the stream.
async fn buffer_body(body: Body, limit: usize) -> Result<Buffered, axum::Error> {
    if body.size_hint().lower() > limit as u64 {
        return Ok(Buffered::Oversized(body));
    }

    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        size += chunk.len();
        chunks.push(chunk);
        if size > limit {
            let head = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(Buffered::Oversized(Body::from_stream(head.chain(data))));
        }
    }

    let mut buf = BytesMut::with_capacity(size);
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    Ok(Buffered::Complete(buf.freeze()))
}

pub async fn cache_middleware(
    State(cache): State<Arc<ResponseCache>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET || !cache.enabled() {
        return next.run(request).await;
    }

    // nested routers see the URI with their prefix stripped
    let key = match request.extensions().get::<OriginalUri>() {
        Some(OriginalUri(uri)) => cache_key(uri),
        None => cache_key(request.uri()),
    };
    match cache.lookup(key).await {
        Ok(Some(response)) => {
            counter!(CACHE_HIT).increment(1);
            return response;
        }
        Ok(None) => counter!(CACHE_MISS).increment(1),
        Err(e) => {
            counter!(CACHE_ERRORS).increment(1);
            tracing::warn!(error = %e, "Cache lookup failed");
        }
    }

    let generation = cache.generation();
    let response = next.run(request).await;
    if response.status().as_u16() >= 400 {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match buffer_body(body, MAX_CACHED_BODY).await {
        Ok(Buffered::Complete(bytes)) => bytes,
        Ok(Buffered::Oversized(body)) => {
            tracing::debug!(limit = MAX_CACHED_BODY, "Response too large to cache");
            return Response::from_parts(parts, body);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(e) = cache
        .insert(key, generation, parts.status, &parts.headers, &bytes)
        .await
    {
        counter!(CACHE_ERRORS).increment(1);
        tracing::warn!(error = %e, "Cache store failed");
    }

    Response::from_parts(parts, Body::from(bytes))
}
