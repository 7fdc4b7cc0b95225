//! Typed wrapper over `object_store::ObjectStore`.
//!
//! Every write the rest of the crate performs goes through here so the
//! retry/backoff policy and the `StoreError` classification live in one
//! place. The adapter is generic over the backend: `LocalFileSystem` for
//! on-disk dev/test runs, `InMemory` for unit tests, and any cloud backend
//! the `object_store` crate supports in production — none of the call
//! sites change.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, Error as OsError, ObjectStore, PutMode, PutOptions,
    PutPayload, UpdateVersion,
};
use rand::Rng;

use crate::error::StoreError;

/// Outcome of a conditional write, carrying the new etag for the next CAS
/// round.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub etag: Option<String>,
}

/// A listed key plus the metadata `head` would return.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

const MAX_RETRY_ATTEMPTS: u32 = 5;
const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Clone)]
pub struct ObjectStoreAdapter {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreAdapter {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// Unconditional put; overwrites whatever was at `key`.
    pub async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<PutOutcome, StoreError> {
        let path = Path::from(key);
        let attrs = content_type_attrs(content_type);
        with_retry(|| async {
            let payload = PutPayload::from_bytes(bytes.clone());
            let opts = PutOptions {
                mode: PutMode::Overwrite,
                attributes: attrs.clone(),
                ..Default::default()
            };
            self.inner
                .put_opts(&path, payload, opts)
                .await
                .map(|r| PutOutcome { etag: r.e_tag })
        })
        .await
    }

    /// Conditional create — fails with `Conflict` if `key` already exists
    /// (used by `RunRegistry::create`, I2).
    pub async fn put_if_absent(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<PutOutcome, StoreError> {
        let path = Path::from(key);
        let attrs = content_type_attrs(content_type);
        let payload = PutPayload::from_bytes(bytes);
        let opts = PutOptions {
            mode: PutMode::Create,
            attributes: attrs,
            ..Default::default()
        };
        match self.inner.put_opts(&path, payload, opts).await {
            Ok(r) => Ok(PutOutcome { etag: r.e_tag }),
            Err(OsError::AlreadyExists { path, .. }) => Err(StoreError::Conflict {
                key: path,
                reason: "already exists".to_string(),
            }),
            Err(e) => Err(classify(e)),
        }
    }

    /// CAS write — succeeds only if the stored version still matches
    /// `expected_etag` (used by `RunRegistry::update` and the result
    /// counter in `ResultCatalog::allocate_next`).
    pub async fn put_if_match(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        expected_etag: Option<String>,
    ) -> Result<PutOutcome, StoreError> {
        let path = Path::from(key);
        let attrs = content_type_attrs(content_type);
        let payload = PutPayload::from_bytes(bytes);
        let mode = match expected_etag {
            Some(e_tag) => PutMode::Update(UpdateVersion {
                e_tag: Some(e_tag),
                version: None,
            }),
            None => PutMode::Create,
        };
        let opts = PutOptions {
            mode,
            attributes: attrs,
            ..Default::default()
        };
        match self.inner.put_opts(&path, payload, opts).await {
            Ok(r) => Ok(PutOutcome { etag: r.e_tag }),
            Err(OsError::AlreadyExists { path, .. }) | Err(OsError::Precondition { path, .. }) => {
                Err(StoreError::Conflict {
                    key: path,
                    reason: "etag mismatch".to_string(),
                })
            }
            Err(e) => Err(classify(e)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = Path::from(key);
        with_retry(|| async {
            let result = self.inner.get(&path).await?;
            result.bytes().await
        })
        .await
    }

    /// Returns the bytes and the etag together, so a caller can seed the
    /// next CAS round without a second round-trip.
    pub async fn get_with_etag(&self, key: &str) -> Result<(Bytes, Option<String>), StoreError> {
        let path = Path::from(key.to_string());
        with_retry(|| {
            let path = path.clone();
            async move {
                let result = self.inner.get(&path).await?;
                let etag = result.meta.e_tag.clone();
                let bytes = result.bytes().await?;
                Ok((bytes, etag))
            }
        })
        .await
    }

    pub async fn head(&self, key: &str) -> Result<ObjectSummary, StoreError> {
        let path = Path::from(key);
        with_retry(|| async {
            let meta = self.inner.head(&path).await?;
            Ok(ObjectSummary {
                key: meta.location.to_string(),
                size: meta.size as u64,
            })
        })
        .await
    }

    /// Lists objects at `prefix`. Eventually consistent;
    /// callers that need strong ordering (the catalog counter) must not
    /// rely solely on this.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        use futures::StreamExt;
        let path = Path::from(prefix);
        with_retry(|| {
            let path = path.clone();
            async move {
                let mut stream = self.inner.list(Some(&path));
                let mut out = Vec::new();
                while let Some(meta) = stream.next().await {
                    let meta = meta?;
                    out.push(ObjectSummary {
                        key: meta.location.to_string(),
                        size: meta.size as u64,
                    });
                }
                Ok(out)
            }
        })
        .await
    }

    /// Lists immediate children under `prefix` using `/` as a delimiter,
    /// returning the common (folder) prefixes.
    pub async fn list_common_prefixes(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let path = Path::from(prefix);
        with_retry(|| {
            let path = path.clone();
            async move {
                let result = self.inner.list_with_delimiter(Some(&path)).await?;
                Ok(result
                    .common_prefixes
                    .into_iter()
                    .map(|p| p.to_string())
                    .collect())
            }
        })
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = Path::from(key);
        match with_retry(|| async { self.inner.delete(&path).await }).await {
            Ok(()) => Ok(()),
            // delete is idempotent: a missing key is success.
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let keys = self.list(prefix).await?;
        for obj in keys {
            self.delete(&obj.key).await?;
        }
        Ok(())
    }
}

fn content_type_attrs(content_type: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(
        Attribute::ContentType,
        AttributeValue::from(content_type.to_string()),
    );
    attrs
}

fn classify(err: OsError) -> StoreError {
    match err {
        OsError::NotFound { path, .. } => StoreError::NotFound(path),
        OsError::AlreadyExists { path, .. } => StoreError::Conflict {
            key: path,
            reason: "already exists".to_string(),
        },
        OsError::Precondition { path, .. } => StoreError::Conflict {
            key: path,
            reason: "precondition failed".to_string(),
        },
        OsError::NotImplemented => StoreError::Permanent(anyhow::anyhow!("operation not implemented by this backend")),
        other => StoreError::Transient {
            attempts: 0,
            source: anyhow::Error::new(other),
        },
    }
}

/// Retries transient failures with capped exponential backoff and jitter
///.
async fn with_retry<F, Fut, T>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OsError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let classified = classify(e);
                if !classified.is_retryable() || attempt >= MAX_RETRY_ATTEMPTS {
                    return Err(match classified {
                        StoreError::Transient { source, .. } => StoreError::Transient {
                            attempts: attempt,
                            source,
                        },
                        other => other,
                    });
                }
                let backoff = backoff_delay(attempt);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(6));
    let jitter_ms = rand::thread_rng().gen_range(0..50);
    Duration::from_millis(base_ms + jitter_ms).min(MAX_BACKOFF)
}
