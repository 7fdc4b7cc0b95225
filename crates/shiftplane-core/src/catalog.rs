//! Result Catalog — the hard part: allocate `Result_N` names
//! without collisions or gaps-from-loss under concurrent writers, list and
//! delete completed folders, and stream a folder as a ZIP without
//! buffering the whole archive in memory.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use rand::Rng;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};

use crate::error::{CatalogError, StoreError};
use crate::object_store_adapter::ObjectStoreAdapter;
use crate::types::{FolderSummary, ResultMetadata};

const COUNTER_KEY: &str = "results/_counter.json";
const RESULT_PREFIX: &str = "Result_";

#[derive(serde::Serialize, serde::Deserialize)]
struct Counter {
    next: u64,
}

pub struct ResultCatalog {
    store: ObjectStoreAdapter,
    cas_attempts: u32,
}

impl ResultCatalog {
    pub fn new(store: ObjectStoreAdapter, cas_attempts: u32) -> Self {
        Self { store, cas_attempts }
    }

    fn folder_name(n: u64) -> String {
        format!("{RESULT_PREFIX}{n}")
    }

    fn parse_suffix(name: &str) -> Option<u64> {
        name.strip_prefix(RESULT_PREFIX)?.trim_end_matches('/').parse().ok()
    }

    /// Scans existing `Result_*` folders to seed an optimistic starting
    /// point for the counter; an optimization only,
    /// never the source of correctness.
    async fn scan_high_water_mark(&self) -> Result<u64, CatalogError> {
        let prefixes = self.store.list_common_prefixes(RESULT_PREFIX).await.map_err(CatalogError::Store)?;
        Ok(prefixes.iter().filter_map(|p| Self::parse_suffix(p)).max().unwrap_or(0))
    }

    /// Allocates the next globally unique `Result_N` name via CAS on a
    /// shared counter object.
    pub async fn allocate_next(&self) -> Result<String, CatalogError> {
        let scanned = self.scan_high_water_mark().await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (current, etag) = match self.store.get_with_etag(COUNTER_KEY).await {
                Ok((bytes, etag)) => {
                    let counter: Counter =
                        serde_json::from_slice(&bytes).map_err(|e| CatalogError::Store(StoreError::Permanent(e.into())))?;
                    (counter.next, etag)
                }
                Err(StoreError::NotFound(_)) => (1, None),
                Err(e) => return Err(CatalogError::Store(e)),
            };

            let proposed = current.max(scanned + 1);
            let next_value = proposed + 1;
            let body = serde_json::to_vec(&Counter { next: next_value }).expect("Counter is always serializable");

            let write = if etag.is_none() {
                self.store.put_if_absent(COUNTER_KEY, Bytes::from(body), "application/json").await
            } else {
                self.store
                    .put_if_match(COUNTER_KEY, Bytes::from(body), "application/json", etag)
                    .await
            };

            match write {
                Ok(_) => return Ok(Self::folder_name(proposed)),
                Err(StoreError::Conflict { .. }) => {
                    if attempt >= self.cas_attempts {
                        return Err(CatalogError::Conflict { attempts: attempt });
                    }
                    let jitter_ms = rand::thread_rng().gen_range(5..40);
                    tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;
                    continue;
                }
                Err(e) => return Err(CatalogError::Store(e)),
            }
        }
    }

    pub async fn put_results(&self, folder: &str, results_json: Bytes, extra: &[(String, Bytes)]) -> Result<(), CatalogError> {
        self.store
            .put(&format!("{folder}/results.json"), results_json, "application/json")
            .await
            .map_err(CatalogError::Store)?;
        for (name, bytes) in extra {
            self.store
                .put(&format!("{folder}/{name}"), bytes.clone(), "application/octet-stream")
                .await
                .map_err(CatalogError::Store)?;
        }
        Ok(())
    }

    pub async fn put_metadata(&self, folder: &str, metadata: &ResultMetadata) -> Result<(), CatalogError> {
        let body = serde_json::to_vec(metadata).expect("ResultMetadata is always serializable");
        self.store
            .put(&format!("{folder}/metadata.json"), Bytes::from(body), "application/json")
            .await
            .map_err(CatalogError::Store)?;
        Ok(())
    }

    /// Lists completed folders, excluding any still being assembled
    /// (missing `metadata.json`), sorted descending by numeric suffix.
    pub async fn list_folders(&self) -> Result<Vec<FolderSummary>, CatalogError> {
        let prefixes = self.store.list_common_prefixes(RESULT_PREFIX).await.map_err(CatalogError::Store)?;
        let mut summaries = Vec::new();
        for prefix in prefixes {
            let name = prefix.trim_end_matches('/').to_string();
            let meta_key = format!("{name}/metadata.json");
            let metadata: ResultMetadata = match self.store.get(&meta_key).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(m) => m,
                    Err(_) => continue,
                },
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(CatalogError::Store(e)),
            };
            let objects = self.store.list(&format!("{name}/")).await.map_err(CatalogError::Store)?;
            let total_size = objects.iter().map(|o| o.size).sum();
            summaries.push(FolderSummary {
                name: name.clone(),
                created: metadata.created_at,
                file_count: objects.len() as u64,
                total_size,
                runtime_seconds: metadata.runtime_seconds,
                solutions_count: metadata.solutions_count,
                solver_type: metadata.solver_type,
            });
        }
        summaries.sort_by_key(|s| std::cmp::Reverse(Self::parse_suffix(&s.name).unwrap_or(0)));
        Ok(summaries)
    }

    /// Idempotent: a second delete of the same name returns success with
    /// no change.
    pub async fn delete(&self, name: &str) -> Result<(), CatalogError> {
        self.store.delete_prefix(&format!("{name}/")).await.map_err(CatalogError::Store)
    }

    pub async fn exists_and_ready(&self, name: &str) -> Result<bool, CatalogError> {
        match self.store.head(&format!("{name}/metadata.json")).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(CatalogError::Store(e)),
        }
    }

    /// Computes the total byte size of a folder up front so the Download
    /// Service can emit `Content-Length` when possible.
    pub async fn folder_size(&self, name: &str) -> Result<u64, CatalogError> {
        let objects = self.store.list(&format!("{name}/")).await.map_err(CatalogError::Store)?;
        Ok(objects.iter().map(|o| o.size).sum())
    }

    /// Streams `name/` as a ZIP into `writer` without buffering the whole
    /// archive, using store-only compression (artifacts are already
    /// compressed or small).
    pub async fn stream_zip<W>(&self, name: &str, writer: W) -> Result<(), CatalogError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        use async_zip::tokio::write::ZipFileWriter;
        use async_zip::{Compression, ZipEntryBuilder};

        let objects = self.store.list(&format!("{name}/")).await.map_err(CatalogError::Store)?;
        let mut zip = ZipFileWriter::with_tokio(writer);
        for obj in objects {
            let entry_name = obj
                .key
                .strip_prefix(&format!("{name}/"))
                .unwrap_or(&obj.key)
                .to_string();
            let bytes = self.store.get(&obj.key).await.map_err(CatalogError::Store)?;
            let builder = ZipEntryBuilder::new(entry_name.into(), Compression::Stored);
            zip.write_entry_whole(builder, &bytes)
                .await
                .map_err(|e| CatalogError::Zip(anyhow::anyhow!(e)))?;
        }
        zip.close().await.map_err(|e| CatalogError::Zip(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Convenience used by the download route: streams into a duplex pipe
    /// and hands back the read half as a `Stream`-compatible body source.
    pub fn spawn_zip_stream(self: Arc<Self>, name: String) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut server = server;
            if let Err(e) = self.stream_zip(&name, &mut server).await {
                tracing::error!(folder = %name, error = %e, "zip streaming failed");
            }
            let _ = server.shutdown().await;
        });
        client
    }
}

/// Timestamp helper used by callers constructing `ResultMetadata`.
pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn catalog() -> ResultCatalog {
        ResultCatalog::new(ObjectStoreAdapter::new(Arc::new(InMemory::new())), 16)
    }

    #[tokio::test]
    async fn allocate_next_starts_at_one() {
        let cat = catalog();
        assert_eq!(cat.allocate_next().await.unwrap(), "Result_1");
        assert_eq!(cat.allocate_next().await.unwrap(), "Result_2");
    }

    #[tokio::test]
    async fn concurrent_allocations_are_distinct() {
        let cat = Arc::new(catalog());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cat = cat.clone();
            handles.push(tokio::spawn(async move { cat.allocate_next().await.unwrap() }));
        }
        let mut names = Vec::new();
        for h in handles {
            names.push(h.await.unwrap());
        }
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len(), "no duplicate Result_N names");
    }

    #[tokio::test]
    async fn list_folders_excludes_in_flight_assembly() {
        let cat = catalog();
        let folder = cat.allocate_next().await.unwrap();
        // no metadata.json yet — folder is "in flight"
        let folders = cat.list_folders().await.unwrap();
        assert!(folders.is_empty());

        cat.put_metadata(
            &folder,
            &ResultMetadata {
                run_id: "r1".into(),
                solver_type: "greedy".into(),
                solutions_count: 1,
                runtime_seconds: 1.5,
                created_at: now(),
            },
        )
        .await
        .unwrap();
        let folders = cat.list_folders().await.unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, folder);
    }

    #[tokio::test]
    async fn list_folders_sorts_descending() {
        let cat = catalog();
        for _ in 0..3 {
            let folder = cat.allocate_next().await.unwrap();
            cat.put_metadata(
                &folder,
                &ResultMetadata {
                    run_id: "r".into(),
                    solver_type: "greedy".into(),
                    solutions_count: 0,
                    runtime_seconds: 0.1,
                    created_at: now(),
                },
            )
            .await
            .unwrap();
        }
        let folders = cat.list_folders().await.unwrap();
        let names: Vec<_> = folders.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["Result_3", "Result_2", "Result_1"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cat = catalog();
        let folder = cat.allocate_next().await.unwrap();
        cat.put_results(&folder, Bytes::from_static(b"{}"), &[]).await.unwrap();
        cat.delete(&folder).await.unwrap();
        cat.delete(&folder).await.unwrap();
    }

    #[tokio::test]
    async fn stream_zip_contains_required_entries() {
        let cat = catalog();
        let folder = cat.allocate_next().await.unwrap();
        cat.put_results(&folder, Bytes::from_static(b"{\"assignments\":[]}"), &[]).await.unwrap();
        cat.put_metadata(
            &folder,
            &ResultMetadata {
                run_id: "r1".into(),
                solver_type: "greedy".into(),
                solutions_count: 0,
                runtime_seconds: 0.2,
                created_at: now(),
            },
        )
        .await
        .unwrap();

        let mut buf = Vec::new();
        cat.stream_zip(&folder, &mut buf).await.unwrap();
        assert!(!buf.is_empty());
    }
}
