//! Executor for `Data` workloads: a batch acquisition step that pulls an
//! uploaded file, a URL, a local path, or a directory listing into
//! storage and records its hash and content type. Runs to completion
//! inside `execute` rather than backgrounding work.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{Executor, ObservedStatus};
use crate::error::AgentError;
use crate::model::workload::{DataDetails, UploadMethod, WorkloadKind};
use crate::model::{Workload, WorkloadStatus};
use crate::storage::StorageBackend;

struct DataRecord {
    status: ObservedStatus,
    content_type: String,
}

pub struct DataExecutor {
    storage: Arc<dyn StorageBackend>,
    http_client: reqwest::Client,
    records: RwLock<HashMap<String, DataRecord>>,
}

impl DataExecutor {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            http_client: reqwest::Client::new(),
            records: RwLock::new(HashMap::new()),
        }
    }

    async fn acquire_bytes(&self, details: &DataDetails) -> Result<Vec<u8>, AgentError> {
        match details.upload_method {
            UploadMethod::File => {
                // Content was already staged by the HTTP layer's multipart
                // handler under `source_path`; we only need to read it back.
                let path = details
                    .source_path
                    .as_ref()
                    .ok_or_else(|| AgentError::Validation("uploaded file has no staged source_path".into()))?;
                Ok(tokio::fs::read(path).await?)
            }
            UploadMethod::Url => {
                let url = details
                    .source_url
                    .as_ref()
                    .ok_or_else(|| AgentError::Validation("upload_method=url requires source_url".into()))?;
                let response = self
                    .http_client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| AgentError::Execution(format!("failed to fetch {url}: {e}")))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| AgentError::Execution(format!("failed to read body of {url}: {e}")))?;
                Ok(bytes.to_vec())
            }
            UploadMethod::Path => {
                let path = details
                    .source_path
                    .as_ref()
                    .ok_or_else(|| AgentError::Validation("upload_method=path requires source_path".into()))?;
                Ok(tokio::fs::read(path).await?)
            }
            UploadMethod::Directory => {
                // Directory uploads are stored as a manifest; each entry in
                // `file_list` is copied in by the caller ahead of time, so
                // here we just serialize the manifest itself.
                Ok(serde_json::to_vec(&details.file_list)?)
            }
        }
    }
}

#[async_trait]
impl Executor for DataExecutor {
    async fn execute(&self, workload: &mut Workload) -> Result<(), AgentError> {
        let mut details = match &workload.kind {
            WorkloadKind::Data(d) => d.clone(),
            _ => return Err(AgentError::Validation("DataExecutor only handles data workloads".into())),
        };

        let bytes = self.acquire_bytes(&details).await?;

        // Spec calls for MD5 here, matching the hash the rest of the
        // fleet's data-gateway sidecars already key blobs by.
        let hash = format!("{:x}", md5::compute(&bytes));

        let content_type = if !details.content_type.is_empty() {
            details.content_type.clone()
        } else {
            mime_guess::from_path(&details.data_key)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        };

        self.storage.put(&details.data_key, &bytes).await?;

        details.size = bytes.len() as u64;
        details.hash = hash;
        details.content_type = content_type.clone();
        if let WorkloadKind::Data(d) = &mut workload.kind {
            *d = details;
        }

        self.records.write().unwrap().insert(
            workload.id.clone(),
            DataRecord {
                status: ObservedStatus::Completed,
                content_type,
            },
        );

        workload.transition(WorkloadStatus::Running)?;
        workload.transition(WorkloadStatus::Completed)?;
        Ok(())
    }

    async fn stop(&self, workload: &Workload) -> Result<(), AgentError> {
        let data_key = match &workload.kind {
            WorkloadKind::Data(d) => d.data_key.clone(),
            _ => return Ok(()),
        };
        self.storage.delete(&data_key).await?;
        self.records.write().unwrap().remove(&workload.id);
        Ok(())
    }

    async fn get_logs(&self, _workload: &Workload, _lines: usize) -> Result<Vec<String>, AgentError> {
        Ok(Vec::new())
    }

    async fn get_status(&self, workload: &Workload) -> ObservedStatus {
        self.records
            .read()
            .unwrap()
            .get(&workload.id)
            .map(|r| r.status)
            .unwrap_or(ObservedStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quantity::Quantity;
    use crate::storage::FilesystemStorage;

    fn path_workload(source_path: &str) -> Workload {
        Workload::new(
            "d1",
            Quantity::new(0, 0, 0, 1_000_000),
            WorkloadKind::Data(DataDetails {
                data_key: "datasets/sample.bin".into(),
                data_type: "blob".into(),
                size: 0,
                hash: String::new(),
                content_type: String::new(),
                upload_method: UploadMethod::Path,
                source_url: None,
                source_path: Some(source_path.to_string()),
                file_list: Vec::new(),
                access_mode: crate::model::workload::AccessMode::Private,
                tags: Vec::new(),
                file_path: String::new(),
            }),
        )
    }

    #[tokio::test]
    async fn ingesting_a_local_path_computes_hash_and_stores_bytes() {
        let source_dir = tempfile::tempdir().unwrap();
        let source_path = source_dir.path().join("input.bin");
        tokio::fs::write(&source_path, b"hello world").await.unwrap();

        let storage_dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FilesystemStorage::new(storage_dir.path().to_path_buf()));
        let executor = DataExecutor::new(storage.clone());

        let mut workload = path_workload(source_path.to_str().unwrap());
        executor.execute(&mut workload).await.unwrap();

        assert_eq!(workload.status, WorkloadStatus::Completed);
        if let WorkloadKind::Data(d) = &workload.kind {
            assert_eq!(d.size, 11);
            assert!(!d.hash.is_empty());
        }
        assert!(storage.get("datasets/sample.bin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_source_path_is_a_validation_error() {
        let storage_dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FilesystemStorage::new(storage_dir.path().to_path_buf()));
        let executor = DataExecutor::new(storage);
        let mut workload = path_workload("/does/not/exist-at-all.bin");
        assert!(executor.execute(&mut workload).await.is_err());
    }
}
