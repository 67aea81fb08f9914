//! Stages resources required by a task onto the local filesystem.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::{WorkerError, WorkerResult};

/// A single resource download: the file name to stage and the tenant
/// code under whose object-store namespace it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDownload {
    pub file_name: String,
    pub tenant_code: String,
}

/// Capability interface for the remote object store. Implementations
/// wrap HDFS/S3/MinIO or similar; the runtime only depends on this
/// trait, never a concrete backend.
#[async_trait]
pub trait StorageOperate: Send + Sync {
    /// Resolve the remote path for a resource. Pure, no I/O required.
    fn resolve_resource_path(&self, tenant_code: &str, file_name: &str) -> String;

    /// Download a single resource to `local_path`, overwriting if present.
    async fn download(
        &self,
        tenant_code: &str,
        remote_path: &str,
        local_path: &Path,
        delete_source: bool,
        overwrite: bool,
    ) -> anyhow::Result<()>;
}

/// Stages resources for a task's execute directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceStager;

impl ResourceStager {
    /// Determine which of `resources` are missing at `exec_local_path`.
    ///
    /// Empty or absent `resources` is a no-op success: `Ok(vec![])`. If
    /// any download is required and `resource_upload_enabled` is false,
    /// fails with `StorageNotConfigured`.
    pub fn plan_downloads(
        &self,
        exec_local_path: &Path,
        resources: &HashMap<String, String>,
        resource_upload_enabled: bool,
    ) -> WorkerResult<Vec<PendingDownload>> {
        let mut missing = Vec::new();
        for (file_name, tenant_code) in resources {
            let local_file = exec_local_path.join(file_name);
            if !local_file.exists() {
                missing.push(PendingDownload {
                    file_name: file_name.clone(),
                    tenant_code: tenant_code.clone(),
                });
            }
        }

        if !missing.is_empty() && !resource_upload_enabled {
            return Err(WorkerError::StorageNotConfigured(missing.len()));
        }

        Ok(missing)
    }

    /// Download every entry in `downloads`. Any per-file failure aborts
    /// the batch; partial files already written are left in place for
    /// `WorkDirectory::clear` to remove.
    pub async fn download(
        &self,
        storage: &dyn StorageOperate,
        exec_local_path: &Path,
        downloads: &[PendingDownload],
    ) -> WorkerResult<()> {
        for d in downloads {
            let remote_path = storage.resolve_resource_path(&d.tenant_code, &d.file_name);
            let local_path = exec_local_path.join(&d.file_name);

            tracing::info!(
                file_name = %d.file_name,
                tenant_code = %d.tenant_code,
                remote_path = %remote_path,
                "staging resource"
            );

            storage
                .download(&d.tenant_code, &remote_path, &local_path, false, true)
                .await
                .map_err(|e| WorkerError::ResourceDownloadFailure {
                    file_name: d.file_name.clone(),
                    tenant_code: d.tenant_code.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}
