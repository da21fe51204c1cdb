//! Filesystem-backed file stager.
//!
//! Lays blobs out as `<root>/<tenant_id>/<timestamp>_<filename>`, one
//! directory per tenant. Location keys stored on jobs are the
//! `<tenant_id>/<name>` suffix, independent of the root path.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use super::{check_tenant_scope, validate_tenant_id, FileStager};
use crate::error::StagerError;

pub struct FilesystemStager {
    root: PathBuf,
}

impl FilesystemStager {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StagerError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StagerError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Strips path separators and whitespace from an uploaded filename so it
    /// cannot escape the tenant directory.
    fn sanitize_filename(filename: &str) -> String {
        let name = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
            .replace(' ', "_");
        if name.is_empty() || name.trim_matches('.').is_empty() {
            "document".to_string()
        } else {
            name
        }
    }
}

#[async_trait]
impl FileStager for FilesystemStager {
    async fn upload(
        &self,
        tenant_id: &str,
        bytes: &[u8],
        filename: &str,
    ) -> Result<String, StagerError> {
        validate_tenant_id(tenant_id)?;

        let tenant_dir = self.root.join(tenant_id);
        self.ensure_directory(&tenant_dir)?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let name = Self::sanitize_filename(filename);

        // Numbered suffixes resolve collisions within the same second;
        // create_new keeps the check-and-create atomic.
        for counter in 1..=1000 {
            let candidate = if counter == 1 {
                format!("{}_{}", stamp, name)
            } else {
                format!("{}_{}_{}", stamp, counter, name)
            };
            let path = tenant_dir.join(&candidate);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(bytes).map_err(|e| StagerError::WriteFile {
                        path: path.clone(),
                        source: e,
                    })?;
                    let location = format!("{}/{}", tenant_id, candidate);
                    log::debug!("Staged {} ({} bytes)", location, bytes.len());
                    return Ok(location);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StagerError::WriteFile { path, source: e });
                }
            }
        }

        Err(StagerError::WriteFile {
            path: tenant_dir.join(&name),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "exhausted collision suffixes",
            ),
        })
    }

    async fn download(&self, tenant_id: &str, location: &str) -> Result<Vec<u8>, StagerError> {
        check_tenant_scope(tenant_id, location)?;

        let path = self.blob_path(location);
        if !path.is_file() {
            return Err(StagerError::NotFound(location.to_string()));
        }

        std::fs::read(&path).map_err(|e| StagerError::ReadFile { path, source: e })
    }

    async fn delete(&self, tenant_id: &str, location: &str) -> Result<(), StagerError> {
        check_tenant_scope(tenant_id, location)?;

        let path = self.blob_path(location);
        if !path.is_file() {
            return Err(StagerError::NotFound(location.to_string()));
        }

        std::fs::remove_file(&path).map_err(|e| StagerError::DeleteFile { path, source: e })
    }
}
