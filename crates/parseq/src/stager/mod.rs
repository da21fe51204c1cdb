//! Tenant-scoped file staging.
//!
//! Uploaded documents are held in a blob store under a tenant-prefixed
//! namespace until the worker picks them up. The tenant check on download
//! and delete is the only tenant-isolation enforcement point the worker
//! relies on, so it must never be skipped.

use async_trait::async_trait;

use crate::error::StagerError;

pub mod filesystem;

pub use filesystem::FilesystemStager;

/// Blob staging contract consumed by the parsing worker.
///
/// Locations returned by `upload` are opaque keys of the form
/// `<tenant_id>/<name>`; `download` and `delete` fail with
/// [`StagerError::AccessDenied`] when the key does not belong to the
/// requesting tenant's namespace.
#[async_trait]
pub trait FileStager: Send + Sync {
    /// Stores bytes under the tenant's namespace and returns the location key.
    async fn upload(
        &self,
        tenant_id: &str,
        bytes: &[u8],
        filename: &str,
    ) -> Result<String, StagerError>;

    /// Fetches the bytes at `location`, enforcing the tenant scope.
    async fn download(&self, tenant_id: &str, location: &str) -> Result<Vec<u8>, StagerError>;

    /// Removes the blob at `location`, enforcing the tenant scope.
    async fn delete(&self, tenant_id: &str, location: &str) -> Result<(), StagerError>;
}

/// Validates that `location` lies inside `tenant_id`'s namespace.
pub(crate) fn check_tenant_scope(tenant_id: &str, location: &str) -> Result<(), StagerError> {
    validate_tenant_id(tenant_id)?;

    if location.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(StagerError::InvalidLocation(location.to_string()));
    }

    if !location.starts_with(&format!("{}/", tenant_id)) {
        return Err(StagerError::AccessDenied {
            tenant_id: tenant_id.to_string(),
            location: location.to_string(),
        });
    }

    Ok(())
}

pub(crate) fn validate_tenant_id(tenant_id: &str) -> Result<(), StagerError> {
    if tenant_id.is_empty()
        || tenant_id.contains('/')
        || tenant_id.contains('\\')
        || tenant_id.contains("..")
    {
        return Err(StagerError::InvalidTenant(tenant_id.to_string()));
    }
    Ok(())
}
