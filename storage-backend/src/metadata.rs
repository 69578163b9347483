use anyhow::{anyhow, Result};
use bytes::Bytes;
use shared_types::{Metadata, Resource};

use crate::error::StorageError;

/// Serialize a resource for storage. Metadata is owned by the backend and is
/// never written into the value itself.
pub fn encode<T: Resource>(resource: &T) -> Result<Vec<u8>> {
    let mut stripped = resource.clone();
    *stripped.metadata_mut() = Metadata::default();
    let bytes = serde_json::to_vec(&stripped).map_err(StorageError::from)?;
    Ok(bytes)
}

/// Deserialize a stored value and stamp it with the version it was read at
pub fn decode<T: Resource>(bytes: &Bytes, resource_version: String) -> Result<T> {
    let mut resource: T = serde_json::from_slice(bytes).map_err(StorageError::from)?;
    resource.metadata_mut().resource_version = resource_version;
    Ok(resource)
}

/// Copy of `resource` carrying the version the backend assigned on write
pub fn stamped<T: Resource>(resource: &T, resource_version: String) -> T {
    let mut out = resource.clone();
    out.metadata_mut().resource_version = resource_version;
    out
}

/// The backend's entity tag is the resource version. Stores that do not
/// report one cannot take part in optimistic concurrency.
pub fn resource_version(e_tag: Option<String>, name: &str) -> Result<String> {
    e_tag.ok_or_else(|| anyhow!("backend returned no entity tag for {name}"))
}
