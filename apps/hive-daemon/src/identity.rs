use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

use hive_core::{Guid, GuidError};
use thiserror::Error;
use tracing::info;

/// File under the spool directory holding this node's hex id.
pub const NODE_ID_FILE: &str = "node-id";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to access node id file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid node id: {0}")]
    Guid(#[from] GuidError),
}

/// Resolves the node id: the configured value, else the persisted one, else a fresh
/// random id which is then persisted.
pub fn resolve_node_id(configured: Option<&str>, spool_dir: &Path) -> Result<Guid, IdentityError> {
    if let Some(text) = configured {
        return Ok(Guid::from_hex(text.trim())?);
    }
    let path = spool_dir.join(NODE_ID_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => return Ok(Guid::from_hex(text.trim())?),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let node_id = Guid::random();
    fs::create_dir_all(spool_dir)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, node_id.to_hex())?;
    fs::rename(&tmp, &path)?;
    info!(%node_id, path = %path.display(), "generated node id");
    Ok(node_id)
}
