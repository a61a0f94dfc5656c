//! On-disk document cache for hosts.
//!
//! The cache is an opaque JSON snapshot: the session id the host held, its
//! display name and the document. It lets a restarted host resume the same
//! session link with the same text.

use crate::network::PeerId;
use scribe_text::Document;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed cache: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCache {
    pub session_id: Option<PeerId>,
    pub name: String,
    pub document: Document,
}

impl DocumentCache {
    /// Read a cache file, returning `None` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, CacheError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the cache, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
