//! Durable evidence records, one JSON document per request.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::domain::{RequestId, SettledEvidence};

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("evidence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("evidence serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EvidenceResult<T> = std::result::Result<T, EvidenceError>;

/// Evidence persistence keyed by request id.
///
/// `persist` overwrites any previous record for the same id.
pub trait EvidenceStore: Send + Sync {
    fn persist(&self, evidence: &SettledEvidence) -> EvidenceResult<PathBuf>;

    fn load(&self, request_id: &RequestId) -> EvidenceResult<Option<SettledEvidence>>;
}

/// Layout: `<dir>/<request id hex>.json`, pretty-printed.
#[derive(Debug, Clone)]
pub struct FsEvidenceStore {
    dir: PathBuf,
}

impl FsEvidenceStore {
    /// The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, request_id: &RequestId) -> PathBuf {
        self.dir.join(format!("{}.json", request_id.to_hex()))
    }
}

impl EvidenceStore for FsEvidenceStore {
    fn persist(&self, evidence: &SettledEvidence) -> EvidenceResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&evidence.request_id());
        let body = serde_json::to_vec_pretty(evidence)?;

        // Write next to the target, then rename over it.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&body)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    fn load(&self, request_id: &RequestId) -> EvidenceResult<Option<SettledEvidence>> {
        match fs::read(self.path_for(request_id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
