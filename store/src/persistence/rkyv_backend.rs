//! rkyv-based binary persistence.

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{from_bytes, to_bytes};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::index::{IndexSnapshot, Metric};

const FORMAT_VERSION: u32 = 2;

/// On-disk layout of a vector index.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
struct IndexFile {
    version: u32,
    dimension: u64,
    metric: u8,
    generation: u64,
    /// Row-major vectors, `dimension` floats per slot.
    data: Vec<f32>,
    live: Vec<bool>,
}

impl From<&IndexSnapshot> for IndexFile {
    fn from(snapshot: &IndexSnapshot) -> Self {
        Self {
            version: FORMAT_VERSION,
            dimension: snapshot.dimension as u64,
            metric: snapshot.metric.tag(),
            generation: snapshot.generation,
            data: snapshot.vectors.iter().flatten().copied().collect(),
            live: snapshot.live.clone(),
        }
    }
}

impl TryFrom<IndexFile> for IndexSnapshot {
    type Error = StoreError;

    fn try_from(file: IndexFile) -> Result<Self> {
        if file.version != FORMAT_VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported index format version {}",
                file.version
            )));
        }
        let metric = Metric::from_tag(file.metric).ok_or_else(|| {
            StoreError::Serialization(format!("unknown metric tag {}", file.metric))
        })?;
        let dimension = usize::try_from(file.dimension)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let expected = dimension.checked_mul(file.live.len()).ok_or_else(|| {
            StoreError::Serialization(format!(
                "index file claims {} slots of dimension {dimension}",
                file.live.len()
            ))
        })?;
        if dimension == 0 || file.data.len() != expected {
            return Err(StoreError::Serialization(format!(
                "index file holds {} floats for {} slots of dimension {dimension}",
                file.data.len(),
                file.live.len()
            )));
        }

        Ok(Self {
            dimension,
            metric,
            vectors: file.data.chunks_exact(dimension).map(<[f32]>::to_vec).collect(),
            live: file.live,
            generation: file.generation,
        })
    }
}

/// Binary persistence of a vector index using rkyv.
///
/// Writes go to a sibling temporary file first and are renamed into place, so a crash mid-save
/// leaves the previous artifact intact.
///
/// # Example
///
/// ```rust,no_run
/// use tessera_store::persistence::RkyvPersistence;
///
/// let persistence = RkyvPersistence::new("./vectors.rkyv");
/// let snapshot = persistence.load().unwrap();
/// assert!(snapshot.is_none());
/// ```
#[derive(Debug)]
pub struct RkyvPersistence {
    path: PathBuf,
}

impl RkyvPersistence {
    /// Creates a new rkyv persistence backend.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the storage path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Persistence {
            path: self.path.clone(),
            source,
        }
    }

    /// Saves a snapshot.
    ///
    /// # Errors
    ///
    /// Fails if encoding or any filesystem step fails.
    pub fn save(&self, snapshot: &IndexSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = to_bytes::<RkyvError>(&IndexFile::from(snapshot))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("rkyv.tmp");
        fs::write(&tmp, &bytes).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "saved vector index");
        Ok(())
    }

    /// Loads a snapshot, or `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid index artifact.
    pub fn load(&self) -> Result<Option<IndexSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&self.path).map_err(|e| self.io_error(e))?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);

        let file = from_bytes::<IndexFile, RkyvError>(&aligned)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        IndexSnapshot::try_from(file).map(Some)
    }
}
