//! JSON persistence for the landmark map.
//!
//! The file is replaced atomically: the document is written to a temporary
//! file in the target directory, synced, then renamed over the old map. A
//! failed save leaves the previous file untouched and the temporary file is
//! removed when it goes out of scope.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fiducial_slam_core::{FiducialId, TransformWithVariance};

use crate::{FiducialMap, Landmark, MapParams};

/// Current on-disk format version.
pub const MAP_FILE_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum MapIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to replace map file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("unsupported map file version {found} (expected {MAP_FILE_VERSION})")]
    UnsupportedVersion { found: u32 },
}

/// Result of a save request that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { path: PathBuf, landmarks: usize },
    /// Read-only sessions never overwrite the stored map.
    SkippedReadOnly,
}

/// One persisted landmark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub id: FiducialId,
    pub translation: [f64; 3],
    /// `[x, y, z, w]`.
    pub rotation: [f64; 4],
    pub variance: f64,
    pub observations: u32,
    #[serde(default)]
    pub first_seen: f64,
    #[serde(default)]
    pub last_seen: f64,
    #[serde(default)]
    pub links: Vec<FiducialId>,
}

impl From<&Landmark> for LandmarkRecord {
    fn from(lm: &Landmark) -> Self {
        let t = lm.pose.translation();
        Self {
            id: lm.id,
            translation: [t.x, t.y, t.z],
            rotation: lm.pose.rotation_xyzw(),
            variance: lm.pose.variance,
            observations: lm.observations,
            first_seen: lm.first_seen,
            last_seen: lm.last_seen,
            links: lm.links.iter().copied().collect(),
        }
    }
}

impl LandmarkRecord {
    /// Convert back into a landmark; `None` if the record is not usable.
    pub fn to_landmark(&self) -> Option<Landmark> {
        if !self.variance.is_finite() || self.variance <= 0.0 {
            return None;
        }
        let pose = TransformWithVariance::from_parts(self.translation, self.rotation, self.variance)?;
        Some(Landmark {
            id: self.id,
            pose,
            observations: self.observations.max(1),
            first_seen: self.first_seen,
            last_seen: self.last_seen.max(self.first_seen),
            links: self
                .links
                .iter()
                .copied()
                .filter(|&l| l != self.id)
                .collect::<BTreeSet<_>>(),
        })
    }
}

/// Whole-map document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapFile {
    pub version: u32,
    pub landmarks: Vec<LandmarkRecord>,
}

impl MapFile {
    /// Load a map document from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, MapIoError> {
        let raw = fs::read_to_string(path)?;
        let file: MapFile = serde_json::from_str(&raw)?;
        if file.version != MAP_FILE_VERSION {
            return Err(MapIoError::UnsupportedVersion {
                found: file.version,
            });
        }
        Ok(file)
    }

    /// Write this document atomically as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), MapIoError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        // the rename itself is durable only once the directory is synced
        #[cfg(unix)]
        fs::File::open(dir)?.sync_all()?;
        Ok(())
    }
}

impl FiducialMap {
    /// Snapshot of all landmarks as a persistable document.
    pub fn to_map_file(&self) -> MapFile {
        MapFile {
            version: MAP_FILE_VERSION,
            landmarks: self.landmarks().map(LandmarkRecord::from).collect(),
        }
    }

    /// Write the map to `path` unless the map is read-only.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<SaveOutcome, MapIoError> {
        if self.is_read_only() {
            log::info!("read-only map, not saving");
            return Ok(SaveOutcome::SkippedReadOnly);
        }
        let path = path.as_ref();
        self.to_map_file().write_json(path)?;
        log::info!("saved {} landmarks to {}", self.len(), path.display());
        Ok(SaveOutcome::Saved {
            path: path.to_path_buf(),
            landmarks: self.len(),
        })
    }

    /// Load a saved map. Unusable records are skipped with a warning.
    pub fn load(path: impl AsRef<Path>, params: MapParams) -> Result<Self, MapIoError> {
        let path = path.as_ref();
        let file = MapFile::load_json(path)?;
        let total = file.landmarks.len();
        let landmarks: Vec<Landmark> = file
            .landmarks
            .iter()
            .filter_map(|r| {
                let lm = r.to_landmark();
                if lm.is_none() {
                    log::warn!("skipping invalid landmark record {}", r.id);
                }
                lm
            })
            .collect();
        log::info!(
            "loaded {} of {} landmarks from {}",
            landmarks.len(),
            total,
            path.display()
        );
        Ok(Self::with_landmarks(params, landmarks))
    }

    /// Like [`load`](Self::load), but a missing file yields an empty map.
    pub fn load_or_empty(path: impl AsRef<Path>, params: MapParams) -> Result<Self, MapIoError> {
        let path = path.as_ref();
        match Self::load(path, params.clone()) {
            Err(MapIoError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                log::info!("no map at {}, starting empty", path.display());
                Ok(Self::new(params))
            }
            other => other,
        }
    }
}
