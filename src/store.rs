//! On-disk artifact store keyed by random identifiers.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{Error, Result};

/// File extension of stored artifacts.
const EXTENSION: &str = "png";

/// Identifier of one stored output (a random v4 UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// A fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The stored file name, `<uuid>.png`.
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.{EXTENSION}", self.0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ArtifactId {
    type Err = Error;

    /// Accepts either `<uuid>` or `<uuid>.png`; anything else is not found.
    fn from_str(s: &str) -> Result<Self> {
        let stem = s
            .strip_suffix(EXTENSION)
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or(s);
        Uuid::parse_str(stem)
            .map(Self)
            .map_err(|_| Error::ArtifactNotFound(s.to_string()))
    }
}

/// Directory of finished PNG artifacts.
///
/// Artifacts are written under a temporary name and renamed into place, so
/// readers only ever see complete files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an artifact lives at.
    #[must_use]
    pub fn path_for(&self, id: ArtifactId) -> PathBuf {
        self.dir.join(id.filename())
    }

    /// Store encoded bytes under a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if writing fails; nothing is left visible then.
    pub fn save(&self, bytes: &[u8]) -> Result<ArtifactId> {
        let id = ArtifactId::generate();
        let final_path = self.path_for(id);
        let part_path = self.dir.join(format!(".{}.part", id.filename()));

        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&part_path, &final_path));

        if let Err(e) = written {
            let _ = fs::remove_file(&part_path);
            return Err(e.into());
        }

        log::debug!("stored artifact {}", final_path.display());
        Ok(id)
    }

    /// Read back a stored artifact by file name or bare identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArtifactNotFound`] for unknown or malformed names.
    pub fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let id: ArtifactId = name.parse()?;
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ArtifactNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
