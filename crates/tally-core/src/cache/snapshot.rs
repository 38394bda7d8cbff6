//! File tier: per-administration pattern snapshots
//!
//! Snapshots are only read when the database is unreachable. Each file is
//! gzip-compressed JSON carrying a SHA-256 checksum of the pattern payload;
//! a file that fails to decode or verify is treated as absent.
//!
//! File naming: `<sanitized-administration>-<hash8>.json.gz`

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{AnalysisMetadata, Pattern};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A serialized copy of one administration's pattern set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub administration: String,
    pub saved_at: DateTime<Utc>,
    pub metadata: Option<AnalysisMetadata>,
    pub patterns: Vec<Pattern>,
}

/// Storage backend for the file tier
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &PatternSnapshot) -> Result<()>;

    /// Load a snapshot; Ok(None) when missing or unreadable
    fn load(&self, administration: &str) -> Result<Option<PatternSnapshot>>;

    fn remove(&self, administration: &str) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format_version: u32,
    checksum: String,
    snapshot: PatternSnapshot,
}

fn checksum(patterns: &[Pattern]) -> Result<String> {
    let payload = serde_json::to_vec(patterns)?;
    Ok(hex::encode(Sha256::digest(&payload)))
}

/// Snapshot store in a local directory
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of an administration's snapshot file
    pub fn snapshot_path(&self, administration: &str) -> PathBuf {
        let sanitized: String = administration
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .take(64)
            .collect();
        // Distinguishes administrations that sanitize to the same name
        let hash = hex::encode(Sha256::digest(administration.as_bytes()));
        self.dir
            .join(format!("{}-{}.json.gz", sanitized, &hash[..8]))
    }

    fn read(&self, path: &Path) -> Result<PatternSnapshot> {
        let file = File::open(path)?;
        let decoder = GzDecoder::new(BufReader::new(file));
        let parsed: SnapshotFile = serde_json::from_reader(decoder)?;

        if parsed.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::Snapshot(format!(
                "Unsupported snapshot version {}",
                parsed.format_version
            )));
        }
        if checksum(&parsed.snapshot.patterns)? != parsed.checksum {
            return Err(Error::Snapshot("Checksum mismatch".into()));
        }
        Ok(parsed.snapshot)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &PatternSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.snapshot_path(&snapshot.administration);

        let file = SnapshotFile {
            format_version: SNAPSHOT_FORMAT_VERSION,
            checksum: checksum(&snapshot.patterns)?,
            snapshot: snapshot.clone(),
        };

        // Write next to the target so the rename is atomic
        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut encoder =
                GzEncoder::new(BufWriter::new(temp.as_file()), Compression::default());
            serde_json::to_writer(&mut encoder, &file)?;
            encoder.finish()?.flush()?;
        }
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        debug!(
            administration = %snapshot.administration,
            patterns = snapshot.patterns.len(),
            path = %path.display(),
            "Saved pattern snapshot"
        );
        Ok(())
    }

    fn load(&self, administration: &str) -> Result<Option<PatternSnapshot>> {
        let path = self.snapshot_path(administration);
        if !path.exists() {
            return Ok(None);
        }

        match self.read(&path) {
            Ok(snapshot) if snapshot.administration == administration => Ok(Some(snapshot)),
            Ok(_) => {
                warn!(path = %path.display(), "Snapshot belongs to another administration");
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable snapshot");
                Ok(None)
            }
        }
    }

    fn remove(&self, administration: &str) -> Result<()> {
        let path = self.snapshot_path(administration);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn snapshot(admin: &str) -> PatternSnapshot {
        PatternSnapshot {
            administration: admin.into(),
            saved_at: Utc::now(),
            metadata: None,
            patterns: vec![Pattern {
                administration: admin.into(),
                bank_account: "1010".into(),
                verb: "ANWB".into(),
                verb_company: "ANWB".into(),
                verb_reference: None,
                is_compound: false,
                reference_number: Some("R1".into()),
                debet_account: Some("4000".into()),
                credit_account: Some("1010".into()),
                occurrences: 4,
                confidence: 0.75,
                last_seen: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                total_amount: -200.0,
                sample_description: "ANWB Energie".into(),
            }],
        }
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snapshots"));

        assert!(store.load("acme").unwrap().is_none());

        let snap = snapshot("acme");
        store.save(&snap).unwrap();
        assert_eq!(store.load("acme").unwrap(), Some(snap));
        assert!(store.load("other").unwrap().is_none());

        store.remove("acme").unwrap();
        assert!(store.load("acme").unwrap().is_none());
        // Removing a missing snapshot is fine
        store.remove("acme").unwrap();
    }

    #[test]
    fn test_overwrite_is_atomic_replace() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        store.save(&snapshot("acme")).unwrap();
        let mut updated = snapshot("acme");
        updated.patterns[0].occurrences = 9;
        store.save(&updated).unwrap();

        assert_eq!(store.load("acme").unwrap().unwrap().patterns[0].occurrences, 9);
        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1, "no temp files should remain");
    }

    #[test]
    fn test_corrupt_snapshot_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.save(&snapshot("acme")).unwrap();

        fs::write(store.snapshot_path("acme"), b"not gzip").unwrap();
        assert!(store.load("acme").unwrap().is_none());
    }

    #[test]
    fn test_paths_are_distinct_and_safe() {
        let store = FileSnapshotStore::new("/tmp/snapshots");
        let a = store.snapshot_path("acme/../x");
        let b = store.snapshot_path("acme_.._x");
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(Path::new("/tmp/snapshots")));
    }
}
