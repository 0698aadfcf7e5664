//! Difficulty levels and the points ledger.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Challenge difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Points awarded for solving a challenge at this level.
    pub const fn points(self) -> u64 {
        match self {
            Self::Easy => 10,
            Self::Medium => 30,
            Self::Hard => 100,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => anyhow::bail!("Unknown difficulty: '{other}'. Expected easy, medium or hard"),
        }
    }
}

/// On-disk shape of the points file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PointsFile {
    #[serde(default)]
    points: u64,
}

/// Running points total, persisted as a small JSON file.
///
/// Awards are serialized through a lock shared by all clones, and each write
/// replaces the file atomically, so readers see either the old or the new
/// total.
#[derive(Debug, Clone)]
pub struct PointsStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl PointsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current total. A missing or unreadable file counts as zero.
    pub fn total(&self) -> u64 {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No points file yet");
                return 0;
            }
        };

        match serde_json::from_str::<PointsFile>(&contents) {
            Ok(file) => file.points,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt points file");
                0
            }
        }
    }

    /// Add the points for `difficulty` and persist. Returns the new total.
    pub fn award(&self, difficulty: Difficulty) -> Result<u64> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let points = self.total().saturating_add(difficulty.points());
        let json = serde_json::to_string(&PointsFile { points })
            .context("Failed to serialize points")?;
        self.replace_file(json.as_bytes())?;

        debug!(path = %self.path.display(), points, "Points awarded");
        Ok(points)
    }

    /// Write to a sibling temp file, then rename it over the target.
    fn replace_file(&self, contents: &[u8]) -> Result<()> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
                parent
            }
            None => Path::new("."),
        };

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        file.write_all(contents).context("Failed to write points to temp file")?;
        file.persist(&self.path)
            .with_context(|| format!("Failed to write points to {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_per_difficulty() {
        assert_eq!(Difficulty::Easy.points(), 10);
        assert_eq!(Difficulty::Medium.points(), 30);
        assert_eq!(Difficulty::Hard.points(), 100);
    }

    #[test]
    fn parse_difficulty() {
        assert_eq!("medium".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert!("Hard".parse::<Difficulty>().is_err());
        assert_eq!(Difficulty::Hard.to_string(), "hard");
    }

    #[test]
    fn missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = PointsStore::new(dir.path().join("points.json"));
        assert_eq!(store.total(), 0);
    }

    #[test]
    fn award_accumulates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/points.json");
        let store = PointsStore::new(&path);

        assert_eq!(store.award(Difficulty::Easy).unwrap(), 10);
        assert_eq!(store.award(Difficulty::Hard).unwrap(), 110);

        let reopened = PointsStore::new(&path);
        assert_eq!(reopened.total(), 110);
    }

    #[test]
    fn concurrent_awards_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = PointsStore::new(dir.path().join("points.json"));

        std::thread::scope(|scope| {
            for _ in 0..16 {
                let store = store.clone();
                scope.spawn(move || {
                    for _ in 0..25 {
                        store.award(Difficulty::Easy).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.total(), 16 * 25 * 10);
        let leftovers: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, ["points.json".to_string()]);
    }

    #[test]
    fn corrupt_file_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.json");
        std::fs::write(&path, "not json").unwrap();

        let store = PointsStore::new(&path);
        assert_eq!(store.total(), 0);
        assert_eq!(store.award(Difficulty::Medium).unwrap(), 30);
    }
}
