use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::*;

use crate::Error;

/// Optional index written by the producing pipeline. When present it names the
/// snapshot files and the filename convention is not consulted.
pub const MANIFEST_FILE: &str = "snapshot_manifest.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotFiles {
    pub videos: PathBuf,
    pub comments: PathBuf,
    pub analysis: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub title: String,
    #[serde(rename = "viewCount", deserialize_with = "view_count")]
    pub view_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentRow {
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Analysis {
    #[serde(rename = "sentimentAnalysis")]
    pub sentiment_analysis: Vec<SentimentRow>,
    #[serde(rename = "namedEntities")]
    pub named_entities: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub files: SnapshotFiles,
    pub videos: Vec<Video>,
    pub comments: Vec<Value>,
    pub analysis: Analysis,
}

impl Snapshot {
    pub fn has_data(&self) -> bool {
        !self.videos.is_empty() && !self.comments.is_empty()
    }
}

// The YouTube API hands counts out as strings.
fn view_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

/// Picks, per category, the lexicographically greatest file name that starts
/// with `prefix` and contains the category name.
pub fn latest_files(dir: &Path, prefix: &str) -> Result<SnapshotFiles, Error> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix))
        .collect();
    names.sort();

    let latest = |category: &'static str| -> Result<PathBuf, Error> {
        names
            .iter()
            .rev()
            .find(|name| name.contains(category))
            .map(|name| dir.join(name))
            .ok_or_else(|| Error::MissingSnapshot(category, dir.display().to_string()))
    };

    Ok(SnapshotFiles {
        videos: latest("videos")?,
        comments: latest("comments")?,
        analysis: latest("analysis")?,
    })
}

/// Snapshot files named by the manifest, relative paths taken from `dir`.
pub fn manifest_files(dir: &Path) -> Result<Option<SnapshotFiles>, Error> {
    let manifest = dir.join(MANIFEST_FILE);
    if !manifest.exists() {
        return Ok(None);
    }
    let files: SnapshotFiles = read_json(&manifest)?;
    Ok(Some(SnapshotFiles {
        videos: dir.join(files.videos),
        comments: dir.join(files.comments),
        analysis: dir.join(files.analysis),
    }))
}

/// Loads the current snapshot. Any missing category or unreadable file fails
/// the whole load, there is no partial snapshot.
pub fn load_data(dir: &Path, prefix: &str) -> Result<Snapshot, Error> {
    let files = match manifest_files(dir)? {
        Some(files) => {
            debug!("Using snapshot manifest in {}", dir.display());
            files
        }
        None => latest_files(dir, prefix)?,
    };
    debug!("Loading snapshot {:?}", files);

    Ok(Snapshot {
        videos: read_json(&files.videos)?,
        comments: read_json(&files.comments)?,
        analysis: read_json(&files.analysis)?,
        files,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}
