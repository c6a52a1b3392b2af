//! JSON file-backed secret store with atomic persistence.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PutOutcome, SecretStore};
use crate::error::StorageError;

const FORMAT_VERSION: u32 = 1;

/// On-disk document: a version tag plus the record map.
#[derive(Serialize, Deserialize)]
struct Payload {
    version: u32,
    records: BTreeMap<String, String>,
}

/// Secret store persisted as a versioned JSON document.
///
/// Writes go to a temporary file in the same directory followed by a
/// rename, so readers never observe a partial document. `put_if_absent`
/// is atomic within a process; cross-process first-write-wins is best
/// effort (last rename wins).
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, String>>,
}

impl FileSecretStore {
    /// Opens the store at `path`, loading any existing document.
    ///
    /// A missing file is an empty store; it is created on first write.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the file exists but cannot be read,
    /// parsed, or uses an unknown format version.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let records = load(&path)?;
        debug!(path = %path.display(), records = records.len(), "opened secret store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let payload = Payload {
            version: FORMAT_VERSION,
            records: records.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&payload)?;

        let tmp = temp_path(&self.path);
        let mut file =
            File::create(&tmp).map_err(|source| io_error("creating temporary file", source))?;
        file.write_all(&bytes)
            .map_err(|source| io_error("writing temporary file", source))?;
        file.sync_all()
            .map_err(|source| io_error("syncing temporary file", source))?;
        drop(file);
        fs::rename(&tmp, &self.path)
            .map_err(|source| io_error("renaming into place", source))?;
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.lock().unwrap().get(name).cloned())
    }

    fn put(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap();
        let mut next = records.clone();
        next.insert(name.to_owned(), value.to_owned());
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn put_if_absent(&self, name: &str, value: &str) -> Result<PutOutcome, StorageError> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(name) {
            if !existing.trim().is_empty() {
                return Ok(PutOutcome::AlreadyPresent {
                    existing: existing.clone(),
                });
            }
        }
        let mut next = records.clone();
        next.insert(name.to_owned(), value.to_owned());
        self.persist(&next)?;
        *records = next;
        Ok(PutOutcome::Stored)
    }
}

fn load(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(io_error("reading secret store", source));
        }
    };
    let payload: Payload = serde_json::from_str(&contents)?;
    if payload.version != FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion {
            found: payload.version,
        });
    }
    Ok(payload.records)
}

/// Sibling path with `.tmp` appended to the full file name, so stores at
/// `secrets.json` and `secrets.db` in one directory never share a
/// temporary file.
fn temp_path(path: &Path) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map_or_else(OsString::new, OsStr::to_os_string);
    file_name.push(".tmp");
    path.with_file_name(file_name)
}

fn io_error(context: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        context: context.to_owned(),
        source,
    }
}
