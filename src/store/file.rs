//! File-backed credential store.
//!
//! Writes two independent JSON artifacts into the cache directory: the base
//! info (base URL, pass ticket, credential block) and the cookie list.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::store::{BaseInfo, CookieRecord, CredentialStore, PersistedSession, StoreError, StoreResult};

const BASE_INFO_FILE: &str = "base-info.json";
const COOKIES_FILE: &str = "cookies.json";

/// Credential store writing JSON files under a directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn base_info_path(&self) -> PathBuf {
        self.dir.join(BASE_INFO_FILE)
    }

    pub fn cookies_path(&self) -> PathBuf {
        self.dir.join(COOKIES_FILE)
    }

    fn read_base_info(&self) -> StoreResult<BaseInfo> {
        let contents = fs::read_to_string(self.base_info_path())?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn read_cookies(&self) -> StoreResult<Vec<CookieRecord>> {
        let contents = fs::read_to_string(self.cookies_path())?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn read_snapshot(&self) -> StoreResult<PersistedSession> {
        let snapshot = PersistedSession {
            info: self.read_base_info()?,
            cookies: self.read_cookies()?,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, snapshot: &PersistedSession) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        write_json(&self.base_info_path(), &snapshot.info)?;
        write_json(&self.cookies_path(), &snapshot.cookies)?;
        debug!("saved session snapshot to {}", self.dir.display());
        Ok(())
    }

    fn load(&self) -> Option<PersistedSession> {
        match self.read_snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no cached session in {}", self.dir.display());
                None
            }
            Err(e) => {
                warn!("ignoring cached session: {e}");
                None
            }
        }
    }

    fn invalidate(&self) -> StoreResult<()> {
        remove_if_exists(&self.base_info_path())?;
        remove_if_exists(&self.cookies_path())?;
        Ok(())
    }
}
