//! Credentials persisted as a small JSON document.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{CredentialKey, CredentialStore, CredentialStoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

impl CredentialFile {
    fn slot(&mut self, key: CredentialKey) -> &mut Option<String> {
        match key {
            CredentialKey::Token => &mut self.token,
            CredentialKey::UserId => &mut self.user_id,
            CredentialKey::Role => &mut self.role,
        }
    }
}

/// Store backed by one JSON file. Writes go through a temp file and a rename
/// so readers never see a partial document.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CredentialFile, CredentialStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(CredentialFile::default());
            }
            Err(err) => {
                return Err(CredentialStoreError::Unavailable(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&raw).map_err(|err| {
            CredentialStoreError::Backend(format!(
                "failed parsing {}: {err}",
                self.path.display()
            ))
        })
    }

    fn update<T>(
        &self,
        change: impl FnOnce(&mut CredentialFile) -> Result<T, CredentialStoreError>,
    ) -> Result<T, CredentialStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        let mut file = self.load()?;
        let result = change(&mut file)?;
        self.save(&file)?;
        Ok(result)
    }

    fn save(&self, file: &CredentialFile) -> Result<(), CredentialStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                CredentialStoreError::Unavailable(format!(
                    "failed creating {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded = serde_json::to_vec_pretty(file)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, encoded).map_err(|err| {
            CredentialStoreError::Unavailable(format!(
                "failed writing {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(CredentialStoreError::Unavailable(format!(
                        "failed replacing {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                warn!(path = %self.path.display(), error = %err, "credential file write failed");
                CredentialStoreError::Unavailable(format!(
                    "failed writing {}: {err}",
                    self.path.display()
                ))
            })?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<String, CredentialStoreError> {
        self.load()?
            .slot(key)
            .take()
            .ok_or(CredentialStoreError::NotFound)
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), CredentialStoreError> {
        self.update(|file| {
            *file.slot(key) = Some(value.to_owned());
            Ok(())
        })
    }

    fn delete(&self, key: CredentialKey) -> Result<(), CredentialStoreError> {
        self.update(|file| {
            file.slot(key)
                .take()
                .map(|_| ())
                .ok_or(CredentialStoreError::NotFound)
        })
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("credentials.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_session_credentials;

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileCredentialStore::new(&path);
        store.set(CredentialKey::Token, "jwt-abc").expect("set token");
        store.set(CredentialKey::UserId, "42").expect("set user id");

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.get(CredentialKey::Token).expect("token"), "jwt-abc");
        let session = load_session_credentials(&reopened).expect("load");
        assert_eq!(session.user_id.as_deref(), Some("42"));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileCredentialStore::new(dir.path().join("absent.json"));
        assert_eq!(
            store.get(CredentialKey::Token),
            Err(CredentialStoreError::NotFound)
        );
        assert_eq!(
            load_session_credentials(&store).expect("load"),
            crate::StoredSession::default()
        );
    }

    #[test]
    fn delete_removes_only_one_key() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.set(CredentialKey::Token, "jwt").expect("set");
        store.set(CredentialKey::Role, "TEACHER").expect("set");

        store.delete(CredentialKey::Token).expect("delete");
        assert_eq!(
            store.delete(CredentialKey::Token),
            Err(CredentialStoreError::NotFound)
        );
        assert_eq!(store.get(CredentialKey::Role).expect("role"), "TEACHER");

        let raw = fs::read_to_string(store.path()).expect("file exists");
        assert!(!raw.contains("token"));
        assert!(raw.contains("\"role\""));
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.set(CredentialKey::Token, "one").expect("set");
        store.set(CredentialKey::Token, "two").expect("overwrite");

        let names: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("credentials.json")]);
        assert_eq!(store.get(CredentialKey::Token).expect("token"), "two");
    }

    #[test]
    fn corrupt_file_is_a_backend_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{not json").expect("write");

        let store = FileCredentialStore::new(&path);
        assert!(matches!(
            store.get(CredentialKey::Token),
            Err(CredentialStoreError::Backend(_))
        ));
    }
}
