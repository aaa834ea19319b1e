use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{domain::Section, errors::Error, Result};

const FILE_VERSION: u32 = 1;

/// Durable backing for the section registry.
pub trait SectionStore: Send + Sync {
    /// Load every persisted section. A store that was never written is empty.
    fn load(&self) -> Result<Vec<Section>>;

    /// Replace the persisted contents with `sections`.
    fn save(&self, sections: &[Section]) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SectionsFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    saved_at: String,
    #[serde(default)]
    sections: Vec<Section>,
}

/// JSON file store. Writes land in a sibling temp file that is renamed over
/// the target, so readers never observe a half-written registry.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

impl SectionStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Section>> {
        let txt = match fs::read_to_string(&self.path) {
            Ok(txt) => txt,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }

        let file: SectionsFile = serde_json::from_str(&txt).map_err(|e| {
            Error::Persistence(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(file.sections)
    }

    fn save(&self, sections: &[Section]) -> Result<()> {
        let file = SectionsFile {
            version: FILE_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            sections: sections.to_vec(),
        };
        let txt = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, txt)
            .map_err(|e| Error::Persistence(format!("failed to write {}: {e}", tmp.display())))?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Persistence(format!(
                "failed to replace {}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// Volatile store, mostly useful in tests and for running without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sections: Mutex<Vec<Section>>,
}

impl SectionStore for MemoryStore {
    fn load(&self) -> Result<Vec<Section>> {
        self.sections
            .lock()
            .map(|s| s.clone())
            .map_err(|_| Error::Persistence("memory store poisoned".to_string()))
    }

    fn save(&self, sections: &[Section]) -> Result<()> {
        let mut guard = self
            .sections
            .lock()
            .map_err(|_| Error::Persistence("memory store poisoned".to_string()))?;
        *guard = sections.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Destination, SectionName};

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}/sections.json"))
    }

    fn section(name: &str, secret: &str, dest: &str) -> Section {
        Section {
            name: SectionName(name.to_string()),
            secret: secret.to_string(),
            destination: Destination(dest.to_string()),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let store = JsonFileStore::new(tmp_file("catline-missing"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn saves_and_reloads_from_disk() {
        let path = tmp_file("catline-store");
        let store = JsonFileStore::new(&path);
        store
            .save(&[section("ivar", "ivarpw", "#test"), section("yngve", "y", "-100")])
            .unwrap();

        let reloaded = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[0], section("ivar", "ivarpw", "#test"));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"version\": 1"));
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn corrupt_file_is_a_persistence_error() {
        let path = tmp_file("catline-corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
