//! Durable registry of sections: name -> (secret, destination).

pub mod store;

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    domain::{Destination, Section, SectionName},
    errors::Error,
    Result,
};

pub use store::{JsonFileStore, MemoryStore, SectionStore};

/// Registry shared between connection workers and the admin command surface.
pub type SharedRegistry = Arc<Mutex<SectionRegistry>>;

pub struct SectionRegistry {
    store: Arc<dyn SectionStore>,
    sections: BTreeMap<String, Section>,
}

impl SectionRegistry {
    /// Load the registry from `store`. A store that was never written yields
    /// an empty registry.
    pub fn load(store: Box<dyn SectionStore>) -> Result<Self> {
        let sections = store
            .load()?
            .into_iter()
            .map(|s| (s.name.0.clone(), s))
            .collect();
        Ok(Self {
            store: Arc::from(store),
            sections,
        })
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Insert or overwrite a section. The new state only becomes visible once
    /// the store has accepted it.
    pub async fn define(&mut self, name: &str, secret: &str, destination: &str) -> Result<()> {
        validate(name, secret, destination)?;

        let mut next = self.sections.clone();
        next.insert(
            name.to_string(),
            Section {
                name: SectionName(name.to_string()),
                secret: secret.to_string(),
                destination: Destination(destination.to_string()),
            },
        );
        self.commit(next).await
    }

    pub fn lookup(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub async fn remove(&mut self, name: &str) -> Result<()> {
        if !self.sections.contains_key(name) {
            return Err(Error::NoSuchSection(name.to_string()));
        }

        let mut next = self.sections.clone();
        next.remove(name);
        self.commit(next).await
    }

    /// Snapshot of section names, sorted.
    pub fn list(&self) -> Vec<SectionName> {
        self.sections.values().map(|s| s.name.clone()).collect()
    }

    pub fn show(&self, name: &str) -> Result<Destination> {
        self.sections
            .get(name)
            .map(|s| s.destination.clone())
            .ok_or_else(|| Error::NoSuchSection(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Persist `next` off the async workers, then swap it in.
    async fn commit(&mut self, next: BTreeMap<String, Section>) -> Result<()> {
        let snapshot = next.values().cloned().collect::<Vec<_>>();
        let store = Arc::clone(&self.store);
        let saved = tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| Error::Persistence(format!("store task failed: {e}")))?;
        saved.map_err(|e| match e {
            Error::Persistence(msg) => Error::Persistence(msg),
            other => Error::Persistence(other.to_string()),
        })?;
        self.sections = next;
        Ok(())
    }
}

fn validate(name: &str, secret: &str, destination: &str) -> Result<()> {
    if name.trim().is_empty() || secret.is_empty() || destination.trim().is_empty() {
        return Err(Error::InvalidSection(
            "name, secret and destination must be non-empty".to_string(),
        ));
    }
    if name.contains(char::is_whitespace) {
        return Err(Error::InvalidSection(
            "section name must not contain whitespace".to_string(),
        ));
    }
    // The wire format splits on ';', such a section could never authenticate.
    if name.contains(';') || secret.contains(';') {
        return Err(Error::InvalidSection(
            "section name and secret must not contain ';'".to_string(),
        ));
    }
    Ok(())
}
