use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::{engine::LoraRequest, error::ServiceError};

/// Adapter weights declared in the deployment config, plus the numeric ids
/// handed out to them. Ids start at 1, follow first-request order and are
/// never reassigned.
pub struct AdapterTable {
    model_dir: PathBuf,
    paths: HashMap<String, String>,
    ids: Mutex<HashMap<String, u32>>,
}

impl AdapterTable {
    pub fn new(model_dir: impl Into<PathBuf>, paths: HashMap<String, String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            paths,
            ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.paths.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves an adapter selector. An empty name selects no adapter.
    pub fn resolve(&self, name: &str) -> Result<Option<LoraRequest>, ServiceError> {
        if name.is_empty() {
            return Ok(None);
        }

        let relative = self
            .paths
            .get(name)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| ServiceError::Precondition(format!("{name} misses adapter path")))?;

        let id = {
            let mut ids = self.ids.lock();
            let next = ids.len() as u32 + 1;
            *ids.entry(name.to_string()).or_insert(next)
        };

        Ok(Some(LoraRequest {
            name: name.to_string(),
            id,
            path: self.model_dir.join(Path::new(relative)),
        }))
    }
}
