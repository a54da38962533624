//! File-backed project directory used as the cache supplier.
//!
//! Each fetch re-reads the directory file, optionally after a simulated
//! network latency and with a simulated failure rate, so the cache's refresh
//! and failure handling can be exercised without a real backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use timed_cache::{CacheConfig, CacheRegistry, CreateError, TimedMap};

/// Errors from reading the directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Failed to read directory file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML directory: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("Failed to parse JSON directory: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory unavailable (simulated failure)")]
    Unavailable,
}

/// On-disk layout: project id to user id to role.
#[derive(Deserialize, Debug, Default)]
pub struct DirectoryFile {
    #[serde(default)]
    pub projects: BTreeMap<String, HashMap<String, String>>,
}

impl DirectoryFile {
    /// Parses YAML, or JSON when `is_json` is set.
    pub fn parse(content: &str, is_json: bool) -> Result<Self, DirectoryError> {
        if is_json {
            Ok(serde_json::from_str(content)?)
        } else {
            Ok(serde_yml::from_str(content)?)
        }
    }
}

/// Project members by user id.
pub type Members = HashMap<String, String>;

/// One cached member map per project.
pub type ProjectCaches = CacheRegistry<String, TimedMap<String, String, DirectoryError>>;

/// Reads the directory file on every fetch.
#[derive(Debug, Clone)]
pub struct DirectorySupplier {
    path: PathBuf,
    latency: Duration,
    failure_rate: f64,
}

impl DirectorySupplier {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            latency: Duration::ZERO,
            failure_rate: 0.0,
        }
    }

    /// Sleeps roughly `latency` (plus or minus 20%) before each fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails this fraction of fetches with [`DirectoryError::Unavailable`].
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    fn read(&self) -> Result<DirectoryFile, DirectoryError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| DirectoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        DirectoryFile::parse(&content, self.is_json())
    }

    fn simulate_backend(&self) -> Result<(), DirectoryError> {
        let mut rng = rand::thread_rng();
        if !self.latency.is_zero() {
            let jitter = rng.gen_range(0.8..1.2);
            std::thread::sleep(self.latency.mul_f64(jitter));
        }
        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            return Err(DirectoryError::Unavailable);
        }
        Ok(())
    }

    /// Ids of all projects in the file, without simulated latency or failures.
    pub fn project_ids(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self.read()?.projects.into_keys().collect())
    }

    /// Distinct user ids across all projects, sorted.
    pub fn user_ids(&self) -> Result<Vec<String>, DirectoryError> {
        let users: BTreeSet<String> = self
            .read()?
            .projects
            .into_values()
            .flat_map(HashMap::into_keys)
            .collect();
        Ok(users.into_iter().collect())
    }

    /// Members of `project`. An unknown project has no members.
    pub fn fetch_members(&self, project: &str) -> Result<Members, DirectoryError> {
        self.simulate_backend()?;
        let mut file = self.read()?;
        let members = file.projects.remove(project).unwrap_or_default();
        tracing::debug!("fetched {} members for project {}", members.len(), project);
        Ok(members)
    }
}

/// Returns the member cache of `project`, creating it on first use.
pub fn project_cache(
    caches: &ProjectCaches,
    supplier: &Arc<DirectorySupplier>,
    config: &CacheConfig,
    project: &str,
) -> Result<Arc<TimedMap<String, String, DirectoryError>>, CreateError<DirectoryError>> {
    caches.get_or_try_create(project.to_string(), |id| {
        let supplier = Arc::clone(supplier);
        let id = id.clone();
        let cache = TimedMap::builder(move || supplier.fetch_members(&id))
            .name(format!("project:{}", project))
            .config(config.clone())
            .build()?;
        Ok(TimedMap::from(cache))
    })
}
