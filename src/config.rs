use crate::queue::DEFAULT_STALE_AFTER;
use crate::{PegError, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_HINT_TIME_LIMIT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_WORKER_POLL: Duration = Duration::from_secs(30);

/// Runtime settings, read from `PEG_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Budget for the synchronous solve behind a hint request.
    pub hint_time_limit: Duration,
    /// How long a claimed queue item may stay `solving` before it is handed out again.
    pub stale_after: Duration,
    /// JSON file for the solution cache; in-memory when unset.
    pub cache_path: Option<PathBuf>,
    /// JSON file for the solve queue; in-memory when unset.
    pub queue_path: Option<PathBuf>,
    /// Idle wait between queue polls when nothing wakes the worker.
    pub worker_poll: Duration,
    pub workers: usize,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hint_time_limit: DEFAULT_HINT_TIME_LIMIT,
            stale_after: DEFAULT_STALE_AFTER,
            cache_path: None,
            queue_path: None,
            worker_poll: DEFAULT_WORKER_POLL,
            workers: num_cpus::get(),
            log_level: Level::INFO,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars().filter(|(k, _)| k.starts_with("PEG_")).collect())
    }

    /// Builds a config from an explicit variable map, defaulting anything absent.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&vars, "PEG_HINT_TIME_LIMIT_MS")? {
            config.hint_time_limit = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&vars, "PEG_STALE_AFTER_SECS")? {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&vars, "PEG_WORKER_POLL_SECS")? {
            config.worker_poll = Duration::from_secs(secs.max(1));
        }
        if let Some(workers) = parse::<usize>(&vars, "PEG_WORKERS")? {
            if workers == 0 {
                return Err(PegError::Config("PEG_WORKERS must be at least 1".to_string()));
            }
            config.workers = workers;
        }
        if let Some(level) = parse::<Level>(&vars, "PEG_LOG_LEVEL")? {
            config.log_level = level;
        }
        config.cache_path = path(&vars, "PEG_CACHE_PATH");
        config.queue_path = path(&vars, "PEG_QUEUE_PATH");

        Ok(config)
    }

    /// Cache file shared by every process.
    pub fn require_cache_path(&self) -> Result<&Path> {
        required(&self.cache_path, "PEG_CACHE_PATH")
    }

    /// Queue file shared by every process.
    pub fn require_queue_path(&self) -> Result<&Path> {
        required(&self.queue_path, "PEG_QUEUE_PATH")
    }
}

fn required<'a>(path: &'a Option<PathBuf>, name: &str) -> Result<&'a Path> {
    path.as_deref().ok_or_else(|| {
        PegError::Config(format!(
            "{} must be set so that every process uses the same store",
            name
        ))
    })
}

fn parse<T: FromStr>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>> {
    match vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| PegError::Config(format!("{} has invalid value {:?}", name, raw))),
        None => Ok(None),
    }
}

fn path(vars: &HashMap<String, String>, name: &str) -> Option<PathBuf> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
