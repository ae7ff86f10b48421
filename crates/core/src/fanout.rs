use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::Language;
use crate::error::{Result, VaioError};

/// One independent unit of per-language work.
#[derive(Debug, Clone)]
pub struct LanguageTask {
    pub language: Language,
    pub output: PathBuf,
}

/// Bounded-parallel runner where every item yields its own outcome.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    concurrency: usize,
}

impl FanOut {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `worker` for every item; errors and panics only mark that item `false`.
    pub fn run_all<T, K, F>(&self, items: &[T], key: K, worker: F) -> Result<BTreeMap<String, bool>>
    where
        T: Sync,
        K: Fn(&T) -> String + Sync,
        F: Fn(&T) -> anyhow::Result<()> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .map_err(|e| VaioError::Other(format!("failed to build worker pool: {e}")))?;
        let outcomes: Vec<(String, bool)> = pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let id = key(item);
                    let ok = match panic::catch_unwind(AssertUnwindSafe(|| worker(item))) {
                        Ok(Ok(())) => {
                            info!(item = %id, "fan-out item succeeded");
                            true
                        }
                        Ok(Err(err)) => {
                            warn!(item = %id, error = %format!("{err:#}"), "fan-out item failed");
                            false
                        }
                        Err(_) => {
                            warn!(item = %id, "fan-out item panicked");
                            false
                        }
                    };
                    (id, ok)
                })
                .collect()
        });
        Ok(outcomes.into_iter().collect())
    }

    pub fn run_languages<F>(&self, tasks: &[LanguageTask], worker: F) -> Result<BTreeMap<String, bool>>
    where
        F: Fn(&LanguageTask) -> anyhow::Result<()> + Sync,
    {
        self.run_all(tasks, |task| task.language.code.clone(), worker)
    }
}
