//! In-memory task store with admission control and TTL expiry.
//!
//! One process-wide `RwLock` guards the task map; it is only ever held
//! around in-memory work, never across an await point. The store is the
//! sole owner of task state: every value it returns is a deep copy.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ServiceError;
use crate::model::{FileRecord, Task};

/// Sweep cadence for expired tasks.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Store limits and lifetimes.
///
/// For both caps, zero disables the operation entirely and a negative value
/// means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum number of live tasks.
    pub max_total: i64,
    /// Maximum number of files per task.
    pub max_files: i64,
    /// Task lifetime from creation.
    pub task_ttl: Duration,
}

#[derive(Debug, Default)]
struct StoredTask {
    task: Task,
    next_file_id: i64,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<i64, StoredTask>,
    cancelled: bool,
}

/// Process-local task storage.
#[derive(Debug)]
pub struct TaskStore {
    cfg: StoreConfig,
    inner: RwLock<Inner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TaskStore {
    /// Creates the store and starts its background expiry sweeper. The
    /// sweeper holds only a weak reference, so dropping the last `Arc` (or
    /// calling [`cancel`](Self::cancel)) ends it.
    #[must_use]
    pub fn new(cfg: StoreConfig) -> std::sync::Arc<Self> {
        let store = std::sync::Arc::new(Self {
            cfg,
            inner: RwLock::new(Inner::default()),
            sweeper: Mutex::new(None),
        });

        let weak = std::sync::Arc::downgrade(&store);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else { break };
                store.sweep_expired();
            }
        });
        *store
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        store
    }

    /// Creates an empty task and returns its id.
    ///
    /// # Errors
    ///
    /// `ServerBusy` when the live-task cap is reached, `ServerCancelled`
    /// after shutdown.
    pub fn create_task(&self) -> Result<i64, ServiceError> {
        let mut inner = self.write();
        if inner.cancelled {
            return Err(ServiceError::ServerCancelled);
        }
        if self.cfg.max_total >= 0 && inner.tasks.len() as i64 >= self.cfg.max_total {
            return Err(ServiceError::ServerBusy);
        }

        let mut rng = rand::rng();
        let mut id: i64 = rng.random_range(1..i64::MAX);
        while inner.tasks.contains_key(&id) {
            id = rng.random_range(1..i64::MAX);
        }

        let now = Utc::now();
        inner.tasks.insert(
            id,
            StoredTask {
                task: Task {
                    id,
                    files: Vec::new(),
                    created_at: Some(now),
                    updated_at: None,
                    expires_at: Some(now + self.cfg.task_ttl),
                },
                next_file_id: 1,
            },
        );

        debug!(task_id = id, "task created");
        Ok(id)
    }

    /// Removes a task. Idempotent: deleting an unknown id succeeds.
    ///
    /// # Errors
    ///
    /// `ServerCancelled` after shutdown.
    pub fn delete_task(&self, task_id: i64) -> Result<(), ServiceError> {
        let mut inner = self.write();
        if inner.cancelled {
            return Err(ServiceError::ServerCancelled);
        }
        inner.tasks.remove(&task_id);
        Ok(())
    }

    /// Appends a file carrying only `url` and a freshly allocated file id.
    ///
    /// # Errors
    ///
    /// `TaskNotFound`, `MaxFilesExceeded`, or `ServerCancelled`.
    pub fn add_file_to_task(&self, task_id: i64, url: &str) -> Result<(), ServiceError> {
        let mut inner = self.write();
        if inner.cancelled {
            return Err(ServiceError::ServerCancelled);
        }
        let stored = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(ServiceError::TaskNotFound)?;

        if self.cfg.max_files >= 0 && stored.task.files.len() as i64 >= self.cfg.max_files {
            return Err(ServiceError::MaxFilesExceeded);
        }

        let mut file = FileRecord::new(url);
        file.id = stored.next_file_id;
        stored.next_file_id += 1;
        stored.task.files.push(file);
        Ok(())
    }

    /// Returns a deep copy of a task's file list.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` or `ServerCancelled`.
    pub fn get_task_files(&self, task_id: i64) -> Result<Vec<FileRecord>, ServiceError> {
        let inner = self.read();
        if inner.cancelled {
            return Err(ServiceError::ServerCancelled);
        }
        inner
            .tasks
            .get(&task_id)
            .map(|stored| stored.task.files.clone())
            .ok_or(ServiceError::TaskNotFound)
    }

    /// Overwrites stored file records with `files`, matching each incoming
    /// record by file id (never by position). Ids that no longer exist are
    /// ignored. Returns a deep clone of the updated task.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` or `ServerCancelled`.
    pub fn update_task_files(
        &self,
        task_id: i64,
        files: Vec<FileRecord>,
    ) -> Result<Task, ServiceError> {
        let mut inner = self.write();
        if inner.cancelled {
            return Err(ServiceError::ServerCancelled);
        }
        let stored = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(ServiceError::TaskNotFound)?;

        let mut touched = false;
        for file in files {
            if let Some(slot) = stored.task.files.iter_mut().find(|f| f.id == file.id) {
                *slot = file;
                touched = true;
            }
        }
        if touched {
            stored.task.updated_at = Some(Utc::now());
        }

        Ok(stored.task.clone())
    }

    /// Idempotent shutdown: clears all tasks, stops the sweeper, and makes
    /// every further operation fail with `ServerCancelled`.
    pub fn cancel(&self) {
        {
            let mut inner = self.write();
            if inner.cancelled {
                return;
            }
            inner.cancelled = true;
            inner.tasks.clear();
        }
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Two-phase expiry sweep: snapshot expired ids under the read lock,
    /// delete under the write lock, keeping write-lock hold time minimal.
    fn sweep_expired(&self) {
        let now = Utc::now();
        let expired: Vec<i64> = {
            let inner = self.read();
            if inner.cancelled {
                return;
            }
            inner
                .tasks
                .values()
                .filter(|stored| stored.task.expires_at.is_some_and(|at| at < now))
                .map(|stored| stored.task.id)
                .collect()
        };

        if expired.is_empty() {
            return;
        }

        let mut inner = self.write();
        for task_id in &expired {
            inner.tasks.remove(task_id);
        }
        debug!(count = expired.len(), "expired tasks purged");
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
