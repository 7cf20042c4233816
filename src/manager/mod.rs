//! Orchestration of the task store and the loader.
//!
//! The manager caches nothing: every operation reads fresh state from the
//! store, and results coming back from the stateless loader are correlated
//! with stored records by file id before being written back. It also owns
//! the active-download admission gate: a bounded counter that rejects
//! rather than queues, keeping backpressure visible to callers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::loader::Loader;
use crate::model::Task;
use crate::store::TaskStore;

/// Manager limits.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Maximum concurrent archive generations.
    pub max_active: usize,
    /// Artificial delay before each archive generation; zero in production,
    /// nonzero lets tests observe the in-flight window.
    pub process_delay: Duration,
}

/// Coordinates store reads/writes around loader operations.
#[derive(Debug)]
pub struct Manager {
    cfg: ManagerConfig,
    store: Arc<TaskStore>,
    loader: Loader,
    active: Mutex<usize>,
}

/// A held slot in the bounded download pool. Dropping it releases the slot,
/// so release is guaranteed on every exit path.
#[derive(Debug)]
pub struct DownloadSlot {
    manager: Arc<Manager>,
}

impl Drop for DownloadSlot {
    fn drop(&mut self) {
        let mut active = self
            .manager
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
    }
}

impl Manager {
    #[must_use]
    pub fn new(cfg: ManagerConfig, store: Arc<TaskStore>, loader: Loader) -> Arc<Self> {
        debug!(?cfg, "new manager");
        Arc::new(Self {
            cfg,
            store,
            loader,
            active: Mutex::new(0),
        })
    }

    /// Creates an empty task.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::create_task`].
    pub fn create_task(&self) -> Result<i64, ServiceError> {
        self.store.create_task()
    }

    /// Deletes a task (idempotent).
    ///
    /// # Errors
    ///
    /// See [`TaskStore::delete_task`].
    pub fn delete_task(&self, task_id: i64) -> Result<(), ServiceError> {
        self.store.delete_task(task_id)
    }

    /// Adds a URL to a task.
    ///
    /// # Errors
    ///
    /// See [`TaskStore::add_file_to_task`].
    pub fn add_file_to_task(&self, task_id: i64, url: &str) -> Result<(), ServiceError> {
        self.store.add_file_to_task(task_id, url)
    }

    /// Returns the task's current state, lazily re-probing files that were
    /// never checked or failed transiently (status 0 or 502) last time.
    ///
    /// The loader returns fresh records, so the saved file ids are
    /// re-attached before the write-back; a slow concurrent reader can then
    /// never clobber an unrelated file at the same position.
    ///
    /// # Errors
    ///
    /// Store errors propagate; a fatal loader failure aborts the refresh.
    pub async fn get_task_status(&self, task_id: i64) -> Result<Task, ServiceError> {
        let files = self.store.get_task_files(task_id)?;

        let (urls, ids): (Vec<String>, Vec<i64>) = files
            .iter()
            .filter(|file| file.needs_check())
            .map(|file| (file.url.clone(), file.id))
            .unzip();

        let mut fresh = if urls.is_empty() {
            Vec::new()
        } else {
            self.loader.check(&urls).await?
        };

        for (file, id) in fresh.iter_mut().zip(ids.iter()) {
            file.id = *id;
        }

        self.store.update_task_files(task_id, fresh)
    }

    /// Verifies a task exists without probing any of its files.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` or `ServerCancelled`.
    pub fn task_exists(&self, task_id: i64) -> Result<(), ServiceError> {
        self.store.get_task_files(task_id).map(|_| ())
    }

    /// Claims a slot in the bounded download pool.
    ///
    /// # Errors
    ///
    /// `ServerBusy` when all slots are in flight; there is no queue.
    pub fn acquire_download_slot(self: &Arc<Self>) -> Result<DownloadSlot, ServiceError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active >= self.cfg.max_active {
            return Err(ServiceError::ServerBusy);
        }
        *active += 1;
        Ok(DownloadSlot {
            manager: Arc::clone(self),
        })
    }

    /// Generates a task's archive into `out`, acquiring a download slot
    /// first.
    ///
    /// # Errors
    ///
    /// `ServerBusy` when no slot is free; otherwise see
    /// [`process_task_with_slot`](Self::process_task_with_slot).
    pub async fn process_task<W>(
        self: &Arc<Self>,
        task_id: i64,
        out: W,
    ) -> Result<(), ServiceError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let slot = self.acquire_download_slot()?;
        self.process_task_with_slot(slot, task_id, out).await
    }

    /// Generates a task's archive into `out` under an already-held slot.
    ///
    /// Files that were never attempted or previously verified OK (status 0
    /// or 200) are (re)downloaded; terminal failures are skipped. The
    /// write-back of refreshed records is best-effort: by then the archive
    /// bytes are already on the wire.
    ///
    /// # Errors
    ///
    /// Store read failures and fatal loader failures.
    pub async fn process_task_with_slot<W>(
        &self,
        slot: DownloadSlot,
        task_id: i64,
        out: W,
    ) -> Result<(), ServiceError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let _slot = slot;

        if !self.cfg.process_delay.is_zero() {
            debug!(delay = ?self.cfg.process_delay, "process delay");
            tokio::time::sleep(self.cfg.process_delay).await;
        }

        let files = self.store.get_task_files(task_id)?;

        let (urls, ids): (Vec<String>, Vec<i64>) = files
            .iter()
            .filter(|file| file.downloadable())
            .map(|file| (file.url.clone(), file.id))
            .unzip();

        let mut fresh = self.loader.download(&urls, out).await?;

        for (file, id) in fresh.iter_mut().zip(ids.iter()) {
            file.id = *id;
        }

        if let Err(update_error) = self.store.update_task_files(task_id, fresh) {
            warn!(task_id, error = %update_error, "archive result write-back failed");
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::Client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::store::StoreConfig;

    const JPEG_BODY: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

    fn test_store() -> Arc<TaskStore> {
        TaskStore::new(StoreConfig {
            max_total: 100,
            max_files: 3,
            task_ttl: Duration::from_secs(600),
        })
    }

    /// The mock server listens on a 127.0.0.1 literal, which the loader's
    /// egress pre-check refuses before dispatch; address it through the
    /// `localhost` name instead.
    fn local_uri(server: &MockServer) -> String {
        server.uri().replace("127.0.0.1", "localhost")
    }

    fn test_manager(store: Arc<TaskStore>, max_active: usize, delay: Duration) -> Arc<Manager> {
        let loader = Loader::new(
            Client::new(),
            ["image/jpeg", "application/pdf"].into_iter().map(String::from),
        );
        Manager::new(
            ManagerConfig {
                max_active,
                process_delay: delay,
            },
            store,
            loader,
        )
    }

    #[tokio::test]
    async fn test_get_task_status_probes_pending_files() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/jpeg")
                    .set_body_bytes(JPEG_BODY),
            )
            .mount(&server)
            .await;

        let store = test_store();
        let manager = test_manager(Arc::clone(&store), 3, Duration::ZERO);
        let task_id = manager.create_task().unwrap();
        manager
            .add_file_to_task(task_id, &format!("{}/a.jpg", local_uri(&server)))
            .unwrap();

        let task = manager.get_task_status(task_id).await.unwrap();
        assert_eq!(task.files.len(), 1);
        assert_eq!(task.files[0].status, 200);
        assert_eq!(task.files[0].content_type, "image/jpeg");

        // The stored record was updated through the file-id correlation.
        let stored = store.get_task_files(task_id).unwrap();
        assert_eq!(stored[0].id, 1);
        assert_eq!(stored[0].status, 200);
    }

    #[tokio::test]
    async fn test_get_task_status_retries_transient_not_terminal() {
        let server = MockServer::start().await;
        // First probe: upstream 502 (transient). Later probes: 200.
        Mock::given(method("HEAD"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/flaky.jpg"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "image/jpeg"))
            .mount(&server)
            .await;
        // Terminal 404 must be probed exactly once.
        Mock::given(method("HEAD"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let store = test_store();
        let manager = test_manager(store, 3, Duration::ZERO);
        let task_id = manager.create_task().unwrap();
        manager
            .add_file_to_task(task_id, &format!("{}/flaky.jpg", local_uri(&server)))
            .unwrap();
        manager
            .add_file_to_task(task_id, &format!("{}/gone.jpg", local_uri(&server)))
            .unwrap();

        let task = manager.get_task_status(task_id).await.unwrap();
        assert_eq!(task.files[0].status, 502);
        assert_eq!(task.files[1].status, 404);

        let task = manager.get_task_status(task_id).await.unwrap();
        assert_eq!(task.files[0].status, 200, "502 is retried");
        assert_eq!(task.files[1].status, 404, "404 is terminal");
    }

    #[tokio::test]
    async fn test_get_task_status_unknown_task() {
        let manager = test_manager(test_store(), 3, Duration::ZERO);
        assert!(matches!(
            manager.get_task_status(12345).await,
            Err(ServiceError::TaskNotFound)
        ));
    }

    #[tokio::test]
    async fn test_download_slots_reject_beyond_cap() {
        let store = test_store();
        let manager = test_manager(store, 3, Duration::from_millis(150));
        let mut task_ids = Vec::new();
        for _ in 0..4 {
            task_ids.push(manager.create_task().unwrap());
        }

        // Four concurrent generations against three slots: exactly one must
        // be rejected with ServerBusy.
        let handles: Vec<_> = task_ids
            .iter()
            .map(|&task_id| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.process_task(task_id, tokio::io::sink()).await
                })
            })
            .collect();

        let mut ok = 0;
        let mut busy = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(ServiceError::ServerBusy) => busy += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(busy, 1);
    }

    #[tokio::test]
    async fn test_download_slot_released_on_completion_and_error() {
        let store = test_store();
        let manager = test_manager(Arc::clone(&store), 1, Duration::ZERO);
        let task_id = manager.create_task().unwrap();

        manager.process_task(task_id, tokio::io::sink()).await.unwrap();

        // Errors release the slot too.
        let missing = manager.process_task(987_654, tokio::io::sink()).await;
        assert!(matches!(missing, Err(ServiceError::TaskNotFound)));

        manager.process_task(task_id, tokio::io::sink()).await.unwrap();
    }

    #[tokio::test]
    async fn test_process_task_writes_results_back_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/jpeg")
                    .set_body_bytes(JPEG_BODY),
            )
            .mount(&server)
            .await;

        let store = test_store();
        let manager = test_manager(Arc::clone(&store), 3, Duration::ZERO);
        let task_id = manager.create_task().unwrap();
        manager
            .add_file_to_task(task_id, &format!("{}/a.jpg", local_uri(&server)))
            .unwrap();

        let mut out = std::io::Cursor::new(Vec::new());
        manager.process_task(task_id, &mut out).await.unwrap();

        let stored = store.get_task_files(task_id).unwrap();
        assert_eq!(stored[0].id, 1);
        assert_eq!(stored[0].status, 200);
        assert_eq!(stored[0].real_type, "image/jpeg");
        assert_eq!(stored[0].size, JPEG_BODY.len() as i64);
        assert!(!out.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_process_task_skips_terminal_failures() {
        let server = MockServer::start().await;
        // The GET must never be issued for a file already marked 404.
        Mock::given(method("GET"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = test_store();
        let manager = test_manager(store, 3, Duration::ZERO);
        let task_id = manager.create_task().unwrap();
        manager
            .add_file_to_task(task_id, &format!("{}/gone.jpg", local_uri(&server)))
            .unwrap();

        manager.get_task_status(task_id).await.unwrap();
        manager.process_task(task_id, tokio::io::sink()).await.unwrap();
    }
}
