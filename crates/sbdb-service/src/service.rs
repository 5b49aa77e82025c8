//! Public service handle

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use sbdb_core::{CacheResult, ClassifierConfig, FileBackend, Prefix, StoreBackend};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::completer::HashCompleter;
use crate::error::{Result, ServiceError};
use crate::lookup::{Classification, LookupQueue, PendingLookup};
use crate::update::UpdateObserver;
use crate::worker::{Command, OpenBackend, Reply, ServiceState, SharedState, Worker};

/// Handle to a running classification worker.
///
/// Every operation is marshalled onto the worker thread; once shutdown has
/// begun every call fails with [`ServiceError::NotInitialized`].
pub struct DbService {
    commands: mpsc::Sender<Command>,
    lookups: LookupQueue,
    state: SharedState,
    config: ClassifierConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DbService {
    pub fn builder(config: ClassifierConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn check_running(&self) -> Result<()> {
        match self.state() {
            ServiceState::Running => Ok(()),
            _ => Err(ServiceError::NotInitialized),
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServiceError::NotInitialized)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        self.check_running()?;
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| ServiceError::NotInitialized)?
    }

    /// Queue a lookup of `key`. `handler` runs on the worker thread with the
    /// comma-joined tables the URL is listed in; it always runs, answering
    /// "" when the lookup could not be performed.
    pub async fn lookup_with<F>(&self, key: &str, handler: F) -> Result<()>
    where
        F: FnOnce(String) + Send + 'static,
    {
        self.check_running()?;
        self.lookups
            .queue_lookup(PendingLookup::new(key, Box::new(handler)));
        self.send(Command::HandlePendingLookups).await
    }

    pub async fn lookup(&self, key: &str) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.lookup_with(key, move |tables| {
            let _ = tx.send(tables);
        })
        .await?;
        rx.await.map_err(|_| ServiceError::NotInitialized)
    }

    pub async fn classify(&self, key: &str) -> Result<Classification> {
        let tables = self.lookup(key).await?;
        Ok(Classification::from_tables(&tables, &self.config))
    }

    /// Whether loading `key` should be blocked. Fails open.
    pub async fn should_block(&self, key: &str) -> bool {
        match self.classify(key).await {
            Ok(verdict) => verdict.should_block(),
            Err(e) => {
                warn!(error = %e, "Classification unavailable, allowing");
                false
            }
        }
    }

    /// Start an update session. `tables` are spoiled if it fails or is
    /// canceled.
    pub async fn begin_update<O>(&self, observer: O, tables: Vec<String>) -> Result<()>
    where
        O: UpdateObserver + 'static,
    {
        self.request(|reply| Command::BeginUpdate {
            observer: Box::new(observer),
            tables,
            reply,
        })
        .await
    }

    pub async fn begin_stream(&self, table: Option<&str>) -> Result<()> {
        let table = table.map(str::to_string);
        self.request(|reply| Command::BeginStream { table, reply }).await
    }

    pub async fn update_stream(&self, data: &[u8]) -> Result<()> {
        let data = data.to_vec();
        self.request(|reply| Command::UpdateStream { data, reply }).await
    }

    pub async fn finish_stream(&self) -> Result<()> {
        self.request(|reply| Command::FinishStream { reply }).await
    }

    pub async fn finish_update(&self) -> Result<()> {
        self.request(|reply| Command::FinishUpdate { reply }).await
    }

    pub async fn cancel_update(&self) -> Result<()> {
        self.request(|reply| Command::CancelUpdate { reply }).await
    }

    pub async fn reset_database(&self) -> Result<()> {
        self.request(|reply| Command::ResetDatabase { reply }).await
    }

    /// Register (or with `None`, remove) the completer for `table`
    pub async fn set_hash_completer(&self, table: &str, completer: Option<Arc<dyn HashCompleter>>) -> Result<()> {
        let table = table.to_string();
        self.request(|reply| Command::SetHashCompleter {
            table,
            completer,
            reply,
        })
        .await
    }

    pub async fn cache_completions(&self, results: Vec<CacheResult>) -> Result<()> {
        self.request(|reply| Command::CacheCompletions { results, reply })
            .await
    }

    pub async fn cache_misses(&self, prefixes: Vec<Prefix>) -> Result<()> {
        self.request(|reply| Command::CacheMisses { prefixes, reply })
            .await
    }

    /// Known tables and chunk ranges, one `name;a:..:s:..` line each
    pub async fn table_request(&self) -> Result<String> {
        self.request(|reply| Command::TableRequest { reply }).await
    }

    /// Answer outstanding lookups, close the stores and stop the worker
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ServiceState::Running {
                return Err(ServiceError::NotInitialized);
            }
            *state = ServiceState::ShuttingDown;
        }

        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply: tx }).await?;
        let _ = rx.await;

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                _ => warn!("Classifier worker did not exit cleanly"),
            }
        }
        info!("Classification service stopped");
        Ok(())
    }
}

impl Drop for DbService {
    fn drop(&mut self) {
        let mut state = self.state.write();
        if *state == ServiceState::Running {
            *state = ServiceState::ShuttingDown;
            let (tx, _rx) = oneshot::channel();
            let _ = self.commands.try_send(Command::Shutdown { reply: tx });
        }
    }
}

/// Builder for DbService
pub struct ServiceBuilder {
    config: ClassifierConfig,
    open_backend: Option<OpenBackend>,
    completers: HashMap<String, Arc<dyn HashCompleter>>,
    default_completer: Option<Arc<dyn HashCompleter>>,
}

impl ServiceBuilder {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            open_backend: None,
            completers: HashMap::new(),
            default_completer: None,
        }
    }

    /// Store tables in `backend` instead of `config.db_dir`
    pub fn backend<B>(mut self, backend: B) -> Self
    where
        B: StoreBackend + Clone + 'static,
    {
        self.open_backend = Some(Box::new(move || {
            Ok(Box::new(backend.clone()) as Box<dyn StoreBackend>)
        }));
        self
    }

    /// Completer for every table listed in `gethash_tables` that has no
    /// table-specific one
    pub fn default_completer(mut self, completer: Arc<dyn HashCompleter>) -> Self {
        self.default_completer = Some(completer);
        self
    }

    pub fn completer(mut self, table: impl Into<String>, completer: Arc<dyn HashCompleter>) -> Self {
        self.completers.insert(table.into(), completer);
        self
    }

    /// Spawn the worker. The stores are opened lazily by the first
    /// operation that needs them.
    pub fn build(self) -> Result<DbService> {
        let open_backend = match self.open_backend {
            Some(open) => open,
            None => {
                let dir = self.config.db_dir.clone();
                Box::new(move || Ok(Box::new(FileBackend::open(&dir)?) as Box<dyn StoreBackend>))
                    as OpenBackend
            }
        };

        let state: SharedState = Arc::new(RwLock::new(ServiceState::Running));
        let lookups = LookupQueue::new();
        let (commands, commands_rx) = mpsc::channel(self.config.command_queue_capacity.max(1));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(sbdb_core::Error::from)?;
        let (worker, events_rx) = Worker::new(
            self.config.clone(),
            state.clone(),
            open_backend,
            lookups.clone(),
            self.completers,
            self.default_completer,
        );
        let handle = worker
            .spawn(runtime, commands_rx, events_rx)
            .map_err(sbdb_core::Error::from)?;

        info!(db_dir = %self.config.db_dir.display(), "Classification service started");
        Ok(DbService {
            commands,
            lookups,
            state,
            config: self.config,
            worker: Mutex::new(Some(handle)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbdb_core::MemoryBackend;

    struct NullObserver;

    impl UpdateObserver for NullObserver {
        fn update_error(&mut self, _error: &ServiceError) {}
        fn update_success(&mut self, _wait_secs: u32) {}
    }

    fn service() -> DbService {
        DbService::builder(ClassifierConfig::default())
            .backend(MemoryBackend::new())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_database_is_clean() {
        let service = service();
        assert_eq!(service.lookup("http://anything.example/").await.unwrap(), "");
        assert_eq!(
            service.classify("anything.example/").await.unwrap(),
            Classification::Clean
        );
        assert_eq!(service.table_request().await.unwrap(), "");
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let service = service();
        service.shutdown().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(matches!(
            service.lookup("a.example/").await,
            Err(ServiceError::NotInitialized)
        ));
        assert!(matches!(
            service.begin_update(NullObserver, vec![]).await,
            Err(ServiceError::NotInitialized)
        ));
        assert!(matches!(service.shutdown().await, Err(ServiceError::NotInitialized)));
        assert!(!service.should_block("a.example/").await);
    }

    #[tokio::test]
    async fn test_unopenable_store_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let service = DbService::builder(ClassifierConfig::new(&file)).build().unwrap();
        // the handler still runs and reports clean
        assert_eq!(service.lookup("a.example/").await.unwrap(), "");
        assert!(matches!(
            service.begin_update(NullObserver, vec![]).await,
            Err(ServiceError::DbOpen(_))
        ));
        service.shutdown().await.unwrap();
    }
}
