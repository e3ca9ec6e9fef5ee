use crate::batch_function::LoadOutput;
use crate::cache::{CacheLookup, CacheStore};
use crate::loader_worker::{LoadRequest, LoaderMessage, LoaderWorker};
use crate::stats::LoaderStats;
use crate::{BatchFunction, CachePolicy, LoaderConfig, StatsSnapshot};
use std::borrow::Cow;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Batches lookups of related records, such as the organizations linked to
/// each of a set of emails. A `BatchLoader` can be used with any type that
/// implements [`BatchFunction`]. `BatchLoader`s are asynchronous and designed
/// to be passed and shared between tasks. Cloning a `BatchLoader` is shallow
/// and will use the same [`BatchFunction`] and worker.
///
/// A `BatchLoader` is designed to be ephemeral. In the context of a web
/// service, this means callers should create a new `BatchLoader` for each
/// inbound request (see [`LoaderFactory`](crate::LoaderFactory)), and **not**
/// share one across requests.
///
/// Keys requested through [`load`](BatchLoader::load) and
/// [`load_many`](BatchLoader::load_many) are collected into an accumulation
/// window. The window closes once no new key has arrived for the configured
/// delay, once enough distinct keys are pending (see
/// [`eager_batch_size`](BatchLoaderBuilder::eager_batch_size)), or when
/// [`dispatch`](BatchLoader::dispatch) is called. The [`BatchFunction`] is
/// then called exactly once with the window's distinct keys, in the order they
/// were first requested.
///
/// ## Load semantics
///
/// Every requested key resolves. Keys the [`BatchFunction`] returned no
/// records for resolve to the relation's absent value: an empty `Vec` for
/// [`ToMany`](crate::ToMany) and `None` for [`ToOne`](crate::ToOne). Records
/// whose correlation key was never requested are dropped.
///
/// If the [`BatchFunction`] returns an error, or doesn't finish before the
/// fetch deadline, every load waiting on that batch fails with the same
/// [`LoadError`]. The loader never retries on its own. Failed keys are not
/// cached, so loading them again will start a new fetch.
pub struct BatchLoader<F>
where
    F: BatchFunction,
{
    label: Cow<'static, str>,
    cache_policy: CachePolicy,
    cache_store: CacheStore<F::Key, LoadOutput<F>>,
    stats: LoaderStats,
    _load_task: Arc<tokio::task::JoinHandle<()>>,
    message_tx: mpsc::UnboundedSender<LoaderMessage<F::Key, LoadOutput<F>>>,
}

impl<F> BatchLoader<F>
where
    F: BatchFunction + Send + Sync + 'static,
{
    /// Create a new `BatchLoader` that uses the given [`BatchFunction`] to
    /// retrieve data. Returns a [`BatchLoaderBuilder`], which can be used to
    /// customize the `BatchLoader`. Call [`.finish()`](BatchLoaderBuilder::finish)
    /// to create the `BatchLoader`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cos_dataloader::{BatchFunction, BatchLoader, ToMany};
    /// # #[derive(Clone)]
    /// # struct Organization { email_id: String }
    /// # struct OrganizationsForEmails;
    /// # #[async_trait::async_trait]
    /// # impl BatchFunction for OrganizationsForEmails {
    /// #     type Key = String;
    /// #     type Record = Organization;
    /// #     type Relation = ToMany;
    /// #     type Error = anyhow::Error;
    /// #     async fn load(&self, keys: &[String]) -> anyhow::Result<Vec<Organization>> {
    /// #         Ok(vec![])
    /// #     }
    /// #     fn correlation_key(&self, record: &Organization) -> String {
    /// #         record.email_id.clone()
    /// #     }
    /// # }
    /// # #[tokio::main] async fn main() -> anyhow::Result<()> {
    /// let loader = BatchLoader::build(OrganizationsForEmails)
    ///     .label("organizations-for-emails")
    ///     .delay_duration(tokio::time::Duration::from_millis(5))
    ///     .finish();
    ///
    /// let organizations = loader.load("email-1".to_string()).await?;
    /// assert!(organizations.is_empty());
    /// # Ok(()) }
    /// ```
    pub fn build(batch_function: F) -> BatchLoaderBuilder<F> {
        BatchLoaderBuilder {
            batch_function,
            config: LoaderConfig::default(),
            label: "unlabeled-batch-loader".into(),
        }
    }

    /// Load the value for the given key. The key is queued for the current
    /// window as soon as this method is called, so the returned future can be
    /// awaited later (for example after an explicit
    /// [`dispatch`](BatchLoader::dispatch)).
    pub fn load(
        &self,
        key: F::Key,
    ) -> impl Future<Output = Result<LoadOutput<F>, LoadError>> + Send + 'static {
        let pending = self.submit(vec![key]);
        async move {
            let mut values = pending.wait().await?;
            values.pop().ok_or_else(|| {
                LoadError::ContractViolation("no value was returned for the requested key".to_string())
            })
        }
    }

    /// Load the values for all the given keys. Values are returned in the
    /// same order as the input keys, and repeated keys receive the same value.
    pub fn load_many(
        &self,
        keys: &[F::Key],
    ) -> impl Future<Output = Result<Vec<LoadOutput<F>>, LoadError>> + Send + 'static {
        let pending = self.submit(keys.to_vec());
        pending.wait()
    }

    #[tracing::instrument(skip_all, fields(batch_loader = %self.label, num_keys = keys.len()))]
    fn submit(&self, keys: Vec<F::Key>) -> PendingLoad<F::Key, LoadOutput<F>> {
        let num_keys = keys.len();
        let mut cache_lookup = CacheLookup::new(keys);
        let cache_hits = if self.cache_policy.retains_values() {
            cache_lookup.reload_keys_from_cache_store(&self.cache_store)
        } else {
            0
        };
        self.stats.record_load_request(num_keys, cache_hits);

        let label = self.label.clone();
        let pending_keys = cache_lookup.pending_keys();
        if pending_keys.is_empty() {
            tracing::debug!("all keys have already been looked up");
            return PendingLoad {
                label,
                cache_lookup,
                state: PendingState::Ready,
            };
        }

        tracing::debug!(num_pending_keys = pending_keys.len(), "queueing keys to load");
        let (result_tx, result_rx) = oneshot::channel();
        let request = LoadRequest {
            keys: pending_keys.clone(),
            result_tx,
        };
        let state = match self.message_tx.send(LoaderMessage::Load(request)) {
            Ok(()) => PendingState::Waiting {
                keys: pending_keys,
                result_rx,
            },
            Err(_) => PendingState::Failed(LoadError::SendError),
        };

        PendingLoad {
            label,
            cache_lookup,
            state,
        }
    }

    /// Close the current window so the pending keys are fetched right away
    /// instead of after the delay. Does nothing if no keys are pending.
    pub fn dispatch(&self) -> Result<(), LoadError> {
        self.message_tx
            .send(LoaderMessage::Dispatch)
            .map_err(|_| LoadError::SendError)
    }

    /// Add a value to the request cache, so loading `key` will not call the
    /// [`BatchFunction`]. Has no effect unless the loader uses
    /// [`CachePolicy::Request`].
    pub fn prime(&self, key: F::Key, value: LoadOutput<F>) {
        if self.cache_policy.retains_values() {
            self.cache_store.insert(key, value);
        } else {
            tracing::debug!(batch_loader = %self.label, ?key, "loader does not retain values, ignoring primed value");
        }
    }

    /// Remove a value from the request cache. It will be fetched again the
    /// next time it is loaded.
    pub fn clear(&self, key: &F::Key) {
        self.cache_store.remove(key);
    }

    /// Remove every value from the request cache.
    pub fn clear_all(&self) {
        tracing::debug!(batch_loader = %self.label, num_cached = self.cache_store.len(), "clearing cache");
        self.cache_store.clear();
    }

    /// A snapshot of this loader's counters, shared by every clone.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The label set with [`BatchLoaderBuilder::label`].
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The [`CachePolicy`] this loader was built with.
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }
}

impl<F> Clone for BatchLoader<F>
where
    F: BatchFunction,
{
    fn clone(&self) -> Self {
        BatchLoader {
            label: self.label.clone(),
            cache_policy: self.cache_policy,
            cache_store: self.cache_store.clone(),
            stats: self.stats.clone(),
            _load_task: self._load_task.clone(),
            message_tx: self.message_tx.clone(),
        }
    }
}

/// Used to configure a new [`BatchLoader`]. A `BatchLoaderBuilder` is
/// returned from [`BatchLoader::build`].
pub struct BatchLoaderBuilder<F>
where
    F: BatchFunction + Send + Sync + 'static,
{
    batch_function: F,
    config: LoaderConfig,
    label: Cow<'static, str>,
}

impl<F> BatchLoaderBuilder<F>
where
    F: BatchFunction + Send + Sync + 'static,
{
    /// The maximum amount of time the [`BatchLoader`] will wait for another
    /// key before calling the [`BatchFunction`]. The wait starts over each
    /// time a load request arrives.
    pub fn delay_duration(mut self, delay: tokio::time::Duration) -> Self {
        self.config.delay_duration = delay;
        self
    }

    /// The number of distinct keys to wait for before eagerly calling the
    /// [`BatchFunction`]. A value of `Some(n)` will load the batch once `n`
    /// or more keys are pending (or once the delay set by
    /// [`delay_duration`](BatchLoaderBuilder::delay_duration) is reached,
    /// whichever comes first). A value of `None` will always wait for the
    /// delay.
    ///
    /// Note that `eager_batch_size` **does not** set an upper limit on the
    /// batch! If [`BatchLoader::load_many`] is called with more than
    /// `eager_batch_size` keys, the batch will be sent immediately with _all_
    /// of the provided keys.
    pub fn eager_batch_size(mut self, eager_batch_size: Option<usize>) -> Self {
        self.config.eager_batch_size = eager_batch_size;
        self
    }

    /// The deadline for a single call to the [`BatchFunction`]. When it
    /// passes, every waiting load fails with
    /// [`LoadError::DeadlineExceeded`].
    pub fn fetch_timeout(mut self, fetch_timeout: Option<tokio::time::Duration>) -> Self {
        self.config.fetch_timeout = fetch_timeout;
        self
    }

    pub fn cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.config.cache_policy = cache_policy;
        self
    }

    /// Replace every batching option at once.
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a label for the [`BatchLoader`]. This is only used to improve
    /// diagnostic messages, such as log messages and errors.
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Create and return a [`BatchLoader`] with the given options. Spawns the
    /// loader's worker, so this must be called from within a Tokio runtime.
    pub fn finish(self) -> BatchLoader<F> {
        let cache_store = CacheStore::new();
        let stats = LoaderStats::default();
        let cache_policy = self.config.cache_policy;
        let label = self.label.clone();

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let worker = LoaderWorker {
            batch_function: self.batch_function,
            config: self.config,
            label: self.label,
            cache_store: cache_store.clone(),
            stats: stats.clone(),
        };
        let load_task = tokio::spawn(worker.run(message_rx));

        BatchLoader {
            label,
            cache_policy,
            cache_store,
            stats,
            _load_task: Arc::new(load_task),
            message_tx,
        }
    }
}

/// The caller's side of a `load` or `load_many` call.
struct PendingLoad<K, V>
where
    K: Hash + Eq,
{
    label: Cow<'static, str>,
    cache_lookup: CacheLookup<K, V>,
    state: PendingState<K, V>,
}

enum PendingState<K, V> {
    Ready,
    Waiting {
        keys: Vec<K>,
        result_rx: oneshot::Receiver<Result<Vec<V>, LoadError>>,
    },
    Failed(LoadError),
}

impl<K, V> PendingLoad<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    async fn wait(self) -> Result<Vec<V>, LoadError> {
        let PendingLoad {
            label,
            mut cache_lookup,
            state,
        } = self;

        match state {
            PendingState::Ready => {}
            PendingState::Failed(error) => return Err(error),
            PendingState::Waiting { keys, result_rx } => match result_rx.await {
                Ok(Ok(values)) => {
                    tracing::trace!(batch_loader = %label, "load response returned successfully");
                    cache_lookup.fill(keys, values)?;
                }
                Ok(Err(error)) => {
                    tracing::info!(batch_loader = %label, "error returned while loading keys: {error}");
                    return Err(error);
                }
                Err(_) => {
                    return Err(LoadError::ContractViolation(format!(
                        "batch loader {label} stopped without resolving the request"
                    )));
                }
            },
        }

        cache_lookup.lookup_result()
    }
}

/// Error indicating that loading one or more values from a [`BatchLoader`]
/// failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The [`BatchFunction`] returned an error while loading the batch. The
    /// message contains the error message specified by [`BatchFunction::Error`].
    #[error("error while fetching from batch: {}", _0)]
    FetchError(String),

    /// The [`BatchFunction`] did not finish before its deadline, or reported
    /// that an upstream deadline passed.
    #[error("deadline exceeded: {}", _0)]
    DeadlineExceeded(String),

    /// The loader or its [`BatchFunction`] broke an invariant. This indicates
    /// a bug and should not be retried.
    #[error("batch loader contract violated: {}", _0)]
    ContractViolation(String),

    /// The request could not be sent to the [`BatchLoader`]'s worker.
    #[error("error sending load request")]
    SendError,
}

impl LoadError {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, LoadError::DeadlineExceeded(_))
    }

    /// Returns `true` for errors that may succeed if the load is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadError::FetchError(_) | LoadError::DeadlineExceeded(_))
    }
}
