use crate::batch_function::LoadOutput;
use crate::cache::CacheStore;
use crate::redistribute::group_by_key;
use crate::stats::LoaderStats;
use crate::{BatchFunction, LoadError, LoaderConfig};
use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Messages sent from a [`BatchLoader`](crate::BatchLoader) handle to its
/// worker task.
pub(crate) enum LoaderMessage<K, V> {
    /// Queue keys for the current window.
    Load(LoadRequest<K, V>),
    /// Close the current window and fetch it now.
    Dispatch,
}

pub(crate) struct LoadRequest<K, V> {
    /// Keys that were not already resolved from the cache. The response must
    /// contain one value per key, in the same order.
    pub(crate) keys: Vec<K>,
    pub(crate) result_tx: oneshot::Sender<Result<Vec<V>, LoadError>>,
}

/// The keys and waiting requests of one accumulation window.
struct Window<K, V> {
    keys: Vec<K>,
    key_order: HashMap<K, usize>,
    requests: Vec<LoadRequest<K, V>>,
}

impl<K, V> Window<K, V>
where
    K: Clone + Hash + Eq,
{
    fn new() -> Self {
        Window {
            keys: vec![],
            key_order: HashMap::new(),
            requests: vec![],
        }
    }

    fn push(&mut self, request: LoadRequest<K, V>) {
        for key in &request.keys {
            if !self.key_order.contains_key(key) {
                self.key_order.insert(key.clone(), self.keys.len());
                self.keys.push(key.clone());
            }
        }
        self.requests.push(request);
    }

    fn num_keys(&self) -> usize {
        self.keys.len()
    }
}

/// The task that owns a loader's accumulation windows and calls its
/// [`BatchFunction`].
///
/// Each cycle of [`run`](LoaderWorker::run) is one window:
///
/// 1. Wait for the first load request.
/// 2. Keep accepting requests until the delay passes without a new one, the
///    eager batch size is reached, an explicit dispatch arrives, or every
///    loader handle is dropped.
/// 3. Spawn a task that calls the batch function once with the window's
///    distinct keys, then answers every request in the window from the same
///    result.
///
/// The worker starts accumulating the next window as soon as the previous one
/// is handed off, so a slow fetch never holds up keys outside its window.
pub(crate) struct LoaderWorker<F>
where
    F: BatchFunction,
{
    pub(crate) batch_function: F,
    pub(crate) config: LoaderConfig,
    pub(crate) label: Cow<'static, str>,
    pub(crate) cache_store: CacheStore<F::Key, LoadOutput<F>>,
    pub(crate) stats: LoaderStats,
}

impl<F> LoaderWorker<F>
where
    F: BatchFunction + Send + Sync + 'static,
{
    pub(crate) async fn run(
        self,
        mut message_rx: mpsc::UnboundedReceiver<LoaderMessage<F::Key, LoadOutput<F>>>,
    ) {
        let worker = Arc::new(self);
        'task: loop {
            let mut window = Window::new();

            tracing::trace!(batch_loader = %worker.label, "waiting for keys to load...");
            'wait_for_first_request: loop {
                match message_rx.recv().await {
                    Some(LoaderMessage::Load(request)) => {
                        tracing::trace!(batch_loader = %worker.label, num_request_keys = request.keys.len(), "received initial load request");
                        window.push(request);
                        break 'wait_for_first_request;
                    }
                    Some(LoaderMessage::Dispatch) => {
                        tracing::trace!(batch_loader = %worker.label, "dispatch requested with no pending keys");
                    }
                    None => {
                        // Every loader handle was dropped, so we're done
                        break 'task;
                    }
                }
            }

            'wait_for_more_keys: loop {
                let should_run_batch_now = match worker.config.eager_batch_size {
                    Some(eager_batch_size) => window.num_keys() >= eager_batch_size,
                    None => false,
                };
                if should_run_batch_now {
                    tracing::trace!(
                        batch_loader = %worker.label,
                        num_pending_keys = window.num_keys(),
                        eager_batch_size = ?worker.config.eager_batch_size,
                        "batch filled up, ready to load keys now",
                    );
                    break 'wait_for_more_keys;
                }

                let delay = tokio::time::sleep(worker.config.delay_duration);
                tokio::pin!(delay);

                tokio::select! {
                    message = message_rx.recv() => {
                        match message {
                            Some(LoaderMessage::Load(request)) => {
                                tracing::trace!(batch_loader = %worker.label, num_request_keys = request.keys.len(), "received additional load request");
                                window.push(request);
                            }
                            Some(LoaderMessage::Dispatch) => {
                                tracing::trace!(batch_loader = %worker.label, num_pending_keys = window.num_keys(), "explicit dispatch requested");
                                break 'wait_for_more_keys;
                            }
                            None => {
                                tracing::debug!(batch_loader = %worker.label, num_pending_keys = window.num_keys(), "load channel closed");
                                break 'wait_for_more_keys;
                            }
                        }
                    }
                    _ = &mut delay => {
                        tracing::trace!(
                            batch_loader = %worker.label,
                            num_pending_keys = window.num_keys(),
                            "delay reached while waiting for more keys to load",
                        );
                        break 'wait_for_more_keys;
                    }
                }
            }

            let dispatch_worker = worker.clone();
            tokio::spawn(async move { dispatch_worker.dispatch(window).await });
        }

        tracing::debug!(batch_loader = %worker.label, stats = ?worker.stats.snapshot(), "batch loader finished");
    }

    #[tracing::instrument(skip_all, fields(batch_loader = %self.label, num_keys = window.num_keys()))]
    async fn dispatch(&self, window: Window<F::Key, LoadOutput<F>>) {
        let Window {
            keys,
            key_order,
            requests,
        } = window;

        self.stats.record_dispatch(keys.len());
        tracing::debug!(?keys, num_pending_requests = requests.len(), "dispatching batch");

        match self.fetch(&keys).await {
            Ok(values) => {
                if self.config.cache_policy.retains_values() {
                    self.cache_store
                        .insert_many(keys.iter().cloned().zip(values.iter().cloned()));
                }

                for request in requests {
                    let response = request
                        .keys
                        .iter()
                        .map(|key| match key_order.get(key) {
                            Some(&ix) => Ok(values[ix].clone()),
                            None => Err(LoadError::ContractViolation(format!(
                                "key {key:?} was not part of the dispatched batch"
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>();

                    // Ignore error if receiver was already closed
                    let _ = request.result_tx.send(response);
                }
            }
            Err(error) => {
                self.stats.record_failed_dispatch();
                tracing::info!(%error, num_pending_requests = requests.len(), "batch failed");

                for request in requests {
                    let _ = request.result_tx.send(Err(error.clone()));
                }
            }
        }
    }

    /// Call the batch function under the configured deadline and match the
    /// records it returns onto `keys`.
    async fn fetch(&self, keys: &[F::Key]) -> Result<Vec<LoadOutput<F>>, LoadError> {
        let load = self.batch_function.load(keys);
        let result = match self.config.fetch_timeout {
            Some(fetch_timeout) => match tokio::time::timeout(fetch_timeout, load).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(?fetch_timeout, num_keys = keys.len(), "deadline exceeded while loading batch");
                    return Err(LoadError::DeadlineExceeded(format!(
                        "{} did not load {} keys within {:?}",
                        self.label,
                        keys.len(),
                        fetch_timeout,
                    )));
                }
            },
            None => load.await,
        };

        let records = result.map_err(|error| {
            if self.batch_function.is_deadline_exceeded(&error) {
                LoadError::DeadlineExceeded(error.to_string())
            } else {
                LoadError::FetchError(error.to_string())
            }
        })?;

        let num_records = records.len();
        let redistribution = group_by_key::<F::Relation, _, _, _>(keys, records, |record| {
            self.batch_function.correlation_key(record)
        });
        if redistribution.unmatched > 0 {
            tracing::debug!(
                unmatched = redistribution.unmatched,
                "ignoring records for keys that were not requested"
            );
            self.stats.record_unmatched(redistribution.unmatched);
        }
        tracing::trace!(num_records, "batch loaded");

        Ok(redistribution.into_values())
    }
}
