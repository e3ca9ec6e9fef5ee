#![allow(unused)]

use async_trait::async_trait;
use cos_dataloader::{BatchFunction, Relation, ToMany};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{atomic, Arc, RwLock};
use tokio::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct Counter {
    count: Arc<atomic::AtomicUsize>,
}

impl Counter {
    fn new() -> Self {
        Counter::default()
    }

    fn inc(&self) {
        self.count.fetch_add(1, atomic::Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.count.load(atomic::Ordering::SeqCst)
    }
}

/// Wraps a `BatchFunction`, recording every batch of keys it is called with.
pub struct ObserveBatchFunction<F>
where
    F: BatchFunction,
{
    batch_function: Arc<F>,
    total_calls: Counter,
    calls_per_key: Arc<RwLock<HashMap<F::Key, Counter>>>,
    batches: Arc<RwLock<Vec<Vec<F::Key>>>>,
}

impl<F> ObserveBatchFunction<F>
where
    F: BatchFunction,
{
    pub fn new(batch_function: F) -> Self {
        ObserveBatchFunction {
            batch_function: Arc::new(batch_function),
            total_calls: Counter::new(),
            calls_per_key: Default::default(),
            batches: Default::default(),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.count()
    }

    pub fn calls_for_key(&self, key: &F::Key) -> usize {
        let calls_per_key = self.calls_per_key.read().unwrap();
        calls_per_key
            .get(key)
            .map(|count| count.count())
            .unwrap_or_default()
    }

    /// Every batch of keys passed to the wrapped function, in call order.
    pub fn batches(&self) -> Vec<Vec<F::Key>> {
        self.batches.read().unwrap().clone()
    }
}

impl<F> Clone for ObserveBatchFunction<F>
where
    F: BatchFunction,
{
    fn clone(&self) -> Self {
        ObserveBatchFunction {
            batch_function: self.batch_function.clone(),
            total_calls: self.total_calls.clone(),
            calls_per_key: self.calls_per_key.clone(),
            batches: self.batches.clone(),
        }
    }
}

#[async_trait]
impl<F> BatchFunction for ObserveBatchFunction<F>
where
    F: BatchFunction + Send + Sync,
{
    type Key = F::Key;
    type Record = F::Record;
    type Relation = F::Relation;
    type Error = F::Error;

    async fn load(&self, keys: &[Self::Key]) -> Result<Vec<Self::Record>, Self::Error> {
        {
            self.total_calls.inc();
            let mut calls_per_key = self.calls_per_key.write().unwrap();
            for key in keys {
                calls_per_key.entry(key.clone()).or_default().inc();
            }
            self.batches.write().unwrap().push(keys.to_vec());
        }

        self.batch_function.load(keys).await
    }

    fn correlation_key(&self, record: &Self::Record) -> Self::Key {
        self.batch_function.correlation_key(record)
    }

    fn is_deadline_exceeded(&self, error: &Self::Error) -> bool {
        self.batch_function.is_deadline_exceeded(error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    pub key: String,
    pub value: u32,
}

pub fn tagged(key: &str, value: u32) -> Tagged {
    Tagged {
        key: key.to_string(),
        value,
    }
}

/// Returns the same records for every batch, whatever keys were requested.
pub struct StaticRecords<Rel = ToMany> {
    records: Vec<Tagged>,
    _relation: PhantomData<Rel>,
}

impl StaticRecords {
    pub fn new(records: Vec<Tagged>) -> Self {
        StaticRecords::with_relation(records)
    }
}

impl<Rel> StaticRecords<Rel> {
    pub fn with_relation(records: Vec<Tagged>) -> Self {
        StaticRecords {
            records,
            _relation: PhantomData,
        }
    }
}

impl<Rel> Clone for StaticRecords<Rel> {
    fn clone(&self) -> Self {
        StaticRecords::with_relation(self.records.clone())
    }
}

#[async_trait]
impl<Rel> BatchFunction for StaticRecords<Rel>
where
    Rel: Relation<Tagged> + Send + Sync + 'static,
{
    type Key = String;
    type Record = Tagged;
    type Relation = Rel;
    type Error = anyhow::Error;

    async fn load(&self, _keys: &[String]) -> anyhow::Result<Vec<Tagged>> {
        Ok(self.records.clone())
    }

    fn correlation_key(&self, record: &Tagged) -> String {
        record.key.clone()
    }
}

/// Returns each requested key as its own record, after sleeping for `delay`.
#[derive(Clone)]
pub struct SlowEcho {
    pub delay: Duration,
}

#[async_trait]
impl BatchFunction for SlowEcho {
    type Key = String;
    type Record = Tagged;
    type Relation = ToMany;
    type Error = anyhow::Error;

    async fn load(&self, keys: &[String]) -> anyhow::Result<Vec<Tagged>> {
        tokio::time::sleep(self.delay).await;
        Ok(keys.iter().map(|key| tagged(key, 1)).collect())
    }

    fn correlation_key(&self, record: &Tagged) -> String {
        record.key.clone()
    }
}

/// Returns each requested key as its own record. Batches containing
/// `slow_key` sleep for `delay` first.
#[derive(Clone)]
pub struct SlowForKey {
    pub slow_key: String,
    pub delay: Duration,
}

#[async_trait]
impl BatchFunction for SlowForKey {
    type Key = String;
    type Record = Tagged;
    type Relation = ToMany;
    type Error = anyhow::Error;

    async fn load(&self, keys: &[String]) -> anyhow::Result<Vec<Tagged>> {
        if keys.contains(&self.slow_key) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(keys.iter().map(|key| tagged(key, 1)).collect())
    }

    fn correlation_key(&self, record: &Tagged) -> String {
        record.key.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream query timed out")]
    Timeout,

    #[error("upstream unavailable: {}", _0)]
    Unavailable(String),
}

/// Fails its first `failures` calls, then returns each requested key as its
/// own record.
#[derive(Clone)]
pub struct Flaky {
    failures_left: Arc<atomic::AtomicUsize>,
    error: fn() -> UpstreamError,
}

impl Flaky {
    pub fn new(failures: usize, error: fn() -> UpstreamError) -> Self {
        Flaky {
            failures_left: Arc::new(atomic::AtomicUsize::new(failures)),
            error,
        }
    }

    pub fn always_failing(error: fn() -> UpstreamError) -> Self {
        Flaky::new(usize::MAX, error)
    }
}

#[async_trait]
impl BatchFunction for Flaky {
    type Key = String;
    type Record = Tagged;
    type Relation = ToMany;
    type Error = UpstreamError;

    async fn load(&self, keys: &[String]) -> Result<Vec<Tagged>, UpstreamError> {
        let should_fail = self
            .failures_left
            .fetch_update(atomic::Ordering::SeqCst, atomic::Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err((self.error)());
        }

        Ok(keys.iter().map(|key| tagged(key, 1)).collect())
    }

    fn correlation_key(&self, record: &Tagged) -> String {
        record.key.clone()
    }

    fn is_deadline_exceeded(&self, error: &UpstreamError) -> bool {
        matches!(error, UpstreamError::Timeout)
    }
}
