use crate::CachePolicy;
use tokio::time::Duration;

/// Batching options for a [`BatchLoader`](crate::BatchLoader). Used by
/// [`BatchLoaderBuilder::config`](crate::BatchLoaderBuilder::config) and by
/// [`LoaderFactoryBuilder`](crate::LoaderFactoryBuilder) to configure every
/// loader of a request at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// How long the loader waits for another key before dispatching the
    /// batch. The wait restarts whenever a new request arrives.
    pub delay_duration: Duration,

    /// Dispatch as soon as this many distinct keys are pending, without
    /// waiting for `delay_duration`. `None` always waits.
    pub eager_batch_size: Option<usize>,

    /// Deadline for a single call to the batch function. `None` waits for
    /// as long as the batch function takes.
    pub fetch_timeout: Option<Duration>,

    pub cache_policy: CachePolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            delay_duration: Duration::from_millis(10),
            eager_batch_size: Some(100),
            fetch_timeout: Some(Duration::from_secs(10)),
            cache_policy: CachePolicy::Window,
        }
    }
}

impl LoaderConfig {
    /// Defaults for relationships whose fetches are known to be slow, with a
    /// 60 second fetch deadline.
    pub fn long_lived() -> Self {
        LoaderConfig {
            fetch_timeout: Some(Duration::from_secs(60)),
            ..LoaderConfig::default()
        }
    }

    pub fn with_delay_duration(mut self, delay: Duration) -> Self {
        self.delay_duration = delay;
        self
    }

    pub fn with_eager_batch_size(mut self, eager_batch_size: Option<usize>) -> Self {
        self.eager_batch_size = eager_batch_size;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Option<Duration>) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }
}
