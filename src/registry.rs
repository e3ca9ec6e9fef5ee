use crate::{BatchFunction, BatchLoader, LoadError, LoaderConfig};
use std::any::Any;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static CURRENT_LOADERS: LoaderRegistry;
}

/// A loader stored in a [`LoaderRegistry`] without its batch function type.
trait ErasedLoader: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dispatch(&self) -> Result<(), LoadError>;
}

impl<F> ErasedLoader for BatchLoader<F>
where
    F: BatchFunction + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dispatch(&self) -> Result<(), LoadError> {
        BatchLoader::dispatch(self)
    }
}

type Constructor = dyn Fn(&LoaderConfig) -> Box<dyn ErasedLoader> + Send + Sync;

struct Registration {
    name: Cow<'static, str>,
    type_name: &'static str,
    config: Option<LoaderConfig>,
    construct: Box<Constructor>,
}

/// Holds the batch functions of every relationship a request may load, and
/// creates a fresh set of [`BatchLoader`]s for each inbound request.
///
/// A `LoaderFactory` is built once at startup. Request-handling middleware
/// then calls [`scope`](LoaderFactory::scope) (or [`create`](LoaderFactory::create))
/// for every request, so loaders and anything they hold never outlive the
/// request that created them.
///
/// ```
/// # use cos_dataloader::{BatchFunction, LoaderFactory, LoaderRegistry, ToOne};
/// # #[derive(Clone)]
/// # struct Organization { job_role_id: String }
/// # #[derive(Clone)]
/// # struct OrganizationForJobRole;
/// # #[async_trait::async_trait]
/// # impl BatchFunction for OrganizationForJobRole {
/// #     type Key = String;
/// #     type Record = Organization;
/// #     type Relation = ToOne;
/// #     type Error = anyhow::Error;
/// #     async fn load(&self, keys: &[String]) -> anyhow::Result<Vec<Organization>> {
/// #         Ok(vec![])
/// #     }
/// #     fn correlation_key(&self, record: &Organization) -> String {
/// #         record.job_role_id.clone()
/// #     }
/// # }
/// # #[tokio::main] async fn main() -> anyhow::Result<()> {
/// let factory = LoaderFactory::build()
///     .register("organization-for-job-role", OrganizationForJobRole)
///     .finish()?;
///
/// let organization = factory
///     .scope(async {
///         let loaders = LoaderRegistry::current()?;
///         let loader = loaders.get::<OrganizationForJobRole>("organization-for-job-role")?;
///         anyhow::Ok(loader.load("job-role-1".to_string()).await?)
///     })
///     .await?;
/// assert!(organization.is_none());
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct LoaderFactory {
    defaults: LoaderConfig,
    registrations: Arc<Vec<Registration>>,
}

impl LoaderFactory {
    /// Create a new `LoaderFactory`. Returns a [`LoaderFactoryBuilder`] used
    /// to register each relationship. Call
    /// [`.finish()`](LoaderFactoryBuilder::finish) to create the factory.
    pub fn build() -> LoaderFactoryBuilder {
        LoaderFactoryBuilder {
            defaults: LoaderConfig::default(),
            registrations: vec![],
        }
    }

    /// Create a new set of loaders for one request. Must be called from
    /// within a Tokio runtime.
    #[tracing::instrument(skip_all, fields(num_loaders = self.registrations.len()))]
    pub fn create(&self) -> LoaderRegistry {
        let loaders = self
            .registrations
            .iter()
            .map(|registration| {
                let config = registration.config.as_ref().unwrap_or(&self.defaults);
                let entry = RegistryEntry {
                    type_name: registration.type_name,
                    loader: (registration.construct)(config),
                };
                (registration.name.clone(), entry)
            })
            .collect();

        tracing::trace!("created request loaders");
        LoaderRegistry {
            loaders: Arc::new(loaders),
        }
    }

    /// Create a new set of loaders and run `fut` with them attached as the
    /// current request's loaders. See [`LoaderRegistry::current`].
    pub async fn scope<Fut>(&self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        self.create().scope(fut).await
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registrations
            .iter()
            .map(|registration| &*registration.name)
    }
}

/// Used to configure a new [`LoaderFactory`]. A `LoaderFactoryBuilder` is
/// returned from [`LoaderFactory::build`].
pub struct LoaderFactoryBuilder {
    defaults: LoaderConfig,
    registrations: Vec<Registration>,
}

impl LoaderFactoryBuilder {
    /// The options used by every loader registered without its own config.
    pub fn defaults(mut self, config: LoaderConfig) -> Self {
        self.defaults = config;
        self
    }

    /// Register a relationship under `name`, using the factory's default
    /// options. The batch function is cloned into each request's loader.
    pub fn register<F>(self, name: impl Into<Cow<'static, str>>, batch_function: F) -> Self
    where
        F: BatchFunction + Clone + Send + Sync + 'static,
    {
        self.add(name.into(), batch_function, None)
    }

    /// Register a relationship under `name` with its own options, such as
    /// [`LoaderConfig::long_lived`] for slow fetches.
    pub fn register_with<F>(
        self,
        name: impl Into<Cow<'static, str>>,
        batch_function: F,
        config: LoaderConfig,
    ) -> Self
    where
        F: BatchFunction + Clone + Send + Sync + 'static,
    {
        self.add(name.into(), batch_function, Some(config))
    }

    fn add<F>(mut self, name: Cow<'static, str>, batch_function: F, config: Option<LoaderConfig>) -> Self
    where
        F: BatchFunction + Clone + Send + Sync + 'static,
    {
        let label = name.clone();
        let construct = move |config: &LoaderConfig| -> Box<dyn ErasedLoader> {
            let loader = BatchLoader::build(batch_function.clone())
                .config(config.clone())
                .label(label.clone())
                .finish();
            Box::new(loader)
        };

        self.registrations.push(Registration {
            name,
            type_name: std::any::type_name::<F>(),
            config,
            construct: Box::new(construct),
        });
        self
    }

    /// Create the [`LoaderFactory`]. Fails if two relationships were
    /// registered under the same name.
    pub fn finish(self) -> Result<LoaderFactory, RegistryError> {
        let mut seen = HashSet::new();
        for registration in &self.registrations {
            if !seen.insert(&*registration.name) {
                return Err(RegistryError::DuplicateName(registration.name.to_string()));
            }
        }

        Ok(LoaderFactory {
            defaults: self.defaults,
            registrations: Arc::new(self.registrations),
        })
    }
}

struct RegistryEntry {
    type_name: &'static str,
    loader: Box<dyn ErasedLoader>,
}

/// The loaders of a single request, keyed by relationship name. Cloning a
/// `LoaderRegistry` is shallow. The loaders shut down once every clone of the
/// registry and of the loaders taken from it has been dropped.
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: Arc<HashMap<Cow<'static, str>, RegistryEntry>>,
}

impl LoaderRegistry {
    /// Get the loader registered under `name`. Fails if no loader has that
    /// name, or if it was registered with a batch function other than `F`.
    pub fn get<F>(&self, name: &str) -> Result<BatchLoader<F>, RegistryError>
    where
        F: BatchFunction + Send + Sync + 'static,
    {
        let entry = self
            .loaders
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        entry
            .loader
            .as_any()
            .downcast_ref::<BatchLoader<F>>()
            .cloned()
            .ok_or_else(|| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<F>(),
                actual: entry.type_name,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(|name| &**name)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Close the current window of every loader. See [`BatchLoader::dispatch`].
    pub fn dispatch_all(&self) -> Result<(), LoadError> {
        for entry in self.loaders.values() {
            entry.loader.dispatch()?;
        }

        Ok(())
    }

    /// Run `fut` with this registry attached as the current request's
    /// loaders, so any code running inside it can reach them through
    /// [`LoaderRegistry::current`].
    pub async fn scope<Fut>(self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        CURRENT_LOADERS.scope(self, fut).await
    }

    /// The loaders of the request currently being handled. Only available
    /// inside [`LoaderRegistry::scope`] or [`LoaderFactory::scope`], and not
    /// from tasks spawned from there.
    pub fn current() -> Result<LoaderRegistry, RegistryError> {
        CURRENT_LOADERS
            .try_with(|loaders| loaders.clone())
            .map_err(|_| RegistryError::NoActiveRequest)
    }
}

/// Error indicating that a loader could not be taken from a
/// [`LoaderRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no loader registered under {}", _0)]
    NotRegistered(String),

    /// The loader exists, but was requested with the wrong batch function
    /// type.
    #[error("loader {name} has type {actual}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("more than one loader registered under {}", _0)]
    DuplicateName(String),

    /// [`LoaderRegistry::current`] was called outside of a request scope.
    #[error("no request loaders are in scope")]
    NoActiveRequest,
}
