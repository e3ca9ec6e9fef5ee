pub(crate) mod batch_function;
pub(crate) mod batch_loader;
pub(crate) mod cache;
pub(crate) mod config;
pub(crate) mod loader_worker;
pub(crate) mod redistribute;
pub(crate) mod registry;
pub(crate) mod relation;
pub(crate) mod stats;

pub use batch_function::{BatchFunction, LoadOutput};
pub use batch_loader::{BatchLoader, BatchLoaderBuilder, LoadError};
pub use cache::CachePolicy;
pub use config::LoaderConfig;
pub use redistribute::{group_by_key, Redistribution};
pub use registry::{LoaderFactory, LoaderFactoryBuilder, LoaderRegistry, RegistryError};
pub use relation::{Relation, ToMany, ToOne};
pub use stats::StatsSnapshot;
