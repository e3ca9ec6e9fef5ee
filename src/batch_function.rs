use crate::Relation;
use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// A trait for fetching the records related to a batch of parent keys, such
/// as all organizations linked to a set of email IDs. Implementing
/// `BatchFunction` allows lookups to be coalesced by a
/// [`BatchLoader`](crate::BatchLoader). See the [`BatchLoader`](crate::BatchLoader)
/// docs for details about batching and error semantics.
///
/// A `BatchFunction` does not need to return records in the order of the
/// keys, or return anything at all for some keys. Each returned record carries
/// a correlation key (see [`correlation_key`](BatchFunction::correlation_key))
/// which the loader uses to hand the record back to the caller that asked for
/// it. Keys with no records resolve to the [`Relation`]'s absent value.
#[async_trait]
pub trait BatchFunction {
    /// The parent key a caller asks for.
    type Key: Clone + Hash + Eq + Debug + Send + Sync + 'static;

    /// A single record returned by the upstream fetch.
    type Record: Send + 'static;

    /// How records are assembled into the value each caller receives.
    type Relation: Relation<Self::Record>;

    /// The error indicating that fetching a batch failed.
    type Error: Display + Send + Sync + 'static;

    /// Fetch the records for the given keys. The keys are deduplicated and
    /// in the order they were first requested. Returning `Err(_)` fails every
    /// caller waiting on this batch.
    async fn load(&self, keys: &[Self::Key]) -> Result<Vec<Self::Record>, Self::Error>;

    /// Returns the key of the request that a record answers.
    fn correlation_key(&self, record: &Self::Record) -> Self::Key;

    /// Returns `true` if an error returned by [`load`](BatchFunction::load)
    /// was caused by an upstream deadline. Such errors are reported to callers
    /// as [`LoadError::DeadlineExceeded`](crate::LoadError::DeadlineExceeded).
    fn is_deadline_exceeded(&self, _error: &Self::Error) -> bool {
        false
    }
}

/// The value a [`BatchLoader`](crate::BatchLoader) hands to each caller for
/// a given [`BatchFunction`].
pub type LoadOutput<F> =
    <<F as BatchFunction>::Relation as Relation<<F as BatchFunction>::Record>>::Output;
