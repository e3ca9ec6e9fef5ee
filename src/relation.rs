/// Describes how the records fetched for one key are combined into the value
/// returned to callers, and what a caller receives when no record was found.
pub trait Relation<R> {
    type Output: Clone + Send + Sync + 'static;

    /// The value for a key that the fetch returned nothing for.
    fn absent() -> Self::Output;

    /// Add a record to the value being built for its key.
    fn push(slot: &mut Self::Output, record: R);
}

/// A one-to-many relationship. Each key resolves to every record fetched for
/// it, in fetch order, and to an empty `Vec` when none were fetched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToMany;

impl<R> Relation<R> for ToMany
where
    R: Clone + Send + Sync + 'static,
{
    type Output = Vec<R>;

    fn absent() -> Vec<R> {
        Vec::new()
    }

    fn push(slot: &mut Vec<R>, record: R) {
        slot.push(record);
    }
}

/// A one-to-one or optional relationship. Each key resolves to `Some(record)`
/// or to `None` when nothing was fetched. If several records share a key, the
/// last one returned wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToOne;

impl<R> Relation<R> for ToOne
where
    R: Clone + Send + Sync + 'static,
{
    type Output = Option<R>;

    fn absent() -> Option<R> {
        None
    }

    fn push(slot: &mut Option<R>, record: R) {
        *slot = Some(record);
    }
}
