use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use stratum_domain::StepId;
use tokio::sync::oneshot;

use crate::error::ProvisionError;

pub type Resolution<T> = Result<T, ProvisionError>;

/// Shared handle on the single resolution of a [`Deferred`].
pub type Resolving<T> = Shared<BoxFuture<'static, Resolution<T>>>;

/// A value that becomes known only after the steps producing it complete.
///
/// Resolution happens at most once; every clone and every consumer observes the
/// same value or the same error. Transformations are lazy and run on first
/// read. `sources` names the steps the value was derived from, so a step that
/// consumes the value can depend on them.
pub struct Deferred<T> {
    inner: Resolving<T>,
    sources: Arc<BTreeSet<StepId>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sources: Arc::clone(&self.sources),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Deferred")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn from_future<F>(sources: BTreeSet<StepId>, future: F) -> Self
    where
        F: Future<Output = Resolution<T>> + Send + 'static,
    {
        Self::with_sources(Arc::new(sources), future)
    }

    fn with_sources<F>(sources: Arc<BTreeSet<StepId>>, future: F) -> Self
    where
        F: Future<Output = Resolution<T>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
            sources,
        }
    }

    /// A value known when the plan is built.
    pub fn ready(value: T) -> Self {
        Self::from_future(BTreeSet::new(), async move { Ok(value) })
    }

    pub fn failed(error: ProvisionError) -> Self {
        Self::from_future(BTreeSet::new(), async move { Err(error) })
    }

    /// Single-value channel owned by `step`. The returned [`Resolver`] is the
    /// only way to resolve the value; dropping it unresolved fails the value
    /// with [`ProvisionError::Unresolved`].
    #[must_use]
    pub fn channel(step: StepId) -> (Resolver<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        let origin = step.clone();
        let deferred = Self::from_future(BTreeSet::from([step.clone()]), async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(ProvisionError::Unresolved { step: origin }))
        });
        (Resolver { step, sender }, deferred)
    }

    #[must_use]
    pub fn sources(&self) -> &BTreeSet<StepId> {
        &self.sources
    }

    /// Await the value. Cheap to call repeatedly.
    #[must_use]
    pub fn resolve(&self) -> Resolving<T> {
        self.inner.clone()
    }

    /// Derive a value by a pure transformation, applied once the source resolves.
    #[must_use]
    pub fn map<U, F>(&self, transform: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let source = self.resolve();
        Deferred::with_sources(Arc::clone(&self.sources), async move {
            source.await.map(transform)
        })
    }

    /// Like [`Deferred::map`], but the transformation may fail. The failure
    /// becomes the resolution of the derived value and of everything built on it.
    #[must_use]
    pub fn try_map<U, F>(&self, transform: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Resolution<U> + Send + 'static,
    {
        let source = self.resolve();
        Deferred::with_sources(Arc::clone(&self.sources), async move {
            transform(source.await?)
        })
    }
}

impl<T> From<T> for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self::ready(value)
    }
}

/// Join two deferred values; resolves when both have resolved.
#[must_use]
pub fn combine2<A, B>(first: &Deferred<A>, second: &Deferred<B>) -> Deferred<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    let sources = union([first.sources(), second.sources()]);
    let (first, second) = (first.resolve(), second.resolve());
    Deferred::from_future(sources, async move { futures::try_join!(first, second) })
}

#[must_use]
pub fn combine3<A, B, C>(
    first: &Deferred<A>,
    second: &Deferred<B>,
    third: &Deferred<C>,
) -> Deferred<(A, B, C)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    let sources = union([first.sources(), second.sources(), third.sources()]);
    let (first, second, third) = (first.resolve(), second.resolve(), third.resolve());
    Deferred::from_future(sources, async move {
        futures::try_join!(first, second, third)
    })
}

/// Join any number of deferred values of one type, preserving order.
#[must_use]
pub fn combine_all<T>(values: &[Deferred<T>]) -> Deferred<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let sources = union(values.iter().map(Deferred::sources));
    let pending: Vec<_> = values.iter().map(Deferred::resolve).collect();
    Deferred::from_future(sources, async move { try_join_all(pending).await })
}

fn union<'a>(sets: impl IntoIterator<Item = &'a BTreeSet<StepId>>) -> BTreeSet<StepId> {
    sets.into_iter().flatten().cloned().collect()
}

/// Write side of [`Deferred::channel`].
#[derive(Debug)]
pub struct Resolver<T> {
    step: StepId,
    sender: oneshot::Sender<Resolution<T>>,
}

impl<T> Resolver<T> {
    #[must_use]
    pub const fn step(&self) -> &StepId {
        &self.step
    }

    pub fn resolve(self, value: T) {
        // Nobody reading the value is not an error.
        let _ = self.sender.send(Ok(value));
    }

    pub fn fail(self, error: ProvisionError) {
        let _ = self.sender.send(Err(error));
    }
}
