use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use stratum_domain::{CallKind, StepId, StepOutcome};
use tracing::{debug, warn};

use crate::deferred::{Deferred, Resolver};
use crate::error::{ProviderError, ProvisionError};
use crate::providers::ProviderRegistry;
use crate::state::{StepRecord, fingerprint};

/// The one external call a step issues, given its resolved input.
pub(crate) type ProviderCall<I, O> =
    Box<dyn FnOnce(ProviderRegistry, I) -> BoxFuture<'static, Result<O, ProviderError>> + Send>;

/// Everything a step needs from the orchestrator when it runs.
pub(crate) struct StepContext {
    pub id: StepId,
    pub call: CallKind,
    pub providers: ProviderRegistry,
    pub previous: Option<StepRecord>,
    pub abort: Arc<AtomicBool>,
}

impl StepContext {
    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct StepCompletion {
    pub outcome: StepOutcome,
    pub record: Option<StepRecord>,
}

#[derive(Debug)]
pub(crate) struct StepFailure {
    pub outcome: StepOutcome,
    pub error: ProvisionError,
}

impl StepFailure {
    pub(crate) fn skipped(step: &StepId) -> Self {
        Self {
            outcome: StepOutcome::Skipped,
            error: ProvisionError::Aborted { step: step.clone() },
        }
    }
}

pub(crate) trait StepRunner: Send {
    fn run(
        self: Box<Self>,
        context: StepContext,
    ) -> BoxFuture<'static, Result<StepCompletion, StepFailure>>;
}

/// A registered step: identity, edges and the deferred work it performs.
pub(crate) struct StepNode {
    pub id: StepId,
    pub call: CallKind,
    pub depends_on: Vec<StepId>,
    pub runner: Box<dyn StepRunner>,
}

/// Runner shared by every step kind: resolve the input, reuse or call,
/// then settle the output value exactly once.
pub(crate) struct CallRunner<I, O> {
    input: Deferred<I>,
    output: Resolver<O>,
    call: ProviderCall<I, O>,
}

impl<I, O> CallRunner<I, O> {
    pub(crate) fn new(input: Deferred<I>, output: Resolver<O>, call: ProviderCall<I, O>) -> Self {
        Self {
            input,
            output,
            call,
        }
    }
}

impl<I, O> StepRunner for CallRunner<I, O>
where
    I: Serialize + Clone + Send + Sync + 'static,
    O: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn run(
        self: Box<Self>,
        context: StepContext,
    ) -> BoxFuture<'static, Result<StepCompletion, StepFailure>> {
        let Self {
            input,
            output,
            call,
        } = *self;
        async move { run_call(input, output, call, context).await }.boxed()
    }
}

async fn run_call<I, O>(
    input: Deferred<I>,
    output: Resolver<O>,
    call: ProviderCall<I, O>,
    context: StepContext,
) -> Result<StepCompletion, StepFailure>
where
    I: Serialize + Clone + Send + Sync + 'static,
    O: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    if context.aborted() {
        return Err(skip(output, &context.id));
    }

    let input = match input.resolve().await {
        Ok(input) => input,
        Err(error) if error.is_abort() => return Err(skip(output, &context.id)),
        Err(error) => {
            let error = error.attributed_to(&context.id);
            return Err(fail(output, &context, error));
        }
    };

    let digest = match fingerprint(&context.id, &input) {
        Ok(digest) => digest,
        Err(error) => {
            let error = ProvisionError::resolution(
                &context.id,
                format!("input cannot be fingerprinted: {error}"),
            );
            return Err(fail(output, &context, error));
        }
    };

    if context.call == CallKind::Create
        && let Some(recorded) = reusable_output::<O>(&context, &digest)
    {
        debug!(step = %context.id, "inputs unchanged, reusing recorded output");
        output.resolve(recorded);
        return Ok(StepCompletion {
            outcome: StepOutcome::Unchanged,
            record: context.previous,
        });
    }

    if context.aborted() {
        return Err(skip(output, &context.id));
    }

    let result = call(context.providers.clone(), input).await;

    if context.aborted() {
        // Another branch failed while this call was in flight.
        let error = ProvisionError::Aborted {
            step: context.id.clone(),
        };
        output.fail(error.clone());
        return Err(StepFailure {
            outcome: StepOutcome::Discarded,
            error,
        });
    }

    match result {
        Ok(value) => {
            let record = match context.call {
                CallKind::Create => record_output(&context.id, digest, &value),
                CallKind::Read => None,
            };
            output.resolve(value);
            let outcome = match context.call {
                CallKind::Create => StepOutcome::Created,
                CallKind::Read => StepOutcome::Read,
            };
            Ok(StepCompletion { outcome, record })
        }
        Err(cause) => {
            let error = ProvisionError::provisioning(context.id.clone(), cause);
            Err(fail(output, &context, error))
        }
    }
}

fn reusable_output<O: DeserializeOwned>(context: &StepContext, digest: &str) -> Option<O> {
    let previous = context.previous.as_ref()?;
    if previous.fingerprint != digest {
        debug!(step = %context.id, "inputs changed since last run");
        return None;
    }
    match serde_json::from_value(previous.output.clone()) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(step = %context.id, %error, "recorded output is unreadable, calling provider again");
            None
        }
    }
}

fn record_output<O: Serialize>(step: &StepId, fingerprint: String, value: &O) -> Option<StepRecord> {
    match serde_json::to_value(value) {
        Ok(output) => Some(StepRecord {
            fingerprint,
            output,
        }),
        Err(error) => {
            warn!(%step, %error, "output cannot be recorded, step will run again next time");
            None
        }
    }
}

fn skip<O>(output: Resolver<O>, step: &StepId) -> StepFailure {
    let failure = StepFailure::skipped(step);
    output.fail(failure.error.clone());
    failure
}

fn fail<O>(output: Resolver<O>, context: &StepContext, error: ProvisionError) -> StepFailure {
    context.abort.store(true, Ordering::SeqCst);
    output.fail(error.clone());
    StepFailure {
        outcome: StepOutcome::Failed,
        error,
    }
}
