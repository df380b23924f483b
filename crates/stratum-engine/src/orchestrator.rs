use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use futures::StreamExt;
use futures::future::try_join_all;
use futures::stream::FuturesUnordered;
use stratum_domain::{
    PlanDescription, ProvisionReport, StepId, StepOutcome, StepResult,
};
use tracing::{Instrument, error, info, info_span};

use crate::deferred::Deferred;
use crate::error::{GraphError, ProvisionError};
use crate::graph::build_execution_order;
use crate::plan::Plan;
use crate::providers::ProviderRegistry;
use crate::state::ProvisionState;
use crate::step::{StepCompletion, StepContext, StepFailure};

/// Everything one execution produced.
#[derive(Debug)]
pub struct Execution {
    pub report: ProvisionReport,
    /// First failure, verbatim with its originating step.
    pub error: Option<ProvisionError>,
    /// Previous state updated with the outputs of steps created this run.
    pub state: ProvisionState,
    /// Plaintext values that must be redacted from rendered output.
    pub sensitive_values: BTreeSet<String>,
}

impl Execution {
    /// # Errors
    ///
    /// Returns the first failure of the execution, if any.
    pub fn into_result(self) -> Result<ProvisionReport, ProvisionError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.report),
        }
    }
}

/// Walks a [`Plan`]: a step's call is issued only once every step it depends
/// on has completed successfully. Independent branches run concurrently. The
/// first failure stops new calls; calls already in flight finish and their
/// results are discarded.
pub struct Orchestrator {
    providers: ProviderRegistry,
}

type StepRun = (StepId, Result<StepCompletion, StepFailure>);

impl Orchestrator {
    #[must_use]
    pub const fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }

    /// Execute `plan` against the providers, reusing outputs recorded in
    /// `previous` for create steps whose inputs are unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error when the plan's dependency graph is invalid. Failures
    /// during execution are reported in the returned [`Execution`].
    pub async fn execute(
        &self,
        plan: Plan,
        previous: ProvisionState,
    ) -> Result<Execution, GraphError> {
        let steps = plan.planned_steps();
        let execution_order = build_execution_order(&steps)?;
        let description = PlanDescription {
            steps,
            execution_order,
            exports: plan.exports.iter().map(|export| export.name.clone()).collect(),
            errors: Vec::new(),
        };

        let span = info_span!("provision", steps = plan.nodes.len());
        self.run(plan, previous, description).instrument(span).await
    }

    async fn run(
        &self,
        plan: Plan,
        previous: ProvisionState,
        description: PlanDescription,
    ) -> Result<Execution, GraphError> {
        let Plan {
            nodes,
            exports,
            sensitive,
            ..
        } = plan;
        let abort = Arc::new(AtomicBool::new(false));

        let mut completions = HashMap::with_capacity(nodes.len());
        let mut resolvers = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let (resolver, done) = Deferred::<()>::channel(node.id.clone());
            completions.insert(node.id.clone(), done);
            resolvers.push(resolver);
        }

        let mut pending = FuturesUnordered::new();
        for (node, done) in nodes.into_iter().zip(resolvers) {
            let mut upstream = Vec::with_capacity(node.depends_on.len());
            for dependency in &node.depends_on {
                let Some(signal) = completions.get(dependency) else {
                    return Err(GraphError::Invariant {
                        message: format!("{} depends on unscheduled step {dependency}", node.id),
                    });
                };
                upstream.push(signal.resolve());
            }
            let context = StepContext {
                id: node.id.clone(),
                call: node.call,
                providers: self.providers.clone(),
                previous: previous.record(&node.id).cloned(),
                abort: Arc::clone(&abort),
            };
            pending.push(async move {
                let id = node.id;
                let result = if try_join_all(upstream).await.is_err() {
                    Err(StepFailure::skipped(&id))
                } else {
                    info!(step = %id, "step started");
                    node.runner.run(context).await
                };
                match &result {
                    Ok(_) => done.resolve(()),
                    Err(failure) => done.fail(failure.error.clone()),
                }
                (id, result)
            });
        }

        let mut first_error: Option<ProvisionError> = None;
        let mut state = previous;
        let mut results: HashMap<StepId, StepResult> = HashMap::new();
        while let Some((id, result)) = pending.next().await {
            let step_result = match result {
                Ok(completion) => {
                    info!(step = %id, outcome = ?completion.outcome, "step finished");
                    if let Some(record) = completion.record {
                        state.insert(&id, record);
                    }
                    StepResult {
                        step: id.clone(),
                        outcome: completion.outcome,
                        error: None,
                    }
                }
                Err(failure) => {
                    if failure.outcome == StepOutcome::Failed {
                        error!(step = %id, error = %failure.error, "step failed, aborting plan");
                        first_error.get_or_insert_with(|| failure.error.clone());
                    } else {
                        info!(step = %id, outcome = ?failure.outcome, "step not applied");
                    }
                    StepResult {
                        step: id.clone(),
                        outcome: failure.outcome,
                        error: Some(failure.error.to_string()),
                    }
                }
            };
            results.insert(id, step_result);
        }

        let ordered: Vec<StepResult> = description
            .execution_order
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();

        let mut errors: Vec<String> = ordered
            .iter()
            .filter(|result| result.outcome == StepOutcome::Failed)
            .map(|result| {
                format!(
                    "{} failed: {}",
                    result.step,
                    result.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        push_abort_summary(&mut errors, &ordered);

        let mut resolved_exports = BTreeMap::new();
        for export in exports {
            match export.value.resolve().await {
                Ok(value) => {
                    if export.sensitive {
                        sensitive.insert(value.clone());
                    }
                    resolved_exports.insert(export.name, value);
                }
                Err(export_error) => {
                    if !export_error.is_abort() && first_error.is_none() {
                        error!(export = %export.name, error = %export_error, "export failed");
                        first_error = Some(export_error.clone());
                    }
                    errors.push(format!("export {} unavailable: {export_error}", export.name));
                }
            }
        }

        Ok(Execution {
            report: ProvisionReport {
                plan: description,
                results: ordered,
                exports: resolved_exports,
                errors,
            },
            error: first_error,
            state,
            sensitive_values: sensitive.snapshot(),
        })
    }
}

fn push_abort_summary(errors: &mut Vec<String>, results: &[StepResult]) {
    let skipped = results
        .iter()
        .filter(|result| result.outcome == StepOutcome::Skipped)
        .count();
    let discarded = results
        .iter()
        .filter(|result| result.outcome == StepOutcome::Discarded)
        .count();
    if skipped == 0 && discarded == 0 {
        return;
    }
    errors.push(format!(
        "plan aborted after first failure: {skipped} step(s) not attempted, {discarded} in-flight result(s) discarded"
    ));
}
