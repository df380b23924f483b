use std::collections::{BTreeSet, HashMap};

use stratum_domain::{PlannedStep, StepId};

use crate::error::GraphError;

/// Build a dependency-respecting execution order using topological sorting.
///
/// Among steps that are ready at the same time, registration order wins, so
/// the order is stable across evaluations of the same plan.
///
/// # Errors
///
/// Returns an error when dependencies point to unregistered steps or when a
/// dependency cycle is detected.
pub fn build_execution_order(steps: &[PlannedStep]) -> std::result::Result<Vec<StepId>, GraphError> {
    if steps.is_empty() {
        return Ok(Vec::new());
    }

    let position: HashMap<&StepId, usize> = steps
        .iter()
        .enumerate()
        .map(|(index, step)| (&step.id, index))
        .collect();
    let mut indegree = vec![0_usize; steps.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    let mut missing = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        for dependency in &step.depends_on {
            let Some(&upstream) = position.get(dependency) else {
                missing.push(format!("{} depends on missing step {dependency}", step.id));
                continue;
            };
            adjacency[upstream].push(index);
            indegree[index] += 1;
        }
    }

    if !missing.is_empty() {
        let details = missing.join("\n  - ");
        return Err(GraphError::MissingNodes { details });
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter_map(|(index, count)| (*count == 0).then_some(index))
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(next) = ready.pop_first() {
        order.push(steps[next].id.clone());

        for &neighbor in &adjacency[next] {
            let Some(entry) = indegree.get_mut(neighbor) else {
                return Err(GraphError::Invariant {
                    message: "internal graph error: missing neighbor indegree".to_string(),
                });
            };
            if *entry == 0 {
                continue;
            }
            *entry -= 1;
            if *entry == 0 {
                ready.insert(neighbor);
            }
        }
    }

    if order.len() != steps.len() {
        let cycle = indegree
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(index, _)| steps[index].id.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(GraphError::CycleDetected { cycle });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use stratum_domain::{CallKind, ObjectKind, PlannedStep, StepId, StepKind, StepName};

    use super::build_execution_order;

    fn id(name: &str) -> StepId {
        StepId::new(
            StepKind::Object(ObjectKind::Namespace),
            StepName::try_from(name).expect("name"),
        )
    }

    fn step(name: &str, depends_on: &[&str]) -> PlannedStep {
        PlannedStep {
            id: id(name),
            call: CallKind::Create,
            depends_on: depends_on.iter().map(|dep| id(dep)).collect(),
        }
    }

    #[test]
    fn orders_by_dependency_edges() {
        let ordered = build_execution_order(&[step("b", &["a"]), step("a", &[])]).expect("order");
        assert_eq!(ordered, vec![id("a"), id("b")]);
    }

    #[test]
    fn independent_steps_keep_registration_order() {
        let ordered = build_execution_order(&[
            step("root", &[]),
            step("viewer", &["root"]),
            step("shipper", &["root"]),
        ])
        .expect("order");
        assert_eq!(ordered, vec![id("root"), id("viewer"), id("shipper")]);
    }

    #[test]
    fn reports_missing_dependency() {
        let err = build_execution_order(&[step("a", &["ghost"])]).expect_err("must fail");
        assert!(err.to_string().contains("missing step"));
    }

    #[test]
    fn detects_cycle() {
        let err = build_execution_order(&[step("a", &["b"]), step("b", &["a"])])
            .expect_err("must fail");
        assert!(err.to_string().contains("cycle"));
    }
}
