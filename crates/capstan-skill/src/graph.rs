// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dependency ordering for a skill's actions.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use capstan_core::SkillAction;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate action id '{0}'")]
    DuplicateId(String),
    #[error("action '{action}' depends on unknown action '{dependency}'")]
    UnknownDependency { action: String, dependency: String },
    #[error("dependency cycle among actions: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Returns action indices in execution order.
///
/// Kahn's algorithm; among actions that are ready at the same time the one
/// declared first in the manifest runs first, so a manifest without
/// `dependsOn` executes in declaration order.
pub fn execution_order(actions: &[SkillAction]) -> Result<Vec<usize>, GraphError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(actions.len());
    for (i, action) in actions.iter().enumerate() {
        if index.insert(action.id.as_str(), i).is_some() {
            return Err(GraphError::DuplicateId(action.id.clone()));
        }
    }

    let mut in_degree = vec![0usize; actions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
    for (i, action) in actions.iter().enumerate() {
        for dep in &action.depends_on {
            let &d = index
                .get(dep.as_str())
                .ok_or_else(|| GraphError::UnknownDependency {
                    action: action.id.clone(),
                    dependency: dep.clone(),
                })?;
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(actions.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < actions.len() {
        let stuck = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| actions[i].id.clone())
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}
