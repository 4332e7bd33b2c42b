//! Dependency analyzer (C8): computes a topological wavefront partitioning
//! of a plan's tasks.
//!
//! Uses Kahn's level-by-level algorithm (as in the task-graph execution
//! planner this workspace adapted this idea from) for batch assignment, and
//! `petgraph::algo::is_cyclic_directed` to name a participating task when
//! the plan contains a cycle.

use std::collections::{HashMap, VecDeque};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use persistence_core::TaskDefinition;

use crate::error::WorkflowError;

/// An ordered list of wavefronts: every task appears in exactly one batch,
/// every dependency of a task is in a strictly earlier batch, and within a
/// batch task order is stable with respect to the input plan.
#[derive(Debug, Clone)]
pub struct Batches {
    pub batches: Vec<Vec<String>>,
}

impl Batches {
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn num_tasks(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }

    /// `1 - (numBatches / numTasks)` when `numTasks > 1`, else 0.
    pub fn parallelism_ratio(&self) -> f64 {
        let num_tasks = self.num_tasks();
        if num_tasks > 1 {
            1.0 - (self.num_batches() as f64 / num_tasks as f64)
        } else {
            0.0
        }
    }
}

pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    /// Dependencies of a task are the set of earlier task names whose exact
    /// tokens appear as `{{name}}` placeholders inside its prompt template,
    /// excluding `user_request`/`prev_output`.
    fn dependencies_of(task: &TaskDefinition, earlier_names: &[String]) -> Vec<String> {
        let placeholders = task.placeholder_names();
        placeholders
            .into_iter()
            .filter(|name| earlier_names.contains(name))
            .collect()
    }

    pub fn analyze(tasks: &[TaskDefinition]) -> Result<Batches, WorkflowError> {
        let names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let name_set: std::collections::HashSet<&str> = names.iter().map(String::as_str).collect();

        // Build the cycle-detection graph from every placeholder that names
        // another task in the plan, earlier or later — a mutual reference
        // (`a: "{{b}}"`, `b: "{{a}}"`) must surface as a cycle here, before
        // batch assignment ever sees it, or it would wrongly appear acyclic
        // (each task's *earlier*-only dependency set would be empty).
        let mut graph = DiGraph::<String, ()>::new();
        let mut node_of: HashMap<String, NodeIndex> = HashMap::new();
        for name in &names {
            node_of.insert(name.clone(), graph.add_node(name.clone()));
        }
        for task in tasks {
            for referenced in task.placeholder_names() {
                if name_set.contains(referenced.as_str()) {
                    graph.add_edge(node_of[&referenced], node_of[&task.name], ());
                }
            }
        }

        if is_cyclic_directed(&graph) {
            let participant = names.first().cloned().unwrap_or_default();
            return Err(WorkflowError::DependencyCycle(format!(
                "cycle detected involving task `{participant}`"
            )));
        }

        // Batch assignment only ever depends on strictly earlier tasks. A
        // reference to a task that hasn't appeared yet at this point in the
        // plan isn't a mutual cycle, but it's equally unschedulable under
        // earlier-only batching and is rejected outright rather than
        // silently dropped (which would leave the placeholder unresolved at
        // render time).
        let mut deps_by_name: HashMap<String, Vec<String>> = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            let earlier = &names[..i];
            for referenced in task.placeholder_names() {
                if name_set.contains(referenced.as_str()) && !earlier.contains(&referenced) {
                    return Err(WorkflowError::DependencyCycle(format!(
                        "task `{}` references `{{{{{referenced}}}}}`, which does not appear earlier in the plan",
                        task.name
                    )));
                }
            }
            let deps = Self::dependencies_of(task, earlier);
            deps_by_name.insert(task.name.clone(), deps);
        }

        // Kahn's algorithm, level by level, preserving input order within a
        // level via a stable scan rather than arbitrary queue order.
        let mut remaining_deps: HashMap<String, usize> = deps_by_name
            .iter()
            .map(|(name, deps)| (name.clone(), deps.len()))
            .collect();
        let mut dependents: HashMap<String, Vec<String>> =
            names.iter().map(|n| (n.clone(), Vec::new())).collect();
        for (name, deps) in &deps_by_name {
            for dep in deps {
                dependents.get_mut(dep).unwrap().push(name.clone());
            }
        }

        let mut scheduled: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut batches = Vec::new();

        while scheduled.len() < names.len() {
            let ready: Vec<String> = names
                .iter()
                .filter(|n| !scheduled.contains(*n) && remaining_deps[*n] == 0)
                .cloned()
                .collect();

            if ready.is_empty() {
                let stalled = names.iter().find(|n| !scheduled.contains(*n)).cloned().unwrap_or_default();
                return Err(WorkflowError::DependencyCycle(format!(
                    "dependency analysis stalled at task `{stalled}`"
                )));
            }

            for name in &ready {
                scheduled.insert(name.clone());
                for dependent in &dependents[name] {
                    *remaining_deps.get_mut(dependent).unwrap() -= 1;
                }
            }

            batches.push(ready);
        }

        Ok(Batches { batches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, template: &str) -> TaskDefinition {
        TaskDefinition::new(name, "desc", template)
    }

    #[test]
    fn linear_plan_produces_one_batch_per_task() {
        let tasks = vec![
            task("A", "Summarize {{user_request}}"),
            task("B", "Expand on {{A}}"),
            task("C", "Finalize {{B}}"),
        ];
        let batches = DependencyAnalyzer::analyze(&tasks).unwrap();
        assert_eq!(
            batches.batches,
            vec![vec!["A".to_string()], vec!["B".to_string()], vec!["C".to_string()]]
        );
        assert_eq!(batches.parallelism_ratio(), 0.0);
    }

    #[test]
    fn diamond_plan_groups_independent_tasks() {
        let tasks = vec![
            task("A", "{{user_request}}"),
            task("B", "{{A}}"),
            task("C", "{{A}}"),
            task("D", "{{B}} {{C}}"),
        ];
        let batches = DependencyAnalyzer::analyze(&tasks).unwrap();
        assert_eq!(
            batches.batches,
            vec![
                vec!["A".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["D".to_string()],
            ]
        );
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let tasks = vec![task("A", "{{B}}"), task("B", "{{A}}")];
        let err = DependencyAnalyzer::analyze(&tasks).unwrap_err();
        match err {
            WorkflowError::DependencyCycle(msg) => {
                assert!(msg.contains('A') || msg.contains('B'));
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn forward_reference_without_mutual_cycle_is_rejected() {
        // "A" references "C", which appears later in the plan. Not a mutual
        // cycle, but still unschedulable under earlier-only batching.
        let tasks = vec![task("A", "{{C}}"), task("B", "{{A}}"), task("C", "{{user_request}}")];
        let err = DependencyAnalyzer::analyze(&tasks).unwrap_err();
        match err {
            WorkflowError::DependencyCycle(msg) => {
                assert!(msg.contains('A') && msg.contains('C'));
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn no_tasks_has_zero_ratio() {
        let batches = DependencyAnalyzer::analyze(&[]).unwrap();
        assert_eq!(batches.parallelism_ratio(), 0.0);
    }

    #[test]
    fn wavefront_correctness_no_same_or_later_batch_dependency() {
        let tasks = vec![
            task("A", "{{user_request}}"),
            task("B", "{{A}}"),
            task("C", "{{A}}"),
            task("D", "{{B}} {{C}}"),
        ];
        let batches = DependencyAnalyzer::analyze(&tasks).unwrap();
        let batch_of: HashMap<&str, usize> = batches
            .batches
            .iter()
            .enumerate()
            .flat_map(|(i, b)| b.iter().map(move |n| (n.as_str(), i)))
            .collect();
        for task in &tasks {
            let own_batch = batch_of[task.name.as_str()];
            for dep in task.placeholder_names() {
                if let Some(&dep_batch) = batch_of.get(dep.as_str()) {
                    assert!(dep_batch < own_batch);
                }
            }
        }
    }
}
