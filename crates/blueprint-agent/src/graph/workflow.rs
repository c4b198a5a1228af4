use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::StageKind;

use super::edge::{Route, Target};
use crate::stage::Stage;

/// Builder for a [`WorkflowGraph`].
///
/// Problems found while adding stages and routes are collected and reported
/// together by [`build`](Self::build).
#[derive(Default)]
pub struct WorkflowBuilder {
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    routes: BTreeMap<StageKind, Route>,
    entry: Option<StageKind>,
    problems: Vec<String>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage under its own kind.
    pub fn add_stage(mut self, stage: impl Stage) -> Self {
        let kind = stage.kind();
        if self.stages.insert(kind, Arc::new(stage)).is_some() {
            self.problems.push(format!("stage '{}' registered twice", kind));
        }
        self
    }

    /// Unconditional route from `from` to `to`.
    pub fn add_edge(self, from: StageKind, to: Target) -> Self {
        self.add_route(from, Route::to(to))
    }

    /// Set the single outgoing route of `from`.
    pub fn add_route(mut self, from: StageKind, route: Route) -> Self {
        if self.routes.insert(from, route).is_some() {
            self.problems
                .push(format!("stage '{}' has more than one outgoing route", from));
        }
        self
    }

    pub fn entry(mut self, kind: StageKind) -> Self {
        self.entry = Some(kind);
        self
    }

    /// Validate the topology and freeze it.
    pub fn build(self) -> Result<WorkflowGraph> {
        let mut problems = self.problems;

        let entry = match self.entry {
            Some(kind) if self.stages.contains_key(&kind) => Some(kind),
            Some(kind) => {
                problems.push(format!("entry stage '{}' is not registered", kind));
                None
            }
            None => {
                problems.push("no entry stage".to_string());
                None
            }
        };

        for kind in self.stages.keys() {
            if !self.routes.contains_key(kind) {
                problems.push(format!("stage '{}' has no outgoing route", kind));
            }
        }

        for (from, route) in &self.routes {
            if !self.stages.contains_key(from) {
                problems.push(format!("route from unregistered stage '{}'", from));
            }
            let targets = route.targets();
            if targets.is_empty() {
                problems.push(format!("conditional route from '{}' has no branches", from));
            }
            for target in targets {
                if let Target::Stage(to) = target {
                    if !self.stages.contains_key(&to) {
                        problems.push(format!(
                            "route from '{}' targets unregistered stage '{}'",
                            from, to
                        ));
                    }
                }
            }
        }

        if let Some(entry) = entry {
            if !reaches_end(entry, &self.routes) {
                problems.push(format!("no route from '{}' ever reaches END", entry));
            }
        }

        match (entry, problems.is_empty()) {
            (Some(entry), true) => Ok(WorkflowGraph {
                stages: self.stages,
                routes: self.routes,
                entry,
            }),
            _ => Err(BlueprintError::Graph(problems.join("; "))),
        }
    }
}

fn reaches_end(entry: StageKind, routes: &BTreeMap<StageKind, Route>) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([entry]);
    while let Some(kind) = queue.pop_front() {
        if !seen.insert(kind) {
            continue;
        }
        let Some(route) = routes.get(&kind) else {
            continue;
        };
        for target in route.targets() {
            match target {
                Target::End => return true,
                Target::Stage(next) => queue.push_back(next),
            }
        }
    }
    false
}

/// A validated, immutable workflow: stages, one route per stage, and an entry.
pub struct WorkflowGraph {
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    routes: BTreeMap<StageKind, Route>,
    entry: StageKind,
}

impl WorkflowGraph {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    pub fn entry(&self) -> StageKind {
        self.entry
    }

    pub fn stage(&self, kind: StageKind) -> Option<&Arc<dyn Stage>> {
        self.stages.get(&kind)
    }

    pub fn route(&self, kind: StageKind) -> Option<&Route> {
        self.routes.get(&kind)
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.keys().copied().collect()
    }

    /// One line per route, in stage order, for display.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("entry: {}", self.entry)];
        for (from, route) in &self.routes {
            let line = match route {
                Route::Static(target) => format!("{} -> {}", from, target),
                Route::Conditional(cond) => {
                    let branches: Vec<String> = cond
                        .branches
                        .iter()
                        .map(|(label, target)| format!("{} => {}", label, target))
                        .collect();
                    format!("{} -> ? [{}]", from, branches.join(", "))
                }
            };
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edge::status_route;
    use blueprint_core::SharedState;
    use futures::future::BoxFuture;

    struct Noop(StageKind);

    impl Stage for Noop {
        fn kind(&self) -> StageKind {
            self.0
        }

        fn execute<'a>(&'a self, _state: &'a SharedState) -> BoxFuture<'a, Result<SharedState>> {
            Box::pin(async { Ok(SharedState::new()) })
        }
    }

    fn full_builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
            .add_stage(Noop(StageKind::Planner))
            .add_stage(Noop(StageKind::Architect))
            .add_stage(Noop(StageKind::Coder))
            .add_edge(StageKind::Planner, Target::Stage(StageKind::Architect))
            .add_edge(StageKind::Architect, Target::Stage(StageKind::Coder))
            .add_route(StageKind::Coder, status_route(StageKind::Coder, false))
            .entry(StageKind::Planner)
    }

    fn graph_error(builder: WorkflowBuilder) -> String {
        match builder.build() {
            Err(BlueprintError::Graph(msg)) => msg,
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("graph should be rejected"),
        }
    }

    #[test]
    fn test_valid_graph() {
        let graph = full_builder().build().unwrap();
        assert_eq!(graph.entry(), StageKind::Planner);
        assert_eq!(graph.stage_kinds().len(), 3);
        assert!(graph.stage(StageKind::Coder).is_some());
        assert!(matches!(
            graph.route(StageKind::Coder),
            Some(Route::Conditional(_))
        ));
    }

    #[test]
    fn test_describe() {
        let graph = full_builder().build().unwrap();
        assert_eq!(
            graph.describe(),
            vec![
                "entry: planner",
                "planner -> architect",
                "architect -> coder",
                "coder -> ? [END => END, coder => coder]",
            ]
        );
    }

    #[test]
    fn test_missing_entry() {
        let msg = graph_error(
            WorkflowBuilder::new()
                .add_stage(Noop(StageKind::Planner))
                .add_edge(StageKind::Planner, Target::End),
        );
        assert!(msg.contains("no entry stage"));
    }

    #[test]
    fn test_unregistered_entry() {
        let msg = graph_error(
            WorkflowBuilder::new()
                .add_stage(Noop(StageKind::Planner))
                .add_edge(StageKind::Planner, Target::End)
                .entry(StageKind::Coder),
        );
        assert!(msg.contains("entry stage 'coder' is not registered"));
    }

    #[test]
    fn test_stage_without_route() {
        let msg = graph_error(
            WorkflowBuilder::new()
                .add_stage(Noop(StageKind::Planner))
                .add_stage(Noop(StageKind::Architect))
                .add_edge(StageKind::Planner, Target::End)
                .entry(StageKind::Planner),
        );
        assert!(msg.contains("'architect' has no outgoing route"));
    }

    #[test]
    fn test_duplicate_route() {
        let msg = graph_error(full_builder().add_edge(StageKind::Planner, Target::End));
        assert!(msg.contains("'planner' has more than one outgoing route"));
    }

    #[test]
    fn test_unregistered_target() {
        let msg = graph_error(
            WorkflowBuilder::new()
                .add_stage(Noop(StageKind::Planner))
                .add_edge(StageKind::Planner, Target::Stage(StageKind::Architect))
                .entry(StageKind::Planner),
        );
        assert!(msg.contains("targets unregistered stage 'architect'"));
    }

    #[test]
    fn test_route_from_unregistered_stage() {
        let msg = graph_error(
            WorkflowBuilder::new()
                .add_stage(Noop(StageKind::Planner))
                .add_edge(StageKind::Planner, Target::End)
                .add_edge(StageKind::Coder, Target::End)
                .entry(StageKind::Planner),
        );
        assert!(msg.contains("route from unregistered stage 'coder'"));
    }

    #[test]
    fn test_end_must_be_reachable() {
        let msg = graph_error(
            WorkflowBuilder::new()
                .add_stage(Noop(StageKind::Planner))
                .add_stage(Noop(StageKind::Coder))
                .add_edge(StageKind::Planner, Target::Stage(StageKind::Coder))
                .add_edge(StageKind::Coder, Target::Stage(StageKind::Coder))
                .entry(StageKind::Planner),
        );
        assert!(msg.contains("never reaches END"));
    }

    #[test]
    fn test_empty_conditional_route() {
        let route = Route::conditional(
            Arc::new(|_: &SharedState| Ok("x".to_string())),
            Vec::<(String, Target)>::new(),
        );
        let msg = graph_error(
            WorkflowBuilder::new()
                .add_stage(Noop(StageKind::Planner))
                .add_route(StageKind::Planner, route)
                .entry(StageKind::Planner),
        );
        assert!(msg.contains("has no branches"));
    }
}
