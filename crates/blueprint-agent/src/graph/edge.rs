use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::state::{STATUS_CONTINUE, STATUS_DONE};
use blueprint_core::{SharedState, StageKind};

/// Label that conventionally maps to [`Target::End`].
pub const LABEL_END: &str = "END";

/// Where a route leads: another stage, or the end of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Stage(StageKind),
    End,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(kind) => write!(f, "{}", kind),
            Self::End => f.write_str(LABEL_END),
        }
    }
}

/// Maps the current state to a branch label.
///
/// Must be a pure function of the state. An `Err` aborts the run.
pub type RoutePredicate = Arc<dyn Fn(&SharedState) -> Result<String> + Send + Sync>;

/// A predicate plus the label → target table it selects from.
#[derive(Clone)]
pub struct ConditionalRoute {
    pub predicate: RoutePredicate,
    pub branches: BTreeMap<String, Target>,
}

impl std::fmt::Debug for ConditionalRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalRoute")
            .field("branches", &self.branches)
            .finish()
    }
}

/// The single outgoing routing decision of a stage.
#[derive(Debug, Clone)]
pub enum Route {
    /// Always go to the same target.
    Static(Target),
    /// Evaluate a predicate over the state and follow the matching branch.
    Conditional(ConditionalRoute),
}

impl Route {
    pub fn to(target: Target) -> Self {
        Self::Static(target)
    }

    pub fn conditional<I, L>(predicate: RoutePredicate, branches: I) -> Self
    where
        I: IntoIterator<Item = (L, Target)>,
        L: Into<String>,
    {
        Self::Conditional(ConditionalRoute {
            predicate,
            branches: branches.into_iter().map(|(l, t)| (l.into(), t)).collect(),
        })
    }

    /// Resolve the next target against `state`.
    ///
    /// A label with no branch is a `Graph` error.
    pub fn resolve(&self, state: &SharedState) -> Result<Target> {
        match self {
            Self::Static(target) => Ok(*target),
            Self::Conditional(route) => {
                let label = (route.predicate)(state)?;
                route.branches.get(&label).copied().ok_or_else(|| {
                    BlueprintError::Graph(format!("predicate returned unmapped label '{}'", label))
                })
            }
        }
    }

    /// Every target this route can lead to.
    pub fn targets(&self) -> Vec<Target> {
        match self {
            Self::Static(target) => vec![*target],
            Self::Conditional(route) => route.branches.values().copied().collect(),
        }
    }
}

/// Route for a looping stage: `END` once the status marker is `DONE`,
/// otherwise back to `stage`.
///
/// A missing or unknown marker counts as "continue" and is logged. With
/// `strict` it fails the run with `MalformedStatus` instead.
pub fn status_route(stage: StageKind, strict: bool) -> Route {
    let predicate: RoutePredicate = Arc::new(move |state: &SharedState| {
        match state.status() {
            Some(STATUS_DONE) => Ok(LABEL_END.to_string()),
            Some(STATUS_CONTINUE) => Ok(stage.as_str().to_string()),
            other => {
                let shown = match other {
                    Some(s) => s.to_string(),
                    None => state
                        .get(blueprint_core::state::keys::STATUS)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "<absent>".to_string()),
                };
                if strict {
                    return Err(BlueprintError::MalformedStatus {
                        stage,
                        value: shown,
                    });
                }
                warn!(stage = %stage, status = %shown, "Unrecognized status marker, continuing loop");
                Ok(stage.as_str().to_string())
            }
        }
    });

    Route::conditional(
        predicate,
        [
            (LABEL_END.to_string(), Target::End),
            (stage.as_str().to_string(), Target::Stage(stage)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_status(status: Option<serde_json::Value>) -> SharedState {
        let mut state = SharedState::with_request("x");
        if let Some(s) = status {
            state.set("status", s);
        }
        state
    }

    #[test]
    fn test_static_route() {
        let route = Route::to(Target::Stage(StageKind::Architect));
        assert_eq!(
            route.resolve(&SharedState::new()).unwrap(),
            Target::Stage(StageKind::Architect)
        );
        assert_eq!(route.targets(), vec![Target::Stage(StageKind::Architect)]);
    }

    #[test]
    fn test_status_route_done_and_continue() {
        let route = status_route(StageKind::Coder, false);
        assert_eq!(
            route.resolve(&with_status(Some(json!("DONE")))).unwrap(),
            Target::End
        );
        assert_eq!(
            route.resolve(&with_status(Some(json!("CONTINUE")))).unwrap(),
            Target::Stage(StageKind::Coder)
        );
    }

    #[test]
    fn test_missing_or_odd_status_loops() {
        let route = status_route(StageKind::Coder, false);
        for status in [None, Some(json!("done")), Some(json!(42)), Some(json!(null))] {
            assert_eq!(
                route.resolve(&with_status(status)).unwrap(),
                Target::Stage(StageKind::Coder)
            );
        }
    }

    #[test]
    fn test_strict_status_rejects_missing() {
        let route = status_route(StageKind::Coder, true);
        let err = route.resolve(&with_status(None)).unwrap_err();
        assert!(matches!(
            err,
            BlueprintError::MalformedStatus { stage: StageKind::Coder, ref value } if value == "<absent>"
        ));
        assert_eq!(
            route.resolve(&with_status(Some(json!("DONE")))).unwrap(),
            Target::End
        );
    }

    #[test]
    fn test_routing_is_deterministic() {
        let route = status_route(StageKind::Coder, false);
        let state = with_status(Some(json!("CONTINUE")));
        let first = route.resolve(&state).unwrap();
        for _ in 0..10 {
            assert_eq!(route.resolve(&state).unwrap(), first);
        }
    }

    #[test]
    fn test_unmapped_label_is_graph_error() {
        let route = Route::conditional(
            Arc::new(|_: &SharedState| Ok("elsewhere".to_string())),
            [("END", Target::End)],
        );
        let err = route.resolve(&SharedState::new()).unwrap_err();
        assert!(matches!(err, BlueprintError::Graph(msg) if msg.contains("elsewhere")));
    }

    #[test]
    fn test_target_display() {
        assert_eq!(Target::End.to_string(), "END");
        assert_eq!(Target::Stage(StageKind::Planner).to_string(), "planner");
    }
}
