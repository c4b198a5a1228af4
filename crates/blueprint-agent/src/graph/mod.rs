//! Workflow graph engine: a fixed set of stages joined by routes.
//!
//! Every registered stage has exactly one outgoing [`Route`]: either a static
//! target or a predicate over the shared state whose label maps to a target.
//! The [`GraphExecutor`] walks the graph from the entry stage, one stage at a
//! time, merging each stage's output into the shared state and resolving the
//! next target from the merged state, until a route yields [`Target::End`] or
//! a stage hits the step ceiling.

pub mod edge;
pub mod executor;
pub mod phase;
pub mod workflow;

pub use edge::{status_route, ConditionalRoute, Route, RoutePredicate, Target, LABEL_END};
pub use executor::{GraphExecutor, RunOptions, RunReport, StageResult};
pub use phase::Phase;
pub use workflow::{WorkflowBuilder, WorkflowGraph};
