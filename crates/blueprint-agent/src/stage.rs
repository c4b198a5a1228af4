use std::sync::Arc;

use futures::future::BoxFuture;

use blueprint_core::error::Result;
use blueprint_core::event::EventBus;
use blueprint_core::traits::FileSystem;
use blueprint_core::types::PipelineEvent;
use blueprint_core::{SharedState, StageKind};
use blueprint_llm::StructuredClient;

/// One unit of work in the pipeline.
///
/// A stage reads what it needs from the shared state and returns the keys it
/// produced. The executor merges the returned state over the running one, so
/// returning a partial state is fine and a stage cannot remove keys.
pub trait Stage: Send + Sync + 'static {
    fn kind(&self) -> StageKind;

    fn execute<'a>(&'a self, state: &'a SharedState) -> BoxFuture<'a, Result<SharedState>>;
}

/// Collaborators handed to the built-in stages.
#[derive(Clone)]
pub struct StageContext {
    pub llm: StructuredClient,
    pub fs: Arc<dyn FileSystem>,
    pub events: Option<Arc<EventBus>>,
}

impl StageContext {
    pub fn new(llm: StructuredClient, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            llm,
            fs,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub(crate) fn publish(&self, event: PipelineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
