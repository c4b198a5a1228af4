pub mod artifact;
pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{BlueprintError, Result};
pub use event::EventBus;
pub use state::SharedState;
pub use types::*;
