use serde::{Deserialize, Serialize};

use blueprint_core::StageKind;

use super::edge::Target;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Architecting,
    Coding,
    Done,
    Aborted,
}

impl Phase {
    /// The phase a run is in while executing `stage`.
    pub fn of_stage(stage: StageKind) -> Self {
        match stage {
            StageKind::Planner => Self::Planning,
            StageKind::Architect => Self::Architecting,
            StageKind::Coder => Self::Coding,
        }
    }

    /// The phase a run enters when a route yields `target`.
    pub fn of_target(target: Target) -> Self {
        match target {
            Target::Stage(stage) => Self::of_stage(stage),
            Target::End => Self::Done,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::Architecting => "architecting",
            Self::Coding => "coding",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(Phase::of_stage(StageKind::Planner), Phase::Planning);
        assert_eq!(Phase::of_target(Target::Stage(StageKind::Coder)), Phase::Coding);
        assert_eq!(Phase::of_target(Target::End), Phase::Done);
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Aborted.is_terminal());
        assert!(!Phase::Coding.is_terminal());
    }
}
