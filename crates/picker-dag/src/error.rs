//! Stage graph construction errors

use picker_artifact::PayloadKind;

/// Errors raised while validating a set of stage specifications
///
/// All of them are configuration-time failures: the batch never starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    /// No stages declared
    #[error("pipeline declares no stages")]
    Empty,

    /// Two stages share a name
    #[error("stage {0:?} is declared more than once")]
    DuplicateStage(String),

    /// `after` names a stage that does not exist
    #[error("stage {stage:?} depends on unknown stage {upstream:?}")]
    UnknownUpstream { stage: String, upstream: String },

    /// Dependencies form a cycle; first name repeated at the end
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A declared input kind is produced by no upstream
    #[error("stage {stage:?} consumes {kind} but no upstream produces it")]
    UnsatisfiedInput { stage: String, kind: PayloadKind },

    /// Lookup of a stage that is not part of the graph
    #[error("unknown stage {0:?}")]
    UnknownStage(String),
}

impl DagError {
    #[inline]
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CyclicDependency { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_names_path() {
        let err = DagError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
        assert!(err.is_cycle());
        assert!(!DagError::Empty.is_cycle());
    }
}
