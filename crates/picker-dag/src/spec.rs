//! Stage specifications

use picker_artifact::PayloadKind;
use std::time::Duration;

/// Declaration of one pipeline stage
///
/// `after` lists the upstream stages in the order their outputs are handed
/// to the processor. `inputs` is the set of payload kinds the processor
/// consumes and `output` the kind it promises to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub name: String,
    pub after: Vec<String>,
    pub inputs: Vec<PayloadKind>,
    pub output: PayloadKind,
    /// Identical inputs always give identical output
    pub idempotent: bool,
    /// Processor variant name resolved through the processor registry
    pub processor: String,
    /// Per-stage override of the global timeout
    pub timeout: Option<Duration>,
    /// Per-stage override of the retry budget
    pub max_attempts: Option<u32>,
}

impl StageSpec {
    /// Idempotent stage with no upstreams
    #[must_use]
    pub fn new(name: impl Into<String>, processor: impl Into<String>, output: PayloadKind) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            inputs: Vec::new(),
            output,
            idempotent: true,
            processor: processor.into(),
            timeout: None,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn after<I, S>(mut self, upstreams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = upstreams.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn inputs(mut self, kinds: impl IntoIterator<Item = PayloadKind>) -> Self {
        self.inputs = kinds.into_iter().collect();
        self
    }

    #[must_use]
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.after.is_empty()
    }
}
