//! Collaborators invoked at optimizer session boundaries.

use crate::domain::error::BandtraderError;
use crate::domain::optimizer::{SearchMethod, Trial, TrialHistory};

/// Keeps the host from sleeping while a long search runs.
pub trait KeepAwake {
    fn acquire(&self) -> Result<(), BandtraderError>;
    fn release(&self);
}

/// Persists trial history and the best parameter set of a search.
pub trait ResultsSink {
    /// Trials saved by an earlier session of `method`; empty when none exist.
    fn load_history(&self, method: SearchMethod) -> Result<Vec<Trial>, BandtraderError>;

    fn save(
        &self,
        method: SearchMethod,
        history: &TrialHistory,
        best: Option<&Trial>,
    ) -> Result<(), BandtraderError>;
}
