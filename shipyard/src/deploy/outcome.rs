//! Outcomes of a mode deployer

use crate::errors::EngineError;
use crate::models::ProvisioningOutputs;

/// Non-error end of a deployment
#[derive(Debug)]
pub enum Outcome {
    Success {
        message: String,
        outputs: ProvisioningOutputs,
    },
    PendingFeature {
        message: String,
    },
}

/// What happened to the compensating action of a failed deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// `what` was undone
    Succeeded { what: String },
    /// Undoing `what` failed; resources may still exist
    Failed { what: String, reason: String },
}

/// A failed deployment and its compensation, if one ran
#[derive(Debug)]
pub struct Failure {
    pub error: EngineError,
    pub compensation: Option<Compensation>,
}

impl Failure {
    pub fn compensated(error: EngineError, compensation: Compensation) -> Self {
        Self {
            error,
            compensation: Some(compensation),
        }
    }

    /// Caller-facing message naming the error and any cleanup result
    pub fn message(&self) -> String {
        match &self.compensation {
            None => self.error.to_string(),
            Some(Compensation::Succeeded { what }) => {
                format!("{}. Cleanup succeeded: {}.", self.error, what)
            }
            Some(Compensation::Failed { what, reason }) => format!(
                "{}. WARNING: cleanup failed while trying to {} ({}); resources may still exist and need manual removal.",
                self.error, what, reason
            ),
        }
    }
}

impl From<EngineError> for Failure {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            compensation: None,
        }
    }
}
