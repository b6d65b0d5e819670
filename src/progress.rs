//! Progress Reporting
//!
//! Events the installation engine sends to whoever drives it.

/// One step of an installation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallProgress {
    /// Steps completed so far
    pub step: usize,

    /// Total steps of the run
    pub total: usize,

    /// Human-readable description of the step
    pub message: String,
}

impl InstallProgress {
    pub fn new(step: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            step,
            total,
            message: message.into(),
        }
    }

    /// Integer percentage, rounded down. A run with no steps is complete.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            100
        } else {
            (self.step.min(self.total) * 100 / self.total) as u8
        }
    }

    /// Progress as a fraction 0.0 - 1.0
    pub fn fraction(&self) -> f64 {
        f64::from(self.percent()) / 100.0
    }
}

/// Message from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Progress(InstallProgress),
    Log(String),
}
