//! Upgrade State Machine
//!
//! The `UpgradeTracker` owns the current stage of a run and refuses invalid
//! transitions, so a phase cannot run out of order or be skipped by mistake.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! Preflight
//!     ↓
//! HardwareDetection   (sbc profile only)
//!     ↓
//! PlatformChecks      (sbc profile only)
//!     ↓
//! Confirmation
//!     ↓
//! Backup              ← first stage that changes the system
//!     ↓
//! RefreshIndex → RepairBroken → RemoveProblematic → FullUpgrade
//!     ↓
//! Cleanup → Verification → BootChecks → Report
//!     ↓
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```
//!
//! Entering `Backup` or any later stage requires the operator's confirmation
//! to have been recorded first.

use crate::context::Profile;
use crate::error::UpgradeError;
use std::fmt;
use thiserror::Error;

/// Upgrade stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum UpgradeStage {
    NotStarted = 0,
    Preflight = 1,
    HardwareDetection = 2,
    PlatformChecks = 3,
    Confirmation = 4,
    Backup = 5,
    RefreshIndex = 6,
    RepairBroken = 7,
    RemoveProblematic = 8,
    FullUpgrade = 9,
    Cleanup = 10,
    Verification = 11,
    BootChecks = 12,
    Report = 13,
    Completed = 14,
    Failed = 255,
}

impl UpgradeStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true if this is a terminal state (Completed or Failed)
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stages that run commands changing the system.
    #[inline]
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::Backup
                | Self::RefreshIndex
                | Self::RepairBroken
                | Self::RemoveProblematic
                | Self::FullUpgrade
                | Self::Cleanup
                | Self::BootChecks
        )
    }

    /// Stages that only exist in the hardware-aware flow.
    #[inline]
    pub const fn is_sbc_only(self) -> bool {
        matches!(self, Self::HardwareDetection | Self::PlatformChecks)
    }

    /// Next stage for `profile`, or None at a terminal state.
    pub const fn next(self, profile: Profile) -> Option<Self> {
        let sbc = matches!(profile, Profile::Sbc);
        match self {
            Self::NotStarted => Some(Self::Preflight),
            Self::Preflight if sbc => Some(Self::HardwareDetection),
            Self::Preflight => Some(Self::Confirmation),
            Self::HardwareDetection => Some(Self::PlatformChecks),
            Self::PlatformChecks => Some(Self::Confirmation),
            Self::Confirmation => Some(Self::Backup),
            Self::Backup => Some(Self::RefreshIndex),
            Self::RefreshIndex => Some(Self::RepairBroken),
            Self::RepairBroken => Some(Self::RemoveProblematic),
            Self::RemoveProblematic => Some(Self::FullUpgrade),
            Self::FullUpgrade => Some(Self::Cleanup),
            Self::Cleanup => Some(Self::Verification),
            Self::Verification => Some(Self::BootChecks),
            Self::BootChecks => Some(Self::Report),
            Self::Report => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Preflight => "Pre-flight checks",
            Self::HardwareDetection => "Hardware detection",
            Self::PlatformChecks => "Platform checks",
            Self::Confirmation => "Confirmation",
            Self::Backup => "Backup",
            Self::RefreshIndex => "Refreshing package index",
            Self::RepairBroken => "Repairing broken packages",
            Self::RemoveProblematic => "Removing problematic packages",
            Self::FullUpgrade => "Full upgrade",
            Self::Cleanup => "Cleanup",
            Self::Verification => "Verification",
            Self::BootChecks => "Boot checks",
            Self::Report => "Report",
            Self::Completed => "Upgrade complete",
            Self::Failed => "Upgrade failed",
        }
    }

    /// Every stage `profile` passes through, in order, excluding Failed.
    pub fn sequence(profile: Profile) -> Vec<Self> {
        let mut stages = vec![Self::NotStarted];
        let mut current = Self::NotStarted;
        while let Some(next) = current.next(profile) {
            stages.push(next);
            current = next;
        }
        stages
    }
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: UpgradeStage, to: UpgradeStage },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: UpgradeStage, to: UpgradeStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: UpgradeStage },

    #[error("Stage {stage} requires operator confirmation")]
    MissingConfirmation { stage: UpgradeStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: UpgradeStage },
}

impl From<StageTransitionError> for UpgradeError {
    fn from(err: StageTransitionError) -> Self {
        UpgradeError::transition(err.to_string())
    }
}

/// Owns the current stage of one run.
#[derive(Debug, Clone)]
pub struct UpgradeTracker {
    profile: Profile,
    current: UpgradeStage,
    failed_at: Option<UpgradeStage>,
    /// Stages entered, in order, with the local time they were entered.
    history: Vec<(UpgradeStage, chrono::DateTime<chrono::Local>)>,
    confirmed: bool,
}

impl UpgradeTracker {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            current: UpgradeStage::NotStarted,
            failed_at: None,
            history: Vec::new(),
            confirmed: false,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> UpgradeStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<UpgradeStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == UpgradeStage::Completed
    }

    /// Stages entered so far, in order.
    pub fn stages(&self) -> Vec<UpgradeStage> {
        self.history.iter().map(|(s, _)| *s).collect()
    }

    pub fn history(&self) -> &[(UpgradeStage, chrono::DateTime<chrono::Local>)] {
        &self.history
    }

    /// Record that the operator agreed to proceed. One-way.
    pub fn confirm(&mut self) {
        self.confirmed = true;
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Move to the next stage for this tracker's profile.
    pub fn advance(&mut self) -> Result<UpgradeStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        let Some(next) = self.current.next(self.profile) else {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        };
        self.enter(next)
    }

    /// Transition to `target`, which must be the next stage in sequence.
    pub fn transition_to(&mut self, target: UpgradeStage) -> Result<UpgradeStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }
        if target.order() < self.current.order() {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next(self.profile) != Some(target) {
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        self.enter(target)
    }

    /// Mark the run as failed at the current stage.
    pub fn fail(&mut self) -> Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        self.failed_at = Some(self.current);
        self.record(UpgradeStage::Failed);
        self.current = UpgradeStage::Failed;
        Ok(())
    }

    fn enter(&mut self, stage: UpgradeStage) -> Result<UpgradeStage, StageTransitionError> {
        if stage.is_mutating() && !self.confirmed {
            return Err(StageTransitionError::MissingConfirmation { stage });
        }
        self.record(stage);
        self.current = stage;
        Ok(stage)
    }

    fn record(&mut self, stage: UpgradeStage) {
        self.history.push((stage, chrono::Local::now()));
    }
}
