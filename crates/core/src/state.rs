//! Report status transitions.
//!
//! Transitions are a lookup table keyed by `(status, event)`. Anything not in the table is a
//! conflict: signing a report twice, uploading over a signed one, touching an invalidated one.

use crate::model::{Report, ReportStatus};
use crate::{LaudoError, LaudoResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle event applied to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportEvent {
    /// Automatic or manual certificate signature.
    Sign,
    UploadSigned,
    /// Source of a redo. The source report keeps its status.
    Redo,
    Invalidate,
}

impl fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sign => "sign",
            Self::UploadSigned => "upload signed document",
            Self::Redo => "redo",
            Self::Invalidate => "invalidate",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct ReportStateMachine {
    transitions: HashMap<(ReportStatus, ReportEvent), ReportStatus>,
}

impl ReportStateMachine {
    pub fn new() -> Self {
        use ReportEvent::*;
        use ReportStatus::*;

        let mut transitions = HashMap::new();
        transitions.insert((PendingSignature, Sign), Signed);
        transitions.insert((PendingSignature, UploadSigned), Signed);
        transitions.insert((PendingSignature, Redo), PendingSignature);
        transitions.insert((Signed, Redo), Signed);
        transitions.insert((PendingSignature, Invalidate), Invalidated);
        transitions.insert((Signed, Invalidate), Invalidated);
        transitions.insert((Invalidated, Invalidate), Invalidated);

        Self { transitions }
    }

    pub fn can_transition(&self, from: ReportStatus, event: ReportEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// Resolves the status reached by applying `event` in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`LaudoError::Conflict`] if the event is not allowed in `from`.
    pub fn transition(&self, from: ReportStatus, event: ReportEvent) -> LaudoResult<ReportStatus> {
        self.transitions.get(&(from, event)).copied().ok_or_else(|| {
            LaudoError::Conflict(format!(
                "cannot {event} a report in status \"{}\"",
                from.label()
            ))
        })
    }
}

impl Default for ReportStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that status and artifact pointers agree before a report is saved.
///
/// A signed report must point at a signed artifact or a legacy URL.
pub fn check_artifacts(report: &Report) -> LaudoResult<()> {
    if report.status == ReportStatus::Signed
        && report.signed_key.is_none()
        && report.legacy_url.is_none()
    {
        return Err(LaudoError::Internal(format!(
            "report {} is signed but has no signed artifact",
            report.id
        )));
    }
    if report.status == ReportStatus::Invalidated && report.valid {
        return Err(LaudoError::Internal(format!(
            "report {} is invalidated but still marked valid",
            report.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_report_can_be_signed_once() {
        let sm = ReportStateMachine::new();
        assert_eq!(
            sm.transition(ReportStatus::PendingSignature, ReportEvent::Sign)
                .unwrap(),
            ReportStatus::Signed
        );
        assert!(matches!(
            sm.transition(ReportStatus::Signed, ReportEvent::Sign),
            Err(LaudoError::Conflict(_))
        ));
        assert!(!sm.can_transition(ReportStatus::Signed, ReportEvent::UploadSigned));
    }

    #[test]
    fn invalidation_is_reachable_from_every_status() {
        let sm = ReportStateMachine::new();
        for status in [
            ReportStatus::PendingSignature,
            ReportStatus::Signed,
            ReportStatus::Invalidated,
        ] {
            assert_eq!(
                sm.transition(status, ReportEvent::Invalidate).unwrap(),
                ReportStatus::Invalidated
            );
        }
    }

    #[test]
    fn invalidated_report_accepts_nothing_else() {
        let sm = ReportStateMachine::new();
        for event in [ReportEvent::Sign, ReportEvent::UploadSigned, ReportEvent::Redo] {
            assert!(!sm.can_transition(ReportStatus::Invalidated, event));
        }
    }

    #[test]
    fn redo_keeps_source_status() {
        let sm = ReportStateMachine::new();
        assert_eq!(
            sm.transition(ReportStatus::Signed, ReportEvent::Redo).unwrap(),
            ReportStatus::Signed
        );
    }
}
