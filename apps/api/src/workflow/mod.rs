//! Approval state machine shared by resource requests and work requests.
//!
//! Resource requests pass two stages (line manager, then HR); work requests
//! (leave/overtime) pass only the line-manager stage. Persistence applies the
//! returned status with a conditional update on the previous status, so only
//! one approver can act on a pending request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    PendingLm,
    PendingHr,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::PendingLm => "pending_lm",
            RequestStatus::PendingHr => "pending_hr",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::PendingLm | RequestStatus::PendingHr)
    }

    pub fn is_final(&self) -> bool {
        !self.is_pending()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_lm" => Ok(RequestStatus::PendingLm),
            "pending_hr" => Ok(RequestStatus::PendingHr),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    LineManager,
    Hr,
}

impl fmt::Display for ApprovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStage::LineManager => f.write_str("line manager"),
            ApprovalStage::Hr => f.write_str("HR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// PM asks for a person: line manager, then HR.
    Resource,
    /// Leave or overtime: line manager only.
    Work,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("request is already {0}")]
    AlreadyFinal(RequestStatus),

    #[error("request is {status}; the {stage} stage cannot act on it")]
    WrongStage {
        status: RequestStatus,
        stage: ApprovalStage,
    },

    #[error("a comment is required when rejecting")]
    CommentRequired,
}

/// Trims the approver's comment; rejections must explain themselves.
pub fn decision_comment(
    decision: Decision,
    comment: Option<&str>,
) -> Result<Option<String>, TransitionError> {
    let comment = comment.map(str::trim).filter(|c| !c.is_empty());
    match (decision, comment) {
        (Decision::Reject, None) => Err(TransitionError::CommentRequired),
        (_, comment) => Ok(comment.map(str::to_string)),
    }
}

impl RequestKind {
    /// Returns the status that results from `stage` deciding on a request in `current`.
    pub fn decide(
        &self,
        current: RequestStatus,
        stage: ApprovalStage,
        decision: Decision,
    ) -> Result<RequestStatus, TransitionError> {
        use ApprovalStage::*;
        use RequestStatus::*;

        if current.is_final() {
            return Err(TransitionError::AlreadyFinal(current));
        }

        let next = match (self, current, stage, decision) {
            (RequestKind::Resource, PendingLm, LineManager, Decision::Approve) => PendingHr,
            (RequestKind::Resource, PendingHr, Hr, Decision::Approve) => Approved,
            (RequestKind::Work, PendingLm, LineManager, Decision::Approve) => Approved,
            (RequestKind::Resource, PendingLm, LineManager, Decision::Reject)
            | (RequestKind::Resource, PendingHr, Hr, Decision::Reject)
            | (RequestKind::Work, PendingLm, LineManager, Decision::Reject) => Rejected,
            _ => {
                return Err(TransitionError::WrongStage {
                    status: current,
                    stage,
                })
            }
        };

        Ok(next)
    }

    /// The requester withdraws a request. Only pending requests can be withdrawn.
    pub fn cancel(&self, current: RequestStatus) -> Result<RequestStatus, TransitionError> {
        if current.is_final() {
            return Err(TransitionError::AlreadyFinal(current));
        }
        Ok(RequestStatus::Cancelled)
    }

    /// The stage that must act next on a request in `status`, if any.
    pub fn pending_stage(&self, status: RequestStatus) -> Option<ApprovalStage> {
        match (self, status) {
            (_, RequestStatus::PendingLm) => Some(ApprovalStage::LineManager),
            (RequestKind::Resource, RequestStatus::PendingHr) => Some(ApprovalStage::Hr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_request_full_approval_path() {
        let kind = RequestKind::Resource;
        let after_lm = kind
            .decide(
                RequestStatus::PendingLm,
                ApprovalStage::LineManager,
                Decision::Approve,
            )
            .unwrap();
        assert_eq!(after_lm, RequestStatus::PendingHr);

        let after_hr = kind
            .decide(after_lm, ApprovalStage::Hr, Decision::Approve)
            .unwrap();
        assert_eq!(after_hr, RequestStatus::Approved);
    }

    #[test]
    fn test_resource_request_rejected_at_either_stage() {
        let kind = RequestKind::Resource;
        assert_eq!(
            kind.decide(
                RequestStatus::PendingLm,
                ApprovalStage::LineManager,
                Decision::Reject
            ),
            Ok(RequestStatus::Rejected)
        );
        assert_eq!(
            kind.decide(RequestStatus::PendingHr, ApprovalStage::Hr, Decision::Reject),
            Ok(RequestStatus::Rejected)
        );
    }

    #[test]
    fn test_hr_cannot_skip_line_manager() {
        let err = RequestKind::Resource
            .decide(RequestStatus::PendingLm, ApprovalStage::Hr, Decision::Approve)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::WrongStage {
                status: RequestStatus::PendingLm,
                stage: ApprovalStage::Hr
            }
        );
    }

    #[test]
    fn test_line_manager_cannot_act_twice() {
        let err = RequestKind::Resource
            .decide(
                RequestStatus::PendingHr,
                ApprovalStage::LineManager,
                Decision::Approve,
            )
            .unwrap_err();
        assert!(matches!(err, TransitionError::WrongStage { .. }));
    }

    #[test]
    fn test_work_request_is_single_stage() {
        let kind = RequestKind::Work;
        assert_eq!(
            kind.decide(
                RequestStatus::PendingLm,
                ApprovalStage::LineManager,
                Decision::Approve
            ),
            Ok(RequestStatus::Approved)
        );
        assert!(kind
            .decide(RequestStatus::PendingLm, ApprovalStage::Hr, Decision::Approve)
            .is_err());
    }

    #[test]
    fn test_final_requests_are_immutable() {
        for status in [
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
        ] {
            for kind in [RequestKind::Resource, RequestKind::Work] {
                assert_eq!(
                    kind.decide(status, ApprovalStage::LineManager, Decision::Approve),
                    Err(TransitionError::AlreadyFinal(status))
                );
                assert_eq!(kind.cancel(status), Err(TransitionError::AlreadyFinal(status)));
            }
        }
    }

    #[test]
    fn test_pending_requests_can_be_cancelled() {
        assert_eq!(
            RequestKind::Resource.cancel(RequestStatus::PendingHr),
            Ok(RequestStatus::Cancelled)
        );
        assert_eq!(
            RequestKind::Work.cancel(RequestStatus::PendingLm),
            Ok(RequestStatus::Cancelled)
        );
    }

    #[test]
    fn test_pending_stage() {
        assert_eq!(
            RequestKind::Resource.pending_stage(RequestStatus::PendingHr),
            Some(ApprovalStage::Hr)
        );
        assert_eq!(
            RequestKind::Work.pending_stage(RequestStatus::PendingLm),
            Some(ApprovalStage::LineManager)
        );
        assert_eq!(RequestKind::Work.pending_stage(RequestStatus::Approved), None);
    }

    #[test]
    fn test_reject_needs_comment() {
        assert_eq!(
            decision_comment(Decision::Reject, Some("   ")),
            Err(TransitionError::CommentRequired)
        );
        assert_eq!(
            decision_comment(Decision::Reject, Some(" no budget ")),
            Ok(Some("no budget".to_string()))
        );
        assert_eq!(decision_comment(Decision::Approve, None), Ok(None));
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            RequestStatus::PendingLm,
            RequestStatus::PendingHr,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
        }
    }
}
