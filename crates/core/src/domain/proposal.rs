use serde::{Deserialize, Serialize};

use crate::routing::SpecialistKind;

/// A tool invocation a specialist intends to run once the user confirms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedCall {
    pub tool: String,
    pub arguments: serde_json::Value,
}

impl PlannedCall {
    pub fn new(tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self { tool: tool.into(), arguments }
    }
}

/// Follow-on work queued behind a confirmed proposal. Used by the composite
/// forecast-then-plan directive, where the demand stage hands off into the
/// production stage after executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroStage {
    PlanStockouts,
}

/// The unit of the confirmation gate: what a specialist told the user it
/// intends to do, and the exact calls it will issue on an affirmative reply.
///
/// Serialized into the transcript row that carries the proposal, which is how
/// `AwaitingConfirmation` survives a process restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingProposal {
    pub specialist: SpecialistKind,
    pub summary: String,
    pub calls: Vec<PlannedCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup: Option<MacroStage>,
}

impl PendingProposal {
    pub fn new(
        specialist: SpecialistKind,
        summary: impl Into<String>,
        calls: Vec<PlannedCall>,
    ) -> Self {
        Self { specialist, summary: summary.into(), calls, followup: None }
    }

    pub fn with_followup(mut self, stage: MacroStage) -> Self {
        self.followup = Some(stage);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn proposal_payload_survives_serialization() {
        let proposal = PendingProposal::new(
            SpecialistKind::Demand,
            "Update demand for 2024-07-10 to 500.",
            vec![PlannedCall::new("update_demand", json!({"date": "2024-07-10", "demand": 500.0}))],
        )
        .with_followup(MacroStage::PlanStockouts);

        let raw = serde_json::to_string(&proposal).expect("serialize proposal");
        let restored: PendingProposal = serde_json::from_str(&raw).expect("deserialize proposal");
        assert_eq!(restored, proposal);
    }

    #[test]
    fn followup_is_omitted_when_absent() {
        let proposal = PendingProposal::new(SpecialistKind::Data, "Delete everything.", vec![]);
        let raw = serde_json::to_value(&proposal).expect("serialize proposal");
        assert!(raw.get("followup").is_none());
    }
}
