//! Decision gate: combines a step's risk level with the analyzer's
//! decision to choose what happens before the next step runs.

use crate::analyzer::Decision;
use crate::schema::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// Continue to the next step without asking anyone.
    Continue,
    /// Stop the run.
    Halt,
    /// Route to the interaction handler; its decision is authoritative.
    PromptHuman,
}

/// `halt` always stops the run. Otherwise the risk level decides how
/// much autonomy the workflow gets.
pub fn decide(risk: RiskLevel, decision: Decision) -> GateAction {
    match (risk, decision) {
        (_, Decision::Halt) => GateAction::Halt,
        (RiskLevel::Low, _) => GateAction::Continue,
        (RiskLevel::Medium, Decision::Proceed) => GateAction::Continue,
        (RiskLevel::Medium, Decision::NeedsHuman) => GateAction::PromptHuman,
        (RiskLevel::High, _) => GateAction::PromptHuman,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_stops_at_every_risk_level() {
        for risk in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            assert_eq!(decide(risk, Decision::Halt), GateAction::Halt);
        }
    }

    #[test]
    fn low_risk_auto_continues_even_on_needs_human() {
        assert_eq!(decide(RiskLevel::Low, Decision::Proceed), GateAction::Continue);
        assert_eq!(decide(RiskLevel::Low, Decision::NeedsHuman), GateAction::Continue);
    }

    #[test]
    fn medium_risk_prompts_only_on_needs_human() {
        assert_eq!(decide(RiskLevel::Medium, Decision::Proceed), GateAction::Continue);
        assert_eq!(decide(RiskLevel::Medium, Decision::NeedsHuman), GateAction::PromptHuman);
    }

    #[test]
    fn high_risk_always_involves_a_human_unless_halted() {
        assert_eq!(decide(RiskLevel::High, Decision::Proceed), GateAction::PromptHuman);
        assert_eq!(decide(RiskLevel::High, Decision::NeedsHuman), GateAction::PromptHuman);
    }
}
