//! Policy engine.
//!
//! The one place where deterministic rules reconcile every signal into the
//! final decision. The model can only escalate (Allow → Warn → Block); no
//! rule here ever relaxes a harder signal on the model's say-so.

use crate::client::LlmDecision;
use crate::error::Result;
use crate::protocol::Decision;
use crate::protocol::DecisionAction;
use crate::protocol::DecisionSource;
use crate::protocol::FailMode;
use crate::protocol::ResolutionLog;

/// Aggregated signals from the pipeline stages that run before the model.
#[derive(Debug, Clone, Default)]
pub struct PolicySignals {
    /// Rule 1: the blocklist matched the canonical text, a variant, or the
    /// post-resolution text.
    pub blocklist_hit: Option<Decision>,
    /// Rules 2, 3 and 6 read the resolver's log.
    pub resolution: ResolutionLog,
    /// Rule 4: variable-in-command-position or `$(…)` in exec position.
    pub ast_flag_reason: Option<String>,
    /// Most restrictive decision among compound sub-commands, if compound.
    pub compound_floor: Option<DecisionAction>,
    /// Rule 5: canonicalizer or AST parser could not be trusted.
    pub parse_unreliable: bool,
    pub fail_mode: FailMode,
}

/// Rules 1-3 (and a compound sub-block): terminal blocks that hold no matter
/// what the model would have said. The validator consults this before
/// spending a model call.
pub fn hard_block(signals: &PolicySignals) -> Option<Decision> {
    // Rule 1.
    if let Some(hit) = &signals.blocklist_hit {
        return Some(hit.clone());
    }
    // Rule 2.
    if signals.resolution.any_blocked() {
        let reason = signals
            .resolution
            .entries
            .iter()
            .find(|e| e.status == crate::protocol::SubstitutionStatus::Blocked)
            .and_then(|e| e.reason.clone())
            .unwrap_or_else(|| "inner command substitution was blocked".to_string());
        return Some(Decision::block(
            format!("inner command substitution blocked: {reason}"),
            1.0,
            DecisionSource::Policy,
        ));
    }
    // Rule 3.
    if signals.resolution.any_unresolvable() {
        let reason = signals
            .resolution
            .entries
            .iter()
            .find(|e| e.status == crate::protocol::SubstitutionStatus::Unresolvable)
            .and_then(|e| e.reason.clone())
            .unwrap_or_else(|| "substitution could not be resolved".to_string());
        return Some(Decision::block(
            format!("unresolvable command substitution: {reason}"),
            1.0,
            DecisionSource::Policy,
        ));
    }
    // A blocked sub-command blocks the compound that contains it.
    if signals.compound_floor == Some(DecisionAction::Block) {
        return Some(Decision::block(
            "a sub-command of this compound command was blocked",
            1.0,
            DecisionSource::Ast,
        ));
    }
    None
}

/// Rules 4-9, applied to the model outcome after [`hard_block`] abstained.
pub fn decide(signals: &PolicySignals, llm: &Result<LlmDecision>) -> Decision {
    if let Some(block) = hard_block(signals) {
        return block;
    }

    match llm {
        Ok(verdict) => {
            if verdict.action != DecisionAction::Allow {
                // Rule 7: the model may escalate freely.
                return Decision::new(
                    verdict.action,
                    verdict.reason.clone(),
                    verdict.confidence,
                    DecisionSource::LlmOnly,
                );
            }

            // The model said Allow; rules 4, 5 and 6 may floor it to Warn.
            if let Some(reason) = &signals.ast_flag_reason {
                return Decision::warn(
                    format!("command structure requires confirmation: {reason}"),
                    verdict.confidence,
                    DecisionSource::Ast,
                );
            }
            if signals.parse_unreliable {
                return Decision::warn(
                    "command could not be reliably parsed; proceed only if you typed exactly this",
                    verdict.confidence,
                    DecisionSource::Policy,
                );
            }
            if signals.resolution.any_warned() {
                return Decision::warn(
                    "an inner command substitution was flagged and not executed",
                    verdict.confidence,
                    DecisionSource::Policy,
                );
            }
            if matches!(signals.compound_floor, Some(DecisionAction::Warn)) {
                return Decision::warn(
                    "a sub-command of this compound command requires confirmation",
                    verdict.confidence,
                    DecisionSource::Ast,
                );
            }

            Decision::allow(verdict.reason.clone(), verdict.confidence, DecisionSource::LlmOnly)
        }
        // Rule 8. (Rule 9, unknown actions, is enforced at parse: an
        // out-of-range action never becomes an LlmDecision and surfaces here
        // as a provider failure.)
        Err(_) => match signals.fail_mode {
            FailMode::Safe => Decision::block(
                "no model provider produced a usable decision (fail-safe)",
                1.0,
                DecisionSource::Policy,
            ),
            FailMode::Open => Decision::warn(
                "no model provider produced a usable decision (fail-open)",
                1.0,
                DecisionSource::Policy,
            ),
        },
    }
}
