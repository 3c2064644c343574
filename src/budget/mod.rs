//! Token budgeter (`spec.md` §4.3, C3).
//!
//! Pure and side-effect-free: it never calls the LLM. Grounded in
//! `original_source/backend/app/utils/token_budget.py` (`estimate_tokens`,
//! `estimate_messages_tokens`, `fits_context`, `ensure_within_budget`).

use serde::{Deserialize, Serialize};

/// Per-message overhead added on top of raw content-token estimates, matching the constant the
/// original budgeter folds into `estimate_messages_tokens` for role/field framing.
const TOKENS_PER_MESSAGE_OVERHEAD: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Estimates tokens for a single string. Prefers a real tokenizer for the model; falls back to
/// `ceil(len/4)` when no tokenizer is available for it.
pub fn estimate_tokens(text: &str, model: &str) -> usize {
    if let Some(bpe) = tokenizer_for_model(model) {
        bpe.encode_with_special_tokens(text).len()
    } else {
        (text.chars().count() + 3) / 4
    }
}

pub fn estimate_messages_tokens(messages: &[ChatMessage], model: &str) -> usize {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content, model) + TOKENS_PER_MESSAGE_OVERHEAD)
        .sum()
}

fn tokenizer_for_model(model: &str) -> Option<tiktoken_rs::CoreBPE> {
    tiktoken_rs::get_bpe_from_model(model).ok()
}

pub fn fits_context(
    messages: &[ChatMessage],
    model: &str,
    context_limit: usize,
    max_output_tokens: usize,
    margin: usize,
) -> bool {
    estimate_messages_tokens(messages, model) + max_output_tokens + margin <= context_limit
}

/// One applied reduction, in the fixed priority order `spec.md` §4.3 mandates. The budgeter
/// tries `FragmentsPerCategory` before `FragmentChars`, and so on; callers implement the actual
/// payload shrink in their `degrade_cb` and report back which step they performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeStep {
    FragmentsPerCategory,
    FragmentChars,
    Categories,
    NetworkTop,
    StripEvidenceStage2,
    StripEvidenceStage3,
}

impl DegradeStep {
    /// The fixed priority order a `degrade_cb` is expected to walk through.
    pub const PRIORITY_ORDER: [DegradeStep; 6] = [
        DegradeStep::FragmentsPerCategory,
        DegradeStep::FragmentChars,
        DegradeStep::Categories,
        DegradeStep::NetworkTop,
        DegradeStep::StripEvidenceStage2,
        DegradeStep::StripEvidenceStage3,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradeLogEntry {
    pub step: DegradeStep,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetDebug {
    #[serde(rename = "degradation_steps")]
    pub steps: Vec<DegradeLogEntry>,
    pub final_tokens: usize,
    pub accepted: bool,
}

/// Error returned when a payload still doesn't fit after `max_steps` degrade attempts, or the
/// caller's `degrade_cb` ran out of reductions to offer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("budget exceeded after {steps_taken} degrade steps")]
pub struct BudgetExceededError {
    pub steps_taken: usize,
    pub debug: BudgetDebug,
}

/// Builds messages, checks the budget, and repeatedly calls `degrade_cb` (which mutates whatever
/// state `build_messages` closes over and returns the step it took, or `None` when it has
/// nothing left to shrink) until the payload fits or `max_steps` is exhausted.
///
/// `build_messages` and `degrade_cb` are plain closures rather than trait objects: the budgeter
/// itself stays generic and allocation-free across call sites (coding prompts, each theory
/// stage), matching `spec.md` §4.3's "pure and side-effect-free" requirement — all mutation
/// happens in the caller-supplied closures, never here.
pub fn ensure_within_budget<B, D>(
    model: &str,
    context_limit: usize,
    max_output_tokens: usize,
    margin: usize,
    max_steps: usize,
    mut build_messages: B,
    mut degrade_cb: D,
) -> Result<(Vec<ChatMessage>, BudgetDebug), BudgetExceededError>
where
    B: FnMut() -> Vec<ChatMessage>,
    D: FnMut(DegradeStep) -> bool,
{
    let mut debug = BudgetDebug::default();
    let mut messages = build_messages();
    let mut tokens = estimate_messages_tokens(&messages, model);

    if tokens + max_output_tokens + margin <= context_limit {
        debug.final_tokens = tokens;
        debug.accepted = true;
        return Ok((messages, debug));
    }

    for step in DegradeStep::PRIORITY_ORDER.iter().cycle().take(max_steps) {
        if !degrade_cb(*step) {
            continue;
        }
        let tokens_before = tokens;
        messages = build_messages();
        tokens = estimate_messages_tokens(&messages, model);
        debug.steps.push(DegradeLogEntry {
            step: *step,
            tokens_before,
            tokens_after: tokens,
        });

        if tokens + max_output_tokens + margin <= context_limit {
            debug.final_tokens = tokens;
            debug.accepted = true;
            return Ok((messages, debug));
        }
    }

    debug.final_tokens = tokens;
    debug.accepted = false;
    Err(BudgetExceededError {
        steps_taken: debug.steps.len(),
        debug,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_estimate_is_len_over_four() {
        let tokens = estimate_tokens("abcdefgh", "unknown-model-xyz");
        assert_eq!(tokens, 2);
    }

    #[test]
    fn accepts_without_degrading_when_small() {
        let (messages, debug) = ensure_within_budget(
            "unknown-model-xyz",
            1000,
            100,
            10,
            6,
            || {
                vec![ChatMessage {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                }]
            },
            |_| false,
        )
        .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(debug.steps.is_empty());
        assert!(debug.accepted);
    }

    #[test]
    fn degrades_until_it_fits() {
        let mut size = 2000usize;
        let (_, debug) = ensure_within_budget(
            "unknown-model-xyz",
            200,
            10,
            5,
            6,
            || {
                vec![ChatMessage {
                    role: "user".to_string(),
                    content: "x".repeat(size),
                }]
            },
            |_step| {
                size /= 2;
                true
            },
        )
        .unwrap();
        assert!(!debug.steps.is_empty());
        assert!(debug.accepted);
    }

    #[test]
    fn reports_budget_exceeded_when_degrade_cb_gives_up() {
        let err = ensure_within_budget(
            "unknown-model-xyz",
            10,
            5,
            1,
            3,
            || {
                vec![ChatMessage {
                    role: "user".to_string(),
                    content: "x".repeat(1000),
                }]
            },
            |_| false,
        )
        .unwrap_err();
        assert_eq!(err.steps_taken, 0);
    }

    #[test]
    fn priority_order_tries_fragments_per_category_first() {
        assert_eq!(
            DegradeStep::PRIORITY_ORDER[0],
            DegradeStep::FragmentsPerCategory
        );
        assert_eq!(DegradeStep::PRIORITY_ORDER[1], DegradeStep::FragmentChars);
    }
}
