//! Theory Judge (`spec.md` §4.6, C6): a pure, synchronous validator plus the rollout policy
//! governing strict vs. warn-only mode. Grounded in
//! `original_source/backend/app/engines/theory_judge.py::TheoryJudge`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::JudgeConfig;
use crate::types::{ConsequenceHorizon, ConsequenceKind, EvidenceIndex, FragmentId, Paradigm};

/// Meta-methodological terms that should never surface in a finished theory — interview
/// mechanics leaking into the paradigm, not substantive findings.
const PROHIBITED_META_TERMS: &[&str] = &[
    "informante",
    "identificacion",
    "identificación",
    "entrevista",
    "solicitud de identificacion",
    "solicitud de identificación",
    "consentimiento",
    "diarizacion",
    "diarización",
    "transcripcion",
    "transcripción",
    "cuestionario",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JudgeErrorCode {
    UnknownConstructs,
    DomainSanity,
    ConditionsActionsInvalid,
    ConsequencesInvalid,
    BalanceConsequences,
    BalanceConsequencesWarn,
    PropositionsInvalid,
    ContextInterveningInvalid,
    EvidenceMissing,
    CoverageMinInterviews,
    CoverageConcentration,
}

impl JudgeErrorCode {
    pub fn severity(self) -> Severity {
        match self {
            JudgeErrorCode::BalanceConsequencesWarn | JudgeErrorCode::CoverageConcentration => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeFinding {
    pub code: JudgeErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeStats {
    pub used_evidence_ids: usize,
    pub interviews_covered: usize,
    pub min_interviews_configured: usize,
    pub min_interviews_effective: usize,
    pub adaptive_thresholds: bool,
    pub available_interviews: usize,
    pub max_share_per_interview_observed: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResult {
    pub ok: bool,
    pub errors: Vec<JudgeFinding>,
    pub warnings: Vec<JudgeFinding>,
    pub stats: JudgeStats,
}

impl JudgeResult {
    pub fn error_codes(&self) -> Vec<JudgeErrorCode> {
        self.errors.iter().map(|f| f.code).collect()
    }
}

/// Deterministic validator. No I/O, no async — every input it needs is passed in.
pub struct TheoryJudge {
    min_interviews: usize,
    adaptive_thresholds: bool,
    min_interviews_floor: usize,
    min_interviews_ratio: f32,
    balance_min_evidence: usize,
    max_share_per_interview: f32,
    available_interviews: usize,
    unknown_constructs_ratio: f32,
    effective_min_interviews: usize,
}

impl TheoryJudge {
    pub fn new(config: &JudgeConfig, available_interviews: usize) -> Self {
        let min_interviews = config.min_interviews.max(1);
        let effective_min_interviews = if !config.adaptive_thresholds_on {
            min_interviews
        } else if available_interviews == 0 {
            min_interviews
        } else {
            let floor = 1usize;
            let ratio = config.adaptive_ratio.clamp(0.1, 1.0);
            let adaptive_target =
                floor.max((available_interviews as f32 * ratio).ceil() as usize);
            min_interviews
                .min(adaptive_target)
                .min(available_interviews)
                .max(1)
        };

        Self {
            min_interviews,
            adaptive_thresholds: config.adaptive_thresholds_on,
            min_interviews_floor: 1,
            min_interviews_ratio: config.adaptive_ratio,
            balance_min_evidence: config.balance_min_evidence,
            max_share_per_interview: config.max_share_per_interview,
            available_interviews,
            unknown_constructs_ratio: config.unknown_constructs_ratio,
            effective_min_interviews,
        }
    }

    fn evidence_ids_for(paradigm: &Paradigm, section: &str) -> Vec<String> {
        macro_rules! ids_of {
            ($items:expr) => {
                $items
                    .iter()
                    .flat_map(|item| item.evidence_ids.iter())
                    .filter(|id| !id.trim().is_empty())
                    .cloned()
                    .collect()
            };
        }
        match section {
            "conditions" => ids_of!(paradigm.conditions),
            "actions" => ids_of!(paradigm.actions),
            "consequences" => ids_of!(paradigm.consequences),
            "propositions" => ids_of!(paradigm.propositions),
            "context" => ids_of!(paradigm.context),
            "intervening_conditions" => ids_of!(paradigm.intervening_conditions),
            _ => Vec::new(),
        }
    }

    fn has_missing_evidence(paradigm: &Paradigm, section: &str) -> bool {
        match section {
            "conditions" => !paradigm.conditions.is_empty()
                && paradigm
                    .conditions
                    .iter()
                    .any(|i| i.evidence_ids.iter().all(|e| e.trim().is_empty())),
            "actions" => !paradigm.actions.is_empty()
                && paradigm
                    .actions
                    .iter()
                    .any(|i| i.evidence_ids.iter().all(|e| e.trim().is_empty())),
            "consequences" => !paradigm.consequences.is_empty()
                && paradigm
                    .consequences
                    .iter()
                    .any(|i| i.evidence_ids.iter().all(|e| e.trim().is_empty())),
            "propositions" => !paradigm.propositions.is_empty()
                && paradigm
                    .propositions
                    .iter()
                    .any(|i| i.evidence_ids.iter().all(|e| e.trim().is_empty())),
            "context" => !paradigm.context.is_empty()
                && paradigm
                    .context
                    .iter()
                    .any(|i| i.evidence_ids.iter().all(|e| e.trim().is_empty())),
            "intervening_conditions" => !paradigm.intervening_conditions.is_empty()
                && paradigm
                    .intervening_conditions
                    .iter()
                    .any(|i| i.evidence_ids.iter().all(|e| e.trim().is_empty())),
            _ => false,
        }
    }

    fn contains_prohibited_terms(paradigm: &Paradigm) -> bool {
        let haystack = serde_json::to_string(paradigm)
            .unwrap_or_default()
            .to_lowercase();
        PROHIBITED_META_TERMS.iter().any(|term| haystack.contains(term))
    }

    pub fn evaluate(
        &self,
        paradigm: &Paradigm,
        evidence: &EvidenceIndex,
        missing_evidence_ids: &[String],
    ) -> JudgeResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !evidence.known_category_names.is_empty() {
            let constructs = paradigm.all_named_constructs();
            let checked = constructs.iter().filter(|c| !c.trim().is_empty()).count();
            let unknown = constructs
                .iter()
                .filter(|c| !c.trim().is_empty() && !evidence.is_known_construct(c))
                .count();
            if checked > 0 && (unknown as f32 / checked as f32) >= self.unknown_constructs_ratio {
                errors.push(JudgeFinding {
                    code: JudgeErrorCode::UnknownConstructs,
                    message: format!(
                        "{unknown}/{checked} constructs fall outside the known category set"
                    ),
                });
            }
        }

        if Self::contains_prohibited_terms(paradigm) {
            errors.push(JudgeFinding {
                code: JudgeErrorCode::DomainSanity,
                message: "prohibited meta-methodological term found in the paradigm".to_string(),
            });
        }

        if Self::has_missing_evidence(paradigm, "conditions")
            || Self::has_missing_evidence(paradigm, "actions")
        {
            errors.push(JudgeFinding {
                code: JudgeErrorCode::ConditionsActionsInvalid,
                message: "conditions/actions items must carry non-empty evidence_ids".to_string(),
            });
        }
        if Self::has_missing_evidence(paradigm, "consequences") {
            errors.push(JudgeFinding {
                code: JudgeErrorCode::ConsequencesInvalid,
                message: "consequences items must carry non-empty evidence_ids".to_string(),
            });
        }

        if !paradigm.consequences.is_empty() {
            let types_present: std::collections::HashSet<ConsequenceKind> = paradigm
                .consequences
                .iter()
                .filter_map(|c| c.kind)
                .collect();
            let horizons_present: std::collections::HashSet<ConsequenceHorizon> = paradigm
                .consequences
                .iter()
                .filter_map(|c| c.horizon)
                .collect();
            let required_types = [
                ConsequenceKind::Material,
                ConsequenceKind::Social,
                ConsequenceKind::Institutional,
            ];
            let required_horizons = [ConsequenceHorizon::CortoPlazo, ConsequenceHorizon::LargoPlazo];
            let balance_missing = !required_types.iter().all(|t| types_present.contains(t))
                || !required_horizons.iter().all(|h| horizons_present.contains(h));

            if balance_missing {
                let used_evidence_count_preview: usize = [
                    "conditions",
                    "actions",
                    "consequences",
                    "propositions",
                    "context",
                    "intervening_conditions",
                ]
                .iter()
                .map(|s| Self::evidence_ids_for(paradigm, s).len())
                .sum();

                let message = "consequences must cover material/social/institutional x corto/largo plazo".to_string();
                if self.adaptive_thresholds && used_evidence_count_preview < self.balance_min_evidence {
                    warnings.push(JudgeFinding {
                        code: JudgeErrorCode::BalanceConsequencesWarn,
                        message: format!("{message} (degraded to warning: limited project evidence)"),
                    });
                } else {
                    errors.push(JudgeFinding {
                        code: JudgeErrorCode::BalanceConsequences,
                        message,
                    });
                }
            }
        }

        if Self::has_missing_evidence(paradigm, "propositions") || paradigm.propositions.len() < 5 {
            errors.push(JudgeFinding {
                code: JudgeErrorCode::PropositionsInvalid,
                message: "propositions must number >= 5 and each carry evidence_ids".to_string(),
            });
        }
        if Self::has_missing_evidence(paradigm, "context")
            || Self::has_missing_evidence(paradigm, "intervening_conditions")
        {
            errors.push(JudgeFinding {
                code: JudgeErrorCode::ContextInterveningInvalid,
                message: "context/intervening_conditions items must carry evidence_ids".to_string(),
            });
        }

        if !missing_evidence_ids.is_empty() {
            errors.push(JudgeFinding {
                code: JudgeErrorCode::EvidenceMissing,
                message: format!(
                    "{} evidence_ids do not exist in this project",
                    missing_evidence_ids.len()
                ),
            });
        }

        let used_ids: Vec<String> = [
            "conditions",
            "actions",
            "consequences",
            "propositions",
            "context",
            "intervening_conditions",
        ]
        .iter()
        .flat_map(|s| Self::evidence_ids_for(paradigm, s))
        .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut interviews = std::collections::HashSet::new();
        for id in &used_ids {
            let fragment_id = id.parse::<uuid::Uuid>().ok().map(FragmentId);
            if let Some(interview_id) = fragment_id.and_then(|fid| evidence.fragment_to_interview.get(&fid)) {
                interviews.insert(*interview_id);
                *counts.entry(interview_id.to_string()).or_insert(0) += 1;
            }
        }
        let interviews_covered = interviews.len();
        if interviews_covered < self.effective_min_interviews {
            errors.push(JudgeFinding {
                code: JudgeErrorCode::CoverageMinInterviews,
                message: format!(
                    "insufficient coverage: {interviews_covered} interviews cited (min={})",
                    self.effective_min_interviews
                ),
            });
        }

        let total: usize = counts.values().sum();
        let mut max_share_observed = 0.0f32;
        if total > 0 {
            if let Some((_, top_count)) = counts.iter().max_by_key(|(k, v)| (**v, (*k).clone())) {
                let share = *top_count as f32 / total as f32;
                max_share_observed = share;
                if share >= self.max_share_per_interview {
                    warnings.push(JudgeFinding {
                        code: JudgeErrorCode::CoverageConcentration,
                        message: "a single interview dominates cited evidence".to_string(),
                    });
                }
            }
        }

        JudgeResult {
            ok: errors.is_empty(),
            errors,
            warnings,
            stats: JudgeStats {
                used_evidence_ids: used_ids.len(),
                interviews_covered,
                min_interviews_configured: self.min_interviews,
                min_interviews_effective: self.effective_min_interviews,
                adaptive_thresholds: self.adaptive_thresholds,
                available_interviews: self.available_interviews,
                max_share_per_interview_observed: max_share_observed,
            },
        }
    }
}

/// Whether a judge run, for rollout-accounting purposes, counts as "bad" — any hard error, not
/// warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutMode {
    Strict,
    WarnOnly,
}

/// Meta-validator governing strict vs. warn-only mode, evaluated over the last `W` judge results
/// for a project. See DESIGN.md for the Open Question #3 decision record: a project with fewer
/// than `rollout_min_theories` past results is always warn-only.
pub struct RolloutPolicy<'a> {
    config: &'a JudgeConfig,
}

impl<'a> RolloutPolicy<'a> {
    pub fn new(config: &'a JudgeConfig) -> Self {
        Self { config }
    }

    /// `past_results` is ordered oldest-to-newest and should contain at most `rollout_window`
    /// entries (the caller truncates); `current_mode` is the mode the project was in for the
    /// most recent of those runs.
    pub fn resolve_mode(&self, past_results: &[bool], current_mode: RolloutMode) -> RolloutMode {
        if past_results.len() < self.config.rollout_min_theories {
            return RolloutMode::WarnOnly;
        }
        let window = &past_results[past_results.len().saturating_sub(self.config.rollout_window)..];
        let bad_count = window.iter().filter(|ok| !**ok).count();

        match current_mode {
            RolloutMode::WarnOnly if bad_count <= self.config.rollout_promote_max_bad => {
                RolloutMode::Strict
            }
            RolloutMode::Strict if bad_count >= self.config.rollout_degrade_min_bad => {
                RolloutMode::WarnOnly
            }
            other => match other {
                RolloutMode::Strict => RolloutMode::Strict,
                RolloutMode::WarnOnly => RolloutMode::WarnOnly,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParadigmItem, Proposition};

    fn config() -> JudgeConfig {
        JudgeConfig::default()
    }

    fn paradigm_with_five_propositions() -> Paradigm {
        Paradigm {
            selected_central_category: "adoption".to_string(),
            propositions: (0..5)
                .map(|i| Proposition {
                    text: format!("prop {i}"),
                    evidence_ids: vec![uuid::Uuid::new_v4().to_string()],
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn flags_too_few_propositions() {
        let judge = TheoryJudge::new(&config(), 5);
        let paradigm = Paradigm::default();
        let result = judge.evaluate(&paradigm, &EvidenceIndex::default(), &[]);
        assert!(!result.ok);
        assert!(result
            .error_codes()
            .contains(&JudgeErrorCode::PropositionsInvalid));
    }

    #[test]
    fn flags_missing_evidence_ids() {
        let judge = TheoryJudge::new(&config(), 5);
        let mut paradigm = paradigm_with_five_propositions();
        paradigm.conditions.push(ParadigmItem {
            construct: "trust".to_string(),
            description: String::new(),
            evidence_ids: vec![],
        });
        let result = judge.evaluate(&paradigm, &EvidenceIndex::default(), &[]);
        assert!(result
            .error_codes()
            .contains(&JudgeErrorCode::ConditionsActionsInvalid));
    }

    #[test]
    fn flags_domain_sanity_terms() {
        let judge = TheoryJudge::new(&config(), 5);
        let mut paradigm = paradigm_with_five_propositions();
        paradigm.selected_central_category = "entrevista piloto".to_string();
        let result = judge.evaluate(&paradigm, &EvidenceIndex::default(), &[]);
        assert!(result.error_codes().contains(&JudgeErrorCode::DomainSanity));
    }

    #[test]
    fn surfaces_evidence_missing() {
        let judge = TheoryJudge::new(&config(), 5);
        let paradigm = paradigm_with_five_propositions();
        let missing = vec!["ghost-id".to_string()];
        let result = judge.evaluate(&paradigm, &EvidenceIndex::default(), &missing);
        assert!(result.error_codes().contains(&JudgeErrorCode::EvidenceMissing));
    }

    #[test]
    fn rollout_stays_warn_only_below_min_theories() {
        let cfg = config();
        let policy = RolloutPolicy::new(&cfg);
        let mode = policy.resolve_mode(&[true, true], RolloutMode::Strict);
        assert_eq!(mode, RolloutMode::WarnOnly);
    }

    #[test]
    fn rollout_promotes_after_enough_clean_runs() {
        let cfg = config();
        let history = vec![true; cfg.rollout_min_theories];
        let policy = RolloutPolicy::new(&cfg);
        let mode = policy.resolve_mode(&history, RolloutMode::WarnOnly);
        assert_eq!(mode, RolloutMode::Strict);
    }

    #[test]
    fn rollout_demotes_after_enough_bad_runs() {
        let cfg = config();
        let mut history = vec![true; cfg.rollout_min_theories];
        for ok in history.iter_mut().take(cfg.rollout_degrade_min_bad) {
            *ok = false;
        }
        let policy = RolloutPolicy::new(&cfg);
        let mode = policy.resolve_mode(&history, RolloutMode::Strict);
        assert_eq!(mode, RolloutMode::WarnOnly);
    }
}
