//! The Straussian paradigm produced by the Theory Engine and consumed by the Theory Judge.
//!
//! Grounded in `original_source/backend/app/engines/theory_engine.py` and
//! `theory_pipeline.py`'s `normalize_paradigm`. Kept loosely typed (`evidence_ids: Vec<String>`,
//! free-form `constructs`) because the LLM output shape varies; the judge and normaliser are
//! what enforce structure, not `serde`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{CategoryId, FragmentId};

/// One evidence-bearing item in a paradigm section (a condition, action, consequence, ...).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParadigmItem {
    pub construct: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
}

/// Classification axes used by `BALANCE_CONSEQUENCES` (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsequenceKind {
    Material,
    Social,
    Institutional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsequenceHorizon {
    CortoPlazo,
    LargoPlazo,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsequenceItem {
    pub construct: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    pub kind: Option<ConsequenceKind>,
    pub horizon: Option<ConsequenceHorizon>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Proposition {
    pub text: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
}

/// The Straussian paradigm: `{causal conditions, context, intervening conditions, actions,
/// consequences, propositions}` around a central category.
///
/// `conditions` is the normalised key; `causal_conditions` is read only when `conditions` is
/// absent (see SPEC_FULL.md §9 Open Question #1). Likewise `actions` normalises
/// `action_strategies`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Paradigm {
    pub selected_central_category: String,
    #[serde(default)]
    pub conditions: Vec<ParadigmItem>,
    #[serde(default)]
    pub context: Vec<ParadigmItem>,
    #[serde(default)]
    pub intervening_conditions: Vec<ParadigmItem>,
    #[serde(default)]
    pub actions: Vec<ParadigmItem>,
    #[serde(default)]
    pub consequences: Vec<ConsequenceItem>,
    #[serde(default)]
    pub propositions: Vec<Proposition>,
    #[serde(default)]
    pub confidence_score: f32,
}

impl Paradigm {
    /// Aliases legacy key names in an unparsed `serde_json::Value` before typed deserialization:
    /// `causal_conditions` → `conditions` (only when `conditions` is absent or empty),
    /// `action_strategies` → `actions` (same rule). Missing list keys default to `[]`.
    pub fn normalize(mut raw: serde_json::Value) -> serde_json::Value {
        if let Some(obj) = raw.as_object_mut() {
            Self::alias_list_key(obj, "causal_conditions", "conditions");
            Self::alias_list_key(obj, "action_strategies", "actions");
            for key in [
                "conditions",
                "context",
                "intervening_conditions",
                "actions",
                "consequences",
                "propositions",
            ] {
                obj.entry(key).or_insert_with(|| serde_json::json!([]));
            }
        }
        raw
    }

    fn alias_list_key(
        obj: &mut serde_json::Map<String, serde_json::Value>,
        legacy_key: &str,
        preferred_key: &str,
    ) {
        let preferred_present = obj
            .get(preferred_key)
            .map(|v| v.as_array().map(|a| !a.is_empty()).unwrap_or(false))
            .unwrap_or(false);
        if preferred_present {
            return;
        }
        if let Some(legacy_value) = obj.remove(legacy_key) {
            obj.insert(preferred_key.to_string(), legacy_value);
        }
    }

    /// Every construct name mentioned across the condition/action/context/intervening sections.
    pub fn all_named_constructs(&self) -> Vec<&str> {
        self.conditions
            .iter()
            .chain(self.context.iter())
            .chain(self.intervening_conditions.iter())
            .chain(self.actions.iter())
            .map(|item| item.construct.as_str())
            .collect()
    }

    /// Every non-empty `evidence_ids` entry referenced anywhere in the paradigm, across all
    /// evidence-bearing sections. Used to find evidence ids the project doesn't recognise.
    pub fn referenced_evidence_ids(&self) -> Vec<&str> {
        let items = self
            .conditions
            .iter()
            .chain(self.context.iter())
            .chain(self.intervening_conditions.iter())
            .chain(self.actions.iter())
            .flat_map(|item| item.evidence_ids.iter());
        let consequences = self.consequences.iter().flat_map(|c| c.evidence_ids.iter());
        let propositions = self.propositions.iter().flat_map(|p| p.evidence_ids.iter());
        items
            .chain(consequences)
            .chain(propositions)
            .map(|id| id.as_str())
            .filter(|id| !id.trim().is_empty())
            .collect()
    }

    /// Clone with every section's `evidence_ids` cleared. Used to shrink a stage payload by
    /// dropping evidence without touching the paradigm the pipeline acts on afterwards.
    pub fn without_evidence_ids(&self) -> Paradigm {
        fn strip_items(items: &[ParadigmItem]) -> Vec<ParadigmItem> {
            items
                .iter()
                .map(|i| ParadigmItem {
                    evidence_ids: Vec::new(),
                    ..i.clone()
                })
                .collect()
        }
        Paradigm {
            selected_central_category: self.selected_central_category.clone(),
            conditions: strip_items(&self.conditions),
            context: strip_items(&self.context),
            intervening_conditions: strip_items(&self.intervening_conditions),
            actions: strip_items(&self.actions),
            consequences: self
                .consequences
                .iter()
                .map(|c| ConsequenceItem {
                    evidence_ids: Vec::new(),
                    ..c.clone()
                })
                .collect(),
            propositions: self
                .propositions
                .iter()
                .map(|p| Proposition {
                    evidence_ids: Vec::new(),
                    ..p.clone()
                })
                .collect(),
            confidence_score: self.confidence_score,
        }
    }
}

/// Maps evidence ids referenced by a paradigm back to the fragment and interview that produced
/// them, and which category names are known in the project — used by both the Theory Judge and
/// the repair loop.
#[derive(Debug, Clone, Default)]
pub struct EvidenceIndex {
    pub fragment_to_interview: std::collections::HashMap<FragmentId, super::InterviewId>,
    pub known_evidence_ids: HashSet<String>,
    pub known_category_names: HashSet<String>,
    pub category_ids_by_name: std::collections::HashMap<String, CategoryId>,
}

impl EvidenceIndex {
    pub fn is_known(&self, evidence_id: &str) -> bool {
        self.known_evidence_ids.contains(evidence_id)
    }

    pub fn is_known_construct(&self, construct: &str) -> bool {
        self.known_category_names
            .contains(&construct.trim().to_lowercase())
    }
}
