//! Domain templates and prompt assembly (`spec.md` §4.5 "Prompt assembly"), grounded in
//! `original_source/backend/app/prompts/domain_templates.py` and `prompt_builder.py`.
//!
//! Pure string assembly, no I/O. `get_template` never errors on an unknown key — it falls back
//! to `"generic"`, matching the original's `.get(key, DOMAIN_TEMPLATES["generic"])`.

use crate::budget::ChatMessage;

pub struct DomainTemplate {
    pub key: &'static str,
    pub actors: &'static [&'static str],
    pub critical_dimensions: &'static [&'static str],
    pub metrics: &'static [&'static str],
    pub extra_instructions: &'static str,
}

const DOMAIN_TEMPLATES: &[DomainTemplate] = &[
    DomainTemplate {
        key: "generic",
        actors: &["participants", "organization", "environment"],
        critical_dimensions: &["causes", "actions", "consequences", "tensions"],
        metrics: &["consistency", "saturation", "traceability"],
        extra_instructions: "Use clear, falsifiable analytic language.",
    },
    DomainTemplate {
        key: "education",
        actors: &["students", "teachers", "families", "school administration"],
        critical_dimensions: &["learning", "pedagogical practice", "equity", "retention"],
        metrics: &["achievement", "attendance", "persistence", "satisfaction"],
        extra_instructions: "Prioritize the educational community, learning barriers, and institutional conditions.",
    },
    DomainTemplate {
        key: "ngo",
        actors: &["beneficiaries", "program staff", "volunteers", "allies"],
        critical_dimensions: &["impact", "inclusion", "sustainability", "governance"],
        metrics: &["reach", "perceived impact", "continuity", "adoption"],
        extra_instructions: "Highlight social change, operational risk, and accountability mechanisms.",
    },
    DomainTemplate {
        key: "government",
        actors: &["citizens", "civil servants", "agencies", "vendors"],
        critical_dimensions: &["efficiency", "coverage", "service quality", "transparency"],
        metrics: &["response time", "coverage", "satisfaction", "compliance"],
        extra_instructions: "Emphasize institutional bottlenecks, regulation, and implementation capacity.",
    },
    DomainTemplate {
        key: "market_research",
        actors: &["segments", "buyers", "users", "channels"],
        critical_dimensions: &["drivers", "barriers", "journey", "trade-offs", "willingness_to_pay"],
        metrics: &["NPS", "CSAT", "conversion", "retention", "WTP"],
        extra_instructions: "Produce actionable market insights and surface contradictions between segments.",
    },
];

pub fn get_template(key: &str) -> &'static DomainTemplate {
    let normalized = key.trim().to_lowercase();
    DOMAIN_TEMPLATES
        .iter()
        .find(|t| t.key == normalized)
        .unwrap_or(&DOMAIN_TEMPLATES[0])
}

fn domain_brief(template: &DomainTemplate) -> String {
    format!(
        "Template={}; Actors={}; Dimensions={}; Metrics={}; Instructions={}",
        template.key,
        template.actors.join(", "),
        template.critical_dimensions.join(", "),
        template.metrics.join(", "),
        template.extra_instructions,
    )
}

/// Theory Engine stages that have a (system, user) prompt pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStep {
    IdentifyCentralCategory,
    BuildParadigm,
    AnalyzeGaps,
    Repair,
}

impl PromptStep {
    fn system_prompt(self) -> &'static str {
        match self {
            PromptStep::IdentifyCentralCategory => {
                "You identify the central category of a grounded-theory analysis from a set of \
                 categories and their network metrics. Respond with strict JSON only."
            }
            PromptStep::BuildParadigm => {
                "You build a Straussian paradigm model around a central category. Every item in \
                 an evidence-bearing section must carry non-empty evidence_ids. Any construct \
                 introduced in a proposition must also appear as a category in \
                 conditions/actions/consequences or context/intervening_conditions. Respond with \
                 strict JSON only."
            }
            PromptStep::AnalyzeGaps => {
                "You analyse theoretical saturation and propose a theoretical sampling plan. \
                 Respond with strict JSON only."
            }
            PromptStep::Repair => {
                "You patch one section of an existing Straussian paradigm to satisfy a specific \
                 deficiency. Return a strictly-scoped JSON patch covering only the requested \
                 section."
            }
        }
    }
}

/// Builds the (system, user) message pair for a stage, folding the domain template's brief into
/// the system prompt. `payload` is the caller-serialized JSON body for the stage (categories +
/// network, central + other categories, paradigm, or a repair instruction).
pub fn build_prompt(step: PromptStep, template_key: &str, payload: &str) -> Vec<ChatMessage> {
    let template = get_template(template_key);
    let system = format!("{}\n\n{}", step.system_prompt(), domain_brief(template));
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system,
        },
        ChatMessage {
            role: "user".to_string(),
            content: payload.to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_template_key_falls_back_to_generic() {
        let template = get_template("space_marines");
        assert_eq!(template.key, "generic");
    }

    #[test]
    fn template_lookup_is_case_insensitive() {
        let template = get_template("EDUCATION");
        assert_eq!(template.key, "education");
    }

    #[test]
    fn build_prompt_folds_domain_brief_into_system_message() {
        let messages = build_prompt(PromptStep::BuildParadigm, "ngo", "{}");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("beneficiaries"));
        assert_eq!(messages[1].content, "{}");
    }
}
