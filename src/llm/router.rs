//! Model routing table, grounded in
//! `original_source/backend/app/engines/model_router.py`.

use crate::config::GatewayConfig;

/// Picks the deployment name for a named task. Unknown tasks fall back to the router model —
/// the original does the same rather than erroring on an unrecognised task string.
pub fn model_for_task(task: &str, config: &GatewayConfig) -> String {
    match task {
        "identify_central_category" => config.model_reasoning_advanced.clone(),
        "build_paradigm" => config.model_router.clone(),
        "analyze_gaps" => config.model_reasoning_fast.clone(),
        "repair" => config.model_reasoning_fast.clone(),
        "coding" => config.model_reasoning_fast.clone(),
        _ => config.model_router.clone(),
    }
}
