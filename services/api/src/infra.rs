use judging::workflows::judging::{InMemoryJudgingService, Judge, JudgeId, PipelinePolicy};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;

/// Criteria loaded when no export is supplied on the command line.
pub(crate) const DEFAULT_CRITERIA: &str = include_str!("../data/criteria.csv");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Builds the in-process service and registers a criteria version for every stage.
pub(crate) fn build_service(
    policy: PipelinePolicy,
    criteria_csv: Option<&Path>,
) -> Result<InMemoryJudgingService, AppError> {
    let service = InMemoryJudgingService::in_memory(policy)?;
    let registered = match criteria_csv {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            service.import_criteria(file)?
        }
        None => service.import_criteria(DEFAULT_CRITERIA.as_bytes())?,
    };
    info!(stages = registered.len(), "criteria registered");
    Ok(service)
}

/// Registers a roster of `id:Category|Category` entries. An id without categories covers all.
pub(crate) fn register_roster<'a>(
    service: &InMemoryJudgingService,
    entries: impl IntoIterator<Item = &'a str>,
) -> Vec<Judge> {
    entries
        .into_iter()
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let (id, categories) = match entry.split_once(':') {
                Some((id, categories)) => (
                    id.trim(),
                    categories
                        .split('|')
                        .map(str::trim)
                        .filter(|category| !category.is_empty())
                        .map(str::to_string)
                        .collect(),
                ),
                None => (entry.trim(), Vec::new()),
            };
            service.register_judge(Judge {
                id: JudgeId(id.to_string()),
                name: id.to_string(),
                categories,
                active: true,
            })
        })
        .collect()
}
