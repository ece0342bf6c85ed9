use crate::cli::ServeArgs;
use crate::error::AppError;
use crate::infra::{build_service, register_roster, AppState};
use crate::routes::app;
use axum_prometheus::PrometheusMetricLayer;
use judging::config::AppConfig;
use judging::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let service = build_service(config.pipeline.clone(), args.criteria_csv.as_deref())?;
    let roster = register_roster(&service, args.judges.iter().map(String::as_str));
    info!(judges = roster.len(), "judge roster registered");

    let router = app(Arc::new(service), app_state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "judging service ready");

    axum::serve(listener, router).await?;
    Ok(())
}
