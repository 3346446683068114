//! Handlers for the `gate` and `process` replay commands.

use anyhow::Context;
use nodes::{AdmissionSummary, ReplayRequest};
use pipeline::RunId;
use tracing::{error, info};

use crate::config::{AppConfig, ProviderKind};
use crate::run::{cancel_on_interrupt, orchestrator, report};
use crate::{telemetry, ReplayArgs};

/// Re-evaluates the gates of a stored run.
pub async fn gate(mut config: AppConfig, args: ReplayArgs) -> anyhow::Result<()> {
    // No provider call is made, so no API key is needed.
    config.provider.kind = ProviderKind::Mock;
    let telemetry = telemetry::init(&config.logging, &config.telemetry)?;

    let result = async {
        let request = request(&args)?;
        let orchestrator = orchestrator(&config)?;
        info!(run_id = %request.run_id, date = %request.date, "replaying gates");
        let (cancel, interrupt) = cancel_on_interrupt();
        let outcome = orchestrator.replay_gates(request, cancel).await;
        interrupt.abort();
        Ok::<_, anyhow::Error>(outcome?)
    }
    .await;
    match &result {
        Ok(summary) => report_admission(summary),
        Err(e) => error!(error = format!("{e:#}"), "gate replay failed"),
    }
    telemetry.shutdown();
    result.map(|_| ())
}

/// Re-runs the chains, the daily analysis and the cost report of a stored run.
pub async fn process(mut config: AppConfig, args: ReplayArgs) -> anyhow::Result<()> {
    if args.mock_llm {
        config.provider.kind = ProviderKind::Mock;
    }
    let telemetry = telemetry::init(&config.logging, &config.telemetry)?;

    let result = async {
        let request = request(&args)?;
        let orchestrator = orchestrator(&config)?;
        info!(
            run_id = %request.run_id,
            date = %request.date,
            provider = ?config.provider.kind,
            "replaying chains"
        );
        let (cancel, interrupt) = cancel_on_interrupt();
        let outcome = orchestrator.replay_process(request, cancel).await;
        interrupt.abort();
        Ok::<_, anyhow::Error>(outcome?)
    }
    .await;
    match &result {
        Ok(summary) => report(summary),
        Err(e) => error!(error = format!("{e:#}"), "process replay failed"),
    }
    telemetry.shutdown();
    result.map(|_| ())
}

fn request(args: &ReplayArgs) -> anyhow::Result<ReplayRequest> {
    Ok(ReplayRequest {
        run_id: RunId::new(args.run_id.as_str())
            .with_context(|| format!("invalid run id {:?}", args.run_id))?,
        date: args.date,
    })
}

fn report_admission(summary: &AdmissionSummary) {
    info!(
        run_id = %summary.run_id,
        candidates = summary.candidates,
        earlier_admissions = summary.earlier_admissions,
        admitted = summary.admitted,
        rejected = summary.rejected(),
        cancelled = summary.cancelled,
        "gate replay finished"
    );
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "summary could not be rendered"),
    }
}
