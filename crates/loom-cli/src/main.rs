//! loom - demo driver for the task engine.
//!
//! Starts a few simulated research flows, prints their progress until they
//! settle, then continues the first one with a follow-up flow.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};

use loom_core::app::{EngineBuilder, FlowManager, FlowRequest, FlowView};
use loom_core::config::EngineConfig;
use loom_core::domain::{FlowId, FlowStatus, TaskError};
use loom_core::exec::TaskContext;
use loom_core::impls::TracingEventSink;
use loom_core::ports::{FlowInput, FlowRunner};

/// Run simulated research flows on the loom engine.
#[derive(Parser, Debug)]
#[command(name = "loom", version, about)]
struct Cli {
    /// Path to a loom.toml config file. Defaults are used when missing.
    #[arg(long, env = "LOOM_CONFIG", default_value = "loom.toml")]
    config: String,

    /// Number of flows to start concurrently.
    #[arg(long, default_value_t = 3)]
    flows: usize,

    /// Research topic handed to every flow.
    #[arg(long, default_value = "structured concurrency")]
    topic: String,

    /// Simulated duration of one research phase in milliseconds.
    #[arg(long, default_value_t = 200)]
    phase_ms: u64,
}

// ── ResearchRunner ──────────────────────────────────────────────────

/// Pretends to research a topic in three phases, reporting progress and
/// honouring cancellation between steps.
struct ResearchRunner {
    phase: Duration,
}

#[async_trait]
impl FlowRunner for ResearchRunner {
    async fn run(&self, input: FlowInput, ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
        let topic = input.input["topic"].as_str().unwrap_or("unknown").to_string();
        let sources = input.config["sources"].as_u64().unwrap_or(3);

        ctx.report_phase("planning", 0.1, Some(format!("outlining {topic}").as_str()));
        self.step(&ctx).await?;

        let mut notes = Vec::new();
        for i in 0..sources {
            let fraction = 0.2 + 0.6 * (i + 1) as f64 / sources as f64;
            let step = format!("source {}/{sources}", i + 1);
            ctx.report_phase("researching", fraction, Some(&step));
            self.step(&ctx).await?;
            notes.push(format!("note {} on {topic}", i + 1));
        }

        ctx.report_phase("writing", 0.9, Some("drafting report"));
        self.step(&ctx).await?;

        let builds_on = input
            .previous
            .map(|p| p.result["title"].clone())
            .unwrap_or(serde_json::Value::Null);
        Ok(serde_json::json!({
            "title": format!("Report: {topic}"),
            "notes": notes,
            "builds_on": builds_on,
        }))
    }
}

impl ResearchRunner {
    async fn step(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        tokio::select! {
            _ = tokio::time::sleep(self.phase) => {}
            _ = ctx.cancelled() => {}
        }
        ctx.checkpoint()
    }
}

fn print_view(view: &FlowView) {
    println!(
        "{}  {:<9}  {:>5.1}%  {}",
        view.flow_id,
        format!("{:?}", view.status),
        view.progress.fraction * 100.0,
        view.progress.phase.as_deref().unwrap_or("-"),
    );
}

async fn wait_all(flows: &FlowManager, ids: &[FlowId]) -> anyhow::Result<()> {
    loop {
        let views: Vec<FlowView> = ids
            .iter()
            .filter_map(|id| flows.get_flow_status(*id))
            .collect();
        views.iter().for_each(print_view);
        if views.iter().all(|v| v.status.is_terminal()) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match EngineConfig::load(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded config");
            cfg
        }
        Err(e) => {
            warn!(error = %e, path = %cli.config, "failed to load config, using defaults");
            EngineConfig::default()
        }
    };

    let tasks = EngineBuilder::new()
        .config(config.clone())
        .event_sink(Arc::new(TracingEventSink))
        .build()
        .context("failed to build engine")?;
    let runner = Arc::new(ResearchRunner {
        phase: Duration::from_millis(cli.phase_ms),
    });
    let flows = FlowManager::new(tasks.clone(), runner, config.flows)
        .context("invalid flow configuration")?;
    let gc = flows.spawn_cleanup_loop();

    let mut ids = Vec::new();
    for i in 0..cli.flows {
        let request = FlowRequest::new(serde_json::json!({ "topic": cli.topic }))
            .config(serde_json::json!({ "sources": 2 + i }))
            .tag("demo");
        match flows.start_flow(request).await {
            Ok(id) => ids.push(id),
            Err(TaskError::ResourceExhausted(reason)) => {
                warn!(%reason, "flow refused");
            }
            Err(e) => return Err(e).context("failed to start flow"),
        }
    }
    wait_all(&flows, &ids).await?;

    if let Some(first) = ids.first().copied() {
        if flows.get_flow_status(first).map(|v| v.status) == Some(FlowStatus::Completed) {
            let follow_up = flows
                .start_continuous_flow(
                    first,
                    FlowRequest::new(serde_json::json!({ "topic": format!("{} (follow-up)", cli.topic) })),
                )
                .await
                .context("failed to continue flow")?;
            let view = flows.wait_flow(follow_up).await?;
            print_view(&view);
            if let Some(result) = flows.get_flow_result(follow_up) {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
    }

    let counts = tasks.counts();
    println!(
        "tasks: completed={} failed={} cancelled={}",
        counts.completed, counts.failed, counts.cancelled
    );

    tasks.shutdown();
    tasks.flush_events().await;
    gc.shutdown_and_join().await;
    Ok(())
}
