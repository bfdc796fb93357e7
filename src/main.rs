//! Steward CLI
//!
//! 对一条请求跑完整编排链路：流式打印计划、步骤进度与回答，结束后输出来源与 token 用量。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use steward::config::load_config;
use steward::pipeline::Progress;
use steward::tools::ToolManifest;
use steward::{build_orchestrator, observability, PipelineEvent, QueryRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Plan, run tools and answer one request", long_about = None)]
struct Cli {
    /// The request to process
    message: String,

    /// Conversation session id (history is loaded and saved under it)
    #[arg(long)]
    session: Option<String>,

    /// User id; numeric ids get long-term preference learning
    #[arg(long, default_value = "0")]
    user: String,

    /// Extra config file layered over config/default.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print events and the final response as JSON lines
    #[arg(long)]
    json: bool,
}

fn print_event(event: &PipelineEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        PipelineEvent::Plan(plan) => {
            eprintln!("plan: {} ({} steps)", plan.understanding, plan.steps.len());
            if !plan.requires_approval.is_empty() {
                eprintln!("  requires approval: {}", plan.requires_approval.join(", "));
            }
        }
        PipelineEvent::Progress(Progress::Step { step, total, tool, .. }) => {
            eprintln!("[{step}/{total}] {tool}");
        }
        PipelineEvent::Progress(Progress::Stage { message }) => eprintln!("{message}"),
        PipelineEvent::ToolStart { .. } => {}
        PipelineEvent::ToolResult { summary, .. } => eprintln!("  ok: {summary}"),
        PipelineEvent::ToolError { error, .. } => eprintln!("  error: {error}"),
        PipelineEvent::ResponseChunk { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init();

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let orchestrator = build_orchestrator(&cfg, &ToolManifest::builtin())
        .await
        .context("Failed to build orchestrator")?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let json = cli.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let mut request = QueryRequest::new(cli.message, cli.user);
    request.session_id = cli.session;
    let result = orchestrator.process_query(request, Some(tx), cancel).await;
    let _ = printer.await;
    orchestrator.flush_memory().await;

    let response = result.context("Query failed")?;
    if json {
        println!("{}", serde_json::to_string(&response)?);
        return Ok(());
    }

    println!();
    for d in &response.degraded {
        eprintln!("(degraded: {d})");
    }
    if let Some(job) = &response.job {
        eprintln!(
            "job {} {}",
            job.job_id,
            job.status.as_deref().unwrap_or("")
        );
    }
    eprintln!(
        "model: {}  tokens: planning {} / synthesis {}",
        response.model, response.tokens.planning, response.tokens.synthesis
    );
    Ok(())
}
