//! CLI entrypoint: bootstraps the platform from environment configuration and runs a single
//! theory-generation task for one project, polling to completion.
//!
//! Grounded in the teacher's `commands/up.rs` (tracing init, clap subcommand dispatch) — this
//! binary has one subcommand instead of a full CLI surface, since the platform's real entrypoint
//! is the HTTP surface in front of [`theogen_core::orchestrator::TaskOrchestrator`], not this CLI.

use clap::Parser;
use uuid::Uuid;

use theogen_core::config::PlatformConfig;
use theogen_core::orchestrator::Dispatcher;
use theogen_core::theory::TheoryRunRequest;
use theogen_core::types::ProjectId;
use theogen_core::Platform;

#[derive(Parser, Debug)]
#[command(name = "theogen-pipeline", about = "Run a grounded-theory generation pass for one project")]
struct Args {
    /// Project id to generate a theory for.
    #[arg(long)]
    project_id: Uuid,

    /// Owner id scoping the run, if known.
    #[arg(long)]
    owner_id: Option<Uuid>,

    /// Domain template key (generic, education, ngo, government, market_research).
    #[arg(long, default_value = "generic")]
    template: String,

    /// Number of top-ranked categories to retrieve semantic evidence for.
    #[arg(long, default_value_t = 8)]
    top_n_categories: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let (config, issues) = PlatformConfig::from_env();
    for issue in &issues {
        tracing::warn!(field = issue.field, detail = %issue.detail, "config issue at startup");
    }
    if config.fail_startup_on_config_errors && !issues.is_empty() {
        anyhow::bail!("refusing to start: {} config issue(s) found", issues.len());
    }

    let platform = Platform::bootstrap(config).await?;
    let project_id = ProjectId(args.project_id);

    let task_id = platform
        .orchestrator
        .create_task(project_id, args.owner_id)
        .await;
    platform
        .dispatcher
        .dispatch(
            task_id,
            project_id,
            args.owner_id,
            TheoryRunRequest {
                project_id,
                owner_id: args.owner_id,
                template_key: args.template,
                top_n_categories: args.top_n_categories,
            },
        )
        .await?;

    loop {
        let Some(record) = platform.orchestrator.get_task(task_id).await else {
            anyhow::bail!("task {task_id} vanished from the orchestrator");
        };
        tracing::info!(status = ?record.status, progress = record.progress, step = ?record.step, "poll");
        match record.status {
            theogen_core::orchestrator::TaskStatus::Completed => {
                println!("{}", serde_json::to_string_pretty(&record.result)?);
                break;
            }
            theogen_core::orchestrator::TaskStatus::Failed => {
                anyhow::bail!("theory run failed: {:?}", record.error);
            }
            _ => {
                tokio::time::sleep(std::time::Duration::from_secs(platform.orchestrator.next_poll_seconds()))
                    .await;
            }
        }
    }

    Ok(())
}
