use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use blueprint_agent::{Pipeline, RunLogger, RunOptions, StageContext};
use blueprint_core::config::AppConfig;
use blueprint_core::event::EventBus;
use blueprint_core::types::RunId;
use blueprint_llm::StructuredClient;
use blueprint_tools::ProjectFs;

#[derive(Parser)]
#[command(
    name = "blueprint",
    version,
    about = "Plan, architect and code a project from a single prompt"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "blueprint.toml")]
    config: PathBuf,

    /// Verbose logging (same as `log.debug = true`)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a project from a prompt
    Run {
        /// Maximum executions of any single stage
        #[arg(long)]
        max_steps: Option<usize>,
        /// Directory to write the generated project into
        #[arg(long)]
        output_dir: Option<String>,
        /// The project request (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Show current configuration
    Config,
    /// Show the workflow graph
    Graph,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "blueprint", &mut io::stdout());
        return Ok(());
    }

    let config_found = cli.config.exists();
    let mut config = AppConfig::load_or_default(&cli.config)?;

    let default_filter = if cli.verbose || config.log.debug {
        "blueprint=debug,info"
    } else {
        "blueprint=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    if config_found {
        info!(path = %cli.config.display(), "Loaded config");
    } else {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
        if config.model.api_key.is_none() {
            eprintln!("Warning: GROQ_API_KEY is not set and no config file was found.");
        }
    }

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Graph => {
            let pipeline = build_pipeline(&config, None)?;
            for line in pipeline.graph().describe() {
                println!("{}", line);
            }
        }
        Commands::Run {
            max_steps,
            output_dir,
            prompt,
        } => {
            if let Some(n) = max_steps {
                config.pipeline.max_steps = n;
            }
            if let Some(dir) = output_dir {
                config.pipeline.output_dir = dir;
            }
            config.validate()?;

            let mut request = prompt.join(" ");
            if request.trim().is_empty() {
                request = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            if request.trim().is_empty() {
                anyhow::bail!("No prompt given");
            }

            run_pipeline(&config, &request).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn build_pipeline(config: &AppConfig, events: Option<Arc<EventBus>>) -> anyhow::Result<Pipeline> {
    let llm = blueprint_llm::build_client(config)?;
    let structured = StructuredClient::new(Arc::from(llm), config.model.clone());
    let fs = Arc::new(ProjectFs::new(config.output_dir()));

    let mut ctx = StageContext::new(structured, fs);
    if let Some(bus) = events {
        ctx = ctx.with_events(bus);
    }
    Ok(Pipeline::new(ctx, &config.pipeline)?)
}

async fn run_pipeline(config: &AppConfig, request: &str) -> anyhow::Result<()> {
    let event_bus = Arc::new(EventBus::default());
    let pipeline = build_pipeline(config, Some(event_bus.clone()))?;

    let run_id = RunId::new();
    let cancel = CancellationToken::new();
    let logger = config.log.run_log.then(|| {
        RunLogger::new(config.log_dir()).spawn(&event_bus, run_id.clone(), cancel.clone())
    });

    info!(
        run_id = %run_id,
        model = %config.model.model_id,
        output_dir = %config.output_dir().display(),
        "Generating project"
    );
    let options = RunOptions::new(config.pipeline.max_steps).with_run_id(run_id);
    let result = pipeline.run(request, options).await;

    if let Some(handle) = logger {
        // The logger stops by itself on the terminal event
        match handle.await {
            Ok(Some(path)) => info!(path = %path.display(), "Run log written"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Run logger task failed"),
        }
    }
    cancel.cancel();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(snapshot) = e.snapshot() {
                let written = snapshot.completed_files();
                if !written.is_empty() {
                    eprintln!("Files written before the failure: {}", written.join(", "));
                }
            }
            error!(error = %e, "Run failed");
            return Err(e.into());
        }
    };

    let files = report.completed_files();
    println!(
        "Wrote {} file(s) to {} in {} steps ({} ms):",
        files.len(),
        config.output_dir().display(),
        report.total_steps,
        report.total_elapsed_ms
    );
    for file in files {
        println!("  {}", file);
    }
    Ok(())
}
