//! Demo binary for plantmind.
//!
//! Accepts a free-text operator request (or `--demo` for a canned set),
//! runs the orchestration pipeline, and prints the rendered report.
//!
//! Exit code 0 on a completed pipeline (partial failures included);
//! non-zero only when the pipeline itself failed.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter
//! - `ADVISORY_API_KEY` — enables the LLM-backed advisory section
//! - `ADVISORY_API_URL` — advisory endpoint base (OpenAI-compatible)

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use plantmind::collaborators::{
    AdvisoryWriter, HttpAdvisoryWriter, LinearForecast, MarkdownFileSink, NullAdvisory,
    render_markdown,
};
use plantmind::config::loader;
use plantmind::{
    init_tracing, metrics, AnalysisRequest, Orchestrator, PlantSnapshot,
};

/// Command-line surface for the plant decision orchestrator.
#[derive(Debug, Parser)]
#[command(name = "plantmind", version, about = "Wastewater plant decision orchestrator")]
struct Cli {
    /// Free-text operator request, e.g. "full analysis" or "check mbr flux"
    request: Option<String>,

    /// Run the canned demo request set instead of a single request
    #[arg(long)]
    demo: bool,

    /// Plant configuration TOML (defaults to the design constants)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for rendered report files
    #[arg(long, default_value = "reports")]
    report_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = init_tracing();
    if let Err(e) = metrics::init_metrics() {
        error!(error = %e, "metrics init failed");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    if cli.request.is_none() && !cli.demo {
        eprintln!("nothing to do: pass a request or --demo (see --help)");
        return ExitCode::FAILURE;
    }

    let config = match loader::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::FAILURE;
        }
    };

    // Advisory prose is optional: without a key the report simply has no
    // advisory section.
    let advisory: Arc<dyn AdvisoryWriter> = match HttpAdvisoryWriter::from_env("qwen-plus") {
        Ok(writer) => Arc::new(writer),
        Err(_) => {
            info!("ADVISORY_API_KEY not set, advisory section disabled");
            Arc::new(NullAdvisory)
        }
    };

    let orchestrator = match Orchestrator::from_config(
        &config,
        Arc::new(LinearForecast::with_delay(10)),
        advisory,
        Arc::new(MarkdownFileSink::new(&cli.report_dir)),
    ) {
        Ok(o) => o,
        Err(e) => {
            error!(error = %e, "orchestrator refused to start");
            return ExitCode::FAILURE;
        }
    };

    let requests = if cli.demo {
        demo_requests()
    } else {
        let text = cli.request.unwrap_or_default();
        vec![AnalysisRequest::new("cli-req-000", text)]
    };

    info!(count = requests.len(), "running requests");

    let mut any_failed = false;
    for request in requests {
        let result = orchestrator.run(request).await;
        if result.is_completed() {
            println!("{}", render_markdown(&result));
            if let Some(location) = &result.report_location {
                info!(request_id = %result.request_id, location, "report published");
            }
        } else {
            any_failed = true;
            error!(
                request_id = %result.request_id,
                failure = ?result.failure,
                "pipeline failed"
            );
        }
    }

    if any_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Canned requests spanning the interesting operating points.
fn demo_requests() -> Vec<AnalysisRequest> {
    let calm = PlantSnapshot::nominal();
    let stressed = PlantSnapshot {
        toxicity_index: 3.6,
        membrane_pressure_kpa: 32.0,
        adsorption_efficiency_pct: 64.0,
        ..PlantSnapshot::nominal()
    };

    vec![
        AnalysisRequest::new("demo-req-000", "forecast the influent toxicity for tomorrow")
            .with_history(vec![1.6, 1.8, 2.1, 2.2]),
        AnalysisRequest::new("demo-req-001", "set the turntable frequency")
            .with_snapshot(calm.clone()),
        AnalysisRequest::new("demo-req-002", "membrane pressure looks high, check backwash")
            .with_snapshot(stressed.clone()),
        AnalysisRequest::new("demo-req-003", "is the carbon saturated? furnace status")
            .with_snapshot(stressed.clone()),
        AnalysisRequest::new("demo-req-004", "full analysis of the plant").with_snapshot(stressed),
        AnalysisRequest::new("demo-req-005", "overall health diagnostic").with_snapshot(calm),
    ]
}
