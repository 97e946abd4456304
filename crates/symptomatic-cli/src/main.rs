mod inspect;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use symptomatic_ai::{ArtifactDir, InferenceContext, LoadOptions, ShapePolicy};
use symptomatic_core::{PredictResponse, SymptomQuery};
use symptomatic_explain::{DEFAULT_BASE_URL, DEFAULT_MODEL, ExplainConfig, Explainer};
use symptomatic_server::{AllowedOrigins, AppState, router};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "symptomatic", version, propagate_version = true)]
#[command(about = "Predict a likely disease from free-text symptom descriptions")]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the artifact and serve the HTTP API.
    Serve {
        #[command(flatten)]
        artifacts: ArtifactArgs,

        #[command(flatten)]
        explain: ExplainArgs,

        #[arg(long, env = "SYMPTOMATIC_BIND", default_value = "0.0.0.0:5000")]
        bind: SocketAddr,

        /// Browser origins allowed to call the API, comma-separated. Any origin when unset.
        #[arg(long = "cors-origin", env = "SYMPTOMATIC_CORS_ORIGINS", value_delimiter = ',')]
        cors_origins: Vec<String>,
    },
    /// Run one prediction and print the response as JSON.
    Predict {
        #[command(flatten)]
        artifacts: ArtifactArgs,

        #[command(flatten)]
        explain: ExplainArgs,

        /// Symptom phrases, one per argument.
        #[arg(required = true)]
        symptoms: Vec<String>,
    },
    /// Describe an artifact directory: manifest, head tensor shapes, label and keyword counts.
    Inspect {
        #[command(flatten)]
        artifacts: ArtifactArgs,
    },
}

#[derive(Args)]
struct ArtifactArgs {
    /// Directory holding tokenizer.json, encoder.onnx, head.safetensors, labels.json and
    /// keywords.json.
    #[arg(long = "artifacts", env = "SYMPTOMATIC_ARTIFACT_DIR")]
    dir: PathBuf,

    /// What to do with head tensors whose shape does not match: strict or patch.
    #[arg(long, env = "SYMPTOMATIC_SHAPE_POLICY", default_value_t = ShapePolicy::Strict)]
    shape_policy: ShapePolicy,

    /// Token sequence width; overrides the manifest.
    #[arg(long, env = "SYMPTOMATIC_MAX_LENGTH")]
    max_length: Option<usize>,
}

impl ArtifactArgs {
    fn dir(&self) -> ArtifactDir {
        ArtifactDir::new(&self.dir)
    }

    fn load(&self) -> anyhow::Result<InferenceContext> {
        let options = LoadOptions {
            policy: self.shape_policy,
            max_length: self.max_length,
        };
        InferenceContext::load(&self.dir(), &options)
            .with_context(|| format!("loading artifacts from {}", self.dir.display()))
    }
}

#[derive(Args)]
struct ExplainArgs {
    /// API key for the explanation service. Explanations are off without one.
    #[arg(long = "explain-api-key", env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long = "explain-url", env = "SYMPTOMATIC_EXPLAIN_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long = "explain-model", env = "SYMPTOMATIC_EXPLAIN_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(
        long = "explain-timeout-secs",
        env = "SYMPTOMATIC_EXPLAIN_TIMEOUT_SECS",
        default_value_t = 10
    )]
    timeout_secs: u64,
}

impl ExplainArgs {
    fn explainer(&self) -> anyhow::Result<Option<Explainer>> {
        let Some(api_key) = self.api_key.clone().filter(|k| !k.trim().is_empty()) else {
            info!("no explanation API key, explanations disabled");
            return Ok(None);
        };
        let explainer = Explainer::new(ExplainConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key,
            timeout: Duration::from_secs(self.timeout_secs),
        })
        .context("building explanation client")?;
        info!(endpoint = explainer.endpoint(), "explanations enabled");
        Ok(Some(explainer))
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("symptomatic v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve {
            artifacts,
            explain,
            bind,
            cors_origins,
        } => serve(&artifacts, &explain, bind, &cors_origins).await,
        Command::Predict {
            artifacts,
            explain,
            symptoms,
        } => predict(&artifacts, &explain, symptoms).await,
        Command::Inspect { artifacts } => {
            let report = inspect::Report::collect(&artifacts.dir(), artifacts.shape_policy)?;
            print!("{report}");
            Ok(())
        }
    }
}

async fn serve(
    artifacts: &ArtifactArgs,
    explain: &ExplainArgs,
    bind: SocketAddr,
    cors_origins: &[String],
) -> anyhow::Result<()> {
    let origins = AllowedOrigins::from_list(cors_origins).context("parsing --cors-origin")?;

    // Fail before binding: no traffic without a loaded artifact.
    let context = artifacts.load()?;
    let mut state = AppState::new(Arc::new(context)).with_allowed_origins(origins);
    if let Some(explainer) = explain.explainer()? {
        state = state.with_explainer(explainer);
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(addr = %bind, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn predict(
    artifacts: &ArtifactArgs,
    explain: &ExplainArgs,
    symptoms: Vec<String>,
) -> anyhow::Result<()> {
    let context = artifacts.load()?;
    let prediction = context.predict(&SymptomQuery::List(symptoms))?;

    let mut response = PredictResponse::from(prediction);
    if let Some(explainer) = explain.explainer()? {
        let explanation = explainer.explain(&response.predicted_disease).await;
        response = response.with_explanation(explanation);
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
