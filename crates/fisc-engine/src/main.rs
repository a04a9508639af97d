//! `fisc-investigate`: run one investigation and print the result as JSON
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use fisc_core::{EngineConfig, QueryFilters, SourceAdapter, SourceKind};
use fisc_engine::{InvestigationRequest, Investigator};
use fisc_federation::{load_fixture_dir, HttpSourceAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fisc-investigate", version, about = "Investigate Brazilian public spending")]
struct Cli {
    /// Free-text query, ex: "contratos suspeitos do Ministério da Saúde em MG"
    query: String,

    /// Engine configuration (YAML)
    #[arg(long, env = "FISC_CONFIG")]
    config: PathBuf,

    /// Serve sources from `<source_id>.json` files instead of HTTP
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,

    #[arg(long, default_value = "cli")]
    session: String,

    /// SIAFI org code filter (repeatable)
    #[arg(long = "org")]
    org_codes: Vec<String>,

    /// Supplier CNPJ filter (repeatable)
    #[arg(long = "cnpj")]
    cnpjs: Vec<String>,

    /// Region name, UF or IBGE code
    #[arg(long)]
    region: Option<String>,

    #[arg(long = "from", value_name = "YYYY-MM-DD")]
    date_from: Option<NaiveDate>,

    #[arg(long = "to", value_name = "YYYY-MM-DD")]
    date_to: Option<NaiveDate>,

    /// Minimum contract value in BRL
    #[arg(long)]
    min_value: Option<f64>,

    /// Embed the full entity graph in the output
    #[arg(long)]
    graph: bool,

    /// Append per-source circuit and rate budget state
    #[arg(long)]
    health: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn filters(&self) -> QueryFilters {
        QueryFilters {
            org_codes: self.org_codes.clone(),
            cnpjs: self.cnpjs.clone(),
            region: self.region.clone(),
            date_from: self.date_from,
            date_to: self.date_to,
            min_value: self.min_value,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn adapters(
    config: &EngineConfig,
    fixtures: Option<&PathBuf>,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if let Some(dir) = fixtures {
        for adapter in load_fixture_dir(dir)? {
            if config.source(adapter.source_id()).is_some() {
                adapters.push(Arc::new(adapter));
            } else {
                warn!(source_id = adapter.source_id(), "Fixture has no configured source, ignored");
            }
        }
        return Ok(adapters);
    }

    for source in config.sources.iter().filter(|s| s.kind == SourceKind::Http) {
        let adapter = HttpSourceAdapter::from_settings(source)
            .with_context(|| format!("building adapter for `{}`", source.id))?;
        adapters.push(Arc::new(adapter));
    }
    Ok(adapters)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let path = cli.config.to_string_lossy().to_string();
    let config = EngineConfig::load(&path).with_context(|| format!("loading {}", path))?;
    let adapters = adapters(&config, cli.fixtures.as_ref())?;
    info!(config = %path, adapters = adapters.len(), "Configuration loaded");

    let investigator = Investigator::builder(config)
        .with_adapters(adapters)
        .build()?;

    let request = InvestigationRequest::new(&cli.query)
        .with_session(&cli.session)
        .with_filters(cli.filters());
    let result = investigator.investigate(request).await;

    let mut output = serde_json::to_value(&result)?;
    if cli.graph {
        output["entity_graph"] = serde_json::to_value(&result.entity_graph)?;
    }
    if cli.health {
        output["source_health"] = serde_json::to_value(investigator.source_health().await)?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
