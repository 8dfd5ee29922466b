mod config;
mod observability;

use clap::{Args, Parser, Subcommand};
use config::Config;
use proxy::descriptor::WmsVersion;
use proxy::registry::Registry;
use proxy::resolver::{ClientParams, FeatureInfoQuery};
use proxy::spatial::{BBox, TileCoord};
use proxy::transport::{HttpTransport, TransportError};
use proxy::{MapService, ProxyError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(version, about = "Caching proxy for WMS and TMS map sources")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "tileproxy.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Validate the configuration and list the configured layers
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Render a single request and write the response body to a file
    Render(RenderArgs),
}

#[derive(Args)]
struct RenderArgs {
    #[arg(long)]
    layer: String,
    #[arg(long)]
    srs: Option<String>,
    #[arg(long)]
    format: Option<String>,
    /// minx,miny,maxx,maxy
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<BBox>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long, value_parser = parse_version)]
    version: Option<WmsVersion>,
    /// z/x/y
    #[arg(long)]
    tile: Option<TileCoord>,
    /// Extra request parameter, forwarded to direct sources
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
    /// Send a GetFeatureInfo request instead of GetMap
    #[arg(long, requires_all = ["x", "y"])]
    feature_info: bool,
    #[arg(long)]
    x: Option<u32>,
    #[arg(long)]
    y: Option<u32>,
    #[arg(long)]
    info_format: Option<String>,
    #[arg(long, short)]
    output: PathBuf,
}

impl RenderArgs {
    fn client_params(&self) -> ClientParams {
        let feature_info = match (self.feature_info, self.x, self.y) {
            (true, Some(x), Some(y)) => Some(FeatureInfoQuery {
                x,
                y,
                info_format: self.info_format.clone(),
            }),
            _ => None,
        };

        ClientParams {
            srs: self.srs.clone(),
            format: self.format.clone(),
            bbox: self.bbox,
            width: self.width,
            height: self.height,
            version: self.version,
            tile: self.tile,
            feature_info,
            extra: self.params.clone(),
        }
    }
}

fn parse_version(value: &str) -> Result<WmsVersion, String> {
    WmsVersion::parse(value).ok_or_else(|| format!("unsupported WMS version {value:?}"))
}

fn parse_param(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {value:?}")),
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Registry(#[from] proxy::ConfigError),
    #[error(transparent)]
    Observability(#[from] observability::ObservabilityError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request failed: {0}")]
    Request(#[from] ProxyError),
    #[error("could not write {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not serialize output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_file(&cli.config)?;
    let _sentry = observability::init_logging(&config.logging)?;
    if let Some(metrics) = &config.metrics {
        observability::init_metrics(metrics)?;
    }

    match cli.command {
        CliCommand::Check { json } => check(&config, json),
        CliCommand::Render(args) => render(config, &args).await,
    }
}

fn check(config: &Config, json: bool) -> Result<(), CliError> {
    let registry = Registry::build(&config.proxy)?;

    if json {
        let layers: Vec<_> = registry
            .layers()
            .map(|layer| {
                serde_json::json!({
                    "name": layer.name,
                    "title": layer.title,
                    "format": layer.format.mime_type(),
                    "srs": layer.srs_list,
                    "bbox": layer.bbox.map(|bbox| bbox.to_string()),
                    "sources": layer
                        .sources
                        .iter()
                        .map(|source| source.kind().as_str())
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let output = serde_json::json!({
            "layers": layers,
            "diagnostics": registry.diagnostics(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for layer in registry.layers() {
        let kinds: Vec<&str> = layer.sources.iter().map(|s| s.kind().as_str()).collect();
        println!(
            "{} ({}) [{}]",
            layer.name,
            layer.format.mime_type(),
            kinds.join(", ")
        );
    }
    for diagnostic in registry.diagnostics() {
        println!("warning: {diagnostic}");
    }
    Ok(())
}

async fn render(config: Config, args: &RenderArgs) -> Result<(), CliError> {
    let transport = Arc::new(HttpTransport::new(&config.http)?);
    let store = store::get_store(config.cache);
    let service = MapService::new(&config.proxy, transport, store)?;

    let response = service.handle(&args.layer, args.client_params()).await?;
    tokio::fs::write(&args.output, response.data())
        .await
        .map_err(|source| CliError::Output {
            path: args.output.clone(),
            source,
        })?;

    tracing::info!(
        layer = %args.layer,
        content_type = response.content_type().unwrap_or("unknown"),
        bytes = response.data().len(),
        output = %args.output.display(),
        "response written"
    );
    Ok(())
}
