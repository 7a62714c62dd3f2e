//! Discovery CLI: load a project config, pin a block, walk the address
//! graph, write the artifact.
//!
//! Exit codes: 0 success, 1 configuration error, 2 infrastructure error
//! after retries, 3 address cap exceeded under `--strict`.

use dark_atlas::config::chains::ChainConfig;
use dark_atlas::config::StructureConfig;
use dark_atlas::engine::DiscoveryEngine;
use dark_atlas::error::AtlasError;
use dark_atlas::output;
use dark_atlas::provider::{HttpProvider, RpcSettings};
use dark_atlas::sources::{EtherscanSources, SourceCodeService};
use dark_atlas::templates::TemplateService;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_INFRA: i32 = 2;
const EXIT_CAP: i32 = 3;

const DEFAULT_OUTPUT_FILE: &str = "discovered.json";
const DEFAULT_RUN_RETRIES: u32 = 2;
const RUN_RETRY_DELAY_MS: u64 = 2_000;

struct CliArgs {
    config_path: PathBuf,
    templates_dir: Option<PathBuf>,
    output_path: PathBuf,
    block: Option<u64>,
    strict: bool,
    retries: u32,
}

const USAGE: &str = "usage: dark_atlas <config.jsonc> [--templates DIR] [--output FILE] \
[--block N] [--strict] [--retries N]";

fn parse_cli_args(argv: &[String]) -> Result<CliArgs, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut templates_dir = None;
    let mut output_path = PathBuf::from(DEFAULT_OUTPUT_FILE);
    let mut block = None;
    let mut strict = false;
    let mut retries = DEFAULT_RUN_RETRIES;

    let mut iter = argv.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--templates" => {
                let value = iter.next().ok_or("--templates needs a directory")?;
                templates_dir = Some(PathBuf::from(value));
            }
            "--output" => {
                let value = iter.next().ok_or("--output needs a file path")?;
                output_path = PathBuf::from(value);
            }
            "--block" => {
                let value = iter.next().ok_or("--block needs a block number")?;
                block = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("bad block number `{value}`"))?,
                );
            }
            "--strict" => strict = true,
            "--retries" => {
                let value = iter.next().ok_or("--retries needs a count")?;
                retries = value
                    .parse::<u32>()
                    .map_err(|_| format!("bad retry count `{value}`"))?;
            }
            other if other.starts_with('-') => return Err(format!("unknown flag `{other}`")),
            other => {
                if config_path.is_some() {
                    return Err("more than one config path given".to_string());
                }
                config_path = Some(PathBuf::from(other));
            }
        }
    }

    Ok(CliArgs {
        config_path: config_path.ok_or("missing config path")?,
        templates_dir,
        output_path,
        block,
        strict,
        retries,
    })
}

async fn run_once(
    settings: &RpcSettings,
    config: &Arc<StructureConfig>,
    templates: &Arc<TemplateService>,
    sources: &Arc<dyn SourceCodeService>,
    block: Option<u64>,
) -> Result<(serde_json::Value, bool), AtlasError> {
    // The provider is scoped to one attempt so connections never leak into
    // the next retry.
    let provider = HttpProvider::connect(settings, block).await?;
    let block_number = provider.pinned_block();
    tracing::info!("pinned to block {block_number}");

    let engine = DiscoveryEngine::new(
        Arc::new(provider),
        Arc::clone(sources),
        Arc::clone(templates),
        Arc::clone(config),
    );
    let discovery = engine.discover().await?;
    let document = output::build_output(config, block_number, &discovery);
    Ok((document, discovery.cap_exceeded))
}

async fn run() -> i32 {
    // Default to `info` when `RUST_LOG` is unset or invalid to avoid silent startup.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_cli_args(&argv) {
        Ok(args) => args,
        Err(reason) => {
            eprintln!("{reason}\n{USAGE}");
            return EXIT_CONFIG;
        }
    };

    let settings = match RpcSettings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!("[STARTUP] RPC settings invalid: {err}");
            return EXIT_CONFIG;
        }
    };

    let config = match StructureConfig::load(&args.config_path) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!("[STARTUP] config rejected: {err}");
            return EXIT_CONFIG;
        }
    };
    tracing::info!(
        "[STARTUP] project `{}` on `{}`: {} seed(s), maxAddresses={}",
        config.name,
        config.chain,
        config.initial_addresses.len(),
        config.max_addresses
    );

    let templates = match &args.templates_dir {
        Some(dir) => match TemplateService::load(dir) {
            Ok(service) => Arc::new(service),
            Err(err) => {
                tracing::error!("[STARTUP] template bundle rejected: {err}");
                return EXIT_CONFIG;
            }
        },
        None => Arc::new(TemplateService::empty()),
    };
    tracing::info!("[STARTUP] {} template(s) loaded", templates.len());

    let explorer_url = std::env::var("ETHERSCAN_API_URL").unwrap_or_else(|_| {
        ChainConfig::by_name(&config.chain)
            .map(|chain| chain.explorer_api_url)
            .unwrap_or_else(|| ChainConfig::mainnet().explorer_api_url)
    });
    let api_key = std::env::var("ETHERSCAN_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("[STARTUP] ETHERSCAN_API_KEY not set; source fetches may be throttled");
    }
    let sources: Arc<dyn SourceCodeService> = Arc::new(EtherscanSources::new(explorer_url, api_key));

    let mut attempt = 0u32;
    loop {
        match run_once(&settings, &config, &templates, &sources, args.block).await {
            Ok((document, cap_exceeded)) => {
                let rendered = output::render(&document);
                if let Err(err) = std::fs::write(&args.output_path, rendered) {
                    tracing::error!("cannot write {}: {err}", args.output_path.display());
                    return EXIT_INFRA;
                }
                tracing::info!("artifact written to {}", args.output_path.display());
                if cap_exceeded && args.strict {
                    tracing::error!("address cap exceeded and --strict is set");
                    return EXIT_CAP;
                }
                return EXIT_OK;
            }
            Err(AtlasError::Config(err)) => {
                tracing::error!("configuration error: {err}");
                return EXIT_CONFIG;
            }
            Err(err) => {
                if attempt >= args.retries {
                    tracing::error!("run failed after {} attempt(s): {err}", attempt + 1);
                    return EXIT_INFRA;
                }
                attempt += 1;
                tracing::warn!("run attempt {attempt} failed: {err}; retrying");
                tokio::time::sleep(Duration::from_millis(
                    RUN_RETRY_DELAY_MS * 2u64.pow(attempt - 1),
                ))
                .await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_cli_args_full() {
        let args = parse_cli_args(&argv(&[
            "project.jsonc",
            "--templates",
            "templates",
            "--output",
            "out.json",
            "--block",
            "123",
            "--strict",
        ]))
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("project.jsonc"));
        assert_eq!(args.block, Some(123));
        assert!(args.strict);
    }

    #[test]
    fn test_parse_cli_args_rejects_unknown_flag() {
        assert!(parse_cli_args(&argv(&["project.jsonc", "--frobnicate"])).is_err());
        assert!(parse_cli_args(&argv(&[])).is_err());
    }
}
