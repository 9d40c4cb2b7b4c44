use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;

use antnest::{AntNode, NodeConfig, SpiderDefinition};

#[derive(Parser)]
#[command(name = "antnest", about = "Distributed crawling node")]
struct Cli {
    /// Node config JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// ip:port of a cluster member to join
    #[arg(long)]
    join: Option<String>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    ip: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Spider definition JSON files to register cluster-wide
    #[arg(long = "spider")]
    spiders: Vec<PathBuf>,

    /// Start the registered spiders right away
    #[arg(long)]
    start: bool,
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(name) = &cli.name {
        config = config.with_name(name.as_str());
    }
    if let Some(ip) = &cli.ip {
        config = config.with_ip(ip.as_str());
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(join) = &cli.join {
        config = config.with_join(join.as_str());
    }
    config.check()?;
    Ok(config)
}

fn load_spider(path: &PathBuf) -> Result<SpiderDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading spider {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing spider {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .filter_module("selectors", log::LevelFilter::Warn)
        .filter_module("html5ever", log::LevelFilter::Error)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let node = AntNode::start(config).await?;
    let controller = node.controller();

    let mut names = Vec::new();
    for path in &cli.spiders {
        let definition = load_spider(path)?;
        let name = definition.name.clone();
        let result = controller.add_spider(definition).await;
        if result.success {
            names.push(name);
        } else {
            error!(
                "Spider {} not added: {}",
                name,
                result.error.unwrap_or_default()
            );
        }
    }
    if cli.start {
        for name in &names {
            let result = controller.start_spider(name).await;
            if !result.success {
                warn!(
                    "Spider {} not started: {}",
                    name,
                    result.error.unwrap_or_default()
                );
            }
        }
    }

    info!("Node {} running, Ctrl-C to stop", node.info());
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    node.shutdown().await;
    Ok(())
}
