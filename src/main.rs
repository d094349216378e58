//! IntelliRack daemon CLI
//!
//! 接入货架 MQTT 遥测，维护设备在线状态，分类库存事件并分发告警

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use intellirack::{replay, AppConfig, Classifier, Reading, Service};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "rackd")]
#[command(about = "IntelliRack - 货架遥测接入与库存告警服务")]
#[command(version)]
struct Cli {
    /// 配置文件路径 (默认: ~/.config/intellirack/config.json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 连接 MQTT broker 并持续处理遥测
    Run {
        /// Dry-run 模式（webhook 只打印不发送）
        #[arg(long)]
        dry_run: bool,
    },
    /// 回放 JSONL 录制文件，实时事件逐行输出到 stdout
    Replay {
        /// 录制文件，`-` 表示 stdin
        file: PathBuf,
        /// 设备/用户注册表 JSON（覆盖配置）
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Dry-run 模式（webhook 只打印不发送）
        #[arg(long)]
        dry_run: bool,
    },
    /// 对单条读数运行分类器并输出决策
    Classify {
        /// 当前重量（克）
        #[arg(long)]
        weight: f64,
        /// 当前状态标签
        #[arg(long, default_value = "GOOD")]
        status: String,
        /// 当前原料
        #[arg(long, default_value = "unknown")]
        ingredient: String,
        /// 槽位
        #[arg(long, default_value = "1")]
        slot: String,
        /// 上一条日志的重量；不填视为首次读数
        #[arg(long)]
        prev_weight: Option<f64>,
        /// 上一条日志的状态（默认同当前）
        #[arg(long)]
        prev_status: Option<String>,
        /// 上一条日志的原料（默认同当前）
        #[arg(long)]
        prev_ingredient: Option<String>,
    },
    /// 输出生效的配置
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("intellirack=info,rackd=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { dry_run } => {
            let service = Service::from_config(config).await?.with_dry_run(dry_run);
            let token = service.shutdown_token();

            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl-C received, shutting down"),
                    Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
                }
                token.cancel();
            });

            service.run().await?;
        }
        Commands::Replay {
            file,
            registry,
            dry_run,
        } => {
            if registry.is_some() {
                config.registry_path = registry;
            }
            let service = Service::from_config(config).await?.with_dry_run(dry_run);

            let reader: Box<dyn io::BufRead> = if file.as_os_str() == "-" {
                Box::new(BufReader::new(io::stdin()))
            } else {
                let handle = File::open(&file)
                    .with_context(|| format!("Failed to open {}", file.display()))?;
                Box::new(BufReader::new(handle))
            };

            let stdout = io::stdout();
            let mut out = stdout.lock();
            let summary = replay(service, reader, |event| {
                match serde_json::to_string(event) {
                    Ok(line) => {
                        if let Err(e) = writeln!(out, "{}", line) {
                            warn!(error = %e, "Failed to write event");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                }
            })
            .await?;

            eprintln!(
                "Replayed {} frames: {} logged, {} alerts, {} sweeps, {} dropped",
                summary.frames, summary.logged, summary.alerts_created, summary.sweeps, summary.dropped
            );
        }
        Commands::Classify {
            weight,
            status,
            ingredient,
            slot,
            prev_weight,
            prev_status,
            prev_ingredient,
        } => {
            let current = Reading {
                slot_id: slot.clone(),
                ingredient: ingredient.clone(),
                weight,
                status: status.clone(),
            };
            let previous = prev_weight.map(|weight| Reading {
                slot_id: slot,
                ingredient: prev_ingredient.unwrap_or(ingredient),
                weight,
                status: prev_status.unwrap_or(status),
            });

            let decision = Classifier::new(config.thresholds).classify(previous.as_ref(), &current);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
