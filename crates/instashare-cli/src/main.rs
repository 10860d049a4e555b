//! Instashare CLI
//!
//! 命令行客户端：分享文件时监听端口并打印链接，接收时按链接直接连到发送端。

mod console;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use instashare_core::config::AckMode;
use instashare_core::transport::ws;
use instashare_core::{
    AppSettings, DownloadDir, ReceiveOptions, Receiver, SendOptions, Sender, ShareLink,
    TransferableFile, WsHost,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "instashare", version, about = "点对点文件分享")]
struct Cli {
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 分享文件：监听端口，打印链接，等待接收端连接
    Share {
        /// 要发送的文件路径
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// 监听地址 (默认取自设置)
        #[arg(short, long)]
        listen: Option<String>,
        /// 写进链接的主机名或 IP
        #[arg(long)]
        host: Option<String>,
        /// 先发送全部文件，再统一等待确认
        #[arg(long)]
        deferred_ack: bool,
        /// 不限制文件类型
        #[arg(long)]
        all_types: bool,
    },
    /// 打开分享链接并接收文件
    Receive {
        /// 发送端给出的链接
        link: String,
        /// 保存目录 (默认: ~/Downloads)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 不询问直接接受
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// 解析链接并显示连接信息
    Link {
        link: String,
    },
    /// 以 TOML 显示当前设置，或恢复默认设置
    Config {
        /// 恢复默认设置
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = AppSettings::load();
    init_logging(cli.verbose || settings.verbose);

    match cli.command {
        Commands::Share {
            files,
            listen,
            host,
            deferred_ack,
            all_types,
        } => {
            let mut settings = settings;
            if let Some(listen) = listen {
                settings.listen_addr = listen;
            }
            if host.is_some() {
                settings.public_host = host;
            }
            if deferred_ack {
                settings.ack_mode = AckMode::Deferred;
            }
            if all_types {
                settings.accepted_types.clear();
            }
            share(&settings, &files).await?;
        }
        Commands::Receive { link, output, yes } => {
            let mut settings = settings;
            if let Some(output) = output {
                settings.download_dir = output;
            }
            settings.auto_accept |= yes;
            receive(&settings, &link).await?;
        }
        Commands::Link { link } => {
            let link = ShareLink::parse(&link)?;
            println!("🔗 链接: {link}");
            println!("   令牌: {}", link.token());
            println!("   地址: {}", link.ws_url());
        }
        Commands::Config { reset } => {
            if reset {
                AppSettings::default().save()?;
                println!("✅ 已恢复默认设置");
            } else {
                println!("# {}", AppSettings::config_path().display());
                print!("{}", settings.to_toml()?);
            }
        }
    }

    Ok(())
}

async fn share(settings: &AppSettings, paths: &[PathBuf]) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = TransferableFile::from_path(path)
            .await
            .with_context(|| format!("无法读取 {}", path.display()))?;
        println!(
            "📄 {} ({})",
            file.name,
            instashare_core::transfer::format_bytes(file.size)
        );
        files.push(file);
    }

    let host = WsHost::bind(&settings.listen_addr).await?;
    let link = host.share_link(&settings.advertised_host())?;
    println!("📤 分享链接: {link}");
    println!("   等待接收端连接... (Ctrl+C 取消)");

    let mut conn = tokio::select! {
        conn = host.accept() => conn?,
        _ = tokio::signal::ctrl_c() => {
            println!("⏹️  已取消");
            return Ok(());
        }
    };

    let callback = console::ConsoleSendCallback;
    let mut sender = Sender::new(SendOptions::from_settings(settings));
    let report = sender.send_over(&mut conn, &files, &callback).await?;
    let _ = conn.close().await;

    println!(
        "完成: 发送 {} 个，确认 {} 个，跳过 {} 个，失败 {} 个",
        report.sent.len(),
        report.acked.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(())
}

async fn receive(settings: &AppSettings, link: &str) -> Result<()> {
    let link = ShareLink::parse(link)?;

    if !settings.auto_accept && !console::confirm_sender(&link).await? {
        println!("已拒绝");
        return Ok(());
    }

    println!("📥 接收模式 (保存到: {})", settings.download_dir.display());
    let mut conn = ws::connect(&link).await?;

    let callback = console::ConsoleReceiveCallback::default();
    let mut sink = DownloadDir::new(&settings.download_dir);
    let mut receiver = Receiver::new(ReceiveOptions::from_settings(settings));
    let report = receiver
        .receive_over(&mut conn, &mut sink, &callback)
        .await?;
    let _ = conn.close().await;

    for file in &report.incomplete {
        println!("   ⚠️ {} 未完成 ({}%)", file.name, file.percent);
    }
    println!(
        "完成: 保存 {} 个，未完成 {} 个，失败 {} 个",
        report.saved.len(),
        report.incomplete.len(),
        report.failed.len()
    );
    Ok(())
}

/// 初始化日志系统
fn init_logging(verbose: bool) {
    // 桥接 log crate（instashare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default_filter = if verbose {
        "info,instashare_core=debug"
    } else {
        "info"
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    tracing::debug!("Logging initialized");
}
