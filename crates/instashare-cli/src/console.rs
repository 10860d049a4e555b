//! 终端输出与交互

use anyhow::Result;
use instashare_core::transfer::FileSummary;
use instashare_core::transfer::encoder::FileSendReport;
use instashare_core::workflow::SavedFile;
use instashare_core::{
    Notice, ReceiveProgressCallback, ReceiveReport, SendProgressCallback, SendReport, ShareLink,
};
use std::io::{self, BufRead, Write};

/// 询问是否接受来自该链接的文件
pub async fn confirm_sender(link: &ShareLink) -> Result<bool> {
    let sender = link.base().host_str().unwrap_or("未知主机").to_string();
    println!("⚠️  如果你不认识发送此链接的人，请不要授予权限。");

    let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
        print!("接受来自 {sender} 的文件? [y/N] ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await??;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub struct ConsoleSendCallback;

impl SendProgressCallback for ConsoleSendCallback {
    fn on_status(&self, status: &str) {
        println!("{status}");
    }

    fn on_notice(&self, notice: &Notice) {
        println!("{notice}");
    }

    fn on_file_sent(&self, file: &FileSendReport) {
        println!("   ↑ {} ({} 块)", file.name, file.chunks_sent);
    }

    fn on_acked(&self, file_name: &str) {
        println!("   ✓ {file_name} 已送达");
    }

    fn on_complete(&self, report: &SendReport) {
        if report.session_closed_early {
            println!("⚠️  接收端提前断开");
        }
    }
}

#[derive(Default)]
pub struct ConsoleReceiveCallback;

impl ReceiveProgressCallback for ConsoleReceiveCallback {
    fn on_status(&self, status: &str) {
        println!("{status}");
    }

    fn on_notice(&self, notice: &Notice) {
        println!();
        println!("{notice}");
    }

    fn on_file_started(&self, file: &FileSummary) {
        println!("   ↓ {}", file.name);
    }

    fn on_progress(&self, file_name: &str, percent: u8) {
        print!("\r     {file_name} {percent:>3}%");
        if percent == 100 {
            println!();
        }
        let _ = io::stdout().flush();
    }

    fn on_file_saved(&self, file: &SavedFile) {
        println!("   ✓ 已保存到 {}", file.path.display());
    }

    fn on_complete(&self, report: &ReceiveReport) {
        if !report.session_finished {
            println!("⚠️  发送端提前断开");
        }
    }
}
