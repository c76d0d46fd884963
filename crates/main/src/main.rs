mod bootstrap;
mod cli;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};
use utils::LoggerManager;

use crate::bootstrap::{setup_panic_hook, Application};
use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 初始化日志系统
    let _logger = LoggerManager::init(&cli.log_dir, cli.verbose);

    // 设置 panic hook
    setup_panic_hook();

    info!("========================================");
    info!("  手续费收获流水线启动");
    info!("========================================");

    let app = Application::start(&cli).await?;
    let result = app.run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", harvest::render_summary(&result));
    }

    if result.has_failures() {
        warn!("流水线存在失败步骤，可根据报告中的交易哈希手动重试");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
