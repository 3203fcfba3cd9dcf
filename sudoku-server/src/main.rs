use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use protocol::NetworkConfig;
use sudoku_server::GameServer;

/// 多人数独服务端
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// 监听地址
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// 监听端口
    #[clap(short, long)]
    port: Option<u16>,
    /// JSON 配置文件
    #[clap(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sudoku_server=debug".parse()?))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => NetworkConfig::default(),
    }
    .with_overrides(args.host, args.port);

    info!("多人数独服务端启动中...");
    let server = GameServer::bind(&config)?;
    server.run();
    info!("退出");

    Ok(())
}
