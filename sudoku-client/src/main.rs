use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use protocol::NetworkConfig;
use sudoku_client::{Client, StdConsole};

/// 多人数独客户端
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// 服务器地址
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// 服务器端口
    #[clap(short, long)]
    port: Option<u16>,
    /// JSON 配置文件
    #[clap(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // 日志写到 stderr，默认只输出警告，避免干扰控制台
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sudoku_client=warn".parse()?))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => NetworkConfig::default(),
    }
    .with_overrides(args.host, args.port);

    let client = Arc::new(Client::new(Arc::new(StdConsole::new())));
    if !client.connect(&config.address()) {
        bail!("无法连接服务器 {}", config.address());
    }

    let handles = client.start();
    client.game_loop();
    for handle in handles {
        let _ = handle.join();
    }
    info!("退出");

    Ok(())
}
