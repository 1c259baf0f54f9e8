use anyhow::Result;
use clap::Parser;
use rudicsreroute::Config;
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "rudicsreroute", version)]
#[clap(about = "A simple bi-directional port forwarding program", long_about = None)]
struct Cli {
    /// 受信用のローカルポート (127.0.0.1で待ち受け)
    local_port: u16,

    /// 転送先ホスト
    remote_host: String,

    /// 転送先ポート
    remote_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ロギング設定
    let is_atty = atty::is(atty::Stream::Stdout);
    let level = "info";
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::from(level)),
        )
        .with_ansi(is_atty)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.local_port, cli.remote_host, cli.remote_port)?;

    // セッションごとに2つのソケットを使う
    match fdlimit::raise_fd_limit() {
        Some(limit) => debug!("File descriptor limit raised to {}", limit),
        None => debug!("File descriptor limit unchanged"),
    }

    // Ctrl+Cハンドラー
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            panic!("Failed to listen for ctrl-c signal: {:?}", e);
        }
        let _ = shutdown_tx.send(());
    });

    rudicsreroute::run_server(config, shutdown_rx).await
}
