use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::session::Session;

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// 受信接続を待ち受け、接続ごとにセッションを起動するリスナー
pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
}

impl Server {
    /// `127.0.0.1:<local_port>` にバインド
    ///
    /// バインドの失敗は起動時の致命的エラー
    pub async fn bind(config: Config) -> Result<Self> {
        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// 実際にバインドされたアドレス
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get local address")
    }

    /// 接続を受け付け続ける
    ///
    /// シャットダウン要求を受けるか、送信側がドロップされると `Ok(())` で戻る。
    /// 個々のセッションの失敗はリスナーに影響しない。
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("Serving on {}", self.local_addr()?);
        info!("Forwarding to {}", self.config.remote_addr());

        let mut backoff = accept_backoff();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            backoff.reset();
                            next_id += 1;
                            let id = next_id;
                            debug!("Session {}: new connection from {}", id, addr);

                            let config = self.config.clone();
                            let shutdown_rx = shutdown_rx.resubscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(id, stream, addr, config, shutdown_rx).await {
                                    warn!("Session {} from {}: {:#}", id, addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            // fd枯渇などの一時的なエラー
                            error!("Failed to accept connection: {}", e);
                            if let Some(delay) = backoff.next_backoff() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Server shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

/// バインドして実行
pub async fn run_server(config: Config, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    Server::bind(config).await?.run(shutdown_rx).await
}

fn accept_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(ACCEPT_BACKOFF_INITIAL)
        .with_max_interval(ACCEPT_BACKOFF_MAX)
        .with_max_elapsed_time(None)
        .build()
}

/// 接続を処理
async fn handle_connection(
    id: u64,
    inbound: TcpStream,
    addr: SocketAddr,
    config: Arc<Config>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let session = Session::connect(id, inbound, addr, &config).await?;
    debug!("Session {}: connected to {}", session.id(), config.remote_addr());
    session.run(shutdown_rx).await;
    Ok(())
}
