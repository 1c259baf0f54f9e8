use anyhow::Result;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::server::Server;

/// バックグラウンドで動作中の転送
pub struct Reroute {
    local_addr: SocketAddr,
    config: Config,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl Reroute {
    /// 実際に待ち受けているアドレスを取得
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 転送を停止
    ///
    /// リスナーを止め、動作中のすべてのセッションを閉じる
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.handle.await??;
        Ok(())
    }
}

/// 転送を開始（メインAPI）
///
/// バインドが完了してから戻るため、戻り値の `local_addr()` にすぐ接続できる。
///
/// # 例
/// ```no_run
/// use rudicsreroute::{start_reroute, Config};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::new(8080, "dockserver.example.com", 8080)?;
///     let reroute = start_reroute(config).await?;
///     println!("Listening on {}", reroute.local_addr());
///
///     tokio::signal::ctrl_c().await?;
///
///     reroute.shutdown().await?;
///     Ok(())
/// }
/// ```
pub async fn start_reroute(config: Config) -> Result<Reroute> {
    let server = Server::bind(config.clone()).await?;
    let local_addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(server.run(shutdown_rx));

    Ok(Reroute {
        local_addr,
        config,
        shutdown_tx,
        handle,
    })
}
