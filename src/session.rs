use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::Config;
use crate::forward::copy_loop;

/// セッションの状態（後戻りしない）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 両方向の転送ループが動作中
    Running,
    /// 上り方向が終了し、ソケットを閉じている
    Closing,
    /// 終了済み
    Done,
}

/// セッションが終了した理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 接続元がEOFを送った
    InboundClosed,
    /// 上り方向で読み書きエラー
    InboundError,
    /// シャットダウン要求
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::InboundClosed => "inbound closed",
            CloseReason::InboundError => "inbound error",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// 1本の受信接続とリモートへの接続をつなぐ中継
pub struct Session {
    id: u64,
    peer: SocketAddr,
    inbound: TcpStream,
    outbound: TcpStream,
    state: SessionState,
}

impl Session {
    /// リモートに接続してセッションを作成
    ///
    /// 接続に失敗した場合は `inbound` をドロップ（クローズ）してエラーを返す。再試行はしない。
    pub async fn connect(
        id: u64,
        inbound: TcpStream,
        peer: SocketAddr,
        config: &Config,
    ) -> Result<Self> {
        let outbound = TcpStream::connect((config.remote_host(), config.remote_port()))
            .await
            .with_context(|| format!("Failed to connect to {}", config.remote_addr()))?;

        Ok(Self::new(id, peer, inbound, outbound))
    }

    pub fn new(id: u64, peer: SocketAddr, inbound: TcpStream, outbound: TcpStream) -> Self {
        Self {
            id,
            peer,
            inbound,
            outbound,
            state: SessionState::Running,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 双方向の中継を実行
    ///
    /// 上り（接続元→リモート）の終了がセッションの寿命を決める。
    /// 上りがEOFまたはエラーで終わるか、シャットダウン要求を受けたら
    /// 下り（リモート→接続元）をキャンセルし、両方のソケットを閉じる。
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> CloseReason {
        let id = self.id;
        info!("Session {}: relaying {} <-> {}", id, self.peer, peer_addr(&self.outbound));

        let reason = {
            let (mut inbound_read, mut inbound_write) = self.inbound.split();
            let (mut outbound_read, mut outbound_write) = self.outbound.split();

            let upstream = copy_loop(&mut inbound_read, &mut outbound_write);
            let downstream = async {
                let result = copy_loop(&mut outbound_read, &mut inbound_write).await;
                // リモートのEOFを接続元に伝える
                let _ = inbound_write.shutdown().await;
                result
            };
            tokio::pin!(upstream);
            tokio::pin!(downstream);

            let mut downstream_done = false;
            loop {
                tokio::select! {
                    result = &mut upstream => {
                        break match result {
                            Ok(bytes) => {
                                debug!("Session {}: inbound -> outbound: {} bytes", id, bytes);
                                CloseReason::InboundClosed
                            }
                            Err(e) => {
                                debug!("Session {}: inbound -> outbound error: {}", id, e);
                                CloseReason::InboundError
                            }
                        };
                    }
                    result = &mut downstream, if !downstream_done => {
                        downstream_done = true;
                        match result {
                            Ok(bytes) => debug!("Session {}: outbound -> inbound: {} bytes", id, bytes),
                            Err(e) => debug!("Session {}: outbound -> inbound error: {}", id, e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break CloseReason::Shutdown;
                    }
                }
            }
            // ここで下りのループがドロップされ、キャンセルされる
        };

        self.close().await;
        info!("Session {}: closed ({})", id, reason);
        reason
    }

    /// 両方のソケットを閉じる
    ///
    /// 何度呼んでもよい。相手が既に切断していてもエラーにはならない。
    /// ファイルディスクリプタ自体はセッションのドロップ時に解放される。
    pub async fn close(&mut self) {
        if self.state == SessionState::Done {
            return;
        }
        self.state = SessionState::Closing;

        if let Err(e) = self.inbound.shutdown().await {
            debug!("Session {}: inbound shutdown: {}", self.id, e);
        }
        if let Err(e) = self.outbound.shutdown().await {
            debug!("Session {}: outbound shutdown: {}", self.id, e);
        }

        self.state = SessionState::Done;
    }
}

fn peer_addr(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}
