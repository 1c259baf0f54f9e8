use anyhow::{ensure, Result};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

/// 転送設定（起動時に一度だけ作成し、以降は読み取り専用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    local_port: u16,
    remote_host: String,
    remote_port: u16,
}

impl Config {
    /// 設定を検証して作成
    ///
    /// `local_port` が 0 の場合はOSが空きポートを割り当てる
    pub fn new(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Result<Self> {
        let remote_host = remote_host.into();
        ensure!(!remote_host.trim().is_empty(), "Remote host must not be empty");
        ensure!(remote_port != 0, "Remote port must not be 0");

        Ok(Self {
            local_port,
            remote_host,
            remote_port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// 待ち受けアドレス（常にループバック）
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port))
    }

    /// ログ表示用のリモートアドレス
    pub fn remote_addr(&self) -> RemoteAddr<'_> {
        RemoteAddr(self)
    }
}

/// `host:port` 形式で表示（IPv6リテラルは角括弧で囲む）
pub struct RemoteAddr<'a>(&'a Config);

impl fmt::Display for RemoteAddr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = &self.0.remote_host;
        if host.contains(':') {
            write!(f, "[{}]:{}", host, self.0.remote_port)
        } else {
            write!(f, "{}:{}", host, self.0.remote_port)
        }
    }
}
