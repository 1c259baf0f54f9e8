// シンプルな双方向TCPポート転送
// ローカルポートへの接続をすべて固定のリモートホストへ中継する

mod config;
mod forward;
mod reroute;
mod server;
mod session;

// パブリックAPI
pub use config::Config;
pub use forward::{copy_loop, TRANSFER_UNIT};
pub use reroute::{start_reroute, Reroute};
pub use server::{run_server, Server};
pub use session::{CloseReason, Session, SessionState};
