//! 服务器主逻辑
//!
//! 接受连接，为每个连接启动一个 [`PlayerSession`] 线程；所有会话共享同一个 [`Game`]。

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use protocol::{NetworkConfig, ProtocolError, Result, ShutdownHandle, TcpListener};

use crate::game::Game;
use crate::session::PlayerSession;

/// 连续第 `failures` 次接受连接失败后的等待时间（指数增长，上限 1 秒）
fn accept_backoff(failures: u32) -> Duration {
    let millis = 10u64.saturating_mul(1 << failures.min(7));
    Duration::from_millis(millis.min(1000))
}

/// 服务器控制句柄
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    addr: String,
}

impl ServerHandle {
    /// 停止接受新连接并断开所有会话
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("服务器正在关闭...");
            // 唤醒阻塞在 accept 上的监听线程
            let _ = TcpStream::connect(&self.addr);
        }
    }
}

/// 游戏服务器
pub struct GameServer {
    listener: TcpListener,
    game: Arc<Game>,
    running: Arc<AtomicBool>,
    addr: String,
}

impl GameServer {
    /// 绑定地址，创建新游戏
    pub fn bind(config: &NetworkConfig) -> Result<Self> {
        Self::with_game(config, Arc::new(Game::new()))
    }

    /// 绑定地址，使用给定的游戏实例
    pub fn with_game(config: &NetworkConfig, game: Arc<Game>) -> Result<Self> {
        let listener = TcpListener::bind(&config.address())?;
        let addr = listener
            .local_addr()
            .ok_or(ProtocolError::ConnectionClosed)?;
        info!("监听 {}", addr);

        Ok(Self {
            listener,
            game,
            running: Arc::new(AtomicBool::new(true)),
            addr,
        })
    }

    /// 实际监听地址
    pub fn local_addr(&self) -> &str {
        &self.addr
    }

    /// 共享的游戏实例
    pub fn game(&self) -> Arc<Game> {
        Arc::clone(&self.game)
    }

    /// 控制句柄
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: Arc::clone(&self.running),
            addr: self.addr.clone(),
        }
    }

    /// 服务循环，直到 [`ServerHandle::shutdown`] 被调用
    pub fn run(self) {
        info!("进入服务循环，等待客户端...");
        let mut sessions: Vec<(JoinHandle<()>, ShutdownHandle)> = Vec::new();
        let mut failures = 0u32;

        while self.running.load(Ordering::SeqCst) {
            let connection = match self.listener.accept() {
                Ok(connection) => {
                    failures = 0;
                    connection
                }
                Err(e) => {
                    let delay = accept_backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!("接受连接失败（连续 {} 次），{:?} 后重试: {}", failures, delay, e);
                    thread::sleep(delay);
                    continue;
                }
            };
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let peer = connection.peer_addr().to_string();
            let shutdown = connection.shutdown_handle();
            let game = Arc::clone(&self.game);

            let spawned = thread::Builder::new()
                .name(format!("session-{}", peer))
                .spawn(move || PlayerSession::new(connection, game).run());

            match spawned {
                Ok(handle) => sessions.push((handle, shutdown)),
                Err(e) => {
                    error!("无法为 {} 创建会话线程: {}", peer, e);
                    shutdown.close();
                }
            }

            sessions.retain(|(handle, _)| !handle.is_finished());
        }

        for (_, shutdown) in &sessions {
            shutdown.close();
        }
        for (handle, _) in sessions {
            if handle.join().is_err() {
                error!("会话线程异常退出");
            }
        }
        info!("服务器已停止");
    }
}
