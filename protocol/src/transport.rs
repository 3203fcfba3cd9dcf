//! 传输层
//!
//! 每个连接拥有一个 TCP 套接字，拆分为接收端、发送端和可跨线程使用的关闭句柄。
//! 任何 IO 错误或对端关闭都会使连接进入关闭状态，之后的操作一律返回"无数据"。
//! 发送端本身不加锁，由持有者（客户端分发器或服务端会话）负责串行化。

use std::fs;
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ProtocolError, Result};
use crate::frame::{FrameReader, FrameWriter};
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// 网络配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl NetworkConfig {
    /// 从 JSON 文件加载（缺省字段取默认值）
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 用命令行参数覆盖
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// `host:port` 形式的地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 连接两端共享的状态
#[derive(Debug)]
struct LinkState {
    closed: AtomicBool,
    peer: String,
}

impl LinkState {
    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// TCP 连接
pub struct Connection {
    receiver: FrameReceiver,
    sender: FrameSender,
    shutdown: ShutdownHandle,
}

impl Connection {
    /// 连接服务器
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        info!("已连接服务器: {}", addr);
        Self::from_stream(stream)
    }

    /// 从 TcpStream 创建（服务端使用）
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let state = Arc::new(LinkState {
            closed: AtomicBool::new(false),
            peer,
        });

        let read_half = stream.try_clone()?;
        let control = stream.try_clone()?;

        Ok(Self {
            receiver: FrameReceiver {
                reader: FrameReader::new(read_half),
                state: Arc::clone(&state),
            },
            sender: FrameSender {
                writer: FrameWriter::new(stream),
                state: Arc::clone(&state),
            },
            shutdown: ShutdownHandle {
                stream: Arc::new(control),
                state,
            },
        })
    }

    /// 对端地址
    pub fn peer_addr(&self) -> &str {
        &self.receiver.state.peer
    }

    /// 关闭句柄的副本
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// 分离接收端、发送端与关闭句柄
    pub fn split(self) -> (FrameReceiver, FrameSender, ShutdownHandle) {
        (self.receiver, self.sender, self.shutdown)
    }
}

/// 接收端：阻塞读取完整帧
pub struct FrameReceiver {
    reader: FrameReader<TcpStream>,
    state: Arc<LinkState>,
}

impl FrameReceiver {
    /// 接收一帧；连接结束（含错误）时返回 `None`
    pub fn receive(&mut self) -> Option<Vec<u8>> {
        if self.state.is_closed() {
            return None;
        }

        match self.reader.read_frame() {
            Ok(Some(frame)) => {
                debug!("收到 {} 字节 <- {}", frame.len(), self.state.peer);
                Some(frame)
            }
            Ok(None) => {
                if self.state.mark_closed() {
                    info!("连接已断开: {}", self.state.peer);
                }
                None
            }
            Err(ProtocolError::Io(e)) => {
                if self.state.mark_closed() {
                    warn!("接收失败 {}: {}", self.state.peer, e);
                }
                None
            }
            Err(e) => {
                error!("收到非法帧 {}: {}", self.state.peer, e);
                self.state.mark_closed();
                None
            }
        }
    }

    /// 连接是否已关闭
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// 发送端：每次调用完整写出一帧
pub struct FrameSender {
    writer: FrameWriter<TcpStream>,
    state: Arc<LinkState>,
}

impl FrameSender {
    /// 发送一帧，返回是否成功
    pub fn send(&mut self, frame: &[u8]) -> bool {
        if self.state.is_closed() {
            debug!("连接已关闭，丢弃待发送帧 -> {}", self.state.peer);
            return false;
        }

        match self.writer.write_frame(frame) {
            Ok(()) => {
                debug!("发送 {} 字节 -> {}", frame.len(), self.state.peer);
                true
            }
            Err(ProtocolError::Io(e)) => {
                if self.state.mark_closed() {
                    warn!("发送失败 {}: {}", self.state.peer, e);
                }
                let _ = self.writer.get_ref().shutdown(Shutdown::Both);
                false
            }
            Err(e) => {
                // 帧本身不合法，连接不受影响
                error!("拒绝发送非法帧 -> {}: {}", self.state.peer, e);
                false
            }
        }
    }

    /// 对端地址
    pub fn peer_addr(&self) -> &str {
        &self.state.peer
    }

    /// 连接是否已关闭
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// 关闭句柄，可在其他线程中使用
#[derive(Clone)]
pub struct ShutdownHandle {
    stream: Arc<TcpStream>,
    state: Arc<LinkState>,
}

impl ShutdownHandle {
    /// 关闭读方向；阻塞中的接收会立即返回，已排队的写入仍可完成
    pub fn shutdown_read(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Read) {
            debug!("关闭读方向失败 {}: {}", self.state.peer, e);
        }
    }

    /// 关闭连接
    pub fn close(&self) {
        if self.state.mark_closed() {
            debug!("主动关闭连接: {}", self.state.peer);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// 连接是否已关闭
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// TCP 监听器
pub struct TcpListener {
    listener: std::net::TcpListener,
}

impl TcpListener {
    /// 绑定地址
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        Ok(Self { listener })
    }

    /// 接受连接
    pub fn accept(&self) -> Result<Connection> {
        let (stream, _addr) = self.listener.accept()?;
        Connection::from_stream(stream)
    }

    /// 获取本地地址
    pub fn local_addr(&self) -> Option<String> {
        self.listener.local_addr().ok().map(|a| a.to_string())
    }
}
