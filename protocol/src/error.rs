//! 错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 解码错误
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// 消息格式错误（帧过短、分隔符缺失等）
    #[error("Bad message format: {reason}")]
    BadFormat { reason: String },

    /// 未知控制码
    #[error("Unknown control code: {code:#04x}")]
    UnknownControl { code: u8 },

    /// 帧内容包含分隔符
    #[error("Frame content contains separator byte {separator:#04x}")]
    InvalidFrame { separator: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 玩家名为空
    #[error("Player name is empty")]
    EmptyName,

    /// 玩家名过长
    #[error("Player name too long: {len} chars (max: {max})")]
    NameTooLong { len: usize, max: usize },

    /// 玩家名已被占用
    #[error("Player name is already taken")]
    NameTaken,
}

impl ProtocolError {
    pub(crate) fn bad_format(reason: impl Into<String>) -> Self {
        Self::BadFormat {
            reason: reason.into(),
        }
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
