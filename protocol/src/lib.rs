//! 多人数独共享协议库
//!
//! 包含:
//! - 帧编解码 (FrameReader, FrameWriter)
//! - 控制码与消息信封 (ControlCode, Envelope)
//! - 结构化载荷序列化 (serialize, deserialize)
//! - 传输层 (Connection, TcpListener, NetworkConfig)

mod constants;
mod error;
mod frame;
mod message;
mod transport;

pub use constants::*;
pub use error::{ProtocolError, Result};
pub use frame::{FrameReader, FrameWriter};
pub use message::{
    decode, deserialize, encode, serialize, CodeKind, ControlCode, Envelope, Grid,
    GuessPayload, Scores, StatePayload,
};
pub use transport::{
    Connection, FrameReceiver, FrameSender, NetworkConfig, ShutdownHandle, TcpListener,
};
