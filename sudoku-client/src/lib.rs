//! 多人数独客户端
//!
//! 包含:
//! - 控制台输入输出
//! - 消息分发（回复槽与通知队列）
//! - 客户端状态机与交互循环

pub mod client;
pub mod console;
pub mod dispatcher;

pub use client::{parse_guess, Client, ClientState, InputError, Progress};
pub use console::{Console, StdConsole};
pub use dispatcher::{Dispatcher, Notifications};
