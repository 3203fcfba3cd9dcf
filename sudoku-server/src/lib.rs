//! 多人数独服务端
//!
//! 包含:
//! - 数独生成
//! - 对局控制（唯一的权威状态）
//! - 玩家名册与得分
//! - 玩家会话（每连接一个线程）
//! - 服务器监听循环

pub mod game;
pub mod player;
pub mod puzzle;
pub mod server;
pub mod session;

pub use game::Game;
pub use player::{Notifier, Player, PlayerRoster};
pub use puzzle::{Puzzle, PuzzleGenerator, RandomGenerator};
pub use server::{GameServer, ServerHandle};
pub use session::{PlayerSession, SessionHandle};
