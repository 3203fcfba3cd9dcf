//! 玩家管理

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use protocol::{ProtocolError, Result, Scores, MAX_NAME_LEN};

/// 向某个玩家推送通知的通道
pub trait Notifier: Send + Sync {
    /// 推送一条通知，返回是否送达
    fn notify(&self, message: &str) -> bool;
}

/// 玩家信息
pub struct Player {
    pub name: String,
    pub score: i64,
    notifier: Arc<dyn Notifier>,
}

impl Player {
    pub fn new(name: String, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            name,
            score: 0,
            notifier,
        }
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("name", &self.name)
            .field("score", &self.score)
            .finish()
    }
}

/// 玩家名册
#[derive(Debug, Default)]
pub struct PlayerRoster {
    /// 玩家名 -> 玩家信息
    players: BTreeMap<String, Player>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 验证玩家名
    pub fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        let len = name.chars().count();
        if len > MAX_NAME_LEN {
            return Err(ProtocolError::NameTooLong {
                len,
                max: MAX_NAME_LEN,
            });
        }
        Ok(())
    }

    /// 加入玩家（名字区分大小写，须唯一），初始得分为 0
    pub fn join(&mut self, name: &str, notifier: Arc<dyn Notifier>) -> Result<()> {
        Self::validate_name(name)?;

        if self.players.contains_key(name) {
            return Err(ProtocolError::NameTaken);
        }

        self.players
            .insert(name.to_string(), Player::new(name.to_string(), notifier));
        Ok(())
    }

    /// 移除玩家
    pub fn remove(&mut self, name: &str) -> Option<Player> {
        self.players.remove(name)
    }

    /// 检查玩家是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.players.contains_key(name)
    }

    /// 调整得分（允许为负）
    pub fn adjust_score(&mut self, name: &str, delta: i64) -> Option<i64> {
        let player = self.players.get_mut(name)?;
        player.score += delta;
        Some(player.score)
    }

    /// 当前排行榜
    pub fn scores(&self) -> Scores {
        self.players
            .values()
            .map(|p| (p.name.clone(), p.score))
            .collect()
    }

    /// 向所有玩家推送通知，返回送达数量
    pub fn broadcast(&self, message: &str) -> usize {
        self.players
            .values()
            .filter(|p| p.notifier.notify(message))
            .count()
    }

    /// 在线玩家数量
    pub fn count(&self) -> usize {
        self.players.len()
    }
}
