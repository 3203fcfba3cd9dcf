//! 对局控制
//!
//! 唯一的权威游戏状态：终盘、已揭开网格、玩家名册与得分。
//! 所有读写都在同一把锁内完成，广播也在锁内发出，
//! 因此通知顺序与状态变化顺序一致。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use protocol::{Grid, StatePayload, GRID_SIZE, MAX_COMPLEXITY};

use crate::player::{Notifier, PlayerRoster};
use crate::puzzle::{PuzzleGenerator, RandomGenerator};

/// 游戏状态（锁内部分）
struct GameInner {
    /// 终盘，空表示当前没有进行中的数独
    solved: Grid,
    /// 已揭开网格，0 表示未揭开
    uncovered: Grid,
    players: PlayerRoster,
    generator: Box<dyn PuzzleGenerator>,
}

impl GameInner {
    fn is_active(&self) -> bool {
        !self.uncovered.is_empty()
    }

    fn reset(&mut self) {
        self.solved.clear();
        self.uncovered.clear();
    }

    /// 广播 "<玩家> <事件>"
    fn notify_update(&self, actor: &str, event: &str) {
        let message = format!("{} {}", actor, event);
        let delivered = self.players.broadcast(&message);
        debug!("广播 [{}] 送达 {} 人", message, delivered);
    }
}

/// 游戏
pub struct Game {
    inner: Mutex<GameInner>,
}

impl Game {
    /// 创建游戏（随机生成器）
    pub fn new() -> Self {
        Self::with_generator(Box::new(RandomGenerator::new()))
    }

    /// 使用指定的数独生成器
    pub fn with_generator(generator: Box<dyn PuzzleGenerator>) -> Self {
        Self {
            inner: Mutex::new(GameInner {
                solved: Vec::new(),
                uncovered: Vec::new(),
                players: PlayerRoster::new(),
                generator,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, GameInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 玩家加入；名字重复或非法时返回 `false`
    pub fn join(&self, name: &str, notifier: Arc<dyn Notifier>) -> bool {
        let mut state = self.state();
        match state.players.join(name, notifier) {
            Ok(()) => {
                info!("{} 加入游戏", name);
                state.notify_update(name, "加入了游戏！");
                true
            }
            Err(reason) => {
                debug!("拒绝玩家名 {}: {}", name, reason);
                false
            }
        }
    }

    /// 玩家离开（重复调用无副作用）
    pub fn leave(&self, name: &str) -> bool {
        let mut state = self.state();
        if state.players.remove(name).is_none() {
            return false;
        }
        info!("{} 离开游戏", name);
        state.notify_update(name, "离开了游戏");
        true
    }

    /// 提议新数独；仅当没有进行中的数独且难度在 `1..=MAX_COMPLEXITY` 内时成功
    pub fn set_puzzle(&self, complexity: u32, by: &str) -> bool {
        if !(1..=MAX_COMPLEXITY).contains(&complexity) {
            debug!("{} 提议的难度 {} 超出范围，拒绝", by, complexity);
            return false;
        }

        let mut state = self.state();
        if state.is_active() {
            debug!("{} 提议新数独失败：已有进行中的数独", by);
            return false;
        }

        let puzzle = state.generator.generate(GRID_SIZE, complexity);
        state.solved = puzzle.solved;
        state.uncovered = puzzle.unsolved;

        info!("{} 设置了新数独，难度 {}", by, complexity);
        state.notify_update(by, &format!("设置了新的数独（难度 {}）！", complexity));
        true
    }

    /// 猜数字
    ///
    /// 猜中则揭开格子并加一分；若全部揭开则本局结束并重置。
    /// 猜错扣一分（得分可以为负）。坐标或数字越界、没有进行中的数独时
    /// 直接返回 `false`，不改变任何状态。
    pub fn guess(&self, value: i64, position: [i64; 2], player: &str) -> bool {
        let mut state = self.state();

        if !state.is_active() {
            debug!("{} 猜测时没有进行中的数独", player);
            return false;
        }
        let Some((row, col)) = cell_index(position) else {
            warn!("{} 猜测坐标越界: {:?}", player, position);
            return false;
        };
        let Some(value) = cell_value(value) else {
            warn!("{} 猜测数字越界: {}", player, value);
            return false;
        };

        if state.solved[row][col] != value {
            let score = state.players.adjust_score(player, -1);
            debug!("{} 在 [{}][{}] 猜 {} 错误，得分 {:?}", player, row, col, value, score);
            return false;
        }

        if state.uncovered[row][col] == value {
            // 已揭开的格子不重复计分
            return true;
        }

        state.uncovered[row][col] = value;
        let score = state.players.adjust_score(player, 1);
        debug!("{} 在 [{}][{}] 猜中 {}，得分 {:?}", player, row, col, value, score);
        state.notify_update(player, &format!("在 [{}][{}] 猜中了 {}！", row, col, value));

        if state.uncovered == state.solved {
            state.reset();
            info!("{} 解开了数独", player);
            state.notify_update(player, "解开了数独，赢得本局！");
        }
        true
    }

    /// 当前进度快照：(已揭开网格, 排行榜)
    pub fn get_state(&self) -> StatePayload {
        let state = self.state();
        (state.uncovered.clone(), state.players.scores())
    }

    /// 是否有进行中的数独
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// 在线玩家数量
    pub fn player_count(&self) -> usize {
        self.state().players.count()
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

fn cell_index(position: [i64; 2]) -> Option<(usize, usize)> {
    let row = usize::try_from(position[0]).ok().filter(|&r| r < GRID_SIZE)?;
    let col = usize::try_from(position[1]).ok().filter(|&c| c < GRID_SIZE)?;
    Some((row, col))
}

fn cell_value(value: i64) -> Option<u8> {
    u8::try_from(value)
        .ok()
        .filter(|v| (1..=GRID_SIZE as u8).contains(v))
}
