//! 数独生成
//!
//! 先由基础模式构造一个合法终盘，再做行/列/宫带/数字的随机置换；
//! 题面按"每行随机挖去 complexity 个格子（可重复）"得到。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use protocol::Grid;

/// 一道数独：终盘与题面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puzzle {
    pub solved: Grid,
    pub unsolved: Grid,
}

/// 数独生成器
pub trait PuzzleGenerator: Send {
    /// 生成边长为 `size` 的数独，每行隐藏 `complexity` 次随机格子
    fn generate(&mut self, size: usize, complexity: u32) -> Puzzle;
}

/// 随机数独生成器
pub struct RandomGenerator {
    rng: StdRng,
}

impl RandomGenerator {
    /// 使用系统熵初始化
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// 使用固定种子（测试用）
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PuzzleGenerator for RandomGenerator {
    fn generate(&mut self, size: usize, complexity: u32) -> Puzzle {
        let solved = solved_grid(&mut self.rng, size);
        let unsolved = cover(&solved, complexity, &mut self.rng);
        Puzzle { solved, unsolved }
    }
}

/// 宫的边长（`size` 必须为完全平方数）
fn box_size(size: usize) -> usize {
    let base = (1..=size).find(|b| b * b >= size).unwrap_or(1);
    debug_assert_eq!(base * base, size, "数独边长必须为完全平方数");
    base
}

/// 索引的随机排列：宫带顺序与带内顺序分别打乱
fn shuffled_axis<R: Rng>(rng: &mut R, base: usize) -> Vec<usize> {
    let mut bands: Vec<usize> = (0..base).collect();
    bands.shuffle(rng);

    let mut axis = Vec::with_capacity(base * base);
    for band in bands {
        let mut inner: Vec<usize> = (0..base).collect();
        inner.shuffle(rng);
        axis.extend(inner.into_iter().map(|i| band * base + i));
    }
    axis
}

/// 生成随机终盘
pub fn solved_grid<R: Rng>(rng: &mut R, size: usize) -> Grid {
    let base = box_size(size);
    let rows = shuffled_axis(rng, base);
    let cols = shuffled_axis(rng, base);

    let mut digits: Vec<u8> = (1..=size as u8).collect();
    digits.shuffle(rng);

    // 基础模式：(base * (r % base) + r / base + c) % size
    let pattern = |r: usize, c: usize| (base * (r % base) + r / base + c) % size;

    rows.iter()
        .map(|&r| cols.iter().map(|&c| digits[pattern(r, c)]).collect())
        .collect()
}

/// 每行随机隐藏 `complexity` 次（同一格子可能被重复选中）
pub fn cover<R: Rng>(solved: &Grid, complexity: u32, rng: &mut R) -> Grid {
    solved
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if !row.is_empty() {
                for _ in 0..complexity {
                    let col = rng.gen_range(0..row.len());
                    row[col] = 0;
                }
            }
            row
        })
        .collect()
}
