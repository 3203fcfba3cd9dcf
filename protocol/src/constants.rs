//! 协议常量定义

/// 消息帧分隔符
pub const FRAME_SEPARATOR: u8 = b';';

/// 字段分隔符
pub const FIELD_SEPARATOR: u8 = b':';

/// 数独边长（行数 = 列数）
pub const GRID_SIZE: usize = 9;

/// 单元格总数
pub const CELL_COUNT: usize = GRID_SIZE * GRID_SIZE;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 默认服务器地址
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// 默认服务器端口
pub const DEFAULT_PORT: u16 = 7777;

/// 默认难度（每行隐藏的格子数）
pub const DEFAULT_COMPLEXITY: u32 = 5;

/// 最大难度：每行隐藏次数超过边长不会再改变题面
pub const MAX_COMPLEXITY: u32 = GRID_SIZE as u32;

/// 玩家名最大长度
pub const MAX_NAME_LEN: usize = 20;
