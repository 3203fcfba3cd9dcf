//! 消息类型定义
//!
//! 帧内容格式：`控制码 [':' 字段1 [':' 字段2 ...]]`。
//! 字段为不含分隔符的字节串，结构化数据经 [`serialize`] 编码后放入字段。

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ProtocolError, Result};
use crate::{FIELD_SEPARATOR, FRAME_SEPARATOR};

/// 数独网格（行优先，0 表示未揭开）
pub type Grid = Vec<Vec<u8>>;

/// 玩家名 -> 得分
pub type Scores = BTreeMap<String, i64>;

/// GUESS 请求载荷：(数字, [行, 列], 玩家名)
pub type GuessPayload = (i64, [i64; 2], String);

/// STATE 响应载荷：(已揭开网格, 排行榜)
pub type StatePayload = (Grid, Scores);

/// 控制码类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// 客户端请求
    Request,
    /// 服务端响应（含推送通知）
    Response,
    /// 服务端错误回复
    Error,
}

/// 控制码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    // === 请求 ===
    /// 获取当前进度
    GetState,
    /// 猜数字
    Guess,
    /// 提议新数独
    SetPuzzle,
    /// 设置玩家名
    SetName,

    // === 响应 ===
    /// 当前进度
    State,
    /// 猜测结果
    GuessResult,
    /// 提议结果
    PuzzleResult,
    /// 设置名字结果
    NameResult,
    /// 尚未加入游戏
    NotJoined,
    /// 服务端推送通知
    Notify,

    // === 错误 ===
    /// 未知控制码
    UnknownControl,
    /// 格式错误
    BadFormat,
}

impl ControlCode {
    /// 全部控制码
    pub const ALL: [ControlCode; 12] = [
        ControlCode::GetState,
        ControlCode::Guess,
        ControlCode::SetPuzzle,
        ControlCode::SetName,
        ControlCode::State,
        ControlCode::GuessResult,
        ControlCode::PuzzleResult,
        ControlCode::NameResult,
        ControlCode::NotJoined,
        ControlCode::Notify,
        ControlCode::UnknownControl,
        ControlCode::BadFormat,
    ];

    /// 线上字节
    pub fn as_byte(self) -> u8 {
        match self {
            ControlCode::GetState => b'A',
            ControlCode::Guess => b'B',
            ControlCode::SetPuzzle => b'C',
            ControlCode::SetName => b'D',
            ControlCode::State => b'a',
            ControlCode::GuessResult => b'b',
            ControlCode::PuzzleResult => b'c',
            ControlCode::NameResult => b'd',
            ControlCode::Notify => b'e',
            ControlCode::NotJoined => b'x',
            ControlCode::UnknownControl => b'4',
            ControlCode::BadFormat => b'5',
        }
    }

    /// 从线上字节解析
    pub fn from_byte(byte: u8) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_byte() == byte)
            .ok_or(ProtocolError::UnknownControl { code: byte })
    }

    /// 控制码类别
    pub fn kind(self) -> CodeKind {
        match self {
            ControlCode::GetState
            | ControlCode::Guess
            | ControlCode::SetPuzzle
            | ControlCode::SetName => CodeKind::Request,
            ControlCode::State
            | ControlCode::GuessResult
            | ControlCode::PuzzleResult
            | ControlCode::NameResult
            | ControlCode::NotJoined
            | ControlCode::Notify => CodeKind::Response,
            ControlCode::UnknownControl | ControlCode::BadFormat => CodeKind::Error,
        }
    }

    /// 请求对应的成功响应码
    pub fn response(self) -> Option<ControlCode> {
        match self {
            ControlCode::GetState => Some(ControlCode::State),
            ControlCode::Guess => Some(ControlCode::GuessResult),
            ControlCode::SetPuzzle => Some(ControlCode::PuzzleResult),
            ControlCode::SetName => Some(ControlCode::NameResult),
            _ => None,
        }
    }

    /// 是否为同步请求的回复（不含推送通知）
    pub fn is_reply(self) -> bool {
        self.kind() == CodeKind::Response && self != ControlCode::Notify
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// 消息信封：控制码 + 有序字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub code: ControlCode,
    pub fields: Vec<Vec<u8>>,
}

impl Envelope {
    /// 创建不带字段的信封
    pub fn new(code: ControlCode) -> Self {
        Self {
            code,
            fields: Vec::new(),
        }
    }

    /// 追加一个原始字段
    pub fn with_field(mut self, field: impl Into<Vec<u8>>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// 追加一个序列化字段
    pub fn with_value<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        Ok(self.with_field(serialize(value)?))
    }

    /// 布尔结果回复（`1` / `0`）
    pub fn flag(code: ControlCode, ok: bool) -> Self {
        Self::new(code).with_field(if ok { &b"1"[..] } else { &b"0"[..] })
    }

    /// 编码为帧内容
    pub fn encode(&self) -> Result<Vec<u8>> {
        let fields: Vec<&[u8]> = self.fields.iter().map(Vec::as_slice).collect();
        encode(self.code, &fields)
    }

    /// 从帧内容解码
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (code, rest) = decode(frame)?;
        let fields = match rest {
            None => Vec::new(),
            Some(rest) => rest
                .split(|b| *b == FIELD_SEPARATOR)
                .map(<[u8]>::to_vec)
                .collect(),
        };
        Ok(Self { code, fields })
    }

    /// 第 `index` 个字段
    pub fn field(&self, index: usize) -> Option<&[u8]> {
        self.fields.get(index).map(Vec::as_slice)
    }

    /// 将首字段解释为布尔结果
    pub fn flag_value(&self) -> Option<bool> {
        match self.field(0)?.first()? {
            b'1' => Some(true),
            b'0' => Some(false),
            _ => None,
        }
    }

    /// 反序列化首字段
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let field = self
            .field(0)
            .ok_or_else(|| ProtocolError::bad_format(format!("{} 缺少载荷字段", self.code)))?;
        deserialize(field)
    }
}

/// 编码控制码与字段
pub fn encode(code: ControlCode, fields: &[&[u8]]) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(1 + fields.iter().map(|f| f.len() + 1).sum::<usize>());
    frame.push(code.as_byte());

    for field in fields {
        if let Some(&sep) = field
            .iter()
            .find(|&&b| b == FIELD_SEPARATOR || b == FRAME_SEPARATOR)
        {
            return Err(ProtocolError::InvalidFrame { separator: sep });
        }
        frame.push(FIELD_SEPARATOR);
        frame.extend_from_slice(field);
    }

    Ok(frame)
}

/// 拆出控制码，返回剩余部分（无字段时为 `None`）
pub fn decode(frame: &[u8]) -> Result<(ControlCode, Option<&[u8]>)> {
    let (&first, rest) = frame
        .split_first()
        .ok_or_else(|| ProtocolError::bad_format("空帧"))?;
    let code = ControlCode::from_byte(first)?;

    match rest.split_first() {
        None => Ok((code, None)),
        Some((&FIELD_SEPARATOR, fields)) => Ok((code, Some(fields))),
        Some((&other, _)) => Err(ProtocolError::bad_format(format!(
            "控制码后应为字段分隔符，实际为 {:#04x}",
            other
        ))),
    }
}

/// 序列化结构化值（JSON + URL 安全 Base64，结果不含分隔符）
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    Ok(URL_SAFE_NO_PAD.encode(json).into_bytes())
}

/// 反序列化结构化值
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let json = URL_SAFE_NO_PAD.decode(bytes)?;
    Ok(serde_json::from_slice(&json)?)
}
