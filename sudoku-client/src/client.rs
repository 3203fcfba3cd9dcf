//! 客户端状态机
//!
//! 状态随进度查询推进：`NotConnected → NeedName → NeedPuzzleSetup ⇄ NeedGuess`。
//! 交互循环、接收循环与通知循环各占一个线程，共享同一个 [`Client`]。

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, warn};

use protocol::{
    Connection, ControlCode, Envelope, FrameReceiver, GuessPayload, Scores, StatePayload,
    CELL_COUNT, DEFAULT_COMPLEXITY, GRID_SIZE,
};

use crate::console::Console;
use crate::dispatcher::{Dispatcher, Notifications};

/// 客户端状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotConnected,
    NeedName,
    NeedPuzzleSetup,
    NeedGuess,
}

impl ClientState {
    /// 进入该状态时显示的提示
    pub fn prompt(self) -> &'static str {
        match self {
            ClientState::NotConnected => "未连接服务器",
            ClientState::NeedName => "请输入玩家名（Q 退出）",
            ClientState::NeedPuzzleSetup => {
                "当前没有数独，请输入难度：每行隐藏的格子数 1-9，直接回车使用默认难度（Q 退出）"
            }
            ClientState::NeedGuess => "请输入猜测：<数字> <行> <列>，行列从 0 开始（Q 退出）",
        }
    }
}

/// 猜测输入错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("需要 3 个数：<数字> <行> <列>，实际 {0} 个")]
    WrongArity(usize),

    #[error("无法解析 \"{0}\"")]
    NotANumber(String),
}

/// 解析 `"<数字> <行> <列>"`
pub fn parse_guess(line: &str) -> Result<(u8, usize, usize), InputError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [value, row, col] = tokens.as_slice() else {
        return Err(InputError::WrongArity(tokens.len()));
    };

    let value = value
        .parse()
        .map_err(|_| InputError::NotANumber(value.to_string()))?;
    let row = row
        .parse()
        .map_err(|_| InputError::NotANumber(row.to_string()))?;
    let col = col
        .parse()
        .map_err(|_| InputError::NotANumber(col.to_string()))?;
    Ok((value, row, col))
}

/// 游戏进度快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// 按行展开的格子，0 表示未揭开；没有数独时为空
    pub cells: Vec<u8>,
    pub scores: Scores,
}

impl Progress {
    fn from_state((grid, scores): StatePayload) -> Self {
        Self {
            cells: grid.into_iter().flatten().collect(),
            scores,
        }
    }

    /// 是否有进行中的数独
    pub fn is_active(&self) -> bool {
        !self.cells.is_empty()
    }

    /// 渲染棋盘与排行榜
    pub fn render(&self) -> String {
        let mut out = String::new();

        if self.is_active() {
            for (r, row) in self.cells.chunks(GRID_SIZE).enumerate() {
                if r > 0 && r % 3 == 0 {
                    out.push_str("------+-------+------\n");
                }
                for (c, &cell) in row.iter().enumerate() {
                    if c > 0 && c % 3 == 0 {
                        out.push_str("| ");
                    }
                    if cell == 0 {
                        out.push_str(". ");
                    } else {
                        let _ = write!(out, "{} ", cell);
                    }
                }
                out.truncate(out.trim_end().len());
                out.push('\n');
            }
        } else {
            out.push_str("（没有进行中的数独）\n");
        }

        let mut ranking: Vec<(&String, &i64)> = self.scores.iter().collect();
        ranking.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        out.push_str("排行榜:\n");
        for (rank, (name, score)) in ranking.into_iter().enumerate() {
            let _ = writeln!(out, "  {}. {} {}", rank + 1, name, score);
        }
        out
    }
}

/// 连接建立后才存在的部分
struct Link {
    dispatcher: Dispatcher,
    receiver: Mutex<Option<FrameReceiver>>,
    notifications: Mutex<Option<Notifications>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 数独客户端
pub struct Client {
    console: Arc<dyn Console>,
    state: Mutex<ClientState>,
    name: Mutex<Option<String>>,
    link: OnceLock<Link>,
    /// 断线提示已显示（或用户主动退出，无需提示）
    farewell: AtomicBool,
}

impl Client {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self {
            console,
            state: Mutex::new(ClientState::NotConnected),
            name: Mutex::new(None),
            link: OnceLock::new(),
            farewell: AtomicBool::new(false),
        }
    }

    /// 当前状态
    pub fn state(&self) -> ClientState {
        *lock(&self.state)
    }

    /// 已确认的玩家名
    pub fn name(&self) -> Option<String> {
        lock(&self.name).clone()
    }

    fn transition(&self, next: ClientState) {
        let mut state = lock(&self.state);
        // 断开后只能通过重新连接离开 NotConnected
        let stale = *state == ClientState::NotConnected && next != ClientState::NeedName;
        if *state == next || stale {
            return;
        }
        debug!("状态 {:?} -> {:?}", *state, next);
        *state = next;
        drop(state);
        self.console.display(next.prompt());
    }

    /// 连接服务器（每个客户端只能连接一次）
    pub fn connect(&self, addr: &str) -> bool {
        if self.link.get().is_some() {
            warn!("已经连接过服务器");
            return false;
        }

        let connection = match Connection::connect(addr) {
            Ok(connection) => connection,
            Err(e) => {
                warn!("连接 {} 失败: {}", addr, e);
                self.console
                    .display(&format!("无法连接服务器 {}: {}", addr, e));
                return false;
            }
        };

        let (receiver, sender, shutdown) = connection.split();
        let (dispatcher, notifications) = Dispatcher::new(sender, shutdown);
        let link = Link {
            dispatcher,
            receiver: Mutex::new(Some(receiver)),
            notifications: Mutex::new(Some(notifications)),
        };
        if self.link.set(link).is_err() {
            return false;
        }

        self.transition(ClientState::NeedName);
        true
    }

    /// 启动接收线程与通知线程
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let client = Arc::clone(self);
        match thread::Builder::new()
            .name("network".to_string())
            .spawn(move || client.network_loop())
        {
            Ok(handle) => handles.push(handle),
            Err(e) => warn!("无法启动接收线程: {}", e),
        }

        let client = Arc::clone(self);
        match thread::Builder::new()
            .name("notifications".to_string())
            .spawn(move || client.notifications_loop())
        {
            Ok(handle) => handles.push(handle),
            Err(e) => warn!("无法启动通知线程: {}", e),
        }

        handles
    }

    /// 连接已断开：显示一次终止提示并回到 NotConnected
    fn disconnected(&self) {
        *lock(&self.state) = ClientState::NotConnected;
        if !self.farewell.swap(true, Ordering::SeqCst) {
            info!("与服务器的连接已断开");
            self.console.display("与服务器的连接已断开");
        }
    }

    /// 发送请求；连接已断开时返回 `None`
    fn request(&self, request: Envelope) -> Option<Envelope> {
        let Some(link) = self.link.get() else {
            debug!("尚未连接，放弃请求 {}", request.code);
            return None;
        };
        let reply = link.dispatcher.request(request);
        if reply.is_none() && link.dispatcher.is_closed() {
            self.disconnected();
        }
        reply
    }

    /// 发送请求并读取布尔结果
    ///
    /// 连接断开时返回 `None`；控制码不符记录后按拒绝处理。
    fn request_flag(&self, request: Envelope) -> Option<bool> {
        let expected = request.code.response()?;
        let reply = self.request(request)?;
        if reply.code != expected {
            warn!("协议错误：期望 [{}]，收到 [{}]", expected, reply.code);
            return Some(false);
        }
        Some(reply.flag_value() == Some(true))
    }

    /// 设置玩家名
    pub fn set_name(&self, name: &str) -> bool {
        let request = match Envelope::new(ControlCode::SetName).with_value(name) {
            Ok(request) => request,
            Err(e) => {
                warn!("序列化玩家名失败: {}", e);
                return false;
            }
        };

        match self.request_flag(request) {
            None => return false,
            Some(false) => {
                self.console
                    .display(&format!("玩家名 \"{}\" 不可用，请换一个", name));
                return false;
            }
            Some(true) => {}
        }

        info!("以 {} 的身份加入游戏", name);
        *lock(&self.name) = Some(name.to_string());
        self.get_progress();
        true
    }

    /// 提议新数独
    pub fn propose_puzzle(&self, complexity: u32) -> bool {
        let request = match Envelope::new(ControlCode::SetPuzzle).with_value(&complexity) {
            Ok(request) => request,
            Err(e) => {
                warn!("序列化难度失败: {}", e);
                return false;
            }
        };

        let Some(ok) = self.request_flag(request) else {
            return false;
        };
        if !ok {
            self.console.display("无法设置数独（已有进行中的数独或难度无效）");
        }
        self.get_progress();
        ok
    }

    /// 猜测某格的数字；猜错时重新查询进度
    pub fn guess(&self, value: u8, row: usize, col: usize) -> bool {
        let Some(name) = self.name() else {
            warn!("尚未加入游戏，不能猜测");
            return false;
        };

        let payload: GuessPayload = (
            i64::from(value),
            [row as i64, col as i64],
            name,
        );
        let request = match Envelope::new(ControlCode::Guess).with_value(&payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("序列化猜测失败: {}", e);
                return false;
            }
        };

        let Some(ok) = self.request_flag(request) else {
            return false;
        };
        if !ok {
            self.console
                .display(&format!("[{}][{}] 不是 {}", row, col, value));
            self.get_progress();
        }
        ok
    }

    /// 查询进度，显示并推进状态
    pub fn get_progress(&self) -> Option<Progress> {
        let reply = self.request(Envelope::new(ControlCode::GetState))?;
        if reply.code != ControlCode::State {
            warn!("协议错误：期望 [{}]，收到 [{}]", ControlCode::State, reply.code);
            return None;
        }

        let progress = match reply.payload::<StatePayload>() {
            Ok(state) => Progress::from_state(state),
            Err(e) => {
                warn!("进度无法解析: {}", e);
                return None;
            }
        };
        if progress.is_active() && progress.cells.len() != CELL_COUNT {
            warn!("棋盘大小异常: {} 格", progress.cells.len());
        }

        self.console.display(&progress.render());
        if self.name().is_some() {
            self.transition(if progress.is_active() {
                ClientState::NeedGuess
            } else {
                ClientState::NeedPuzzleSetup
            });
        }
        Some(progress)
    }

    /// 通知循环：显示每条通知并刷新进度，连接关闭时显示断线提示后结束
    pub fn notifications_loop(&self) {
        let Some(link) = self.link.get() else {
            return;
        };
        let Some(mut notifications) = lock(&link.notifications).take() else {
            warn!("通知循环已在运行");
            return;
        };

        while let Some(text) = notifications.next() {
            self.console.display(&format!("[通知] {}", text));
            if matches!(
                self.state(),
                ClientState::NeedPuzzleSetup | ClientState::NeedGuess
            ) {
                self.get_progress();
            }
        }
        self.disconnected();
        debug!("通知循环结束");
    }

    /// 接收循环，连接关闭时结束
    pub fn network_loop(&self) {
        let Some(link) = self.link.get() else {
            return;
        };
        let Some(receiver) = lock(&link.receiver).take() else {
            warn!("接收循环已在运行");
            return;
        };
        link.dispatcher.run(receiver);
    }

    /// 交互循环：按状态处理输入，`Q` 退出
    pub fn game_loop(&self) {
        loop {
            if self.is_disconnected() {
                self.disconnected();
                break;
            }

            let Some(line) = self.console.read_line("> ") else {
                break;
            };
            if line.eq_ignore_ascii_case("q") {
                info!("用户退出");
                break;
            }

            match self.state() {
                ClientState::NotConnected => break,
                ClientState::NeedName if line.is_empty() => {}
                ClientState::NeedName => {
                    self.set_name(&line);
                }
                ClientState::NeedPuzzleSetup if line.is_empty() => {
                    self.propose_puzzle(DEFAULT_COMPLEXITY);
                }
                ClientState::NeedPuzzleSetup => match line.parse::<u32>() {
                    Ok(complexity) => {
                        self.propose_puzzle(complexity);
                    }
                    Err(_) => self.console.display("难度必须是正整数"),
                },
                ClientState::NeedGuess if line.is_empty() => {}
                ClientState::NeedGuess => match parse_guess(&line) {
                    Ok((value, row, col)) => {
                        self.guess(value, row, col);
                    }
                    Err(e) => self.console.display(&format!("输入格式错误: {}", e)),
                },
            }
        }
        self.stop();
    }

    fn is_disconnected(&self) -> bool {
        self.link
            .get()
            .map_or(true, |link| link.dispatcher.is_closed())
    }

    /// 断开连接并释放所有等待者（主动退出，不显示断线提示）
    pub fn stop(&self) {
        self.farewell.store(true, Ordering::SeqCst);
        if let Some(link) = self.link.get() {
            link.dispatcher.stop();
        }
        *lock(&self.state) = ClientState::NotConnected;
    }
}
