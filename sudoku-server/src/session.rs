//! 玩家会话
//!
//! 每个连接一个读线程：读取请求帧，调用 [`Game`]，每个请求回复恰好一帧。
//! 推送通知与回复进入同一个发送队列，由写线程按入队顺序写出，
//! 因此帧不会交错，且对局锁内的广播不会被读得慢的客户端阻塞。

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use protocol::{
    Connection, ControlCode, Envelope, FrameReceiver, FrameSender, GuessPayload, ProtocolError,
    Result, ShutdownHandle,
};

use crate::game::Game;
use crate::player::Notifier;

/// 写线程：按顺序写出队列中的帧，队列关闭或写失败时结束
fn write_loop(mut sender: FrameSender, mut outbox: UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outbox.blocking_recv() {
        if !sender.send(&frame) {
            break;
        }
    }
    debug!("写线程结束: {}", sender.peer_addr());
}

/// 会话句柄：发送队列与玩家身份
pub struct SessionHandle {
    outbox: Mutex<Option<UnboundedSender<Vec<u8>>>>,
    name: Mutex<Option<String>>,
    peer: String,
}

impl SessionHandle {
    fn new(outbox: UnboundedSender<Vec<u8>>, peer: String) -> Self {
        Self {
            outbox: Mutex::new(Some(outbox)),
            name: Mutex::new(None),
            peer,
        }
    }

    /// 已加入游戏时的玩家名
    pub fn name(&self) -> Option<String> {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_name(&self, name: String) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = Some(name);
    }

    /// 对端地址
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 将一帧放入发送队列，不等待写出；写线程已结束时返回 `false`
    pub fn send(&self, envelope: &Envelope) -> bool {
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("编码 {} 失败: {}", envelope.code, e);
                return false;
            }
        };
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|outbox| outbox.send(frame).is_ok())
    }

    /// 关闭发送队列，写线程取完剩余的帧后结束
    fn close_outbox(&self) {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Notifier for SessionHandle {
    fn notify(&self, message: &str) -> bool {
        match Envelope::new(ControlCode::Notify).with_value(message) {
            Ok(envelope) => self.send(&envelope),
            Err(e) => {
                warn!("序列化通知失败: {}", e);
                false
            }
        }
    }
}

/// 玩家会话
pub struct PlayerSession {
    receiver: FrameReceiver,
    shutdown: ShutdownHandle,
    handle: Arc<SessionHandle>,
    writer: Option<JoinHandle<()>>,
    game: Arc<Game>,
}

impl PlayerSession {
    /// 创建会话并启动写线程
    pub fn new(connection: Connection, game: Arc<Game>) -> Self {
        let (receiver, sender, shutdown) = connection.split();
        let peer = sender.peer_addr().to_string();
        let (outbox, pending) = mpsc::unbounded_channel();

        let writer = match thread::Builder::new()
            .name(format!("writer-{}", peer))
            .spawn(move || write_loop(sender, pending))
        {
            Ok(writer) => Some(writer),
            Err(e) => {
                error!("无法为 {} 创建写线程: {}", peer, e);
                shutdown.close();
                None
            }
        };

        Self {
            receiver,
            shutdown,
            handle: Arc::new(SessionHandle::new(outbox, peer)),
            writer,
            game,
        }
    }

    /// 会话句柄
    pub fn handle(&self) -> Arc<SessionHandle> {
        Arc::clone(&self.handle)
    }

    /// 会话主循环，直到连接结束或收到非法帧
    pub fn run(mut self) {
        info!("客户端 {} 已连接", self.handle.peer());

        while let Some(frame) = self.receiver.receive() {
            debug!("收到请求 [{} 字节] <- {}", frame.len(), self.handle.peer());

            let reply = match self.handle_frame(&frame) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("客户端 {} 发送了非法帧，结束会话: {}", self.handle.peer(), e);
                    break;
                }
            };

            if !self.handle.send(&reply) {
                break;
            }
        }

        if let Some(name) = self.handle.name() {
            self.game.leave(&name);
        }
        // 对端可能已不再读取，先关闭连接，避免写线程阻塞
        self.handle.close_outbox();
        self.shutdown.close();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("写线程异常退出: {}", self.handle.peer());
            }
        }
        info!("客户端 {} 已断开", self.handle.peer());
    }

    /// 处理一帧请求，返回回复；格式错误时返回 `Err` 以结束会话
    fn handle_frame(&self, frame: &[u8]) -> Result<Envelope> {
        match Envelope::decode(frame) {
            Ok(request) => self.handle_request(request),
            Err(ProtocolError::UnknownControl { code }) => {
                debug!("未知控制码 {:#04x} <- {}", code, self.handle.peer());
                Ok(Envelope::new(ControlCode::UnknownControl))
            }
            Err(e) => Err(e),
        }
    }

    fn handle_request(&self, request: Envelope) -> Result<Envelope> {
        match request.code {
            ControlCode::SetName => {
                let name: String = request.payload()?;
                Ok(Envelope::flag(ControlCode::NameResult, self.join(name)))
            }
            ControlCode::SetPuzzle => {
                let Some(name) = self.handle.name() else {
                    return Ok(Envelope::new(ControlCode::NotJoined));
                };
                let complexity: i64 = request.payload()?;
                debug!("{} 提议新数独，难度 {}", name, complexity);
                let ok = u32::try_from(complexity)
                    .map(|c| self.game.set_puzzle(c, &name))
                    .unwrap_or(false);
                Ok(Envelope::flag(ControlCode::PuzzleResult, ok))
            }
            ControlCode::Guess => {
                let Some(name) = self.handle.name() else {
                    return Ok(Envelope::new(ControlCode::NotJoined));
                };
                let (value, position, claimed): GuessPayload = request.payload()?;
                if claimed != name {
                    warn!("{} 在猜测中自称 {}，按会话身份计分", name, claimed);
                }
                debug!("{} 猜 {} 在 {:?}", name, value, position);
                let ok = self.game.guess(value, position, &name);
                Ok(Envelope::flag(ControlCode::GuessResult, ok))
            }
            ControlCode::GetState => {
                if self.handle.name().is_none() {
                    return Ok(Envelope::new(ControlCode::NotJoined));
                }
                Envelope::new(ControlCode::State).with_value(&self.game.get_state())
            }
            other => {
                debug!("客户端 {} 发送了非请求控制码 {}", self.handle.peer(), other);
                Ok(Envelope::new(ControlCode::UnknownControl))
            }
        }
    }

    fn join(&self, name: String) -> bool {
        if let Some(current) = self.handle.name() {
            debug!("{} 已加入游戏，忽略改名为 {}", current, name);
            return false;
        }
        let notifier: Arc<dyn Notifier> = self.handle.clone();
        if self.game.join(&name, notifier) {
            self.handle.set_name(name);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::RandomGenerator;
    use protocol::{deserialize, StatePayload, TcpListener};
    use std::thread;

    /// 启动一个会话，返回客户端连接的收发端
    fn start_session(game: Arc<Game>) -> (FrameReceiver, FrameSender, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || Connection::connect(&addr).unwrap());
        let server_conn = listener.accept().unwrap();
        let session = thread::spawn(move || PlayerSession::new(server_conn, game).run());
        let (rx, tx, _) = client.join().unwrap().split();
        (rx, tx, session)
    }

    fn request(tx: &mut FrameSender, envelope: Envelope) {
        assert!(tx.send(&envelope.encode().unwrap()));
    }

    /// 读取下一条回复，跳过推送通知
    fn next_reply(rx: &mut FrameReceiver) -> Envelope {
        loop {
            let frame = rx.receive().expect("连接意外关闭");
            let envelope = Envelope::decode(&frame).unwrap();
            if envelope.code != ControlCode::Notify {
                return envelope;
            }
        }
    }

    fn game() -> Arc<Game> {
        Arc::new(Game::with_generator(Box::new(RandomGenerator::seeded(11))))
    }

    #[test]
    fn test_not_joined() {
        let (mut rx, mut tx, _) = start_session(game());

        request(&mut tx, Envelope::new(ControlCode::GetState));
        assert_eq!(next_reply(&mut rx).code, ControlCode::NotJoined);

        request(
            &mut tx,
            Envelope::new(ControlCode::SetPuzzle).with_value(&3).unwrap(),
        );
        assert_eq!(next_reply(&mut rx).code, ControlCode::NotJoined);
    }

    #[test]
    fn test_join_and_state() {
        let (mut rx, mut tx, _) = start_session(game());

        request(
            &mut tx,
            Envelope::new(ControlCode::SetName).with_value("alice").unwrap(),
        );
        let reply = next_reply(&mut rx);
        assert_eq!(reply.code, ControlCode::NameResult);
        assert_eq!(reply.flag_value(), Some(true));

        // 已加入后不允许再改名
        request(
            &mut tx,
            Envelope::new(ControlCode::SetName).with_value("bob").unwrap(),
        );
        assert_eq!(next_reply(&mut rx).flag_value(), Some(false));

        request(&mut tx, Envelope::new(ControlCode::GetState));
        let reply = next_reply(&mut rx);
        assert_eq!(reply.code, ControlCode::State);
        let (grid, scores): StatePayload = reply.payload().unwrap();
        assert!(grid.is_empty());
        assert_eq!(scores.get("alice"), Some(&0));
    }

    #[test]
    fn test_join_notification_pushed() {
        let (mut rx, mut tx, _) = start_session(game());

        request(
            &mut tx,
            Envelope::new(ControlCode::SetName).with_value("alice").unwrap(),
        );
        // 加入通知先于回复到达
        let first = Envelope::decode(&rx.receive().unwrap()).unwrap();
        assert_eq!(first.code, ControlCode::Notify);
        let text: String = deserialize(first.field(0).unwrap()).unwrap();
        assert!(text.starts_with("alice"));
        assert_eq!(next_reply(&mut rx).code, ControlCode::NameResult);
    }

    #[test]
    fn test_unknown_control_keeps_session() {
        let (mut rx, mut tx, _) = start_session(game());

        assert!(tx.send(b"Z:whatever"));
        assert_eq!(next_reply(&mut rx).code, ControlCode::UnknownControl);

        request(&mut tx, Envelope::new(ControlCode::GetState));
        assert_eq!(next_reply(&mut rx).code, ControlCode::NotJoined);
    }

    #[test]
    fn test_bad_format_ends_session() {
        let game = game();
        let (mut rx, mut tx, session) = start_session(Arc::clone(&game));

        request(
            &mut tx,
            Envelope::new(ControlCode::SetName).with_value("alice").unwrap(),
        );
        next_reply(&mut rx);
        assert_eq!(game.player_count(), 1);

        // 载荷无法反序列化
        assert!(tx.send(b"D:not-base64!"));
        session.join().unwrap();

        assert_eq!(rx.receive(), None);
        assert_eq!(game.player_count(), 0);
    }

    #[test]
    fn test_complexity_out_of_range() {
        let game = game();
        let (mut rx, mut tx, _) = start_session(Arc::clone(&game));

        request(
            &mut tx,
            Envelope::new(ControlCode::SetName).with_value("alice").unwrap(),
        );
        next_reply(&mut rx);

        for complexity in [-1i64, 0, 10, 4_000_000_000] {
            request(
                &mut tx,
                Envelope::new(ControlCode::SetPuzzle)
                    .with_value(&complexity)
                    .unwrap(),
            );
            let reply = next_reply(&mut rx);
            assert_eq!(reply.code, ControlCode::PuzzleResult);
            assert_eq!(reply.flag_value(), Some(false));
        }
        assert!(!game.is_active());
    }

    #[test]
    fn test_notify_does_not_wait_for_slow_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || Connection::connect(&addr).unwrap());
        let session = PlayerSession::new(listener.accept().unwrap(), game());
        // 客户端连接保持打开但从不读取
        let idle_client = client.join().unwrap();

        let handle = session.handle();
        let text = "x".repeat(4096);
        let started = std::time::Instant::now();
        for _ in 0..4000 {
            assert!(handle.notify(&text));
        }
        // 远超套接字缓冲区的数据量也只是入队
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        drop(idle_client);
        drop(session);
    }

    #[test]
    fn test_disconnect_leaves_game() {
        let game = game();
        let (mut rx, mut tx, session) = start_session(Arc::clone(&game));

        request(
            &mut tx,
            Envelope::new(ControlCode::SetName).with_value("alice").unwrap(),
        );
        next_reply(&mut rx);
        drop(tx);
        drop(rx);

        session.join().unwrap();
        assert_eq!(game.player_count(), 0);
    }
}
