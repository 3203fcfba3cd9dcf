//! 客户端消息分发
//!
//! 接收线程把每一帧分类：推送通知进入通知队列，回复进入唯一的待决请求槽。
//! 同一时刻最多只有一个同步请求在等待回复，由请求闸门（发送锁）保证。
//! 连接结束时向槽和队列各注入一次关闭哨兵，所有等待者都会被释放。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use protocol::{
    CodeKind, ControlCode, Envelope, FrameReceiver, FrameSender, ProtocolError, Result,
    ShutdownHandle,
};

/// 待决请求槽中的值
#[derive(Debug)]
enum Slot {
    /// 完整的回复帧
    Reply(Vec<u8>),
    /// 连接已关闭
    Closed,
}

/// 通知队列中的值
#[derive(Debug)]
enum Notice {
    Message(String),
    Closed,
}

/// 请求闸门：持有它才能发送并等待回复
struct RequestGate {
    sender: FrameSender,
    replies: UnboundedReceiver<Slot>,
}

/// 通知队列的消费端
pub struct Notifications {
    rx: UnboundedReceiver<Notice>,
}

impl Notifications {
    /// 阻塞等待下一条通知；连接关闭后返回 `None`
    pub fn next(&mut self) -> Option<String> {
        match self.rx.blocking_recv() {
            Some(Notice::Message(text)) => Some(text),
            Some(Notice::Closed) | None => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 客户端分发器
pub struct Dispatcher {
    gate: Mutex<RequestGate>,
    /// 正在等待的回复控制码
    awaited: Mutex<Option<ControlCode>>,
    replies: Mutex<Option<UnboundedSender<Slot>>>,
    notices: Mutex<Option<UnboundedSender<Notice>>>,
    shutdown: ShutdownHandle,
    closed: AtomicBool,
}

impl Dispatcher {
    /// 创建分发器及其通知队列
    pub fn new(sender: FrameSender, shutdown: ShutdownHandle) -> (Self, Notifications) {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let dispatcher = Self {
            gate: Mutex::new(RequestGate {
                sender,
                replies: reply_rx,
            }),
            awaited: Mutex::new(None),
            replies: Mutex::new(Some(reply_tx)),
            notices: Mutex::new(Some(notice_tx)),
            shutdown,
            closed: AtomicBool::new(false),
        };
        (dispatcher, Notifications { rx: notice_rx })
    }

    /// 发送同步请求并阻塞等待回复
    ///
    /// 连接关闭（包括等待期间关闭）时返回 `None`。不得在接收线程中调用。
    pub fn request(&self, request: Envelope) -> Option<Envelope> {
        let mut gate = lock(&self.gate);

        if self.is_closed() {
            debug!("连接已关闭，放弃请求 {}", request.code);
            return None;
        }

        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("编码请求 {} 失败: {}", request.code, e);
                return None;
            }
        };

        *lock(&self.awaited) = request.code.response();
        if !gate.sender.send(&frame) {
            *lock(&self.awaited) = None;
            self.close();
            return None;
        }

        let slot = gate.replies.blocking_recv();
        *lock(&self.awaited) = None;

        match slot {
            Some(Slot::Reply(frame)) => match Envelope::decode(&frame) {
                Ok(reply) => Some(reply),
                Err(e) => {
                    warn!("回复无法解析: {}", e);
                    None
                }
            },
            Some(Slot::Closed) | None => None,
        }
    }

    /// 分类并投递一帧；格式错误时返回 `Err`，调用方应结束连接
    pub fn dispatch(&self, frame: &[u8]) -> Result<()> {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(ProtocolError::UnknownControl { code }) => {
                warn!("未知控制码 {:#04x}，丢弃", code);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match envelope.code {
            ControlCode::Notify => {
                let text: String = envelope.payload()?;
                debug!("收到服务器通知: {}", text);
                if let Some(tx) = lock(&self.notices).as_ref() {
                    let _ = tx.send(Notice::Message(text));
                }
            }
            code if code.is_reply() || code.kind() == CodeKind::Error => {
                let awaited = *lock(&self.awaited);
                match awaited {
                    None => warn!("没有等待中的请求，丢弃回复 {}", code),
                    Some(expected) => {
                        if code != expected && code != ControlCode::NotJoined {
                            warn!("协议错误：期望 [{}]，收到 [{}]", expected, code);
                        }
                        if let Some(tx) = lock(&self.replies).as_ref() {
                            let _ = tx.send(Slot::Reply(frame.to_vec()));
                        }
                    }
                }
            }
            other => warn!("非回复控制码 [{}]，丢弃", other),
        }
        Ok(())
    }

    /// 接收循环：持续读取并分发，直到连接结束
    pub fn run(&self, mut receiver: FrameReceiver) {
        info!("进入接收循环...");
        while let Some(frame) = receiver.receive() {
            debug!("收到 [{} 字节]", frame.len());
            if let Err(e) = self.dispatch(&frame) {
                error!("收到非法帧，断开连接: {}", e);
                self.shutdown.close();
                break;
            }
        }
        self.close();
        info!("接收循环结束");
    }

    /// 注入关闭哨兵（仅一次），释放所有等待者
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("注入关闭哨兵");
        if let Some(tx) = lock(&self.replies).take() {
            let _ = tx.send(Slot::Closed);
        }
        if let Some(tx) = lock(&self.notices).take() {
            let _ = tx.send(Notice::Closed);
        }
    }

    /// 主动断开：关闭读方向和连接，并释放所有等待者
    pub fn stop(&self) {
        self.shutdown.shutdown_read();
        self.shutdown.close();
        self.close();
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Connection, FrameReader, TcpListener};
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// 客户端分发器 + 服务端连接
    fn setup() -> (Arc<Dispatcher>, Notifications, Connection, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || Connection::connect(&addr).unwrap());
        let server = listener.accept().unwrap();

        let (rx, tx, shutdown) = client.join().unwrap().split();
        let (dispatcher, notifications) = Dispatcher::new(tx, shutdown);
        let dispatcher = Arc::new(dispatcher);
        let network = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.run(rx))
        };
        (dispatcher, notifications, server, network)
    }

    fn notify_frame(text: &str) -> Vec<u8> {
        Envelope::new(ControlCode::Notify)
            .with_value(text)
            .unwrap()
            .encode()
            .unwrap()
    }

    #[test]
    fn test_reply_and_notification_routing() {
        let (dispatcher, mut notifications, server, _network) = setup();
        let (mut server_rx, mut server_tx, _) = server.split();

        let responder = thread::spawn(move || {
            let frame = server_rx.receive().unwrap();
            assert_eq!(frame, b"A".to_vec());
            // 通知与回复交错到达
            assert!(server_tx.send(&notify_frame("bob 加入了游戏！")));
            assert!(server_tx.send(b"x"));
            assert!(server_tx.send(&notify_frame("bob 离开了游戏")));
        });

        let reply = dispatcher.request(Envelope::new(ControlCode::GetState)).unwrap();
        assert_eq!(reply.code, ControlCode::NotJoined);
        responder.join().unwrap();

        assert_eq!(notifications.next().as_deref(), Some("bob 加入了游戏！"));
        assert_eq!(notifications.next().as_deref(), Some("bob 离开了游戏"));
    }

    #[test]
    fn test_unknown_code_is_dropped() {
        let (dispatcher, _notifications, server, _network) = setup();
        let (mut server_rx, mut server_tx, _) = server.split();

        let responder = thread::spawn(move || {
            server_rx.receive().unwrap();
            assert!(server_tx.send(b"Z:junk"));
            assert!(server_tx.send(b"b:1"));
        });

        let request = Envelope::new(ControlCode::Guess)
            .with_value(&(5, [0, 0], "alice"))
            .unwrap();
        let reply = dispatcher.request(request).unwrap();
        assert_eq!(reply.code, ControlCode::GuessResult);
        assert_eq!(reply.flag_value(), Some(true));
        assert!(!dispatcher.is_closed());
        responder.join().unwrap();
    }

    #[test]
    fn test_at_most_one_outstanding_request() {
        // 服务端使用原始套接字，以观察请求到达的时机
        let raw = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = raw.local_addr().unwrap().to_string();
        let connector = thread::spawn(move || Connection::connect(&addr).unwrap());
        let (mut stream, _) = raw.accept().unwrap();

        let (rx, tx, shutdown) = connector.join().unwrap().split();
        let (dispatcher, _notifications) = Dispatcher::new(tx, shutdown);
        let dispatcher = Arc::new(dispatcher);
        let network = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.run(rx))
        };

        let requesters: Vec<_> = (0..2)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || dispatcher.request(Envelope::new(ControlCode::GetState)))
            })
            .collect();

        let state: protocol::StatePayload = (Vec::new(), protocol::Scores::new());
        let mut reply = Envelope::new(ControlCode::State)
            .with_value(&state)
            .unwrap()
            .encode()
            .unwrap();
        reply.push(protocol::FRAME_SEPARATOR);

        let mut reader = FrameReader::new(stream.try_clone().unwrap());
        assert_eq!(reader.read_frame().unwrap(), Some(b"A".to_vec()));

        // 第一个请求未回复前，第二个请求不能发出
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        assert!(reader.read_frame().is_err());

        stream.set_read_timeout(None).unwrap();
        stream.write_all(&reply).unwrap();
        assert_eq!(reader.read_frame().unwrap(), Some(b"A".to_vec()));
        stream.write_all(&reply).unwrap();

        for requester in requesters {
            let reply = requester.join().unwrap().unwrap();
            assert_eq!(reply.code, ControlCode::State);
        }

        stream.shutdown(std::net::Shutdown::Both).unwrap();
        network.join().unwrap();
        assert!(dispatcher.is_closed());
    }

    #[test]
    fn test_disconnect_releases_waiter() {
        let (dispatcher, mut notifications, server, network) = setup();

        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.request(Envelope::new(ControlCode::GetState)))
        };

        let (mut server_rx, _server_tx, server_shutdown) = server.split();
        assert_eq!(server_rx.receive(), Some(b"A".to_vec()));
        // 服务端不回复，直接断开
        server_shutdown.close();

        assert!(waiter.join().unwrap().is_none());
        assert_eq!(notifications.next(), None);
        network.join().unwrap();

        // 关闭后的请求立即返回
        assert!(dispatcher.request(Envelope::new(ControlCode::GetState)).is_none());
    }

    #[test]
    fn test_stop_releases_waiter() {
        let (dispatcher, mut notifications, server, network) = setup();
        let (mut server_rx, _server_tx, _) = server.split();

        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.request(Envelope::new(ControlCode::GetState)))
        };
        assert!(server_rx.receive().is_some());

        dispatcher.stop();
        assert!(waiter.join().unwrap().is_none());
        assert_eq!(notifications.next(), None);
        network.join().unwrap();
    }

    #[test]
    fn test_bad_frame_closes_connection() {
        let (dispatcher, mut notifications, server, network) = setup();
        let (_server_rx, mut server_tx, _) = server.split();

        // 控制码后缺少字段分隔符
        assert!(server_tx.send(b"eX"));
        network.join().unwrap();

        assert!(dispatcher.is_closed());
        assert_eq!(notifications.next(), None);
    }
}
