//! 帧编解码
//!
//! 线上格式：`帧内容 + FRAME_SEPARATOR`。帧内容不得包含分隔符，
//! 读取端只有在看到结尾分隔符后才交出完整帧。

use std::io::{BufRead, BufReader, Read, Write};

use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::{FRAME_SEPARATOR, MAX_FRAME_SIZE};

/// 帧读取器
pub struct FrameReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(256),
        }
    }

    /// 读取一帧
    ///
    /// 返回 `Ok(None)` 表示对端已关闭（包括帧中途断开，半帧被丢弃）。
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        self.buffer.clear();

        // 多读一个字节用于判断是否超限
        let limit = MAX_FRAME_SIZE as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(FRAME_SEPARATOR, &mut self.buffer)?;

        if read == 0 {
            return Ok(None);
        }

        if self.buffer.last() != Some(&FRAME_SEPARATOR) {
            if self.buffer.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge {
                    size: self.buffer.len(),
                    max: MAX_FRAME_SIZE,
                });
            }
            debug!("连接在帧中途关闭，丢弃 {} 字节", self.buffer.len());
            return Ok(None);
        }

        let frame = self.buffer[..self.buffer.len() - 1].to_vec();
        Ok(Some(frame))
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一帧（内容与分隔符一次性写出）
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.contains(&FRAME_SEPARATOR) {
            return Err(ProtocolError::InvalidFrame {
                separator: FRAME_SEPARATOR,
            });
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut wire = Vec::with_capacity(frame.len() + 1);
        wire.extend_from_slice(frame);
        wire.push(FRAME_SEPARATOR);

        self.writer.write_all(&wire)?;
        self.writer.flush()?;
        Ok(())
    }

    /// 获取内部写入器引用
    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_all(frames: &[&[u8]]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        for frame in frames {
            writer.write_frame(frame).unwrap();
        }
        writer.get_ref().clone()
    }

    #[test]
    fn test_frame_roundtrip() {
        let wire = encode_all(&[b"A", b"B:eyJ4IjoxfQ", b""]);
        assert_eq!(wire, b"A;B:eyJ4IjoxfQ;;".to_vec());

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap(), Some(b"A".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Some(b"B:eyJ4IjoxfQ".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Some(Vec::new()));
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn test_empty_stream_is_eof() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn test_partial_frame_is_discarded() {
        let mut reader = FrameReader::new(Cursor::new(b"d:1;c:".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Some(b"d:1".to_vec()));
        // 半帧不会被交给上层
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn test_byte_by_byte_stream() {
        // 模拟逐字节到达的流
        struct Trickle(Vec<u8>, usize);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.1 >= self.0.len() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0[self.1];
                self.1 += 1;
                Ok(1)
            }
        }

        let mut reader = FrameReader::new(Trickle(b"e:aGk;a:W10;".to_vec(), 0));
        assert_eq!(reader.read_frame().unwrap(), Some(b"e:aGk".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), Some(b"a:W10".to_vec()));
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn test_separator_in_content_rejected() {
        let mut writer = FrameWriter::new(Vec::new());
        let err = writer.write_frame(b"a;b").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrame { .. }));
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let wire = vec![b'A'; MAX_FRAME_SIZE + 10];
        let mut reader = FrameReader::new(Cursor::new(wire));
        assert!(matches!(
            reader.read_frame(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
