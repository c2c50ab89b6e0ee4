//! Line framing over a byte stream
//!
//! `MessageStream` turns any buffered byte stream into a finite sequence of
//! parsed [`Message`]s. CR, LF, and CRLF all terminate a line; empty lines
//! are dropped. The stream is fused: after EOF or an I/O failure it keeps
//! returning `None`.

use crate::{Message, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Lazy message sequence over a buffered reader
pub struct MessageStream<R> {
    reader: R,
    pending: Vec<u8>,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> MessageStream<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            finished: false,
        }
    }

    /// Next parsed message, or `None` once the stream has ended.
    ///
    /// A line that fails to parse yields `Some(Err(..))` and leaves the
    /// stream usable; transport failure ends the stream.
    pub async fn next_message(&mut self) -> Option<Result<Message>> {
        loop {
            let line = self.next_line().await?;
            if line.is_empty() {
                continue;
            }
            return Some(Message::parse(&line));
        }
    }

    /// Read one raw line, honoring CR, LF, and CRLF terminators
    async fn next_line(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        loop {
            let buf = match self.reader.fill_buf().await {
                Ok(buf) => buf,
                Err(_) => {
                    self.finished = true;
                    return None;
                }
            };
            if buf.is_empty() {
                self.finished = true;
                if self.pending.is_empty() {
                    return None;
                }
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return Some(line);
            }

            match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
                Some(pos) => {
                    self.pending.extend_from_slice(&buf[..pos]);
                    self.reader.consume(pos + 1);
                    let line = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    return Some(line);
                }
                None => {
                    let len = buf.len();
                    self.pending.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// Write one line to the peer, always terminated by CRLF
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn collect(input: &str) -> Vec<Message> {
        let mut stream = MessageStream::new(BufReader::new(Cursor::new(input.as_bytes().to_vec())));
        let mut out = Vec::new();
        while let Some(msg) = stream.next_message().await {
            out.push(msg.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_mixed_delimiters() {
        let msgs = collect("NICK alice\r\nUSER ali 0 * :Alice\nPING token\r").await;
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].command, "NICK");
        assert_eq!(msgs[1].command, "USER");
        assert_eq!(msgs[2].command, "PING");
    }

    #[tokio::test]
    async fn test_empty_lines_dropped() {
        let msgs = collect("\r\n\r\nNICK alice\r\n\r\n").await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].command, "NICK");
    }

    #[tokio::test]
    async fn test_unterminated_final_line() {
        let msgs = collect("NICK alice\r\nQUIT").await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].command, "QUIT");
    }

    #[tokio::test]
    async fn test_fused_after_eof() {
        let mut stream =
            MessageStream::new(BufReader::new(Cursor::new(b"NICK alice\r\n".to_vec())));
        assert!(stream.next_message().await.is_some());
        assert!(stream.next_message().await.is_none());
        assert!(stream.next_message().await.is_none());
    }

    #[tokio::test]
    async fn test_write_line_appends_crlf() {
        let mut out = Vec::new();
        write_line(&mut out, "PONG server token").await.unwrap();
        assert_eq!(out, b"PONG server token\r\n");
    }
}
