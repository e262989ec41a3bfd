//! Relay channels over the router's Unix socket.
//!
//! A connection starts with one handshake line, `produce <channel>` or
//! `consume <consumer>`, and is a one-way stream of records afterwards. Every
//! record ends with `\n`; a trailing fragment without terminator is a
//! truncated record and is discarded, so a reader only ever hands out
//! complete records. A record that is not UTF-8 is reported as a protocol
//! error and the stream stays usable.
//!
//! Producer streams carry bare record bodies. The router tags what it sends
//! to consumers with the channel name (`<channel> <body>`) because one
//! consumer connection carries every channel it subscribes to.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use dronesim_core::enums::{ChannelId, Consumer};
use dronesim_core::wire::WireMessage;
use dronesim_core::ProtocolError;

/// Name of the router socket inside the run directory.
pub const ROUTER_SOCKET: &str = "router.sock";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bad handshake {0:?}")]
    Handshake(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{message} sent on the {channel} producer")]
    WrongChannel {
        channel: ChannelId,
        message: ChannelId,
    },
    #[error("router socket {path} unreachable after {attempts} attempts: {source}")]
    Unreachable {
        path: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    /// A bad record spoils only itself; everything else ends the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::Protocol(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Produce(ChannelId),
    Consume(Consumer),
}

impl Handshake {
    pub fn encode(&self) -> String {
        match self {
            Handshake::Produce(channel) => format!("produce {channel}"),
            Handshake::Consume(consumer) => format!("consume {consumer}"),
        }
    }

    pub fn decode(line: &str) -> Result<Self, ChannelError> {
        let bad = || ChannelError::Handshake(line.to_string());
        let (verb, name) = line.trim().split_once(' ').ok_or_else(bad)?;
        match verb {
            "produce" => name.parse().map(Handshake::Produce).map_err(|_| bad()),
            "consume" => name.parse().map(Handshake::Consume).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }
}

/// Writes one record per line.
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn send(&mut self, record: &str) -> io::Result<()> {
        debug_assert!(!record.contains('\n'), "record bodies never contain newlines");
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');
        // One write per record keeps records from interleaving on the stream.
        self.inner.write_all(line.as_bytes())?;
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads complete records.
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::from_buffered(BufReader::new(inner))
    }

    /// Continue on a reader that may already hold buffered bytes.
    pub fn from_buffered(inner: BufReader<R>) -> Self {
        Self {
            inner,
            line: Vec::new(),
        }
    }

    /// Next record without its terminator, `None` at end of stream. A
    /// record that is not UTF-8 gives a recoverable error; the following
    /// records can still be read.
    pub fn next_record(&mut self) -> Result<Option<String>, ChannelError> {
        self.line.clear();
        let read = self.inner.read_until(b'\n', &mut self.line)?;
        if read == 0 {
            return Ok(None);
        }
        if self.line.last() != Some(&b'\n') {
            let bytes = self.line.len();
            tracing::debug!(bytes, "discarding truncated record at end of stream");
            return Ok(None);
        }
        self.line.pop();
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        match String::from_utf8(std::mem::take(&mut self.line)) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                let lossy = String::from_utf8_lossy(err.as_bytes()).into_owned();
                Err(ProtocolError::InvalidUtf8(lossy).into())
            }
        }
    }
}

/// Tag a record for a consumer stream.
pub fn encode_routed(channel: ChannelId, record: &str) -> String {
    format!("{channel} {record}")
}

/// Split a consumer-stream record into its channel and decoded message.
pub fn decode_routed(line: &str) -> Result<WireMessage, ChannelError> {
    let (channel, body) = line
        .split_once(' ')
        .ok_or_else(|| ProtocolError::UnknownChannel(line.to_string()))?;
    let channel: ChannelId = channel.parse()?;
    Ok(WireMessage::decode(channel, body)?)
}

/// Connect to the router socket, retrying while it is not there yet.
pub fn connect(path: &Path, attempts: u32, backoff: Duration) -> Result<UnixStream, ChannelError> {
    let mut attempt = 1;
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(source) if attempt >= attempts => {
                return Err(ChannelError::Unreachable {
                    path: path.display().to_string(),
                    attempts,
                    source,
                })
            }
            Err(err) => {
                let path = path.display();
                tracing::debug!(%path, attempt, error = %err, "router not reachable yet");
                thread::sleep(backoff);
                attempt += 1;
            }
        }
    }
}

/// Publishing end of one inbound channel.
pub struct Producer {
    channel: ChannelId,
    writer: FrameWriter<UnixStream>,
}

impl Producer {
    pub fn connect(
        path: &Path,
        channel: ChannelId,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, ChannelError> {
        let stream = connect(path, attempts, backoff)?;
        let mut writer = FrameWriter::new(stream);
        writer.send(&Handshake::Produce(channel).encode())?;
        Ok(Self { channel, writer })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn publish(&mut self, message: &WireMessage) -> Result<(), ChannelError> {
        if message.channel() != self.channel {
            return Err(ChannelError::WrongChannel {
                channel: self.channel,
                message: message.channel(),
            });
        }
        self.writer.send(&message.encode())?;
        Ok(())
    }

    /// Send a record body as is.
    pub fn publish_raw(&mut self, record: &str) -> Result<(), ChannelError> {
        self.writer.send(record)?;
        Ok(())
    }
}

/// Receiving end: every channel routed to one consumer.
pub struct Subscription {
    consumer: Consumer,
    reader: FrameReader<UnixStream>,
}

impl Subscription {
    pub fn connect(
        path: &Path,
        consumer: Consumer,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, ChannelError> {
        let stream = connect(path, attempts, backoff)?;
        let mut writer = FrameWriter::new(stream);
        writer.send(&Handshake::Consume(consumer).encode())?;
        Ok(Self {
            consumer,
            reader: FrameReader::new(writer.into_inner()),
        })
    }

    pub fn consumer(&self) -> Consumer {
        self.consumer
    }

    /// Next message, `Ok(None)` once the router closed the stream. A
    /// malformed record yields a recoverable error; keep calling.
    pub fn recv(&mut self) -> Result<Option<WireMessage>, ChannelError> {
        match self.reader.next_record()? {
            Some(line) => decode_routed(&line).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dronesim_core::types::GameBounds;
    use std::io::Cursor;

    #[test]
    fn test_handshake_lines() {
        for handshake in [
            Handshake::Produce(ChannelId::Key),
            Handshake::Produce(ChannelId::Obstacles),
            Handshake::Consume(Consumer::TargetGenerator),
        ] {
            assert_eq!(Handshake::decode(&handshake.encode()).unwrap(), handshake);
        }
        assert_eq!(Handshake::Produce(ChannelId::Size).encode(), "produce size");
        assert!(Handshake::decode("produce nothing").is_err());
        assert!(Handshake::decode("listen key").is_err());
        assert!(Handshake::decode("produce").is_err());
    }

    #[test]
    fn test_frames_split_on_newlines() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.send("120, 40").unwrap();
        writer.send("2:1,1,o|2,2,o").unwrap();
        writer.send("0:").unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes, b"120, 40\n2:1,1,o|2,2,o\n0:\n");

        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_record().unwrap().as_deref(), Some("120, 40"));
        assert_eq!(reader.next_record().unwrap().as_deref(), Some("2:1,1,o|2,2,o"));
        assert_eq!(reader.next_record().unwrap().as_deref(), Some("0:"));
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_truncated_record_is_dropped() {
        let mut reader = FrameReader::new(Cursor::new(b"3:1,1,t|2,2,t|3,3,t\n2:1,1,t|2".to_vec()));
        assert_eq!(
            reader.next_record().unwrap().as_deref(),
            Some("3:1,1,t|2,2,t|3,3,t")
        );
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_invalid_utf8_record_spoils_only_itself() {
        let mut reader = FrameReader::new(Cursor::new(b"a\n\xff\xfe\nb\r\n".to_vec()));
        assert_eq!(reader.next_record().unwrap().as_deref(), Some("a"));
        let err = reader.next_record().unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidUtf8(_))
        ));
        assert_eq!(reader.next_record().unwrap().as_deref(), Some("b"));
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_routed_records() {
        let line = encode_routed(ChannelId::Size, "80, 24");
        assert_eq!(line, "size 80, 24");
        assert_eq!(
            decode_routed(&line).unwrap(),
            WireMessage::Resize(GameBounds::new(80, 24).unwrap())
        );
        assert!(matches!(
            decode_routed("bogus 1"),
            Err(ChannelError::Protocol(ProtocolError::UnknownChannel(_)))
        ));
        let err = decode_routed("key xy").unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_connect_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join(ROUTER_SOCKET);
        let err = connect(&socket, 2, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, ChannelError::Unreachable { attempts: 2, .. }));
        assert!(!err.is_recoverable());
    }
}
