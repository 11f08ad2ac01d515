use crate::error::{Result, SyncError};
use crate::protocol::Command;
use crate::serialization::{CommandCodec, FrameReader, FrameWriter, WireFormat};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::{self, Read, Stdout, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use tracing::warn;

/// The core's view of the transport: outbound commands are encoded and sent
/// without waiting, inbound frames are handed over raw for the dispatcher.
pub trait SyncChannel {
    fn send(&mut self, command: &Command) -> Result<()>;
    fn receive(&mut self) -> Result<Option<Bytes>>;
    fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

pub struct MemoryChannel {
    codec: CommandCodec,
    sent: Vec<Bytes>,
    inbox: VecDeque<Bytes>,
    connected: bool,
}

impl MemoryChannel {
    pub fn new(format: WireFormat) -> Self {
        Self {
            codec: CommandCodec::new(format),
            sent: Vec::new(),
            inbox: VecDeque::new(),
            connected: true,
        }
    }

    pub fn push_inbound(&mut self, frame: impl Into<Bytes>) {
        self.inbox.push_back(frame.into());
    }

    pub fn push_command(&mut self, command: &Command) -> Result<()> {
        let frame = self.codec.encode(command)?;
        self.inbox.push_back(frame);
        Ok(())
    }

    /// Moves everything this side sent into `other`'s inbox, in order.
    pub fn forward_to(&mut self, other: &mut MemoryChannel) -> usize {
        let count = self.sent.len();
        other.inbox.extend(self.sent.drain(..));
        count
    }

    pub fn sent_frames(&self) -> &[Bytes] {
        &self.sent
    }

    pub fn sent_commands(&self) -> Result<Vec<Command>> {
        self.sent.iter().map(|f| self.codec.decode(f)).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbox.len()
    }
}

impl SyncChannel for MemoryChannel {
    fn send(&mut self, command: &Command) -> Result<()> {
        if !self.connected {
            return Err(SyncError::ConnectionClosed);
        }

        let data = self.codec.encode(command)?;
        self.sent.push(data);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(SyncError::ConnectionClosed);
        }

        Ok(self.inbox.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.inbox.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Length-prefixed frames over a pair of byte streams, e.g. the stdin/stdout of
/// a process the server spawned. A reader thread owns the blocking reads and
/// hands chunks over a queue, so `receive` never waits.
pub struct StreamChannel<W: Write> {
    writer: W,
    frames: FrameWriter,
    reader: FrameReader,
    chunks: Receiver<Vec<u8>>,
    connected: bool,
}

pub type StdioChannel = StreamChannel<Stdout>;

impl StreamChannel<Stdout> {
    pub fn new(format: WireFormat) -> Result<Self> {
        Self::spawn(format, io::stdin(), io::stdout())
    }
}

impl<W: Write> StreamChannel<W> {
    pub fn spawn<R: Read + Send + 'static>(format: WireFormat, reader: R, writer: W) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("nodegraph-sync-reader".to_string())
            .spawn(move || read_chunks(reader, tx))?;

        Ok(Self {
            writer,
            frames: FrameWriter::new(format),
            reader: FrameReader::new(),
            chunks: rx,
            connected: true,
        })
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

fn read_chunks<R: Read>(mut reader: R, chunks: Sender<Vec<u8>>) {
    let mut buffer = [0u8; 8192];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if chunks.send(buffer[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("stream read failed: {}", e);
                break;
            }
        }
    }
}

impl<W: Write> SyncChannel for StreamChannel<W> {
    fn send(&mut self, command: &Command) -> Result<()> {
        if !self.connected {
            return Err(SyncError::ConnectionClosed);
        }

        self.frames.write_command(command)?;
        let data = self.frames.flush();
        self.writer.write_all(&data)?;
        self.writer.flush()?;

        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(SyncError::ConnectionClosed);
        }

        loop {
            if let Some(frame) = self.reader.try_read_frame() {
                return Ok(Some(frame));
            }

            match self.chunks.try_recv() {
                Ok(chunk) => self.reader.feed(&chunk),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    if self.reader.buffered() > 0 {
                        warn!("stream ended inside a frame, {} bytes discarded", self.reader.buffered());
                        self.reader.clear();
                    }
                    self.connected = false;
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.reader.clear();
        self.writer.flush()?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Bridges the single-threaded core to an async runtime: the core sees a
/// non-blocking `SyncChannel`, a tokio task moves the frames.
#[cfg(feature = "async")]
pub mod bridge {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

    #[async_trait]
    pub trait FrameTransport: Send {
        async fn send_frame(&mut self, frame: Bytes) -> Result<()>;
        /// `Ok(None)` means the peer went away.
        async fn recv_frame(&mut self) -> Result<Option<Bytes>>;
        async fn close(&mut self) -> Result<()>;
    }

    pub struct TokioChannel {
        codec: CommandCodec,
        outbound: UnboundedSender<Bytes>,
        inbound: UnboundedReceiver<Bytes>,
        connected: bool,
    }

    /// The runtime side of a `TokioChannel`.
    pub struct BridgeEnds {
        pub outbound: UnboundedReceiver<Bytes>,
        pub inbound: UnboundedSender<Bytes>,
    }

    pub fn tokio_channel(format: WireFormat) -> (TokioChannel, BridgeEnds) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let channel = TokioChannel {
            codec: CommandCodec::new(format),
            outbound: out_tx,
            inbound: in_rx,
            connected: true,
        };
        let ends = BridgeEnds {
            outbound: out_rx,
            inbound: in_tx,
        };
        (channel, ends)
    }

    impl SyncChannel for TokioChannel {
        fn send(&mut self, command: &Command) -> Result<()> {
            if !self.connected {
                return Err(SyncError::ConnectionClosed);
            }

            let frame = self.codec.encode(command)?;
            self.outbound.send(frame).map_err(|_| {
                self.connected = false;
                SyncError::ConnectionClosed
            })
        }

        fn receive(&mut self) -> Result<Option<Bytes>> {
            if !self.connected {
                return Err(SyncError::ConnectionClosed);
            }

            match self.inbound.try_recv() {
                Ok(frame) => Ok(Some(frame)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => {
                    self.connected = false;
                    Err(SyncError::ConnectionClosed)
                }
            }
        }

        fn close(&mut self) -> Result<()> {
            self.connected = false;
            self.inbound.close();
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    /// Pumps frames between `ends` and `transport` until either side goes away.
    pub async fn run_bridge<T: FrameTransport>(mut transport: T, mut ends: BridgeEnds) -> Result<()> {
        loop {
            tokio::select! {
                frame = ends.outbound.recv() => match frame {
                    Some(frame) => transport.send_frame(frame).await?,
                    None => {
                        transport.close().await?;
                        return Ok(());
                    }
                },
                frame = transport.recv_frame() => match frame? {
                    Some(frame) => {
                        if ends.inbound.send(frame).is_err() {
                            transport.close().await?;
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }

}

#[cfg(feature = "websocket")]
pub mod websocket {
    use super::bridge::FrameTransport;
    use super::*;
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio_tungstenite::{tungstenite::Message as WsMessage, WebSocketStream};

    /// JSON frames travel as text messages, MessagePack frames as binary.
    pub struct WebSocketTransport<S> {
        format: WireFormat,
        stream: Option<WebSocketStream<S>>,
    }

    impl<S> WebSocketTransport<S> {
        pub fn new(format: WireFormat, stream: WebSocketStream<S>) -> Self {
            Self {
                format,
                stream: Some(stream),
            }
        }
    }

    #[async_trait]
    impl<S> FrameTransport for WebSocketTransport<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
            let stream = self.stream.as_mut().ok_or(SyncError::ConnectionClosed)?;

            let message = match self.format {
                WireFormat::Json => WsMessage::Text(
                    String::from_utf8(frame.to_vec()).map_err(|e| SyncError::Transport(e.to_string()))?,
                ),
                WireFormat::MessagePack => WsMessage::Binary(frame.to_vec()),
            };
            stream
                .send(message)
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))
        }

        async fn recv_frame(&mut self) -> Result<Option<Bytes>> {
            let stream = self.stream.as_mut().ok_or(SyncError::ConnectionClosed)?;

            loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Binary(data))) => return Ok(Some(Bytes::from(data))),
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(Bytes::from(text.into_bytes()))),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        self.stream = None;
                        return Ok(None);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(mut stream) = self.stream.take() {
                stream
                    .close(None)
                    .await
                    .map_err(|e| SyncError::Transport(e.to_string()))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_memory_channel() {
        let mut left = MemoryChannel::new(WireFormat::MessagePack);
        let mut right = MemoryChannel::new(WireFormat::MessagePack);

        let command = Command::set_attribute("n1", "speed", &Value::Number(2.0));
        left.send(&command).unwrap();
        assert_eq!(left.forward_to(&mut right), 1);

        let frame = right.receive().unwrap().unwrap();
        assert_eq!(CommandCodec::messagepack().decode(&frame).unwrap(), command);
        assert!(right.receive().unwrap().is_none());
        assert!(left.is_empty());
    }

    /// Hands out whatever the test pushes, blocking in between like a pipe.
    struct PipeReader(Receiver<Vec<u8>>);

    impl Read for PipeReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                Err(_) => Ok(0),
            }
        }
    }

    fn wait_for_frame<W: Write>(channel: &mut StreamChannel<W>) -> Option<Bytes> {
        for _ in 0..400 {
            if !channel.is_connected() {
                return None;
            }
            if let Some(frame) = channel.receive().unwrap() {
                return Some(frame);
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        None
    }

    fn framed(commands: &[Command]) -> Bytes {
        let mut writer = FrameWriter::new(WireFormat::Json);
        for command in commands {
            writer.write_command(command).unwrap();
        }
        writer.flush()
    }

    #[test]
    fn test_stream_channel_receive_does_not_block() {
        let (feed, pipe) = mpsc::channel();
        let mut channel = StreamChannel::spawn(WireFormat::Json, PipeReader(pipe), Vec::new()).unwrap();

        assert!(channel.receive().unwrap().is_none());

        let data = framed(&[Command::delete_object("n1")]);
        feed.send(data[..3].to_vec()).unwrap();
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(channel.receive().unwrap().is_none());

        feed.send(data[3..].to_vec()).unwrap();
        let frame = wait_for_frame(&mut channel).unwrap();
        assert_eq!(CommandCodec::json().decode(&frame).unwrap(), Command::delete_object("n1"));

        drop(feed);
        assert!(wait_for_frame(&mut channel).is_none());
        assert!(!channel.is_connected());
        assert!(channel.receive().is_err());
    }

    #[test]
    fn test_stream_channel_frames_both_ways() {
        let set = Command::set_attribute("n1", "speed", &Value::Number(2.5));
        let input = framed(&[set.clone(), Command::delete_object("n1")]);
        let mut channel = StreamChannel::spawn(WireFormat::Json, io::Cursor::new(input.to_vec()), Vec::new()).unwrap();

        assert_eq!(CommandCodec::json().decode(&wait_for_frame(&mut channel).unwrap()).unwrap(), set);
        assert_eq!(
            CommandCodec::json().decode(&wait_for_frame(&mut channel).unwrap()).unwrap(),
            Command::delete_object("n1")
        );

        channel.send(&set).unwrap();
        let mut reader = FrameReader::new();
        reader.feed(channel.writer());
        let sent = reader.try_read_frame().unwrap();
        assert_eq!(CommandCodec::json().decode(&sent).unwrap(), set);

        channel.close().unwrap();
        assert!(channel.send(&set).is_err());
    }

    #[test]
    fn test_channel_close() {
        let mut channel = MemoryChannel::new(WireFormat::Json);
        assert!(channel.is_connected());

        channel.close().unwrap();

        assert!(!channel.is_connected());
        assert!(channel.send(&Command::delete_object("n1")).is_err());
    }
}
