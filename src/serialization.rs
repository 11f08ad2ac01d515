use crate::error::{Result, SyncError};
use crate::protocol::{Command, ObjectDescriptor};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Json,
    MessagePack,
}

impl WireFormat {
    pub fn name(&self) -> &'static str {
        match self {
            WireFormat::Json => "JSON",
            WireFormat::MessagePack => "MessagePack",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandCodec {
    format: WireFormat,
}

impl CommandCodec {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn json() -> Self {
        Self::new(WireFormat::Json)
    }

    pub fn messagepack() -> Self {
        Self::new(WireFormat::MessagePack)
    }

    pub fn encode(&self, command: &Command) -> Result<Bytes> {
        match self.format {
            WireFormat::Json => Ok(Bytes::from(serde_json::to_vec(command)?)),
            // Named maps keep the "command" tag addressable by key.
            WireFormat::MessagePack => Ok(Bytes::from(rmp_serde::to_vec_named(command)?)),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<Command> {
        let decoded: std::result::Result<Command, String> = match self.format {
            WireFormat::Json => serde_json::from_slice(data).map_err(|e| e.to_string()),
            WireFormat::MessagePack => rmp_serde::from_slice(data).map_err(|e| e.to_string()),
        };
        decoded.map_err(|e| SyncError::Decode(format!("{} command: {}", self.format.name(), e)))
    }

    /// Reads just the command string of a frame, for logging commands this
    /// side does not understand.
    pub fn command_name(&self, data: &[u8]) -> Option<String> {
        #[derive(Deserialize)]
        struct Envelope {
            command: String,
        }

        let envelope: Envelope = match self.format {
            WireFormat::Json => serde_json::from_slice(data).ok()?,
            WireFormat::MessagePack => rmp_serde::from_slice(data).ok()?,
        };
        Some(envelope.command)
    }

    pub fn encode_descriptor(&self, descriptor: &ObjectDescriptor) -> Result<Bytes> {
        match self.format {
            WireFormat::Json => Ok(Bytes::from(serde_json::to_vec(descriptor)?)),
            WireFormat::MessagePack => Ok(Bytes::from(rmp_serde::to_vec_named(descriptor)?)),
        }
    }

    pub fn decode_descriptor(&self, data: &[u8]) -> Result<ObjectDescriptor> {
        match self.format {
            WireFormat::Json => Ok(serde_json::from_slice(data)?),
            WireFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
        }
    }

    /// Decodes a saved graph: a list of descriptors.
    pub fn decode_graph(&self, data: &[u8]) -> Result<Vec<ObjectDescriptor>> {
        match self.format {
            WireFormat::Json => Ok(serde_json::from_slice(data)?),
            WireFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }
}

/// Length-prefixed framing (u32 little-endian) for byte streams.
pub struct FrameWriter {
    codec: CommandCodec,
    buffer: BytesMut,
}

impl FrameWriter {
    pub fn new(format: WireFormat) -> Self {
        Self {
            codec: CommandCodec::new(format),
            buffer: BytesMut::with_capacity(8192),
        }
    }

    pub fn write_command(&mut self, command: &Command) -> Result<()> {
        let data = self.codec.encode(command)?;
        self.write_frame(&data);
        Ok(())
    }

    pub fn write_frame(&mut self, frame: &[u8]) {
        self.buffer.put_u32_le(frame.len() as u32);
        self.buffer.put_slice(frame);
    }

    pub fn flush(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[derive(Default)]
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete frame, undecoded, if one has arrived.
    pub fn try_read_frame(&mut self) -> Option<Bytes> {
        if self.buffer.len() < 4 {
            return None;
        }

        let len = u32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if self.buffer.len() < 4 + len {
            return None;
        }

        self.buffer.advance(4);
        Some(self.buffer.split_to(len).freeze())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
