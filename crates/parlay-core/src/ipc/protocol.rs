//! IPC protocol messages for Parlay worker processes.
//!
//! Uses length-prefixed bincode messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + bincode-encoded message.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execute::UnitOutcome;
use crate::value::Value;

/// Largest frame accepted in either direction (100MB).
pub const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Command sent from parent to worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Run one call unit.
    Run {
        /// Position of the unit in the input sequence.
        index: u64,
        /// bincode-encoded [`CallPayload`]. Decoded separately so that a
        /// payload the worker cannot rebuild fails only this unit.
        payload: Vec<u8>,
    },

    /// Shutdown the worker process gracefully.
    Shutdown,

    /// Ping to check if worker is alive.
    Ping,
}

/// Response sent from worker to parent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// A unit finished, successfully or not.
    Done { index: u64, outcome: UnitOutcome },

    /// Response to Ping command.
    Pong,

    /// Acknowledgement of shutdown request.
    ShuttingDown,
}

/// A call unit as it travels to a worker: task name plus arguments.
///
/// Mapped arrays inside the arguments travel as handles and are reopened
/// when the payload is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    pub task: String,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

/// Encode a value with bincode.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))
}

/// Decode a value encoded with [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::Deserialization(format!("Failed to decode IPC message: {}", e)))
}

/// Encode a message into a complete length-prefixed frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = encode(message)?;
    if body.len() > MAX_MESSAGE_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", body.len())));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write a pre-encoded frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer
        .write_all(frame)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;
    Ok(())
}

/// Write a message to a writer using length-prefixed bincode encoding.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let frame = encode_frame(message)?;
    write_frame(writer, &frame)
}

/// Read a message from a reader using length-prefixed bincode encoding.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    read_message_opt(reader)?
        .ok_or_else(|| Error::Ipc("IPC stream closed".to_string()))
}

/// Like [`read_message`], but a stream closed at a frame boundary yields `None`.
pub fn read_message_opt<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::Ipc(format!("Failed to read IPC message length: {}", e)));
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    decode(&bytes).map(Some)
}
