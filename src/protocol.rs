use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::identifier::{Identifier, Peer};
use crate::core::ring::RoutingStep;

pub mod lookup;
pub mod server;
pub mod transport;


/// Refuse to allocate for frames beyond this size; a well-formed peer never
/// sends anything close to it.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// The full set of remotely invokable operations. Every peer exposes exactly
/// these; one request frame always produces one response frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Request {
    /// Resolve one routing step toward `target`. The target identifier is
    /// always carried explicitly; the responder never re-derives it.
    FindSuccessor { target: Identifier },
    GetPredecessor,
    GetSuccessors,
    Notify { candidate: Peer },
    Ping,
    Store { key: Identifier, payload: Vec<u8> },
    GetFile { filename: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Response {
    FindSuccessor { step: RoutingStep },
    Predecessor { predecessor: Option<Peer> },
    Successors { successors: Vec<Peer> },
    Ack,
    File { payload: Vec<u8> },
    NotFound,
}

/// Write one length-prefixed MessagePack frame.
///
/// Field names are encoded (`to_vec_named`) because the tagged enums above
/// need them to round-trip.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = rmp_serde::to_vec_named(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one length-prefixed MessagePack frame.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    rmp_serde::from_slice(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
