//! Defines the contract between a cache group and the transport connecting its peers.
//!
//! A [Group](crate::group::Group) never talks to the network itself. Instead it consults a
//! [PeerPicker](PeerPicker) to find out which peer owns a key and - if that peer is remote -
//! fetches the value through the returned [PeerGetter](PeerGetter). Any transport satisfying
//! these two traits composes with the group: HTTP (see [http](crate::http)), RPC or an
//! in-process loopback for tests.
//!
//! The module also contains the length-delimited codec used to move a [GetResponse](GetResponse)
//! over a byte oriented transport, and the tagged [PeerError](PeerError) taxonomy. Note that
//! the group treats every peer error identically (it falls back to its local loader) - the tags
//! exist for logging and diagnosis, not for control flow.
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Identifies a value to be fetched from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetRequest {
    /// Contains the name of the group in which the key lives.
    pub group: String,

    /// Contains the key to fetch.
    pub key: String,
}

/// Carries the raw bytes a peer answered with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetResponse {
    /// Contains the fetched value.
    pub value: Bytes,
}

impl GetResponse {
    /// Serializes the response into its length-delimited wire form.
    ///
    /// The frame is simply the payload length as a big-endian **u32** followed by the payload
    /// itself.
    pub fn encode(&self) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(4 + self.value.len());
        buffer.put_u32(self.value.len() as u32);
        buffer.put_slice(&self.value);

        buffer
    }

    /// Parses a response from its length-delimited wire form.
    ///
    /// Truncated frames and frames whose length header disagrees with the actual payload are
    /// rejected as [PeerError::Protocol](PeerError::Protocol).
    pub fn decode(mut data: Bytes) -> Result<GetResponse, PeerError> {
        if data.remaining() < 4 {
            return Err(PeerError::Protocol(anyhow!(
                "The response frame is truncated: received only {} bytes.",
                data.remaining()
            )));
        }

        let length = data.get_u32() as usize;
        if data.remaining() != length {
            return Err(PeerError::Protocol(anyhow!(
                "The response frame is inconsistent: the header announces {} bytes but {} follow.",
                length,
                data.remaining()
            )));
        }

        Ok(GetResponse { value: data })
    }
}

/// Enumerates the ways fetching from a peer can fail.
///
/// All variants are handled identically by the group (one fallback attempt against the local
/// loader, no retry against a second peer - the consistent-hash assignment is authoritative).
/// The distinction only feeds the logs.
#[derive(Debug)]
pub enum PeerError {
    /// Represents a network or I/O failure while talking to the peer.
    Transport(anyhow::Error),

    /// Represents a non-OK HTTP status answered by the peer.
    Status(u16),

    /// Represents a response which could not be decoded.
    Protocol(anyhow::Error),
}

impl Display for PeerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerError::Transport(error) => write!(f, "Transport error: {}", error),
            PeerError::Status(status) => write!(f, "Peer returned status: {}", status),
            PeerError::Protocol(error) => write!(f, "Protocol error: {}", error),
        }
    }
}

impl Error for PeerError {}

/// Fetches values from one concrete peer.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Fetches the value for the given group and key from the peer this getter points to.
    async fn get(&self, request: &GetRequest) -> Result<GetResponse, PeerError>;
}

/// Determines which peer owns a key.
///
/// The picker is expected to filter the local node out itself: returning **None** signals
/// "the local node is the owner, load locally".
pub trait PeerPicker: Send + Sync {
    /// Returns a getter for the remote peer owning the given key, or **None** if the key is
    /// owned by the local node (or no peers are known).
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{GetResponse, PeerError};

    #[test]
    fn frames_survive_a_round_trip() {
        let response = GetResponse {
            value: Bytes::from_static(b"630"),
        };

        let frame = response.encode();
        assert_eq!(&frame[..], b"\x00\x00\x00\x03630");

        let decoded = GetResponse::decode(frame.freeze()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn empty_values_are_legal() {
        let frame = GetResponse::default().encode();
        assert_eq!(&frame[..], b"\x00\x00\x00\x00");
        assert_eq!(GetResponse::decode(frame.freeze()).unwrap().value.len(), 0);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let error = GetResponse::decode(Bytes::from_static(b"\x00\x00")).unwrap_err();
        assert!(matches!(error, PeerError::Protocol(_)));
    }

    #[test]
    fn inconsistent_lengths_are_rejected() {
        // The header announces 16 bytes, but only 3 follow...
        let error = GetResponse::decode(Bytes::from_static(b"\x00\x00\x00\x10630")).unwrap_err();
        assert!(matches!(error, PeerError::Protocol(_)));

        // ...and the other way around: 1 byte announced, 3 provided.
        let error = GetResponse::decode(Bytes::from_static(b"\x00\x00\x00\x01630")).unwrap_err();
        assert!(matches!(error, PeerError::Protocol(_)));
    }
}
