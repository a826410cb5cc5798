use async_trait::async_trait;
use bincode::Options;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::request_response::Codec;
use libp2p::StreamProtocol;
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Error, ErrorKind, Result};

use super::messages::{RpcRequest, RpcResponse};

// Constants for message size management
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB - prevent DoS attacks

/// Protocol name negotiated on every RPC stream
pub const PROTOCOL: StreamProtocol = StreamProtocol::new("/twopc/rpc/1");

#[derive(Clone, Default)]
pub struct MessageCodec;

/// Get bincode configuration for consistent encoding/decoding
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .with_limit(MAX_MESSAGE_SIZE as u64)
}

/// Serialize with size limit to prevent attacks
pub fn serialize_with_limit<T: Serialize>(value: &T) -> std::result::Result<Vec<u8>, String> {
    let encoded = bincode_options()
        .serialize(value)
        .map_err(|e| format!("Serialization error: {}", e))?;

    if encoded.len() > MAX_MESSAGE_SIZE {
        return Err("Encoded message exceeds size limit".to_string());
    }

    Ok(encoded)
}

/// Deserialize with validation
pub fn deserialize_with_limit<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, String> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err("Message size exceeds limit".to_string());
    }

    bincode_options()
        .deserialize(bytes)
        .map_err(|e| format!("Deserialization error: {}", e))
}

fn check_protocol(protocol: &StreamProtocol) -> Result<()> {
    if *protocol != PROTOCOL {
        return Err(Error::new(ErrorKind::InvalidData, "Invalid protocol"));
    }
    Ok(())
}

/// Reads one 4-byte big-endian length prefix followed by the payload.
async fn read_frame<T, M>(io: &mut T) -> Result<M>
where
    T: AsyncRead + Unpin + Send,
    M: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    // Validate message size to prevent DoS attacks
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Message size {} exceeds maximum {}", len, MAX_MESSAGE_SIZE),
        ));
    }

    if len == 0 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "Message size cannot be zero",
        ));
    }

    let mut buffer = vec![0u8; len];
    io.read_exact(&mut buffer).await?;

    deserialize_with_limit::<M>(&buffer).map_err(|e| Error::new(ErrorKind::InvalidData, e))
}

async fn write_frame<T, M>(io: &mut T, message: &M) -> Result<()>
where
    T: AsyncWrite + Unpin + Send,
    M: Serialize,
{
    let bytes = serialize_with_limit(message).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

    // Write 4-byte length prefix + payload
    let len = bytes.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&bytes).await?;
    io.flush().await?;
    Ok(())
}

#[async_trait]
impl Codec for MessageCodec {
    type Protocol = StreamProtocol;
    type Request = RpcRequest;
    type Response = RpcResponse;

    async fn read_request<T>(&mut self, protocol: &Self::Protocol, io: &mut T) -> Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        check_protocol(protocol)?;
        read_frame(io).await
    }

    async fn read_response<T>(
        &mut self,
        protocol: &Self::Protocol,
        io: &mut T,
    ) -> Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        check_protocol(protocol)?;
        read_frame(io).await
    }

    async fn write_request<T>(
        &mut self,
        protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        check_protocol(protocol)?;
        write_frame(io, &req).await
    }

    async fn write_response<T>(
        &mut self,
        protocol: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        check_protocol(protocol)?;
        write_frame(io, &res).await
    }
}
