//! IPC transport implementations
//!
//! Every frame is one JSON-encoded [`MessageEnvelope`] followed by `\n`. The
//! framing is stream-agnostic: the coordinator wraps a child's stdio, a
//! worker wraps its own stdin/stdout, and in-process workers use the two
//! halves of a `tokio::io::duplex` pipe.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Receiving half of a message stream
#[async_trait]
pub trait MessageSource<T>: Send
where
    T: DeserializeOwned + Send + 'static,
{
    /// Receive the next envelope; `ConnectionClosed` at end of stream
    async fn receive(&mut self) -> Result<MessageEnvelope<T>, IpcError>;
}

/// Sending half of a message stream
#[async_trait]
pub trait MessageSink<T>: Send
where
    T: Serialize + Send + Sync + 'static,
{
    /// Send a message to the other end
    async fn send(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;

    /// Wrap `message` in an envelope and send it
    async fn send_message(&mut self, message: T) -> Result<(), IpcError> {
        let envelope = MessageEnvelope::new(message);
        self.send(&envelope).await
    }
}

/// Reads newline-delimited envelopes from any async byte stream
pub struct FramedReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin + Send> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }
}

#[async_trait]
impl<R, T> MessageSource<T> for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned + Send + 'static,
{
    async fn receive(&mut self) -> Result<MessageEnvelope<T>, IpcError> {
        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            let frame = self.line.trim();
            if frame.is_empty() {
                log::trace!("Skipping blank IPC frame");
                continue;
            }

            let envelope: MessageEnvelope<T> = serde_json::from_str(frame)
                .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

            if !envelope.is_compatible() {
                return Err(IpcError::ProtocolVersionMismatch {
                    expected: IPC_PROTOCOL_VERSION,
                    actual: envelope.protocol_version,
                });
            }

            return Ok(envelope);
        }
    }
}

/// Writes newline-delimited envelopes to any async byte stream
pub struct FramedWriter<W> {
    writer: Option<W>,
}

impl<W: AsyncWrite + Unpin + Send> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
        }
    }
}

#[async_trait]
impl<W, T> MessageSink<T> for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + Send + Sync + 'static,
{
    async fn send(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        let writer = self.writer.as_mut().ok_or(IpcError::ConnectionClosed)?;

        let mut frame = serde_json::to_vec(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        frame.push(b'\n');

        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

/// Framing over this process's own stdin and stdout, as used by workers
pub fn stdio() -> (FramedReader<tokio::io::Stdin>, FramedWriter<tokio::io::Stdout>) {
    (
        FramedReader::new(tokio::io::stdin()),
        FramedWriter::new(tokio::io::stdout()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkerMessage;
    use tokio::io::AsyncWriteExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_send_and_receive_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FramedWriter::new(client);
        let mut reader = FramedReader::new(server);

        let correlation_id = Uuid::new_v4();
        writer
            .send_message(WorkerMessage::Ping { correlation_id })
            .await
            .unwrap();
        writer.send_message(WorkerMessage::Shutdown).await.unwrap();

        let first: MessageEnvelope<WorkerMessage> = reader.receive().await.unwrap();
        assert_eq!(first.message, WorkerMessage::Ping { correlation_id });
        let second: MessageEnvelope<WorkerMessage> = reader.receive().await.unwrap();
        assert_eq!(second.message, WorkerMessage::Shutdown);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer: FramedWriter<_> = FramedWriter::new(client);
        let mut reader = FramedReader::new(server);

        MessageSink::<WorkerMessage>::close(&mut writer).await.unwrap();
        drop(writer);

        let result: Result<MessageEnvelope<WorkerMessage>, _> = reader.receive().await;
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_rejects_foreign_protocol_version() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FramedReader::new(server);

        client
            .write_all(
                b"\n{\"protocol_version\":99,\"timestamp\":\"2024-01-01T00:00:00Z\",\"message\":{\"type\":\"shutdown\"}}\n",
            )
            .await
            .unwrap();

        let result: Result<MessageEnvelope<WorkerMessage>, _> = reader.receive().await;
        assert!(matches!(
            result,
            Err(IpcError::ProtocolVersionMismatch {
                expected: 1,
                actual: 99
            })
        ));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_deserialization_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FramedReader::new(server);

        client.write_all(b"not json\n").await.unwrap();

        let result: Result<MessageEnvelope<WorkerMessage>, _> = reader.receive().await;
        assert!(matches!(result, Err(IpcError::DeserializationError(_))));
    }
}
