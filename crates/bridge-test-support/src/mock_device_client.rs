// A mock device: the other end of the framed-session wire protocol,
// used to drive the adapter under test the way a real autopilot SDK
// would.

use bridge_protocol::FrameMessage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

pub struct MockDeviceClient {
    stream: TcpStream,
}

impl MockDeviceClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    pub async fn send_frame(&mut self, msg: &FrameMessage) -> Result<(), Box<dyn std::error::Error>> {
        let payload = msg.to_json_bytes()?;
        self.stream.write_u32(payload.len() as u32).await?;
        self.stream.write_all(&payload).await?;
        Ok(())
    }

    /// Writes a raw length prefix and payload, bypassing [`FrameMessage`]
    /// encoding — lets tests exercise malformed-frame rejection.
    pub async fn send_raw(&mut self, declared_len: u32, payload: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        self.stream.write_u32(declared_len).await?;
        self.stream.write_all(payload).await?;
        Ok(())
    }

    pub async fn recv_frame(&mut self) -> Result<FrameMessage, Box<dyn std::error::Error>> {
        let len = self.stream.read_u32().await?;
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf).await?;
        Ok(FrameMessage::from_json_bytes(&buf)?)
    }

    /// `true` once the peer has closed its write half.
    pub async fn recv_eof(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.stream.read(&mut buf).await, Ok(0))
    }

    pub async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
