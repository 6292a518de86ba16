//! 头像与语音代理的能力抽象，便于替换为测试替身。

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ClientError;

/// Encoding of agent audio pushed into the avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: &'static str,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Raw 16-bit little-endian PCM, 16 kHz mono: what the voice agent emits.
    pub const AGENT_PCM: AudioFormat = AudioFormat {
        encoding: "pcm_s16le",
        sample_rate: 16_000,
        channels: 1,
    };
}

/// Streaming avatar session.
#[async_trait]
pub trait AvatarClient: Send + Sync {
    /// Opens the video stream using a short-lived session token.
    async fn start(&self, session_token: &str) -> Result<(), ClientError>;

    fn create_audio_input(
        &self,
        format: AudioFormat,
    ) -> Result<Box<dyn AvatarAudioInput>, ClientError>;

    fn interrupt(&self);

    async fn stop(&self) -> Result<(), ClientError>;
}

/// Sink that lip-syncs the avatar to externally produced speech.
pub trait AvatarAudioInput: Send + Sync {
    fn send_audio(&self, chunk: Bytes) -> Result<(), ClientError>;

    /// Marks the end of one spoken response.
    fn end_sequence(&self);
}

/// Events delivered by the voice agent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Ready { conversation_id: Option<String> },
    Audio(Bytes),
    UserTranscript(String),
    AgentResponse(String),
    Interrupt,
    Disconnect,
    Error(String),
}

pub type AgentEvents = mpsc::Receiver<AgentEvent>;

/// Conversational voice agent.
#[async_trait]
pub trait VoiceAgent: Send + Sync {
    /// Connects to `agent_id`, seeding the conversation with `context_text`
    /// when it is non-empty.
    async fn connect(&self, agent_id: &str, context_text: &str)
        -> Result<AgentEvents, ClientError>;

    async fn stop(&self);
}
