//! 会话客户端：把头像、语音代理与门面接口串成一次对话。

mod api;
mod capabilities;

#[cfg(test)]
mod tests;

pub use api::{HttpParrotApi, ParrotApi, SessionConfig};
pub use capabilities::{
    AgentEvent, AgentEvents, AudioFormat, AvatarAudioInput, AvatarClient, VoiceAgent,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::report::Report;
use crate::telemetry::events::record_transcript_persist;
use crate::transcript::{NewTranscriptEntry, Role};

const TARGET: &str = "session_client";
pub const CONNECTED_LINE: &str = "Connected. Start speaking...";
pub const INTERRUPTED_LINE: &str = "Interrupted";
pub const CONNECTION_ERROR_NOTICE: &str = "Connection error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }
}

/// A turn shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub role: Role,
    pub text: String,
}

/// Owns one voice session: connection state, local transcript and the
/// cached project report used to seed the agent.
pub struct SessionController {
    api: Arc<dyn ParrotApi>,
    avatar: Arc<dyn AvatarClient>,
    agent: Arc<dyn VoiceAgent>,
    project_id: Option<String>,
    profile_id: Option<String>,
    state: SessionState,
    conversation_id: Option<String>,
    audio_input: Option<Box<dyn AvatarAudioInput>>,
    avatar_started: bool,
    teardown_pending: bool,
    transcript: Vec<TranscriptLine>,
    notices: Vec<String>,
    cached_report: Mutex<Option<Report>>,
    refreshing: AtomicBool,
    pending: Vec<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn ParrotApi>,
        avatar: Arc<dyn AvatarClient>,
        agent: Arc<dyn VoiceAgent>,
    ) -> Self {
        Self {
            api,
            avatar,
            agent,
            project_id: None,
            profile_id: None,
            state: SessionState::Disconnected,
            conversation_id: None,
            audio_input: None,
            avatar_started: false,
            teardown_pending: false,
            transcript: Vec::new(),
            notices: Vec::new(),
            cached_report: Mutex::new(None),
            refreshing: AtomicBool::new(false),
            pending: Vec::new(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn transcript(&self) -> &[TranscriptLine] {
        &self.transcript
    }

    /// User-visible error notices, oldest first.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn cached_report(&self) -> Option<Report> {
        self.cached_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts a session. The controller stays `Connecting` until the agent
    /// emits [`AgentEvent::Ready`]; feed the returned events to
    /// [`SessionController::handle_event`] or [`SessionController::run`].
    pub async fn connect(&mut self) -> Result<AgentEvents, ClientError> {
        if self.state != SessionState::Disconnected {
            return Err(ClientError::Busy(self.state.as_str()));
        }
        if self.teardown_pending {
            self.teardown().await;
        }
        self.state = SessionState::Connecting;

        match self.open().await {
            Ok(events) => Ok(events),
            Err(err) => {
                warn!(target: TARGET, %err, "session start failed");
                self.teardown().await;
                self.notices.push(err.to_string());
                Err(err)
            }
        }
    }

    async fn open(&mut self) -> Result<AgentEvents, ClientError> {
        let (config, report) = tokio::join!(
            self.api.fetch_config(self.profile_id.as_deref()),
            self.report_for_connect(),
        );
        let config = config?;

        info!(
            target: TARGET,
            agent_id = %config.eleven_labs_agent_id,
            profile = config.active_profile_id.as_deref().unwrap_or("default"),
            has_report = report.is_some(),
            "starting avatar stream"
        );
        self.avatar.start(&config.anam_session_token).await?;
        self.avatar_started = true;
        self.audio_input = Some(self.avatar.create_audio_input(AudioFormat::AGENT_PCM)?);

        let context = build_context_text(report.as_ref());
        self.agent
            .connect(&config.eleven_labs_agent_id, &context)
            .await
    }

    async fn report_for_connect(&self) -> Option<Report> {
        if let Some(report) = self.cached_report() {
            return Some(report);
        }
        match self.api.fetch_report(self.project_id.as_deref()).await {
            Ok(report) => {
                self.store_report(report.clone());
                Some(report)
            }
            Err(err) => {
                warn!(target: TARGET, %err, "report unavailable; connecting without context");
                None
            }
        }
    }

    /// Stops the agent, then the avatar. Safe to call in any state.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        info!(target: TARGET, "session stopped");
    }

    async fn teardown(&mut self) {
        self.agent.stop().await;
        if let Err(err) = self.avatar.stop().await {
            warn!(target: TARGET, %err, avatar_started = self.avatar_started, "avatar stop failed");
        }
        self.avatar_started = false;
        self.teardown_pending = false;
        self.audio_input = None;
        self.conversation_id = None;
        self.state = SessionState::Disconnected;
    }

    /// Applies one agent event. A [`AgentEvent::Disconnect`] only marks the
    /// session for teardown; [`SessionController::dispatch`] and
    /// [`SessionController::run`] perform it.
    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Ready { conversation_id } => {
                info!(
                    target: TARGET,
                    conversation_id = conversation_id.as_deref().unwrap_or(""),
                    "agent ready"
                );
                self.state = SessionState::Connected;
                self.conversation_id = conversation_id;
                self.push_line(Role::System, CONNECTED_LINE.into());
            }
            AgentEvent::Audio(chunk) => {
                if let Some(input) = &self.audio_input {
                    if let Err(err) = input.send_audio(chunk) {
                        warn!(target: TARGET, %err, "dropping agent audio chunk");
                    }
                }
            }
            AgentEvent::UserTranscript(text) => self.push_line(Role::User, text),
            AgentEvent::AgentResponse(text) => {
                self.end_sequence();
                self.push_line(Role::Agent, text);
            }
            AgentEvent::Interrupt => {
                self.push_line(Role::Agent, INTERRUPTED_LINE.into());
                self.avatar.interrupt();
                self.end_sequence();
            }
            AgentEvent::Disconnect => {
                info!(target: TARGET, "agent disconnected");
                self.state = SessionState::Disconnected;
                self.teardown_pending = true;
            }
            AgentEvent::Error(message) => {
                warn!(target: TARGET, %message, "agent connection error");
                self.notices.push(CONNECTION_ERROR_NOTICE.into());
            }
        }
    }

    /// [`SessionController::handle_event`] followed by any teardown it requested.
    pub async fn dispatch(&mut self, event: AgentEvent) {
        self.handle_event(event);
        if self.teardown_pending {
            self.teardown().await;
        }
    }

    /// Pumps agent events until the agent disconnects or the stream closes,
    /// then stops the agent and the avatar.
    pub async fn run(&mut self, mut events: AgentEvents) {
        while let Some(event) = events.recv().await {
            let last = matches!(event, AgentEvent::Disconnect);
            self.dispatch(event).await;
            if last {
                return;
            }
        }
        debug!(target: TARGET, "agent event stream closed");
        self.teardown().await;
    }

    fn end_sequence(&self) {
        if let Some(input) = &self.audio_input {
            input.end_sequence();
        }
    }

    fn push_line(&mut self, role: Role, text: String) {
        self.transcript.push(TranscriptLine {
            role,
            text: text.clone(),
        });

        let Some(conversation_id) = self.conversation_id.clone() else {
            return;
        };
        let entry = NewTranscriptEntry {
            project_id: self.project_id.clone().unwrap_or_default(),
            conversation_id,
            role,
            text,
        };
        let api = Arc::clone(&self.api);
        self.pending.retain(|task| !task.is_finished());
        self.pending.push(tokio::spawn(async move {
            let error = api
                .append_transcript(&entry)
                .await
                .err()
                .map(|err| err.to_string());
            record_transcript_persist(&entry.conversation_id, entry.role.as_str(), error);
        }));
    }

    /// Waits for in-flight transcript writes, e.g. before process exit.
    pub async fn flush_transcript(&mut self) {
        for task in self.pending.drain(..) {
            if let Err(err) = task.await {
                warn!(target: TARGET, %err, "transcript persist task aborted");
            }
        }
    }

    /// Re-fetches the project report. Overlapping refreshes are rejected.
    pub async fn refresh_report(&self) -> Result<Report, ClientError> {
        let _guard = RefreshGuard::acquire(&self.refreshing)?;
        let report = self.api.fetch_report(self.project_id.as_deref()).await?;
        self.store_report(report.clone());
        Ok(report)
    }

    fn store_report(&self, report: Report) {
        *self
            .cached_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report);
    }
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ClientError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| ClientError::RefreshInFlight)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Text injected into the voice agent so it can talk about the project.
pub fn build_context_text(report: Option<&Report>) -> String {
    let Some(report) = report else {
        return String::new();
    };
    [
        "CodeRabbit project report:".to_string(),
        format!("Project: {}", report.project_name),
        format!("Window: {} → {}", report.from, report.to),
        String::new(),
        report.summary.clone(),
    ]
    .join("\n")
}
