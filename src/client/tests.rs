use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::*;
use crate::error::FetchError;
use crate::report::Report;

type CallLog = Arc<Mutex<Vec<String>>>;

fn log(calls: &CallLog, entry: impl Into<String>) {
    calls.lock().expect("call log").push(entry.into());
}

fn entries(calls: &CallLog) -> Vec<String> {
    calls.lock().expect("call log").clone()
}

fn sample_report() -> Report {
    Report {
        project_id: "acme/widgets".into(),
        project_name: "Widgets".into(),
        from: "2025-01-10".into(),
        to: "2025-01-11".into(),
        generated_at: None,
        summary: "### Merged\ndid X".into(),
        raw: None,
        source: None,
    }
}

fn sample_config() -> SessionConfig {
    SessionConfig {
        anam_session_token: "tok".into(),
        eleven_labs_agent_id: "agent-1".into(),
        eleven_labs_api_key: None,
        profiles: Vec::new(),
        active_profile_id: Some("default".into()),
    }
}

struct FakeApi {
    calls: CallLog,
    config: Result<SessionConfig, ClientError>,
    report: Result<Report, ClientError>,
    report_delay: Duration,
    report_fetches: AtomicUsize,
    fail_append: bool,
    appended: Mutex<Vec<NewTranscriptEntry>>,
}

impl FakeApi {
    fn new(calls: &CallLog) -> Self {
        Self {
            calls: calls.clone(),
            config: Ok(sample_config()),
            report: Ok(sample_report()),
            report_delay: Duration::ZERO,
            report_fetches: AtomicUsize::new(0),
            fail_append: false,
            appended: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ParrotApi for FakeApi {
    async fn fetch_config(&self, profile_id: Option<&str>) -> Result<SessionConfig, ClientError> {
        log(&self.calls, format!("config:{}", profile_id.unwrap_or("-")));
        self.config.clone()
    }

    async fn fetch_report(&self, project_id: Option<&str>) -> Result<Report, ClientError> {
        self.report_fetches.fetch_add(1, Ordering::SeqCst);
        log(&self.calls, format!("report:{}", project_id.unwrap_or("-")));
        if !self.report_delay.is_zero() {
            tokio::time::sleep(self.report_delay).await;
        }
        self.report.clone()
    }

    async fn append_transcript(&self, entry: &NewTranscriptEntry) -> Result<(), ClientError> {
        if self.fail_append {
            return Err(ClientError::Transcript(FetchError::Status {
                status: 502,
                body: "store down".into(),
            }));
        }
        self.appended.lock().expect("appended").push(entry.clone());
        Ok(())
    }
}

struct FakeAvatar {
    calls: CallLog,
    fail_start: bool,
}

struct FakeAudioInput {
    calls: CallLog,
}

#[async_trait]
impl AvatarClient for FakeAvatar {
    async fn start(&self, session_token: &str) -> Result<(), ClientError> {
        log(&self.calls, format!("avatar.start:{session_token}"));
        if self.fail_start {
            return Err(ClientError::Avatar("stream refused".into()));
        }
        Ok(())
    }

    fn create_audio_input(
        &self,
        format: AudioFormat,
    ) -> Result<Box<dyn AvatarAudioInput>, ClientError> {
        log(
            &self.calls,
            format!(
                "avatar.input:{}/{}/{}",
                format.encoding, format.sample_rate, format.channels
            ),
        );
        Ok(Box::new(FakeAudioInput {
            calls: self.calls.clone(),
        }))
    }

    fn interrupt(&self) {
        log(&self.calls, "avatar.interrupt");
    }

    async fn stop(&self) -> Result<(), ClientError> {
        log(&self.calls, "avatar.stop");
        Ok(())
    }
}

impl AvatarAudioInput for FakeAudioInput {
    fn send_audio(&self, chunk: Bytes) -> Result<(), ClientError> {
        log(&self.calls, format!("audio:{}", chunk.len()));
        Ok(())
    }

    fn end_sequence(&self) {
        log(&self.calls, "audio.end");
    }
}

struct FakeAgent {
    calls: CallLog,
    context: Mutex<Option<String>>,
    events: Mutex<Option<AgentEvents>>,
}

#[async_trait]
impl VoiceAgent for FakeAgent {
    async fn connect(
        &self,
        agent_id: &str,
        context_text: &str,
    ) -> Result<AgentEvents, ClientError> {
        log(&self.calls, format!("agent.connect:{agent_id}"));
        *self.context.lock().expect("context") = Some(context_text.to_string());
        self.events
            .lock()
            .expect("events")
            .take()
            .ok_or_else(|| ClientError::Agent("already connected".into()))
    }

    async fn stop(&self) {
        log(&self.calls, "agent.stop");
    }
}

struct Harness {
    calls: CallLog,
    api: Arc<FakeApi>,
    agent: Arc<FakeAgent>,
    sender: mpsc::Sender<AgentEvent>,
    controller: SessionController,
}

fn harness_with(configure: impl FnOnce(&mut FakeApi, &mut FakeAvatar)) -> Harness {
    let calls: CallLog = Arc::default();
    let mut api = FakeApi::new(&calls);
    let mut avatar = FakeAvatar {
        calls: calls.clone(),
        fail_start: false,
    };
    configure(&mut api, &mut avatar);

    let (sender, receiver) = mpsc::channel(16);
    let api = Arc::new(api);
    let agent = Arc::new(FakeAgent {
        calls: calls.clone(),
        context: Mutex::new(None),
        events: Mutex::new(Some(receiver)),
    });
    let controller =
        SessionController::new(api.clone(), Arc::new(avatar), agent.clone()).with_project("p1");
    Harness {
        calls,
        api,
        agent,
        sender,
        controller,
    }
}

fn harness() -> Harness {
    harness_with(|_, _| {})
}

#[test]
fn context_text_layout() {
    assert_eq!(build_context_text(None), "");
    assert_eq!(
        build_context_text(Some(&sample_report())),
        "CodeRabbit project report:\nProject: Widgets\nWindow: 2025-01-10 → 2025-01-11\n\n### Merged\ndid X"
    );
}

#[tokio::test]
async fn connect_wires_avatar_then_agent_and_waits_for_ready() {
    let mut h = harness();
    assert_eq!(h.controller.state(), SessionState::Disconnected);

    let _events = h.controller.connect().await.expect("connect");
    assert_eq!(h.controller.state(), SessionState::Connecting);

    let calls = entries(&h.calls);
    assert!(calls.contains(&"config:-".to_string()));
    assert!(calls.contains(&"report:p1".to_string()));
    let tail: Vec<_> = calls
        .iter()
        .filter(|call| !call.starts_with("config") && !call.starts_with("report"))
        .cloned()
        .collect();
    assert_eq!(
        tail,
        vec![
            "avatar.start:tok",
            "avatar.input:pcm_s16le/16000/1",
            "agent.connect:agent-1"
        ]
    );
    assert_eq!(
        h.agent.context.lock().expect("context").as_deref(),
        Some(build_context_text(Some(&sample_report())).as_str())
    );

    h.controller.handle_event(AgentEvent::Ready {
        conversation_id: None,
    });
    assert_eq!(h.controller.state(), SessionState::Connected);
    assert_eq!(
        h.controller.transcript(),
        &[TranscriptLine {
            role: Role::System,
            text: CONNECTED_LINE.into()
        }]
    );
}

#[tokio::test]
async fn connect_reuses_cached_report() {
    let mut h = harness();
    h.controller.refresh_report().await.expect("refresh");
    let _events = h.controller.connect().await.expect("connect");
    assert_eq!(h.api.report_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_report_connects_with_empty_context() {
    let mut h = harness_with(|api, _| {
        api.report = Err(ClientError::Report(FetchError::Decode("no fields".into())));
    });
    let _events = h.controller.connect().await.expect("connect");
    assert_eq!(h.agent.context.lock().expect("context").as_deref(), Some(""));
    assert!(h.controller.cached_report().is_none());
}

#[tokio::test]
async fn config_failure_returns_to_disconnected() {
    let mut h = harness_with(|api, _| {
        api.config = Err(ClientError::Config(FetchError::Status {
            status: 500,
            body: "missing env".into(),
        }));
    });
    let err = h.controller.connect().await.expect_err("must fail");
    assert_eq!(err.to_string(), "Failed to load config");
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert_eq!(h.controller.notices(), &["Failed to load config".to_string()]);
    assert!(!entries(&h.calls).iter().any(|call| call.starts_with("avatar.start")));
}

#[tokio::test]
async fn avatar_failure_stops_everything_started() {
    let mut h = harness_with(|_, avatar| avatar.fail_start = true);
    let err = h.controller.connect().await.expect_err("must fail");
    assert!(matches!(err, ClientError::Avatar(_)));
    assert_eq!(h.controller.state(), SessionState::Disconnected);

    let calls = entries(&h.calls);
    let stops: Vec<_> = calls.iter().filter(|call| call.ends_with(".stop")).collect();
    assert_eq!(stops, vec!["agent.stop", "avatar.stop"]);
    assert!(!calls.iter().any(|call| call.starts_with("agent.connect")));
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let mut h = harness();
    let _events = h.controller.connect().await.expect("connect");
    let err = h.controller.connect().await.expect_err("busy");
    assert_eq!(err, ClientError::Busy("connecting"));
}

#[tokio::test]
async fn agent_events_drive_avatar_and_transcript() {
    let mut h = harness();
    let _events = h.controller.connect().await.expect("connect");
    h.calls.lock().expect("call log").clear();

    h.controller.handle_event(AgentEvent::Ready {
        conversation_id: None,
    });
    h.controller
        .handle_event(AgentEvent::Audio(Bytes::from_static(&[0, 1, 2, 3])));
    h.controller
        .handle_event(AgentEvent::UserTranscript("how is the build?".into()));
    h.controller
        .handle_event(AgentEvent::AgentResponse("all green".into()));
    h.controller.handle_event(AgentEvent::Interrupt);
    h.controller
        .handle_event(AgentEvent::Error("socket reset".into()));

    assert_eq!(
        entries(&h.calls),
        vec!["audio:4", "audio.end", "avatar.interrupt", "audio.end"]
    );
    let lines: Vec<(Role, &str)> = h
        .controller
        .transcript()
        .iter()
        .map(|line| (line.role, line.text.as_str()))
        .collect();
    assert_eq!(
        lines,
        vec![
            (Role::System, CONNECTED_LINE),
            (Role::User, "how is the build?"),
            (Role::Agent, "all green"),
            (Role::Agent, INTERRUPTED_LINE),
        ]
    );
    assert_eq!(
        h.controller.notices(),
        &[CONNECTION_ERROR_NOTICE.to_string()]
    );
    assert_eq!(h.controller.state(), SessionState::Connected);
    assert!(h.api.appended.lock().expect("appended").is_empty());
}

#[tokio::test]
async fn run_stops_on_disconnect_event() {
    let mut h = harness();
    let events = h.controller.connect().await.expect("connect");
    for event in [
        AgentEvent::Ready {
            conversation_id: Some("conv-1".into()),
        },
        AgentEvent::UserTranscript("hi".into()),
        AgentEvent::Disconnect,
    ] {
        h.sender.send(event).await.expect("send event");
    }
    h.calls.lock().expect("call log").clear();

    h.controller.run(events).await;
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert_eq!(h.controller.transcript().len(), 2);
    assert!(h.controller.conversation_id().is_none());
    assert_eq!(entries(&h.calls), vec!["agent.stop", "avatar.stop"]);

    h.controller.handle_event(AgentEvent::Audio(Bytes::from_static(&[1, 2])));
    assert_eq!(entries(&h.calls), vec!["agent.stop", "avatar.stop"]);
}

#[tokio::test]
async fn closed_stream_counts_as_disconnect() {
    let mut h = harness();
    let events = h.controller.connect().await.expect("connect");
    h.sender
        .send(AgentEvent::Ready {
            conversation_id: None,
        })
        .await
        .expect("send event");
    drop(h.sender);
    h.calls.lock().expect("call log").clear();

    h.controller.run(events).await;
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert_eq!(entries(&h.calls), vec!["agent.stop", "avatar.stop"]);
}

#[tokio::test]
async fn reconnect_after_agent_disconnect_stops_previous_stream_first() {
    let mut h = harness();
    let _events = h.controller.connect().await.expect("connect");
    h.controller.handle_event(AgentEvent::Ready {
        conversation_id: None,
    });
    h.controller.handle_event(AgentEvent::Disconnect);
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    h.calls.lock().expect("call log").clear();

    // The fake agent hands out a single event stream, so the second connect fails late.
    let _ = h.controller.connect().await;
    let calls = entries(&h.calls);
    let position = |name: &str| calls.iter().position(|call| call == name);
    let avatar_stop = position("avatar.stop").expect("previous avatar stopped");
    let avatar_start = position("avatar.start:tok").expect("avatar restarted");
    assert_eq!(position("agent.stop"), Some(0));
    assert!(avatar_stop < avatar_start);
}

#[tokio::test]
async fn turns_persist_once_conversation_is_known() {
    let mut h = harness();
    let _events = h.controller.connect().await.expect("connect");
    h.controller.handle_event(AgentEvent::Ready {
        conversation_id: Some("conv-1".into()),
    });
    h.controller
        .handle_event(AgentEvent::UserTranscript("hi".into()));
    h.controller
        .handle_event(AgentEvent::AgentResponse("hello".into()));
    h.controller.flush_transcript().await;

    let appended = h.api.appended.lock().expect("appended").clone();
    let turns: Vec<(&str, Role, &str, &str)> = appended
        .iter()
        .map(|entry| {
            (
                entry.conversation_id.as_str(),
                entry.role,
                entry.text.as_str(),
                entry.project_id.as_str(),
            )
        })
        .collect();
    assert_eq!(
        turns,
        vec![
            ("conv-1", Role::System, CONNECTED_LINE, "p1"),
            ("conv-1", Role::User, "hi", "p1"),
            ("conv-1", Role::Agent, "hello", "p1"),
        ]
    );
}

#[tokio::test]
async fn persistence_failure_does_not_disturb_session() {
    let mut h = harness_with(|api, _| api.fail_append = true);
    let _events = h.controller.connect().await.expect("connect");
    h.controller.handle_event(AgentEvent::Ready {
        conversation_id: Some("conv-1".into()),
    });
    h.controller
        .handle_event(AgentEvent::UserTranscript("hi".into()));
    h.controller.flush_transcript().await;

    assert_eq!(h.controller.state(), SessionState::Connected);
    assert_eq!(h.controller.transcript().len(), 2);
    assert!(h.controller.notices().is_empty());
}

#[tokio::test]
async fn disconnect_stops_agent_before_avatar() {
    let mut h = harness();
    let _events = h.controller.connect().await.expect("connect");
    h.controller.handle_event(AgentEvent::Ready {
        conversation_id: Some("conv-1".into()),
    });
    h.calls.lock().expect("call log").clear();

    h.controller.disconnect().await;
    assert_eq!(entries(&h.calls), vec!["agent.stop", "avatar.stop"]);
    assert_eq!(h.controller.state(), SessionState::Disconnected);
    assert!(h.controller.conversation_id().is_none());

    h.controller.disconnect().await;
    assert_eq!(
        entries(&h.calls),
        vec!["agent.stop", "avatar.stop", "agent.stop", "avatar.stop"]
    );
}

#[tokio::test]
async fn overlapping_refresh_is_rejected() {
    let h = harness_with(|api, _| api.report_delay = Duration::from_millis(50));
    let (first, second) = tokio::join!(
        h.controller.refresh_report(),
        h.controller.refresh_report()
    );
    assert_eq!(first.expect("first refresh"), sample_report());
    assert_eq!(second.expect_err("overlap"), ClientError::RefreshInFlight);
    assert_eq!(h.api.report_fetches.load(Ordering::SeqCst), 1);

    h.controller.refresh_report().await.expect("guard released");
    assert_eq!(h.api.report_fetches.load(Ordering::SeqCst), 2);
    assert_eq!(h.controller.cached_report(), Some(sample_report()));
}
