use std::time::Duration;

use futures::StreamExt;
use realtime_voice::transport::channel::{self, BackendPeer};
use realtime_voice::{
    AudioFrame, BackendEvent, BackendRequest, ChatContext, ChatItem, ChatRole, Error, ErrorKind, FunctionCall,
    GenerationStatus, RealtimeCapabilities, RealtimeEvent, RealtimeSession, ServerError, ServerErrorType,
    SessionOptions, ToolChoice, ToolContext,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(1);

fn start(capabilities: RealtimeCapabilities, options: SessionOptions) -> (RealtimeSession, BackendPeer) {
    let (transport, peer) = channel::pair();
    (RealtimeSession::with_transport(transport, capabilities, options), peer)
}

fn start_default() -> (RealtimeSession, BackendPeer) {
    start(RealtimeCapabilities::all(), SessionOptions::default())
}

async fn request(peer: &mut BackendPeer) -> BackendRequest {
    timeout(WAIT, peer.next_request())
        .await
        .expect("request in time")
        .expect("session alive")
}

/// Read the next request and acknowledge it.
async fn ack_next(peer: &mut BackendPeer) -> BackendRequest {
    let req = request(peer).await;
    let request_id = req.request_id().expect("acknowledged request").to_string();
    peer.emit(BackendEvent::Ack { request_id }).unwrap();
    req
}

async fn event(session: &mut RealtimeSession) -> RealtimeEvent {
    timeout(WAIT, session.next_event())
        .await
        .expect("event in time")
        .expect("session alive")
}

async fn no_event(session: &mut RealtimeSession) {
    assert!(timeout(Duration::from_millis(50), session.next_event()).await.is_err());
}

fn frame() -> AudioFrame {
    AudioFrame::new(vec![0; 240], 24_000, 1, 240).unwrap()
}

fn started(generation_id: &str, request_id: Option<&str>) -> BackendEvent {
    BackendEvent::GenerationStarted {
        generation_id: generation_id.to_string(),
        request_id: request_id.map(str::to_string),
    }
}

fn message_added(generation_id: &str, message_id: &str) -> BackendEvent {
    BackendEvent::MessageAdded {
        generation_id: generation_id.to_string(),
        message_id: message_id.to_string(),
    }
}

fn text_delta(generation_id: &str, message_id: &str, delta: &str) -> BackendEvent {
    BackendEvent::TextDelta {
        generation_id: generation_id.to_string(),
        message_id: message_id.to_string(),
        delta: delta.to_string(),
    }
}

fn done(generation_id: &str, status: GenerationStatus) -> BackendEvent {
    BackendEvent::GenerationDone {
        generation_id: generation_id.to_string(),
        status,
    }
}

#[tokio::test]
async fn speech_boundaries_are_paired_and_transcribed() {
    let (mut session, peer) = start_default();
    peer.emit(BackendEvent::SpeechStarted { item_id: "item_1".to_string() }).unwrap();
    peer.emit(BackendEvent::SpeechStopped { item_id: "item_1".to_string() }).unwrap();
    peer.emit(BackendEvent::TranscriptionCompleted {
        item_id: "item_1".to_string(),
        transcript: "hello there".to_string(),
    })
    .unwrap();

    match event(&mut session).await {
        RealtimeEvent::InputSpeechStarted(evt) => assert_eq!(evt.item_id, "item_1"),
        other => panic!("unexpected event: {other:?}"),
    }
    match event(&mut session).await {
        RealtimeEvent::InputSpeechStopped(evt) => {
            assert_eq!(evt.item_id, "item_1");
            assert!(evt.user_transcription_enabled);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match event(&mut session).await {
        RealtimeEvent::InputTranscriptionCompleted(evt) => assert_eq!(evt.transcript, "hello there"),
        other => panic!("unexpected event: {other:?}"),
    }

    let ctx = session.chat_ctx().await.unwrap();
    let msg = ctx.get("item_1").and_then(ChatItem::as_message).expect("user message");
    assert_eq!(msg.role, ChatRole::User);
    assert_eq!(msg.text(), "hello there");
}

#[tokio::test]
async fn transcript_without_segment_is_a_protocol_error() {
    let (mut session, peer) = start_default();
    peer.emit(BackendEvent::TranscriptionCompleted {
        item_id: "item_9".to_string(),
        transcript: "stray".to_string(),
    })
    .unwrap();
    match event(&mut session).await {
        RealtimeEvent::Error(err) => {
            assert_eq!(err.kind, ErrorKind::Protocol);
            assert!(err.message.contains("item_9"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(session.chat_ctx().await.unwrap().is_empty());
}

#[tokio::test]
async fn stop_without_start_is_a_protocol_error() {
    let (mut session, peer) = start_default();
    peer.emit(BackendEvent::SpeechStopped { item_id: "item_9".to_string() }).unwrap();

    match event(&mut session).await {
        RealtimeEvent::Error(err) => {
            assert_eq!(err.kind, ErrorKind::Protocol);
            assert!(err.message.contains("item_9"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn new_segment_closes_the_open_one_first() {
    let (mut session, peer) = start_default();
    peer.emit(BackendEvent::SpeechStarted { item_id: "item_1".to_string() }).unwrap();
    peer.emit(BackendEvent::SpeechStarted { item_id: "item_2".to_string() }).unwrap();

    let names: Vec<String> = session
        .events()
        .take(3)
        .map(|evt| match evt {
            RealtimeEvent::InputSpeechStarted(e) => format!("start {}", e.item_id),
            RealtimeEvent::InputSpeechStopped(e) => format!("stop {} {}", e.item_id, e.user_transcription_enabled),
            other => other.name().to_string(),
        })
        .collect()
        .await;
    assert_eq!(names, vec!["start item_1", "stop item_1 false", "start item_2"]);
}

#[tokio::test]
async fn transcription_flag_needs_capability_and_option() {
    let options = SessionOptions {
        input_transcription: false,
        ..SessionOptions::default()
    };
    let (mut session, peer) = start(RealtimeCapabilities::all(), options);
    peer.emit(BackendEvent::SpeechStarted { item_id: "item_1".to_string() }).unwrap();
    peer.emit(BackendEvent::SpeechStopped { item_id: "item_1".to_string() }).unwrap();
    let _ = event(&mut session).await;
    assert!(matches!(
        event(&mut session).await,
        RealtimeEvent::InputSpeechStopped(evt) if !evt.user_transcription_enabled
    ));

    let caps = RealtimeCapabilities {
        input_transcription: false,
        ..RealtimeCapabilities::all()
    };
    let (mut session, peer) = start(caps, SessionOptions::default());
    peer.emit(BackendEvent::SpeechStarted { item_id: "item_1".to_string() }).unwrap();
    peer.emit(BackendEvent::SpeechStopped { item_id: "item_1".to_string() }).unwrap();
    let _ = event(&mut session).await;
    assert!(matches!(
        event(&mut session).await,
        RealtimeEvent::InputSpeechStopped(evt) if !evt.user_transcription_enabled
    ));
}

#[tokio::test]
async fn generate_reply_resolves_with_user_initiated_generation() {
    let (mut session, mut peer) = start_default();
    let reply = session.generate_reply(Some("greet the user".to_string()));

    let BackendRequest::CreateGeneration { request_id, instructions } = request(&mut peer).await else {
        panic!("expected generation.create");
    };
    assert_eq!(instructions.as_deref(), Some("greet the user"));
    peer.emit(BackendEvent::Ack { request_id: request_id.clone() }).unwrap();
    peer.emit(started("gen_1", Some(&request_id))).unwrap();

    let mut generation = timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(generation.generation_id, "gen_1");
    assert!(generation.user_initiated);

    peer.emit(message_added("gen_1", "msg_1")).unwrap();
    peer.emit(BackendEvent::AudioDelta {
        generation_id: "gen_1".to_string(),
        message_id: "msg_1".to_string(),
        frame: frame(),
    })
    .unwrap();
    peer.emit(text_delta("gen_1", "msg_1", "Hi ")).unwrap();
    peer.emit(text_delta("gen_1", "msg_1", "there")).unwrap();
    peer.emit(BackendEvent::MessageDone {
        generation_id: "gen_1".to_string(),
        message_id: "msg_1".to_string(),
    })
    .unwrap();
    peer.emit(done("gen_1", GenerationStatus::Completed)).unwrap();

    let message = generation.message_stream.recv().await.expect("message");
    assert_eq!(message.message_id, "msg_1");
    let text: Vec<String> = message.text_stream.collect().await;
    assert_eq!(text.concat(), "Hi there");
    let audio: Vec<AudioFrame> = message.audio_stream.collect().await;
    assert_eq!(audio, vec![frame()]);
    assert!(generation.message_stream.recv().await.is_none());
    assert_eq!(generation.done().await, GenerationStatus::Completed);

    let ctx = session.chat_ctx().await.unwrap();
    let msg = ctx.get("msg_1").and_then(ChatItem::as_message).expect("assistant message");
    assert_eq!(msg.role, ChatRole::Assistant);
    assert_eq!(msg.text(), "Hi there");
    assert!(!msg.interrupted);

    // Delivered to the future only, never twice.
    no_event(&mut session).await;
}

#[tokio::test]
async fn automatic_generation_arrives_on_event_stream() {
    let (mut session, peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();

    match event(&mut session).await {
        RealtimeEvent::GenerationCreated(generation) => {
            assert_eq!(generation.generation_id, "gen_1");
            assert!(!generation.user_initiated);
            assert_eq!(generation.status(), GenerationStatus::Open);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn dropped_reply_future_falls_back_to_event_stream() {
    let (mut session, mut peer) = start_default();
    let reply = session.generate_reply(None);
    let BackendRequest::CreateGeneration { request_id, .. } = request(&mut peer).await else {
        panic!("expected generation.create");
    };
    drop(reply);
    peer.emit(started("gen_1", Some(&request_id))).unwrap();

    assert!(matches!(
        event(&mut session).await,
        RealtimeEvent::GenerationCreated(generation) if generation.user_initiated
    ));
}

#[tokio::test]
async fn interrupt_closes_streams_before_next_generation() {
    let (mut session, mut peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    peer.emit(message_added("gen_1", "msg_1")).unwrap();
    peer.emit(text_delta("gen_1", "msg_1", "Once upon")).unwrap();

    let RealtimeEvent::GenerationCreated(mut first) = event(&mut session).await else {
        panic!("expected generation");
    };
    let mut message = first.message_stream.recv().await.unwrap();
    assert_eq!(message.text_stream.recv().await.as_deref(), Some("Once upon"));

    session.interrupt().unwrap();
    let reply = session.generate_reply(None);
    assert!(matches!(
        request(&mut peer).await,
        BackendRequest::CancelGeneration { generation_id } if generation_id == "gen_1"
    ));
    let BackendRequest::CreateGeneration { request_id, .. } = request(&mut peer).await else {
        panic!("expected generation.create");
    };

    peer.emit(text_delta("gen_1", "msg_1", " a time")).unwrap();
    peer.emit(started("gen_2", Some(&request_id))).unwrap();
    let second = timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(second.generation_id, "gen_2");

    assert!(first.interrupted());
    assert_eq!(message.text_stream.recv().await, None);
    assert!(first.message_stream.recv().await.is_none());
    assert!(first.function_stream.recv().await.is_none());

    let ctx = session.chat_ctx().await.unwrap();
    let msg = ctx.get("msg_1").and_then(ChatItem::as_message).unwrap();
    assert!(msg.interrupted);
    assert_eq!(msg.text(), "Once upon");
}

#[tokio::test]
async fn generate_reply_interrupts_open_generation() {
    let (mut session, mut peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    let RealtimeEvent::GenerationCreated(first) = event(&mut session).await else {
        panic!("expected generation");
    };

    let _reply = session.generate_reply(None);
    assert!(matches!(request(&mut peer).await, BackendRequest::CancelGeneration { .. }));
    assert!(matches!(request(&mut peer).await, BackendRequest::CreateGeneration { .. }));
    assert_eq!(first.status(), GenerationStatus::Cancelled);
}

#[tokio::test]
async fn superseded_generation_is_closed_before_the_next_is_announced() {
    let (mut session, peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    peer.emit(started("gen_2", None)).unwrap();

    let RealtimeEvent::GenerationCreated(mut first) = event(&mut session).await else {
        panic!("expected generation");
    };
    let RealtimeEvent::GenerationCreated(second) = event(&mut session).await else {
        panic!("expected generation");
    };
    assert_eq!(second.generation_id, "gen_2");
    assert!(first.status().is_finished());
    assert!(first.message_stream.recv().await.is_none());
}

#[tokio::test]
async fn interrupt_without_generation_is_a_noop() {
    let (mut session, mut peer) = start_default();
    session.interrupt().unwrap();
    session.push_audio(frame()).unwrap();
    assert!(matches!(request(&mut peer).await, BackendRequest::AppendAudio { .. }));
    no_event(&mut session).await;

    peer.emit(started("gen_1", None)).unwrap();
    peer.emit(done("gen_1", GenerationStatus::Completed)).unwrap();
    peer.emit(BackendEvent::SpeechStarted { item_id: "item_1".to_string() }).unwrap();
    let _ = event(&mut session).await;
    let _ = event(&mut session).await;

    session.interrupt().unwrap();
    session.clear_input_audio().unwrap();
    assert!(matches!(request(&mut peer).await, BackendRequest::ClearAudio));
    no_event(&mut session).await;
}

#[tokio::test]
async fn truncate_is_limited_to_recent_generations() {
    let (mut session, mut peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    peer.emit(message_added("gen_1", "msg_1")).unwrap();
    let RealtimeEvent::GenerationCreated(mut first) = event(&mut session).await else {
        panic!("expected generation");
    };
    let _message = first.message_stream.recv().await.unwrap();

    session.truncate("msg_1", 420).unwrap();
    assert!(matches!(
        request(&mut peer).await,
        BackendRequest::TruncateMessage { message_id, audio_end_ms: 420 } if message_id == "msg_1"
    ));

    peer.emit(done("gen_1", GenerationStatus::Completed)).unwrap();
    peer.emit(BackendEvent::MessageTruncated {
        message_id: "msg_1".to_string(),
        text: "Hel".to_string(),
    })
    .unwrap();
    peer.emit(started("gen_2", None)).unwrap();
    peer.emit(started("gen_3", None)).unwrap();
    let _ = event(&mut session).await;
    let _ = event(&mut session).await;

    let err = session.truncate("msg_1", 100).unwrap_err();
    assert!(matches!(err, Error::InvalidReference(_)));

    let ctx = session.chat_ctx().await.unwrap();
    let msg = ctx.get("msg_1").and_then(ChatItem::as_message).unwrap();
    assert_eq!(msg.text(), "Hel");
    assert!(msg.interrupted);
}

#[tokio::test]
async fn truncate_checks_closed_before_capability() {
    let (session, _peer) = start(RealtimeCapabilities::default(), SessionOptions::default());
    assert!(matches!(session.truncate("msg_1", 0), Err(Error::UnsupportedOperation(_))));
    session.close().await.unwrap();
    assert!(matches!(session.truncate("msg_1", 0), Err(Error::SessionClosed)));
}

#[tokio::test]
async fn close_fails_every_pending_call() {
    let (session, mut peer) = start_default();
    let handle = session.handle();
    let update = tokio::spawn(async move { handle.update_instructions("be terse").await });
    assert!(matches!(request(&mut peer).await, BackendRequest::UpdateInstructions { .. }));

    let reply = session.generate_reply(None);
    assert!(matches!(request(&mut peer).await, BackendRequest::CreateGeneration { .. }));

    session.close().await.unwrap();
    assert!(matches!(update.await.unwrap(), Err(Error::SessionClosed)));
    assert!(matches!(reply.await, Err(Error::SessionClosed)));
    assert!(session.is_closed());
    session.close().await.unwrap();
}

#[tokio::test]
async fn close_fails_queued_update() {
    let (mut session, mut peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    let _ = event(&mut session).await;

    let (result, closed) = tokio::join!(session.update_tools(ToolContext::new()), session.close());
    closed.unwrap();
    assert!(matches!(result, Err(Error::SessionClosed)));
    assert!(timeout(WAIT, peer.next_request()).await.unwrap().is_none());
}

#[tokio::test]
async fn close_ends_open_generation_streams() {
    let (mut session, peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    let RealtimeEvent::GenerationCreated(mut generation) = event(&mut session).await else {
        panic!("expected generation");
    };

    session.close().await.unwrap();
    assert!(generation.message_stream.recv().await.is_none());
    assert_eq!(generation.done().await, GenerationStatus::Cancelled);
}

#[tokio::test]
async fn update_timeout_leaves_context_unchanged() {
    let options = SessionOptions {
        ack_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    };
    let (mut session, mut peer) = start(RealtimeCapabilities::all(), options);
    let mut ctx = ChatContext::new();
    ctx.add_message(ChatRole::User, "remember this");

    let (result, request_id) = tokio::join!(session.update_chat_ctx(ctx), async {
        let BackendRequest::UpdateChatContext { request_id, .. } = request(&mut peer).await else {
            panic!("expected chat_context.update");
        };
        request_id
    });
    assert!(matches!(result, Err(Error::BackendTimeout("chat_context.update"))));

    // A late acknowledgment must not apply the update.
    peer.emit(BackendEvent::Ack { request_id }).unwrap();
    peer.emit(BackendEvent::SpeechStarted { item_id: "item_1".to_string() }).unwrap();
    let _ = event(&mut session).await;
    assert!(session.chat_ctx().await.unwrap().is_empty());
}

#[tokio::test]
async fn queued_updates_time_out_while_generation_stays_open() {
    let options = SessionOptions {
        ack_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    };
    let (mut session, mut peer) = start(RealtimeCapabilities::all(), options);
    peer.emit(started("gen_1", None)).unwrap();
    let _ = event(&mut session).await;

    let mut ctx = ChatContext::new();
    ctx.add_message(ChatRole::User, "queued");
    let (ctx_result, instructions_result) = timeout(WAIT, async {
        tokio::join!(session.update_chat_ctx(ctx), session.update_instructions("later"))
    })
    .await
    .expect("queued updates resolve");
    assert!(matches!(ctx_result, Err(Error::BackendTimeout("chat_context.update"))));
    assert!(matches!(instructions_result, Err(Error::BackendTimeout("instructions.update"))));

    // Expired updates are never sent once the generation ends.
    peer.emit(done("gen_1", GenerationStatus::Completed)).unwrap();
    session.push_audio(frame()).unwrap();
    assert!(matches!(request(&mut peer).await, BackendRequest::AppendAudio { .. }));
    assert!(session.chat_ctx().await.unwrap().is_empty());
    assert_eq!(session.instructions().await.unwrap(), None);
}

#[tokio::test]
async fn reply_times_out_without_generation_start() {
    let options = SessionOptions {
        ack_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    };
    let (session, mut peer) = start(RealtimeCapabilities::all(), options);

    let (result, ()) = tokio::join!(session.generate_reply(Some("greet".to_string())), async {
        let req = request(&mut peer).await;
        assert!(matches!(&req, BackendRequest::CreateGeneration { instructions: Some(text), .. } if text == "greet"));
        // An acknowledgment alone does not resolve a reply.
        let request_id = req.request_id().unwrap().to_string();
        peer.emit(BackendEvent::Ack { request_id }).unwrap();
    });
    assert!(matches!(result, Err(Error::BackendTimeout("generation.create"))));
    assert!(!session.is_closed());
}

#[tokio::test]
async fn acknowledged_updates_are_applied() {
    let (session, mut peer) = start_default();
    let mut tools = ToolContext::new();
    tools
        .tool("echo", |args: serde_json::Value| async move { Ok(args) })
        .unwrap();

    let (result, req) = tokio::join!(session.update_instructions("be brief"), ack_next(&mut peer));
    result.unwrap();
    assert!(matches!(req, BackendRequest::UpdateInstructions { instructions, .. } if instructions == "be brief"));

    let (result, req) = tokio::join!(session.update_tools(tools), ack_next(&mut peer));
    result.unwrap();
    assert!(matches!(req, BackendRequest::UpdateTools { tools, .. } if tools[0].name == "echo"));

    let choice = ToolChoice::Function { name: "echo".to_string() };
    let (result, _) = tokio::join!(session.update_options(Some(choice.clone())), ack_next(&mut peer));
    result.unwrap();

    assert_eq!(session.instructions().await.unwrap().as_deref(), Some("be brief"));
    let tools = session.tools().await.unwrap();
    assert_eq!(tools.names().collect::<Vec<_>>(), vec!["echo"]);
    assert_eq!(session.tool_choice().await.unwrap(), Some(choice));

    let (result, req) = tokio::join!(session.update_options(None), ack_next(&mut peer));
    result.unwrap();
    assert!(matches!(req, BackendRequest::UpdateOptions { tool_choice: None, .. }));
    assert_eq!(session.tool_choice().await.unwrap(), None);
}

#[tokio::test]
async fn history_update_waits_for_generation_to_finish() {
    let (mut session, mut peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    let _ = event(&mut session).await;

    let mut ctx = ChatContext::new();
    ctx.add_message(ChatRole::User, "earlier turn");

    let (result, ()) = tokio::join!(session.update_chat_ctx(ctx), async {
        session.push_audio(frame()).unwrap();
        assert!(matches!(request(&mut peer).await, BackendRequest::AppendAudio { .. }));

        peer.emit(done("gen_1", GenerationStatus::Completed)).unwrap();
        let BackendRequest::UpdateChatContext { request_id, chat_ctx } = request(&mut peer).await else {
            panic!("expected chat_context.update");
        };
        assert_eq!(chat_ctx.len(), 1);
        peer.emit(BackendEvent::Ack { request_id }).unwrap();
    });
    result.unwrap();
    assert_eq!(session.chat_ctx().await.unwrap().len(), 1);
}

#[tokio::test]
async fn interrupt_releases_queued_tool_update() {
    let (mut session, mut peer) = start_default();
    peer.emit(started("gen_1", None)).unwrap();
    let _ = event(&mut session).await;

    let (result, ()) = tokio::join!(session.update_tools(ToolContext::new()), async {
        session.interrupt().unwrap();
        assert!(matches!(request(&mut peer).await, BackendRequest::CancelGeneration { .. }));
        let req = ack_next(&mut peer).await;
        assert!(matches!(req, BackendRequest::UpdateTools { .. }));
    });
    result.unwrap();
}

#[tokio::test]
async fn speech_interrupts_generation_when_enabled() {
    let options = SessionOptions {
        auto_interrupt: true,
        ..SessionOptions::default()
    };
    let (mut session, mut peer) = start(RealtimeCapabilities::all(), options);
    peer.emit(started("gen_1", None)).unwrap();
    let RealtimeEvent::GenerationCreated(generation) = event(&mut session).await else {
        panic!("expected generation");
    };

    peer.emit(BackendEvent::SpeechStarted { item_id: "item_1".to_string() }).unwrap();
    assert!(matches!(event(&mut session).await, RealtimeEvent::InputSpeechStarted(_)));
    assert!(matches!(
        request(&mut peer).await,
        BackendRequest::CancelGeneration { generation_id } if generation_id == "gen_1"
    ));
    assert!(generation.interrupted());
}

#[tokio::test]
async fn empty_commit_is_reported_without_reaching_backend() {
    let (mut session, mut peer) = start_default();
    session.commit_input_audio().unwrap();
    assert!(matches!(
        event(&mut session).await,
        RealtimeEvent::Error(err) if err.kind == ErrorKind::EmptyAudioBuffer
    ));

    session.push_audio(frame()).unwrap();
    session.commit_input_audio().unwrap();
    assert!(matches!(request(&mut peer).await, BackendRequest::AppendAudio { .. }));
    assert!(matches!(request(&mut peer).await, BackendRequest::CommitAudio));

    session.commit_input_audio().unwrap();
    assert!(matches!(
        event(&mut session).await,
        RealtimeEvent::Error(err) if err.kind == ErrorKind::EmptyAudioBuffer
    ));
}

#[tokio::test]
async fn function_calls_stream_and_enter_history() {
    let (mut session, mut peer) = start_default();
    let mut tools = ToolContext::new();
    tools
        .tool("add", |args: serde_json::Value| async move {
            let a = args["a"].as_i64().unwrap_or_default();
            let b = args["b"].as_i64().unwrap_or_default();
            Ok(serde_json::json!({ "sum": a + b }))
        })
        .unwrap();

    peer.emit(started("gen_1", None)).unwrap();
    peer.emit(BackendEvent::FunctionCall {
        generation_id: "gen_1".to_string(),
        call: FunctionCall::new("call_1", "add", r#"{"a":2,"b":3}"#),
    })
    .unwrap();
    peer.emit(done("gen_1", GenerationStatus::Completed)).unwrap();

    let RealtimeEvent::GenerationCreated(mut generation) = event(&mut session).await else {
        panic!("expected generation");
    };
    let call = generation.function_stream.recv().await.expect("function call");
    assert!(generation.function_stream.recv().await.is_none());
    assert_eq!(generation.done().await, GenerationStatus::Completed);

    let output = tools.execute(&call).await;
    assert!(!output.is_error);
    assert!(output.output.contains('5'));

    let mut ctx = session.chat_ctx().await.unwrap();
    assert!(matches!(ctx.get(&call.id), Some(ChatItem::FunctionCall(_))));
    ctx.insert(output).unwrap();

    let (result, _) = tokio::join!(session.update_chat_ctx(ctx), ack_next(&mut peer));
    result.unwrap();
    assert_eq!(session.chat_ctx().await.unwrap().len(), 2);
}

#[tokio::test]
async fn rejected_update_fails_the_call() {
    let (session, mut peer) = start_default();
    let (result, ()) = tokio::join!(session.update_instructions("x"), async {
        let req = request(&mut peer).await;
        peer.emit(BackendEvent::Rejected {
            request_id: req.request_id().unwrap().to_string(),
            error: ServerError::new(ServerErrorType::InvalidRequestError, "instructions too long"),
        })
        .unwrap();
    });

    match result {
        Err(Error::Backend(err)) => assert_eq!(err.message, "instructions too long"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(session.instructions().await.unwrap(), None);
}

#[tokio::test]
async fn unsolicited_backend_error_is_an_event() {
    let (mut session, peer) = start_default();
    let mut error = ServerError::new(ServerErrorType::ServerError, "overloaded");
    error.code = Some("busy".to_string());
    peer.emit(BackendEvent::Error { error }).unwrap();

    match event(&mut session).await {
        RealtimeEvent::Error(err) => {
            assert_eq!(err.kind, ErrorKind::Backend);
            assert_eq!(err.message, "overloaded");
            assert_eq!(err.code.as_deref(), Some("busy"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn transport_loss_closes_the_session() {
    let (mut session, mut peer) = start_default();
    let reply = session.generate_reply(None);
    assert!(matches!(request(&mut peer).await, BackendRequest::CreateGeneration { .. }));
    drop(peer);

    assert!(matches!(
        event(&mut session).await,
        RealtimeEvent::Error(err) if err.kind == ErrorKind::Transport
    ));
    assert!(matches!(reply.await, Err(Error::SessionClosed)));
    assert!(session.is_closed());
    assert!(matches!(session.push_audio(frame()), Err(Error::SessionClosed)));
}
