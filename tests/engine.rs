//! Turn engine integration tests
//!
//! Drive the engine through scripted seams on tokio's paused clock, so the
//! silence debounce and completion timeouts run deterministically.

use std::time::Duration;

use secrecy::SecretString;
use tokio::time::sleep;
use voice_chat::{
    ConversationTurn, EngineEvent, EngineState, Error, ErrorKind, OpenAiChatClient,
    RelistenPolicy, Role,
};

mod common;
use common::{
    RecordingSink, ScriptedChat, ScriptedSource, drain, engine_config, reply, spawn_engine,
    wait_for_state,
};

fn errors(events: &[EngineEvent]) -> Vec<(ErrorKind, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Error { kind, message } => Some((*kind, message.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_reply_is_appended_and_spoken() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("I don't have real-time access.")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;

    source.partial("what").await;
    source.partial("what time is it").await;
    sleep(Duration::from_secs(3)).await;

    let turns = engine.conversation().await.unwrap();
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].role, Role::System);
    assert_eq!(turns[1], ConversationTurn::user("what time is it"));
    assert_eq!(
        turns[2],
        ConversationTurn::assistant("I don't have real-time access.")
    );

    assert_eq!(sink.spoken(), vec!["I don't have real-time access."]);
    assert_eq!(engine.state(), EngineState::Listening);

    // The model saw the system prompt and the user turn, nothing else
    let requests = chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0], turns[..2].to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_partials_closer_than_debounce_do_not_finalize() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("ok")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;

    source.partial("tell").await;
    sleep(Duration::from_millis(1500)).await;
    source.partial("tell me").await;
    sleep(Duration::from_millis(1500)).await;
    source.partial("tell me a joke").await;

    // 1.9s after the last partial: still within the silence interval
    sleep(Duration::from_millis(1900)).await;
    assert!(chat.requests().is_empty());
    assert_eq!(engine.state(), EngineState::Listening);

    sleep(Duration::from_millis(200)).await;
    let requests = chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].last(),
        Some(&ConversationTurn::user("tell me a joke"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_finalized_text_is_latest_partial() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("sure")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;

    // Recognizers revise earlier words; the last update wins
    source.partial("turn of").await;
    source.partial("turn off the").await;
    source.partial("turn off the lights").await;
    sleep(Duration::from_secs(3)).await;

    let finalized: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::UtteranceFinalized { text } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(finalized, vec!["turn off the lights"]);
}

#[tokio::test(start_paused = true)]
async fn test_conversation_is_append_only_across_turns() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("Paris."), reply("About two million.")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;

    source.partial("what is the capital of France").await;
    sleep(Duration::from_secs(3)).await;
    let first = engine.conversation().await.unwrap();

    source.partial("how many people live there").await;
    sleep(Duration::from_secs(3)).await;
    let second = engine.conversation().await.unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 5);
    assert_eq!(second[..3], first[..]);

    let roles: Vec<Role> = second.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant
        ]
    );

    // Each request replays the whole history
    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1], second[..4].to_vec());
    assert_eq!(sink.spoken(), vec!["Paris.", "About two million."]);
}

#[tokio::test(start_paused = true)]
async fn test_speech_during_playback_interrupts_first() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("Once upon a time, in a land far away...")]);
    let sink = RecordingSink::holding();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("tell me a story").await;
    wait_for_state(&engine, EngineState::Speaking).await;
    sleep(Duration::from_millis(10)).await;

    // Listening resumed before the reply started playing
    assert!(source.is_active());
    assert_eq!(source.begins(), 2);
    drain(&mut events);

    source.partial("stop").await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        sink.log(),
        vec![
            "speak:Once upon a time, in a land far away...".to_string(),
            "interrupt".to_string()
        ]
    );
    assert_eq!(engine.state(), EngineState::Listening);

    // The engine left Speaking before it handled the new transcript
    let events = drain(&mut events);
    let listening = events
        .iter()
        .position(|e| {
            matches!(
                e,
                EngineEvent::StateChanged {
                    state: EngineState::Listening
                }
            )
        })
        .expect("no transition to listening");
    let transcript = events
        .iter()
        .position(|e| matches!(e, EngineEvent::Transcript { text } if text == "stop"))
        .expect("no transcript event");
    assert!(listening < transcript);
}

#[tokio::test(start_paused = true)]
async fn test_after_playback_policy_waits_for_playback() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("Done.")]);
    let sink = RecordingSink::holding();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::AfterPlayback),
        &source,
        chat,
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("set a timer").await;
    wait_for_state(&engine, EngineState::Speaking).await;

    assert!(!source.is_active());
    assert_eq!(source.begins(), 1);

    engine.stop().await.unwrap();
    wait_for_state(&engine, EngineState::Idle).await;
    assert_eq!(sink.log().last().map(String::as_str), Some("interrupt"));
}

#[tokio::test(start_paused = true)]
async fn test_after_playback_policy_resumes_when_playback_ends() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("Timer set."), reply("Cancelled.")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::AfterPlayback),
        &source,
        chat,
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("set a timer").await;
    wait_for_state(&engine, EngineState::Speaking).await;
    assert!(!source.is_active());

    wait_for_state(&engine, EngineState::Listening).await;
    assert!(source.is_active());
    assert_eq!(source.begins(), 2);
    assert_eq!(sink.spoken(), vec!["Timer set."]);

    // The re-acquired session carries the next turn
    source.partial("actually cancel it").await;
    sleep(Duration::from_secs(3)).await;
    assert_eq!(sink.spoken(), vec!["Timer set.", "Cancelled."]);
}

#[tokio::test(start_paused = true)]
async fn test_speech_failure_is_reported_and_listening_resumes() {
    for relisten in [RelistenPolicy::DuringPlayback, RelistenPolicy::AfterPlayback] {
        let source = ScriptedSource::new();
        let chat = ScriptedChat::replying([reply("Here are the headlines.")]);
        let sink = RecordingSink::failing();
        let engine = spawn_engine(engine_config(relisten), &source, chat, &sink);
        let mut events = engine.subscribe();

        engine.start().await.unwrap();
        wait_for_state(&engine, EngineState::Listening).await;
        source.partial("read me the news").await;
        sleep(Duration::from_secs(3)).await;

        assert_eq!(engine.state(), EngineState::Listening, "{relisten:?}");
        assert!(source.is_active(), "{relisten:?}");
        assert_eq!(source.begins(), 2, "{relisten:?}");
        assert_eq!(sink.spoken(), vec!["Here are the headlines."]);
        assert_eq!(
            errors(&drain(&mut events)),
            vec![(
                ErrorKind::Speech,
                "speech output error: output device lost".to_string()
            )],
            "{relisten:?}"
        );

        // The reply stays in the history even though it was never heard
        assert_eq!(engine.conversation().await.unwrap().len(), 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_as_reply_arrives_never_starts_playback() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::gated(reply("Let me explain at length."));
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("explain").await;
    wait_for_state(&engine, EngineState::AwaitingCompletion).await;

    // The reply and the stop reach the engine in the same pass
    chat.release();
    engine.stop().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(engine.state(), EngineState::Idle);
    assert!(sink.spoken().is_empty());
    assert!(!source.is_active());
    assert_eq!(chat.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_closed_transcript_stream_is_recognition_unavailable() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("are you").await;
    sleep(Duration::from_millis(10)).await;

    source.close();
    wait_for_state(&engine, EngineState::Idle).await;

    assert_eq!(
        errors(&drain(&mut events)),
        vec![(
            ErrorKind::RecognitionUnavailable,
            "Speech recognition is not available on this device.".to_string()
        )]
    );
    assert!(chat.requests().is_empty());
    assert_eq!(engine.conversation().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_credential_reports_configuration_error() {
    let source = ScriptedSource::new();
    let chat = OpenAiChatClient::new(
        SecretString::from(String::new()),
        "gpt-3.5-turbo",
        "http://127.0.0.1:9",
    );
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        std::sync::Arc::new(chat),
        &sink,
    );
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("hello").await;
    sleep(Duration::from_secs(3)).await;

    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(
        errors(&drain(&mut events)),
        vec![(
            ErrorKind::Configuration,
            "Please enter your OpenAI API key.".to_string()
        )]
    );

    let turns = engine.conversation().await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1], ConversationTurn::user("hello"));
    assert!(sink.spoken().is_empty());
    assert!(!source.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_server_error_returns_to_idle_without_reply() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([Err(Error::Connectivity(
        "HTTP 500 Internal Server Error".to_string(),
    ))]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("what's the weather").await;
    sleep(Duration::from_secs(3)).await;

    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(
        errors(&drain(&mut events)),
        vec![(
            ErrorKind::Connectivity,
            "Error: Invalid API key or server error.".to_string()
        )]
    );

    let turns = engine.conversation().await.unwrap();
    assert!(turns.iter().all(|t| t.role != Role::Assistant));
    assert!(sink.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completion_timeout_is_connectivity_error() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::slow(Duration::from_secs(120), reply("too late"));
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("are you there").await;

    sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.state(), EngineState::AwaitingCompletion);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(engine.state(), EngineState::Idle);

    let errors = errors(&drain(&mut events));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::Connectivity);
    assert!(sink.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_final_transcript_skips_debounce() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("Hi!")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.final_text("hi there").await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(chat.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blank_transcript_never_finalizes() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("   ").await;
    sleep(Duration::from_secs(5)).await;

    assert!(chat.requests().is_empty());
    assert_eq!(engine.state(), EngineState::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_listening_discards_utterance() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("unused")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("remind me to").await;

    engine.stop().await.unwrap();
    wait_for_state(&engine, EngineState::Idle).await;
    assert!(!source.is_active());
    assert_eq!(source.ends(), 1);

    sleep(Duration::from_secs(5)).await;
    assert!(chat.requests().is_empty());
    assert_eq!(engine.conversation().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_awaiting_drops_late_reply() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::slow(Duration::from_secs(10), reply("late reply"));
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("write me a poem").await;
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(engine.state(), EngineState::AwaitingCompletion);

    engine.stop().await.unwrap();
    sleep(Duration::from_secs(20)).await;

    assert_eq!(engine.state(), EngineState::Idle);
    let turns = engine.conversation().await.unwrap();
    assert!(turns.iter().all(|t| t.role != Role::Assistant));
    assert!(sink.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_is_ignored_unless_idle() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;

    assert_eq!(source.begins(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_recognition_reports_error() {
    let source = ScriptedSource::unavailable();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );
    let mut events = engine.subscribe();

    engine.start().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(
        errors(&drain(&mut events)),
        vec![(
            ErrorKind::RecognitionUnavailable,
            "Speech recognition is not available on this device.".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_recognition_failure_aborts_turn() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;
    source.partial("half a").await;
    source
        .fail(Error::RecognitionUnavailable("audio session lost".to_string()))
        .await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(engine.state(), EngineState::Idle);
    assert!(chat.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recognize_once_returns_text_without_chat() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::replying([reply("unused")]);
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat.clone(),
        &sink,
    );

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.recognize_once().await }
    });
    wait_for_state(&engine, EngineState::Listening).await;

    source.partial("turn on the").await;
    source.partial("turn on the lights").await;
    sleep(Duration::from_secs(3)).await;

    let text = pending.await.unwrap().unwrap();
    assert_eq!(text, "turn on the lights");
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(chat.requests().is_empty());
    assert_eq!(engine.conversation().await.unwrap().len(), 1);
    assert!(!source.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_stop_resolves_recognize_once_with_partial() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.recognize_once().await }
    });
    wait_for_state(&engine, EngineState::Listening).await;

    source.partial("good morn").await;
    sleep(Duration::from_millis(500)).await;
    engine.stop().await.unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), "good morn");
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_recognize_once_rejected_while_busy() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;

    let result = engine.recognize_once().await;
    assert!(matches!(result, Err(Error::Relay(_))));
    assert_eq!(engine.state(), EngineState::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_engine() {
    let source = ScriptedSource::new();
    let chat = ScriptedChat::silent();
    let sink = RecordingSink::new();
    let engine = spawn_engine(
        engine_config(RelistenPolicy::DuringPlayback),
        &source,
        chat,
        &sink,
    );

    engine.start().await.unwrap();
    wait_for_state(&engine, EngineState::Listening).await;

    engine.shutdown().await;
    sleep(Duration::from_millis(10)).await;

    assert!(!source.is_active());
    assert!(matches!(engine.start().await, Err(Error::EngineStopped)));
}
