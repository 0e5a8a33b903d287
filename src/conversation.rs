//! The turn state machine: greet, listen for silence, transcribe, ask the
//! model (looping through any tool calls), speak the answer, then listen
//! again. Grounded on the original's `Conversation`.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec;
use crate::llm::{AssistantReply, ConversationItem};
use crate::silence::SilenceDetector;
use crate::tools::ToolRegistry;

pub type AudioStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

#[async_trait]
pub trait TranscriptionSession: Send {
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()>;
    async fn finish(self: Box<Self>) -> anyhow::Result<String>;
    fn discard(self: Box<Self>);
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn start_session(&self) -> Box<dyn TranscriptionSession>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, function_definitions: &[Value], items: &[ConversationItem]) -> anyhow::Result<AssistantReply>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> anyhow::Result<AudioStream>;
}

#[async_trait]
impl TranscriptionSession for crate::stt::SttSession {
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        crate::stt::SttSession::send_frame(self, frame).await
    }

    async fn finish(self: Box<Self>) -> anyhow::Result<String> {
        Ok(crate::stt::SttSession::finish(*self).await?)
    }

    fn discard(self: Box<Self>) {
        crate::stt::SttSession::discard(*self)
    }
}

pub struct WhisperTranscriber {
    pub client: reqwest::Client,
    pub api_key: String,
}

#[async_trait]
impl SpeechToText for WhisperTranscriber {
    async fn start_session(&self) -> Box<dyn TranscriptionSession> {
        Box::new(crate::stt::SttSession::start(self.client.clone(), self.api_key.clone()))
    }
}

#[async_trait]
impl LanguageModel for crate::llm::GptClient {
    async fn complete(&self, function_definitions: &[Value], items: &[ConversationItem]) -> anyhow::Result<AssistantReply> {
        Ok(crate::llm::GptClient::complete(self, function_definitions, items).await?)
    }
}

#[async_trait]
impl TextToSpeech for crate::tts::TtsClient {
    async fn synthesize(&self, text: &str) -> anyhow::Result<AudioStream> {
        let stream = crate::tts::TtsClient::synthesize(self, text).await?;
        Ok(Box::pin(stream.map(|r| r.map_err(anyhow::Error::from))))
    }
}

pub struct ConversationEngine {
    transcriber: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
    tools: ToolRegistry,
    assets_dir: String,
    watchdog: Duration,
}

impl ConversationEngine {
    pub fn new(
        transcriber: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        tools: ToolRegistry,
        assets_dir: impl Into<String>,
        watchdog: Duration,
    ) -> Self {
        Self { transcriber, llm, tts, tools, assets_dir: assets_dir.into(), watchdog }
    }

    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<Bytes>,
        outbound: mpsc::Sender<Bytes>,
        mut outbound_drained: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!("conversation started");

        let result = self
            .run_turns(&mut inbound, &outbound, &mut outbound_drained, &mut shutdown)
            .await;

        if let Err(e) = &result {
            warn!(error = %e, "exception during the conversation, playing error clip");
            let _ = crate::assets::play_error(&self.assets_dir, &outbound).await;
        }

        info!("conversation ended");
        Ok(())
    }

    async fn run_turns(
        &self,
        inbound: &mut mpsc::Receiver<Bytes>,
        outbound: &mpsc::Sender<Bytes>,
        outbound_drained: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut items: Vec<ConversationItem> = Vec::new();
        let mut silence = SilenceDetector::new();

        crate::assets::play_greeting(&self.assets_dir, outbound).await?;
        items.push(ConversationItem::assistant_text("Hallo. How can I help?"));
        wait_for_drain(outbound_drained).await;

        while !*shutdown.borrow() {
            let mut session = self.transcriber.start_session().await;

            let Some(()) = self.listen_for_silence(inbound, &mut session, &mut silence, shutdown).await else {
                session.discard();
                break;
            };

            debug!("silence detected");

            let response_arrived = Arc::new(AtomicBool::new(false));
            let watchdog_handle = spawn_watchdog(
                self.watchdog,
                self.assets_dir.clone(),
                outbound.clone(),
                response_arrived.clone(),
            );

            let transcript = session.finish().await.unwrap_or_default();
            if !transcript.is_empty() {
                info!(message = %transcript, "user message");
                items.push(ConversationItem::user(transcript));
            }

            let Some(agent_text) = self.resolve_agent_reply(&mut items, shutdown).await? else {
                break;
            };

            let mut stream = self.tts.synthesize(&agent_text).await?;
            let mut first_chunk = true;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if first_chunk {
                    response_arrived.store(true, Ordering::SeqCst);
                    first_chunk = false;
                }
                let encoded = codec::encode_buffer(&chunk);
                outbound.send(Bytes::from(encoded)).await?;
            }

            debug!("polly fully returned, waiting for audio out queue to be consumed");
            if watchdog_handle.await.unwrap_or(false) {
                items.push(ConversationItem::assistant_text("One second, bitte."));
            }
            wait_for_drain(outbound_drained).await;
            debug!("audio out queue empty");

            drain_pending(inbound);
            silence.reset_had_signal();
        }

        Ok(())
    }

    async fn listen_for_silence(
        &self,
        inbound: &mut mpsc::Receiver<Bytes>,
        session: &mut Box<dyn TranscriptionSession>,
        silence: &mut SilenceDetector,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<()> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            let frame = tokio::select! {
                frame = inbound.recv() => frame,
                _ = shutdown.changed() => continue,
            };

            let Some(frame) = frame else {
                return None;
            };

            let _ = session.send_frame(frame.clone()).await;
            if silence.add_frame_and_detect_silence(&frame) {
                return Some(());
            }
        }
    }

    /// Runs the GPT round-trip, dispatching any function calls the model
    /// makes, until a plain-text reply comes back. Returns `None` if the
    /// call was torn down mid-loop.
    async fn resolve_agent_reply(
        &self,
        items: &mut Vec<ConversationItem>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<Option<String>> {
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            let schemas = self.tools.exported_schemas();
            let reply = self.llm.complete(&schemas, items).await?;

            match reply {
                AssistantReply::Text(text) => {
                    info!(message = %text, "agent message");
                    items.push(ConversationItem::assistant_text(text.clone()));
                    return Ok(Some(text));
                }
                AssistantReply::FunctionCall { name, arguments } => {
                    info!(name = %name, arguments = %arguments, "function call");
                    items.push(ConversationItem {
                        role: "assistant".to_string(),
                        content: None,
                        function_call: Some(serde_json::json!({
                            "name": name,
                            "arguments": arguments.to_string(),
                        })),
                        name: None,
                    });

                    let result = self.tools.call(&name, arguments).await;
                    items.push(ConversationItem::function_result(name, result));
                }
            }
        }
    }
}

fn spawn_watchdog(
    watchdog: Duration,
    assets_dir: String,
    outbound: mpsc::Sender<Bytes>,
    response_arrived: Arc<AtomicBool>,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        tokio::time::sleep(watchdog).await;
        if response_arrived.load(Ordering::SeqCst) {
            return false;
        }

        info!(seconds = watchdog.as_secs_f64(), "waited too long to respond, playing wait clip");
        let _ = crate::assets::play_one_moment(&assets_dir, &outbound).await;
        true
    })
}

async fn wait_for_drain(drained: &mut watch::Receiver<bool>) {
    while !*drained.borrow() {
        if drained.changed().await.is_err() {
            break;
        }
    }
}

fn drain_pending(inbound: &mut mpsc::Receiver<Bytes>) {
    while inbound.try_recv().is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockSession {
        frames: Arc<Mutex<Vec<Bytes>>>,
        transcript: String,
    }

    #[async_trait]
    impl TranscriptionSession for MockSession {
        async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        async fn finish(self: Box<Self>) -> anyhow::Result<String> {
            Ok(self.transcript.clone())
        }

        fn discard(self: Box<Self>) {}
    }

    struct MockTranscriber {
        transcript: String,
    }

    #[async_trait]
    impl SpeechToText for MockTranscriber {
        async fn start_session(&self) -> Box<dyn TranscriptionSession> {
            Box::new(MockSession { frames: Arc::new(Mutex::new(Vec::new())), transcript: self.transcript.clone() })
        }
    }

    struct MockLlm {
        replies: Mutex<Vec<AssistantReply>>,
    }

    #[async_trait]
    impl LanguageModel for MockLlm {
        async fn complete(&self, _functions: &[Value], _items: &[ConversationItem]) -> anyhow::Result<AssistantReply> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                anyhow::bail!("no more mock replies queued");
            }
            Ok(replies.remove(0))
        }
    }

    struct MockTts;

    #[async_trait]
    impl TextToSpeech for MockTts {
        async fn synthesize(&self, _text: &str) -> anyhow::Result<AudioStream> {
            let chunk: anyhow::Result<Bytes> = Ok(Bytes::from_static(&[0u8, 0u8, 0u8, 0u8]));
            Ok(Box::pin(tokio_stream::once(chunk)))
        }
    }

    #[tokio::test]
    async fn test_resolve_agent_reply_dispatches_function_call_then_returns_text() {
        let mut tools = ToolRegistry::new();
        tools.register(crate::tools::ToolDescriptor::new(
            "test",
            "echo",
            "echo",
            serde_json::json!({"type": "object", "properties": {}}),
            Arc::new(|_| Box::pin(async { Ok("tool result".to_string()) })),
        ));

        let llm = Arc::new(MockLlm {
            replies: Mutex::new(vec![
                AssistantReply::FunctionCall { name: "test__echo".to_string(), arguments: serde_json::json!({}) },
                AssistantReply::Text("final answer".to_string()),
            ]),
        });

        let engine = ConversationEngine::new(
            Arc::new(MockTranscriber { transcript: String::new() }),
            llm,
            Arc::new(MockTts),
            tools,
            "/tmp",
            Duration::from_secs(4),
        );

        let mut items = Vec::new();
        let (_tx, mut rx) = watch::channel(false);
        let reply = engine.resolve_agent_reply(&mut items, &mut rx).await.unwrap();

        assert_eq!(reply, Some("final answer".to_string()));
        assert_eq!(items.len(), 3, "expected assistant-with-call, tool_result, assistant-text");
        assert_eq!(items[0].role, "assistant");
        assert!(items[0].function_call.is_some());
        assert_eq!(items[1].role, "function");
        assert_eq!(items[2].role, "assistant");
        assert_eq!(items[2].content.as_deref(), Some("final answer"));
    }

    struct RecordingTts {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TextToSpeech for RecordingTts {
        async fn synthesize(&self, text: &str) -> anyhow::Result<AudioStream> {
            self.calls.lock().unwrap().push(text.to_string());
            let chunk: anyhow::Result<Bytes> = Ok(Bytes::from_static(&[0u8, 0u8, 0u8, 0u8]));
            Ok(Box::pin(tokio_stream::once(chunk)))
        }
    }

    fn scratch_assets_dir(name: &str) -> String {
        let mut dir = std::env::temp_dir();
        dir.push(format!("rotary-voice-agent-conversation-test-{name}-{:x}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("greeting.pcm"), [0u8, 0u8, 0u8, 0u8]).unwrap();
        dir.to_str().unwrap().to_string()
    }

    /// One full S5 turn driven through `run_turns` end to end: a registered
    /// `weather__get_weather_today` tool, an LLM mock that first calls it
    /// with `{"location":"London","day":"2023-07-29"}` then replies
    /// "It'll rain.", and a recording TTS mock. Asserts exactly one TTS
    /// request is issued, with that exact text.
    #[tokio::test]
    async fn test_run_turns_speaks_function_call_result_via_tts() {
        let mut tools = ToolRegistry::new();
        tools.register(crate::tools::ToolDescriptor::new(
            "weather",
            "get_weather_today",
            "weather",
            serde_json::json!({"type": "object", "properties": {}}),
            Arc::new(|_| Box::pin(async { Ok("Rain expected.".to_string()) })),
        ));

        let llm = Arc::new(MockLlm {
            replies: Mutex::new(vec![
                AssistantReply::FunctionCall {
                    name: "weather__get_weather_today".to_string(),
                    arguments: serde_json::json!({"location": "London", "day": "2023-07-29"}),
                },
                AssistantReply::Text("It'll rain.".to_string()),
            ]),
        });

        let tts_calls = Arc::new(Mutex::new(Vec::new()));
        let tts = Arc::new(RecordingTts { calls: tts_calls.clone() });

        let engine = ConversationEngine::new(
            Arc::new(MockTranscriber { transcript: "what's the weather".to_string() }),
            llm,
            tts,
            tools,
            scratch_assets_dir("s5"),
            Duration::from_millis(5),
        );

        // Warmup + calibration on near-silence, then a talkspurt, then
        // enough trailing silence to trip the hysteresis — mirrors the
        // frame counts silence.rs's own tests use to drive a detection.
        let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
        let silence_frame = Bytes::from(vec![0xffu8; 160]);
        let loud_frame = Bytes::from(vec![0x00u8; 160]);
        for _ in 0..50 {
            inbound_tx.try_send(silence_frame.clone()).unwrap();
        }
        for _ in 0..50 {
            inbound_tx.try_send(loud_frame.clone()).unwrap();
        }
        for _ in 0..50 {
            inbound_tx.try_send(silence_frame.clone()).unwrap();
        }
        drop(inbound_tx);

        let (outbound_tx, _outbound_rx) = mpsc::channel(16);
        let (_drained_tx, mut drained_rx) = watch::channel(true);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        engine
            .run_turns(&mut inbound_rx, &outbound_tx, &mut drained_rx, &mut shutdown_rx)
            .await
            .unwrap();

        let calls = tts_calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "expected exactly one TTS request");
        assert_eq!(calls[0], "It'll rain.");
    }

    #[test]
    fn test_drain_pending_empties_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.try_send(Bytes::from_static(b"a")).unwrap();
        tx.try_send(Bytes::from_static(b"b")).unwrap();

        drain_pending(&mut rx);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_for_drain_returns_immediately_if_already_drained() {
        let (_tx, mut rx) = watch::channel(true);
        wait_for_drain(&mut rx).await;
    }
}
