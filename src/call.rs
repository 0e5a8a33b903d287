//! Wires one phone call together: binds the shared RTP socket, starts the
//! receive/send/conversation tasks, and tears them down on BYE. Grounded
//! on the `CallHandler` redesign noted for the original's SIP callback
//! list.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, warn};

use crate::conversation::{ConversationEngine, LanguageModel, SpeechToText, TextToSpeech};
use crate::rtp::{RtpReceiver, RtpSender};
use crate::sip::CallHandler;
use crate::tools::ToolRegistry;
use crate::udp::SharedUdpEndpoint;

const RECV_BUF_SIZE: usize = 262_144;
const CHANNEL_CAPACITY: usize = 256;

struct ActiveCall {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

pub struct Dispatcher {
    rtp: SharedUdpEndpoint,
    rtp_bind_addr: String,
    debug_wav_path: String,
    transcriber: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
    tools: ToolRegistry,
    assets_dir: String,
    watchdog: Duration,
    active_call: Mutex<Option<ActiveCall>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rtp_bind_addr: impl Into<String>,
        debug_wav_path: impl Into<String>,
        transcriber: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        tools: ToolRegistry,
        assets_dir: impl Into<String>,
        watchdog: Duration,
    ) -> Self {
        Self {
            rtp: SharedUdpEndpoint::new(),
            rtp_bind_addr: rtp_bind_addr.into(),
            debug_wav_path: debug_wav_path.into(),
            transcriber,
            llm,
            tts,
            tools,
            assets_dir: assets_dir.into(),
            watchdog,
            active_call: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CallHandler for Dispatcher {
    async fn on_incoming_call(&self, peer_addr: SocketAddr, peer_rtp_port: u16) {
        let socket = match self.rtp.bind(&self.rtp_bind_addr, RECV_BUF_SIZE).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(error = %e, "failed to bind RTP socket for incoming call");
                return;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (drained_tx, drained_rx) = watch::channel(true);

        let receiver = RtpReceiver::new(socket.clone());
        let peer = SocketAddr::new(peer_addr.ip(), peer_rtp_port);
        let sender = RtpSender::new(socket.clone(), peer, self.debug_wav_path.clone(), drained_tx);
        let engine = ConversationEngine::new(
            self.transcriber.clone(),
            self.llm.clone(),
            self.tts.clone(),
            self.tools.clone(),
            self.assets_dir.clone(),
            self.watchdog,
        );

        let mut handles = Vec::with_capacity(3);

        handles.push(tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move {
                if let Err(e) = receiver.run(inbound_tx, shutdown_rx).await {
                    error!(error = %e, "RTP receiver task failed");
                }
            }
        }));

        handles.push(tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move {
                if let Err(e) = sender.run(outbound_rx, shutdown_rx).await {
                    error!(error = %e, "RTP sender task failed");
                }
            }
        }));

        handles.push(tokio::spawn(async move {
            if let Err(e) = engine.run(inbound_rx, outbound_tx, drained_rx, shutdown_rx).await {
                error!(error = %e, "conversation task failed");
            }
        }));

        *self.active_call.lock().await = Some(ActiveCall { shutdown_tx, handles });
    }

    async fn on_call_ended(&self) {
        let call = self.active_call.lock().await.take();
        let Some(call) = call else {
            warn!("call ended with no active call tasks to tear down");
            return;
        };

        let _ = call.shutdown_tx.send(true);
        for handle in call.handles {
            let _ = handle.await;
        }

        self.rtp.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::AudioStream;
    use crate::llm::{AssistantReply, ConversationItem};
    use crate::stt::SttSession;
    use crate::tools::ToolRegistry;
    use serde_json::Value;

    struct NullTranscriber;

    #[async_trait]
    impl SpeechToText for NullTranscriber {
        async fn start_session(&self) -> Box<dyn crate::conversation::TranscriptionSession> {
            Box::new(SttSession::start(reqwest::Client::new(), "test-key".to_string()))
        }
    }

    struct NullLlm;

    #[async_trait]
    impl LanguageModel for NullLlm {
        async fn complete(&self, _functions: &[Value], _items: &[ConversationItem]) -> anyhow::Result<AssistantReply> {
            anyhow::bail!("unused in this test")
        }
    }

    struct NullTts;

    #[async_trait]
    impl TextToSpeech for NullTts {
        async fn synthesize(&self, _text: &str) -> anyhow::Result<AudioStream> {
            Ok(Box::pin(tokio_stream::empty()))
        }
    }

    fn make_dispatcher() -> Dispatcher {
        Dispatcher::new(
            "127.0.0.1:0",
            "/tmp/rotary-voice-agent-test.wav",
            Arc::new(NullTranscriber),
            Arc::new(NullLlm),
            Arc::new(NullTts),
            ToolRegistry::new(),
            "/tmp",
            Duration::from_secs(4),
        )
    }

    #[tokio::test]
    async fn test_call_ended_without_incoming_call_is_a_no_op() {
        let dispatcher = make_dispatcher();
        dispatcher.on_call_ended().await;
    }

    #[tokio::test]
    async fn test_incoming_call_then_ended_tears_down_tasks() {
        let dispatcher = make_dispatcher();
        dispatcher.on_incoming_call("127.0.0.1:5060".parse().unwrap(), 6000).await;
        assert!(dispatcher.active_call.lock().await.is_some());

        dispatcher.on_call_ended().await;
        assert!(dispatcher.active_call.lock().await.is_none());
    }
}
