mod accent;
mod assets;
mod call;
mod codec;
mod config;
mod conversation;
mod llm;
mod rtp;
mod sigv4;
mod silence;
mod sip;
mod stt;
mod tools;
mod tts;
mod udp;
mod voice;
mod wav;
mod weather;

use std::sync::Arc;

use clap::Parser;
use config::Config;
use tokio::sync::watch;
use tracing::info;

use call::Dispatcher;
use conversation::WhisperTranscriber;
use sip::SIPServer;
use tools::ToolRegistry;
use voice::VoiceState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber
        ::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter
                ::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let config = Config::parse();

    info!(
        sip = %config.sip_addr,
        rtp = %config.rtp_addr,
        location = %config.physical_location,
        "rotary-voice-agent starting"
    );

    let http_client = reqwest::Client::new();
    let voice = VoiceState::default();

    let mut tools = ToolRegistry::new();
    tools.register(weather::descriptor(http_client.clone()));
    tools.register(accent::descriptor(voice.clone()));

    let transcriber = Arc::new(WhisperTranscriber {
        client: http_client.clone(),
        api_key: config.openai_api_key.clone(),
    });
    let llm = Arc::new(llm::GptClient::new(
        http_client.clone(),
        config.openai_api_key.clone(),
        config.physical_location.clone(),
    ));
    let tts = Arc::new(tts::TtsClient::new(
        http_client.clone(),
        config.aws_access_key.clone(),
        config.aws_secret_key.clone(),
        voice.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        config.rtp_addr.clone(),
        config.debug_wav_path.clone(),
        transcriber,
        llm,
        tts,
        tools,
        config.assets_dir.clone(),
        config.watchdog(),
    ));

    let sip_server = Arc::new(SIPServer::bind(&config.sip_addr).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sip_handle = {
        let sip_server = sip_server.clone();
        tokio::spawn(async move { sip_server.run(dispatcher, shutdown_rx).await })
    };

    info!("ready — listening for SIP calls");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    sip_handle.await??;

    Ok(())
}
