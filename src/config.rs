use clap::Parser;

/// A phone agent living in an old rotary phone: answers SIP calls, listens
/// for silence, transcribes with Whisper, thinks with GPT, and speaks back
/// with Polly.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// SIP listen address
    #[arg(long, default_value = "0.0.0.0:5060")]
    pub sip_addr: String,

    /// RTP listen address (shared between the receiver and sender)
    #[arg(long, default_value = "0.0.0.0:5004")]
    pub rtp_addr: String,

    /// OpenAI API key, used for both Whisper and GPT requests
    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    pub openai_api_key: String,

    /// AWS access key id, used to sign Polly requests
    #[arg(long, env = "AWS_ACCESS_KEY", default_value = "")]
    pub aws_access_key: String,

    /// AWS secret access key, used to sign Polly requests
    #[arg(long, env = "AWS_SECRET_KEY", default_value = "")]
    pub aws_secret_key: String,

    /// Free-text location announced to the LLM and used for weather lookups
    #[arg(long, env = "ROTARYGPT_PHYSICAL_LOCATION", default_value = "Barcelona")]
    pub physical_location: String,

    /// Seconds to wait for an agent response before playing a "one moment" clip
    #[arg(long, default_value_t = 4.0)]
    pub watchdog_secs: f64,

    /// Directory holding the greeting/wait/error PCM clips
    #[arg(long, default_value = "./audio")]
    pub assets_dir: String,

    /// Path to write the outbound call audio as a debug WAV file
    #[arg(long, default_value = "/tmp/conversation.wav")]
    pub debug_wav_path: String,
}

impl Config {
    pub fn watchdog(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.watchdog_secs.max(0.0))
    }
}
