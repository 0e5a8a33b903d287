//! Polly text-to-speech client. Streams raw s16le PCM @ 8kHz back to the
//! caller chunk by chunk, replacing the original's hand-rolled
//! chunked-transfer-encoding reader with `reqwest`'s response body stream.

use bytes::Bytes;
use chrono::Utc;
use futures_util::Stream;
use thiserror::Error;

use crate::sigv4;
use crate::voice::VoiceState;

const TARGET_HOST: &str = "polly.eu-west-1.amazonaws.com";

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("request to {TARGET_HOST} failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub struct TtsClient {
    client: reqwest::Client,
    access_key: String,
    secret_key: String,
    voice: VoiceState,
}

impl TtsClient {
    pub fn new(client: reqwest::Client, access_key: impl Into<String>, secret_key: impl Into<String>, voice: VoiceState) -> Self {
        Self { client, access_key: access_key.into(), secret_key: secret_key.into(), voice }
    }

    /// Starts a speech synthesis request and returns a stream of raw PCM
    /// chunks as they arrive from Polly. The voice in effect at the moment
    /// this is called is used for the whole utterance, even if the
    /// `accent` tool changes it mid-stream.
    pub async fn synthesize(&self, text: &str) -> Result<impl Stream<Item = reqwest::Result<Bytes>>, TtsError> {
        let voice_id = self.voice.get().await;
        let body = serde_json::to_vec(&serde_json::json!({
            "VoiceId": voice_id,
            "OutputFormat": "pcm",
            "SampleRate": "8000",
            "Engine": "neural",
            "Text": text,
        }))
        .expect("request body always serializes");

        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let signed = sigv4::sign_polly_request(TARGET_HOST, &self.access_key, &self.secret_key, &body, &amz_date);

        let response = self
            .client
            .post(format!("https://{TARGET_HOST}/v1/speech"))
            .header("Content-Type", "application/json")
            .header("X-Amz-Date", &signed.amz_date)
            .header("Authorization", &signed.authorization)
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes_stream())
    }
}
