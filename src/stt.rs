//! Whisper transcription client. Streams WAV frames to OpenAI as a
//! chunked multipart body, replacing the original's hand-rolled
//! chunked-transfer-encoding socket writer with `reqwest`'s streaming body.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::wav;

const TARGET_HOST: &str = "api.openai.com";
const BOUNDARY: &str = "112FEUERNOTRUF110";

#[derive(Debug, Error)]
pub enum SttError {
    #[error("request to {TARGET_HOST} failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transcription stream ended before a response was produced")]
    Discarded,
}

fn preamble() -> Bytes {
    let mut buf = Vec::new();
    buf.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\nwhisper-1\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"data.wav\"\r\n\r\n"
        )
        .as_bytes(),
    );
    buf.extend_from_slice(&wav::streaming_header());
    Bytes::from(buf)
}

fn closing_boundary() -> Bytes {
    Bytes::from(format!("\r\n--{BOUNDARY}--\r\n"))
}

/// A single in-flight transcription. Created with [`SttSession::start`],
/// fed μ-law frames with [`SttSession::send_frame`], and resolved with
/// either [`SttSession::finish`] or [`SttSession::discard`].
pub struct SttSession {
    frame_tx: Option<mpsc::Sender<Bytes>>,
    handle: JoinHandle<Result<String, SttError>>,
}

impl SttSession {
    pub fn start(client: reqwest::Client, api_key: String) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(32);
        frame_tx
            .try_send(preamble())
            .expect("fresh channel always has capacity for the preamble");

        let body = reqwest::Body::wrap_stream(
            ReceiverStream::new(frame_rx).map(Ok::<Bytes, std::convert::Infallible>),
        );

        let handle = tokio::spawn(async move {
            let response = client
                .post(format!("https://{TARGET_HOST}/v1/audio/transcriptions"))
                .bearer_auth(&api_key)
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(body)
                .send()
                .await?
                .error_for_status()?
                .json::<serde_json::Value>()
                .await?;

            Ok(response["text"].as_str().unwrap_or_default().to_string())
        });

        Self { frame_tx: Some(frame_tx), handle }
    }

    pub async fn send_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        if let Some(tx) = &self.frame_tx {
            tx.send(frame).await?;
        }
        Ok(())
    }

    pub async fn finish(mut self) -> Result<String, SttError> {
        if let Some(tx) = self.frame_tx.take() {
            let _ = tx.send(closing_boundary()).await;
        }
        self.handle.await.map_err(|_| SttError::Discarded)?
    }

    pub fn discard(mut self) {
        self.frame_tx.take();
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_contains_boundary_and_model() {
        let bytes = preamble();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("112FEUERNOTRUF110"));
        assert!(text.contains("whisper-1"));
        assert!(text.contains("data.wav"));
    }

    #[test]
    fn test_preamble_ends_with_wav_header() {
        let bytes = preamble();
        let header = wav::streaming_header();
        assert!(bytes.ends_with(&header));
    }

    #[test]
    fn test_closing_boundary_shape() {
        let bytes = closing_boundary();
        assert_eq!(&bytes[..], b"\r\n--112FEUERNOTRUF110--\r\n");
    }

    #[tokio::test]
    async fn test_discard_does_not_panic() {
        let session = SttSession::start(reqwest::Client::new(), "test-key".to_string());
        session.discard();
    }
}
