//! On-disk greeting/wait/error PCM clips, converted to μ-law and handed to
//! the RTP sender. Grounded on the original's `_play_pcm`.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::codec::linear_to_mu_law;

/// Reads a raw s16le PCM file, converts every sample to μ-law, and sends
/// the whole clip as a single frame to the outbound audio queue. The RTP
/// sender slices it into 160-byte packets as it drains the queue.
pub async fn play_clip(assets_dir: &str, file_name: &str, frame_tx: &mpsc::Sender<Bytes>) -> anyhow::Result<()> {
    let path = format!("{assets_dir}/{file_name}");
    let raw = tokio::fs::read(&path).await?;

    let mut converted = Vec::with_capacity(raw.len() / 2);
    for pair in raw.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        converted.push(linear_to_mu_law(sample));
    }

    frame_tx.send(Bytes::from(converted)).await?;
    Ok(())
}

pub async fn play_greeting(assets_dir: &str, frame_tx: &mpsc::Sender<Bytes>) -> anyhow::Result<()> {
    play_clip(assets_dir, "greeting.pcm", frame_tx).await
}

pub async fn play_one_moment(assets_dir: &str, frame_tx: &mpsc::Sender<Bytes>) -> anyhow::Result<()> {
    play_clip(assets_dir, "one-second.pcm", frame_tx).await
}

pub async fn play_error(assets_dir: &str, frame_tx: &mpsc::Sender<Bytes>) -> anyhow::Result<()> {
    play_clip(assets_dir, "error-message.pcm", frame_tx).await
}
