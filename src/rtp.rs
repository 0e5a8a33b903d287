//! RTP media transport: a fixed-rate receiver/sender pair sharing one UDP
//! socket, carrying 20 ms G.711 μ-law frames per RFC 3550 §5.1.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// 20 ms of 8 kHz 8-bit PCMU audio.
pub const FRAME_BYTES: usize = 160;
const RTP_HEADER_BYTES: usize = 12;
const RECV_POLL: Duration = Duration::from_millis(200);
const FRAME_PERIOD: Duration = Duration::from_millis(20);
/// A gap longer than this between sent chunks starts a new talkspurt.
const TALKSPURT_GAP: Duration = Duration::from_secs(1);

/// Receives RTP packets on the shared socket, strips the 12-byte header,
/// and forwards the raw PCMU payload.
pub struct RtpReceiver {
    socket: Arc<UdpSocket>,
}

impl RtpReceiver {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    pub async fn run(self, frame_tx: mpsc::Sender<Bytes>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let local = self.socket.local_addr()?;
        info!(addr = %local, "RTP receiver started");

        let mut buf = [0u8; FRAME_BYTES + RTP_HEADER_BYTES];
        loop {
            if *shutdown.borrow() {
                break;
            }

            let recv = tokio::time::timeout(RECV_POLL, self.socket.recv_from(&mut buf));
            let (len, _src) = match recv.await {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    warn!(error = %e, "RTP receive error");
                    continue;
                }
                Err(_) => continue, // poll timeout, re-check shutdown
            };

            if len <= RTP_HEADER_BYTES {
                continue;
            }

            let payload = Bytes::copy_from_slice(&buf[RTP_HEADER_BYTES..len]);
            if frame_tx.try_send(payload).is_err() {
                debug!("RTP inbound frame dropped, downstream not keeping up");
            }
        }

        info!("RTP receiver stopped");
        Ok(())
    }
}

/// Sends buffered PCMU audio as RTP packets at a strict 20 ms cadence,
/// recording every transmitted frame to a debug WAV file.
pub struct RtpSender {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    debug_wav_path: String,
    drained: watch::Sender<bool>,
}

impl RtpSender {
    /// `drained` is flipped to `true` whenever the outbound buffer empties
    /// below a frame's worth of audio, and back to `false` as soon as more
    /// arrives — the conversation loop awaits it to know playback finished
    /// before it starts listening again.
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, debug_wav_path: String, drained: watch::Sender<bool>) -> Self {
        Self { socket, peer, debug_wav_path, drained }
    }

    pub async fn run(
        self,
        mut frame_rx: mpsc::Receiver<Bytes>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(peer = %self.peer, "RTP sender started");

        let mut debug_wav = std::fs::File::create(&self.debug_wav_path).ok();
        if let Some(f) = debug_wav.as_mut() {
            let _ = f.write_all(&crate::wav::streaming_header());
        }

        let mut rng = rand::rngs::SmallRng::from_entropy();
        let mut sequence_number: u16 = rng.gen();
        let mut timestamp: u32 = rng.gen();
        let ssrc: u32 = rng.gen();

        let mut pending: Vec<u8> = Vec::new();
        let mut talkspurt_start: Option<Instant> = None;
        let mut marker_bit = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match frame_rx.try_recv() {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    let _ = self.drained.send_if_modified(|v| if *v { *v = false; true } else { false });
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    if pending.len() < FRAME_BYTES {
                        let _ = self.drained.send_if_modified(|v| if !*v { *v = true; true } else { false });
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }

            let new_talkspurt = match talkspurt_start {
                None => true,
                Some(t) => t.elapsed() > TALKSPURT_GAP,
            };
            if new_talkspurt {
                debug!("new talkspurt, marker bit set");
                talkspurt_start = Some(Instant::now());
                marker_bit = true;
            }

            while pending.len() >= FRAME_BYTES {
                let header = build_rtp_header(marker_bit, sequence_number, timestamp, ssrc);
                let frame = &pending[..FRAME_BYTES];

                let mut packet = Vec::with_capacity(RTP_HEADER_BYTES + FRAME_BYTES);
                packet.extend_from_slice(&header);
                packet.extend_from_slice(frame);
                if let Err(e) = self.socket.send_to(&packet, self.peer).await {
                    warn!(error = %e, "RTP send error");
                }

                if let Some(f) = debug_wav.as_mut() {
                    let _ = f.write_all(frame);
                }

                let start = talkspurt_start.expect("set above");
                let elapsed = start.elapsed().as_secs_f64();
                let sleep_secs = FRAME_PERIOD.as_secs_f64() - elapsed;

                pending.drain(0..FRAME_BYTES);
                sequence_number = sequence_number.wrapping_add(1);
                timestamp = timestamp.wrapping_add(FRAME_BYTES as u32);
                marker_bit = false;

                accurate_sleep(Duration::from_secs_f64(sleep_secs.max(0.0)));
                let deficit = sleep_secs.min(0.0);
                talkspurt_start = Some(Instant::now() - Duration::from_secs_f64(-deficit));
            }
        }

        info!("RTP sender stopped");
        Ok(())
    }
}

/// Build a 12-byte RTP header per RFC 3550 §5.1: V=2, P=0, X=0, CC=0,
/// payload type 0 (PCMU), with the marker bit set on talkspurt start.
fn build_rtp_header(marker_bit: bool, seq: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_BYTES] {
    let mut header = [0u8; RTP_HEADER_BYTES];
    header[0] = 0x80;
    header[1] = if marker_bit { 0x80 } else { 0x00 };
    header[2..4].copy_from_slice(&seq.to_be_bytes());
    header[4..8].copy_from_slice(&timestamp.to_be_bytes());
    header[8..12].copy_from_slice(&ssrc.to_be_bytes());
    header
}

/// Busy-wait until `duration` has elapsed, for sub-millisecond pacing
/// accuracy that `tokio::time::sleep` cannot guarantee.
fn accurate_sleep(duration: Duration) {
    let end = Instant::now() + duration;
    while Instant::now() < end {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_12_bytes_with_version_2() {
        let h = build_rtp_header(true, 0, 0, 0);
        assert_eq!(h.len(), 12);
        assert_eq!(h[0], 0x80);
    }

    #[test]
    fn test_marker_bit_set_on_talkspurt_start() {
        let h = build_rtp_header(true, 1, 160, 0xdead_beef);
        assert_eq!(h[1], 0x80);
    }

    #[test]
    fn test_marker_bit_clear_mid_talkspurt() {
        let h = build_rtp_header(false, 1, 160, 0xdead_beef);
        assert_eq!(h[1], 0x00);
    }

    #[test]
    fn test_payload_type_is_zero() {
        let h = build_rtp_header(false, 5, 800, 1);
        assert_eq!(h[1] & 0x7f, 0);
    }

    #[test]
    fn test_sequence_and_timestamp_encoded_big_endian() {
        let h = build_rtp_header(false, 0x0102, 0x0304_0506, 0x0708_090a);
        assert_eq!(&h[2..4], &[0x01, 0x02]);
        assert_eq!(&h[4..8], &[0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&h[8..12], &[0x07, 0x08, 0x09, 0x0a]);
    }

    #[test]
    fn test_sequence_wraps_monotonically() {
        let mut seq: u16 = u16::MAX - 1;
        seq = seq.wrapping_add(1);
        assert_eq!(seq, u16::MAX);
        seq = seq.wrapping_add(1);
        assert_eq!(seq, 0);
    }

    #[test]
    fn test_accurate_sleep_does_not_undersleep() {
        let target = Duration::from_millis(5);
        let start = Instant::now();
        accurate_sleep(target);
        assert!(start.elapsed() >= target);
    }
}
