//! Streaming-friendly RIFF/WAVE header for a PCMU (G.711 μ-law) payload of
//! unknown/unbounded length, per <https://docs.fileformat.com/audio/wav/>.

const SAMPLE_RATE: u32 = 8000;
const BITS_PER_SAMPLE: u16 = 8;
const CHANNELS: u16 = 1;
/// WAVE_FORMAT_MULAW, per the Microsoft wFormatTag registry.
const FORMAT_TAG_PCMU: u16 = 0x0007;
/// Marks an unknown/streaming chunk size — written into both the RIFF size
/// and the `data` sub-chunk size fields.
const UNKNOWN_SIZE: u32 = 0xffff_ffff;

/// Build the fixed 44-byte header a streaming PCMU upload is prefixed with.
///
/// Both the RIFF chunk size and the `data` sub-chunk size are written as
/// `0xFFFFFFFF`, signalling "unknown length, keep reading" to a tolerant
/// parser — the header is emitted before any audio has been captured.
pub fn streaming_header() -> [u8; 44] {
    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&UNKNOWN_SIZE.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_TAG_PCMU.to_le_bytes());
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
    let byte_rate = SAMPLE_RATE * (BITS_PER_SAMPLE as u32) * (CHANNELS as u32) / 8;
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    let block_align = BITS_PER_SAMPLE * CHANNELS / 8;
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&UNKNOWN_SIZE.to_le_bytes());
    header
}
