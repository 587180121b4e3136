//! MPEG audio duration from a byte prefix.
//!
//! Remote tracks can only be range-probed, so everything here works from the
//! first few hundred KiB of a file plus its total size. We never decode audio:
//! the first frame header gives bitrate and sample rate, and a Xing/Info/VBRI
//! summary (when present) gives the exact frame count.

use crate::error::ProbeError;

/// How far past the ID3v2 tag we look for the first frame sync.
pub const SCAN_WINDOW: usize = 256_000;

pub const MIN_DURATION_SECS: f64 = 5.0;
pub const MAX_DURATION_SECS: f64 = 6.0 * 60.0 * 60.0;

/// Substituted whenever a probe fails.
pub const DEFAULT_DURATION_SECS: f64 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    I,
    II,
    III,
}

// Bitrate tables in kbps, indexed by the 4-bit bitrate field.
const BITRATE_V1_L1: [u32; 16] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0];
const BITRATE_V1_L2: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0];
const BITRATE_V1_L3: [u32; 16] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0];
const BITRATE_V2_L1: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0];
const BITRATE_V2_L23: [u32; 16] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0];

/// A decoded 4-byte MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    /// A 16-bit CRC follows the header.
    pub crc: bool,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub mono: bool,
}

impl FrameHeader {
    pub fn parse(h: [u8; 4]) -> Result<Self, ProbeError> {
        let ver_bits = (h[1] >> 3) & 0x03;
        let layer_bits = (h[1] >> 1) & 0x03;

        let version = match ver_bits {
            0b11 => MpegVersion::V1,
            0b10 => MpegVersion::V2,
            0b00 => MpegVersion::V25,
            other => return Err(ProbeError::UnsupportedVersion(other)),
        };
        let layer = match layer_bits {
            0b11 => Layer::I,
            0b10 => Layer::II,
            0b01 => Layer::III,
            other => return Err(ProbeError::UnsupportedLayer(other)),
        };

        let sample_rate = match (version, (h[2] >> 2) & 0x03) {
            (_, 3) => 0,
            (MpegVersion::V1, i) => [44_100, 48_000, 32_000][i as usize],
            (MpegVersion::V2, i) => [22_050, 24_000, 16_000][i as usize],
            (MpegVersion::V25, i) => [11_025, 12_000, 8_000][i as usize],
        };
        if sample_rate == 0 {
            return Err(ProbeError::ZeroSampleRate);
        }

        let table = match (version, layer) {
            (MpegVersion::V1, Layer::I) => &BITRATE_V1_L1,
            (MpegVersion::V1, Layer::II) => &BITRATE_V1_L2,
            (MpegVersion::V1, Layer::III) => &BITRATE_V1_L3,
            (_, Layer::I) => &BITRATE_V2_L1,
            (_, _) => &BITRATE_V2_L23,
        };
        let bitrate_kbps = table[((h[2] >> 4) & 0x0F) as usize];
        if bitrate_kbps == 0 {
            return Err(ProbeError::ZeroBitrate);
        }

        Ok(Self {
            version,
            layer,
            crc: h[1] & 0x01 == 0,
            bitrate_kbps,
            sample_rate,
            padding: (h[2] >> 1) & 0x01 == 1,
            mono: (h[3] >> 6) & 0x03 == 0x03,
        })
    }

    pub fn bitrate_bps(&self) -> u32 {
        self.bitrate_kbps * 1000
    }

    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (Layer::I, _) => 384,
            (Layer::II, _) => 1152,
            (Layer::III, MpegVersion::V1) => 1152,
            (Layer::III, _) => 576,
        }
    }

    /// Length of the Layer III side-information block.
    pub fn side_info_len(&self) -> usize {
        match (self.version, self.mono) {
            (MpegVersion::V1, true) => 17,
            (MpegVersion::V1, false) => 32,
            (_, true) => 9,
            (_, false) => 17,
        }
    }

    /// Frame length in bytes including the header.
    pub fn frame_len(&self) -> usize {
        let br = self.bitrate_bps() as u64;
        let sr = self.sample_rate as u64;
        let pad = self.padding as u64;
        let len = match (self.layer, self.version) {
            (Layer::I, _) => (12 * br / sr + pad) * 4,
            (Layer::III, MpegVersion::V2 | MpegVersion::V25) => 72 * br / sr + pad,
            _ => 144 * br / sr + pad,
        };
        len as usize
    }
}

fn synchsafe(b: &[u8]) -> usize {
    b.iter().fold(0usize, |acc, &x| (acc << 7) | (x & 0x7F) as usize)
}

/// Offset of the first byte after an ID3v2 tag, or 0 when there is none.
fn skip_id3v2(data: &[u8]) -> Result<usize, ProbeError> {
    if data.len() < 10 || &data[0..3] != b"ID3" {
        return Ok(0);
    }
    let mut end = 10 + synchsafe(&data[6..10]);
    // Footer present.
    if data[5] & 0x10 != 0 {
        end += 10;
    }
    if end > data.len() {
        return Err(ProbeError::TagTruncated(end));
    }
    Ok(end)
}

/// A sync candidate must not carry any reserved field value.
fn plausible_header(data: &[u8], p: usize) -> bool {
    if data[p] != 0xFF || data[p + 1] & 0xE0 != 0xE0 {
        return false;
    }
    let ver_bits = (data[p + 1] >> 3) & 0x03;
    let layer_bits = (data[p + 1] >> 1) & 0x03;
    let bitrate_idx = (data[p + 2] >> 4) & 0x0F;
    let sr_idx = (data[p + 2] >> 2) & 0x03;
    ver_bits != 0b01 && layer_bits != 0b00 && bitrate_idx != 0x0F && sr_idx != 0x03
}

fn find_sync(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 4 {
        return None;
    }
    let last = data.len() - 4;
    let limit = last.min(from.saturating_add(SCAN_WINDOW));
    (from..=limit).find(|&p| p <= last && plausible_header(data, p))
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Frame count from a Xing/Info or VBRI summary in the first frame.
fn vbr_frame_count(data: &[u8], pos: usize, header: &FrameHeader) -> Option<u32> {
    if header.layer != Layer::III {
        return None;
    }
    let n = data.len();
    let crc_len = if header.crc { 2 } else { 0 };

    let xing = pos + 4 + crc_len + header.side_info_len();
    if xing + 16 <= n && matches!(&data[xing..xing + 4], b"Xing" | b"Info") {
        let flags = be_u32(&data[xing + 4..xing + 8]);
        let off = xing + 8;
        if flags & 0x01 != 0 && off + 4 <= n {
            let frames = be_u32(&data[off..off + 4]);
            if frames > 0 {
                return Some(frames);
            }
        }
    }

    let vbri = pos + 4 + crc_len + 32;
    if vbri + 26 <= n && &data[vbri..vbri + 4] == b"VBRI" {
        let frames = be_u32(&data[vbri + 14..vbri + 18]);
        if frames > 0 {
            return Some(frames);
        }
    }

    None
}

/// Duration in seconds from a file prefix and the total file size.
///
/// `total_size` of 0 means unknown; the prefix length stands in for it, which
/// is exact for VBR files and a lower bound otherwise.
pub fn parse_prefix(prefix: &[u8], total_size: u64) -> Result<f64, ProbeError> {
    if prefix.is_empty() {
        return Err(ProbeError::Empty);
    }
    let total = if total_size > 0 { total_size } else { prefix.len() as u64 };

    let start = skip_id3v2(prefix)?;
    let pos = find_sync(prefix, start).ok_or(ProbeError::NoSync)?;
    let header = FrameHeader::parse([prefix[pos], prefix[pos + 1], prefix[pos + 2], prefix[pos + 3]])?;
    if header.frame_len() == 0 {
        return Err(ProbeError::ZeroBitrate);
    }

    if let Some(frames) = vbr_frame_count(prefix, pos, &header) {
        return Ok(frames as f64 * header.samples_per_frame() as f64 / header.sample_rate as f64);
    }

    let audio_bytes = total.saturating_sub(pos as u64);
    if audio_bytes == 0 {
        return Err(ProbeError::NoAudio);
    }
    Ok(audio_bytes as f64 * 8.0 / header.bitrate_bps() as f64)
}

/// Best-effort duration; any structural anomaly yields `0.0`.
pub fn probe(prefix: &[u8], total_size: u64) -> f64 {
    parse_prefix(prefix, total_size).unwrap_or(0.0)
}

/// Clamp to `[5, 21600]` seconds. Non-finite and non-positive inputs map to
/// `0.0` ("unknown") instead of the lower bound.
pub fn clamp_duration(d: f64) -> f64 {
    if !d.is_finite() || d <= 0.0 {
        return 0.0;
    }
    d.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS)
}

/// Clamp, then replace "unknown" with the default duration.
pub fn resolve_duration(d: f64) -> f64 {
    match clamp_duration(d) {
        x if x > 0.0 => x,
        _ => DEFAULT_DURATION_SECS,
    }
}
