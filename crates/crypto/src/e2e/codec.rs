//! Codec-abhaengige Erkennung des unverschluesselten Frame-Praefixes
//!
//! Sender und Empfaenger muessen fuer denselben Frame exakt dieselbe
//! Praefix-Laenge berechnen, sonst stimmen AAD und Ciphertext-Grenze nicht
//! ueberein und jeder Frame schlaegt fehl.
//!
//! | Codec          | Praefix                                         |
//! |----------------|-------------------------------------------------|
//! | Audio (Opus)   | 1 Byte (TOC)                                    |
//! | VP8            | Keyframe 10, Delta 3                            |
//! | VP9            | 0                                               |
//! | H.264/unbekannt| erste Slice-NALU + 2, sonst VP8-Tabelle         |
//! | AV1            | Fehler                                          |

use crate::error::{CryptoError, CryptoResult};
use crate::types::{FrameKind, VideoCodec};

/// H.264 NAL Unit Typ (untere 5 Bit des NAL-Headers)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    SliceNonIdr,
    SlicePartitionA,
    SlicePartitionB,
    SlicePartitionC,
    SliceIdr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Andere(u8),
}

impl NaluType {
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NaluType::SliceNonIdr,
            2 => NaluType::SlicePartitionA,
            3 => NaluType::SlicePartitionB,
            4 => NaluType::SlicePartitionC,
            5 => NaluType::SliceIdr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::AccessUnitDelimiter,
            other => NaluType::Andere(other),
        }
    }

    /// Coded Slice (IDR oder Non-IDR)
    pub fn is_slice(&self) -> bool {
        matches!(self, NaluType::SliceIdr | NaluType::SliceNonIdr)
    }
}

/// Ergebnis der Praefix-Erkennung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub unencrypted_bytes: usize,
    /// H.264: Payload hinter dem Praefix wird RBSP-escaped
    pub requires_nalu_processing: bool,
}

impl FrameInfo {
    fn plain(unencrypted_bytes: usize) -> Self {
        Self {
            unencrypted_bytes,
            requires_nalu_processing: false,
        }
    }
}

/// Sucht Annex-B Startcodes (`00 00 01`) und liefert die Indizes der NAL-Header
///
/// Daten vor dem ersten Startcode (ausser Null-Bytes eines 4-Byte-Startcodes)
/// sind kein gueltiger Annex-B Bytestrom.
pub fn find_nalu_indices(stream: &[u8]) -> CryptoResult<Vec<usize>> {
    let mut result = Vec::new();
    let search_length = stream.len().saturating_sub(2);
    let mut start = 0;
    let mut pos = 0;

    while pos < search_length {
        while pos < search_length && !(stream[pos] == 0 && stream[pos + 1] == 0 && stream[pos + 2] == 1) {
            pos += 1;
        }
        if pos >= search_length {
            pos = stream.len();
        }

        let mut end = pos;
        while end > start && stream[end - 1] == 0 {
            end -= 1;
        }

        if start == 0 {
            if end != start {
                return Err(CryptoError::UngueltigerFrame(
                    "Bytestrom enthaelt Daten vor dem ersten Startcode".to_string(),
                ));
            }
        } else {
            result.push(start);
        }

        pos += 3;
        start = pos;
    }

    Ok(result)
}

/// Praefix aus der ersten Slice-NALU (`None` wenn keine vorhanden)
fn slice_prefix(data: &[u8]) -> CryptoResult<Option<usize>> {
    let indices = find_nalu_indices(data)?;
    Ok(indices
        .into_iter()
        .find(|&index| NaluType::from_byte(data[index]).is_slice())
        .map(|index| index + 2))
}

/// Berechnet das unverschluesselte Praefix eines Frames
///
/// `codec` ist der aufgeloeste Codec-Hinweis des Tracks. Ohne Hinweis wird
/// nach H.264 Slices gesucht und sonst die VP8-Tabelle verwendet.
pub fn unencrypted_prefix(
    data: &[u8],
    kind: FrameKind,
    codec: Option<VideoCodec>,
) -> CryptoResult<FrameInfo> {
    if !kind.is_video() {
        return Ok(FrameInfo::plain(FrameKind::Audio.unencrypted_bytes()));
    }

    match codec {
        Some(VideoCodec::Av1) => Err(CryptoError::NichtUnterstuetzterCodec(VideoCodec::Av1)),
        Some(VideoCodec::Vp8) => Ok(FrameInfo::plain(kind.unencrypted_bytes())),
        Some(VideoCodec::Vp9) => Ok(FrameInfo::plain(0)),
        Some(VideoCodec::H264) => {
            // Bekanntes H.264: RBSP-Verarbeitung auch wenn keine Slice gefunden wird
            let prefix = slice_prefix(data).ok().flatten();
            Ok(FrameInfo {
                unencrypted_bytes: prefix.unwrap_or_else(|| kind.unencrypted_bytes()),
                requires_nalu_processing: true,
            })
        }
        None => match slice_prefix(data) {
            Ok(Some(prefix)) => Ok(FrameInfo {
                unencrypted_bytes: prefix,
                requires_nalu_processing: true,
            }),
            _ => Ok(FrameInfo::plain(kind.unencrypted_bytes())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SPS + PPS + Slice mit 4-Byte-Startcode am Anfang
    fn h264_frame(slice_header: u8) -> Vec<u8> {
        let mut data = vec![0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x1f];
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80]);
        data.extend_from_slice(&[0x00, 0x00, 0x01, slice_header, 0x88, 0x84, 0x21, 0xa0]);
        data.extend(std::iter::repeat(0x5a).take(32));
        data
    }

    #[test]
    fn nalu_indizes() {
        let data = h264_frame(0x65);
        assert_eq!(find_nalu_indices(&data).unwrap(), vec![4, 11, 18]);
    }

    #[test]
    fn daten_vor_startcode_sind_fehler() {
        assert!(find_nalu_indices(&[0x42, 0x00, 0x00, 0x01, 0x65]).is_err());
        assert_eq!(find_nalu_indices(&[]).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn h264_idr_praefix() {
        let data = h264_frame(0x65);
        let info = unencrypted_prefix(&data, FrameKind::Key, Some(VideoCodec::H264)).unwrap();
        assert_eq!(info.unencrypted_bytes, 18 + 2);
        assert!(info.requires_nalu_processing);
    }

    #[test]
    fn h264_non_idr_ohne_hinweis() {
        let data = h264_frame(0x41);
        let info = unencrypted_prefix(&data, FrameKind::Delta, None).unwrap();
        assert_eq!(info.unencrypted_bytes, 18 + 2);
        assert!(info.requires_nalu_processing);
    }

    #[test]
    fn vp8_tabelle() {
        let data = vec![0x9d; 40];
        let key = unencrypted_prefix(&data, FrameKind::Key, Some(VideoCodec::Vp8)).unwrap();
        let delta = unencrypted_prefix(&data, FrameKind::Delta, None).unwrap();
        assert_eq!(key, FrameInfo::plain(10));
        assert_eq!(delta, FrameInfo::plain(3));
    }

    #[test]
    fn vp9_verschluesselt_alles() {
        let data = h264_frame(0x65);
        let info = unencrypted_prefix(&data, FrameKind::Key, Some(VideoCodec::Vp9)).unwrap();
        assert_eq!(info, FrameInfo::plain(0));
    }

    #[test]
    fn av1_ist_fehler() {
        let result = unencrypted_prefix(&[1, 2, 3], FrameKind::Key, Some(VideoCodec::Av1));
        assert!(matches!(
            result,
            Err(CryptoError::NichtUnterstuetzterCodec(VideoCodec::Av1))
        ));
    }

    #[test]
    fn audio_ignoriert_codec() {
        let info = unencrypted_prefix(&[0xfc; 20], FrameKind::Audio, Some(VideoCodec::Av1)).unwrap();
        assert_eq!(info, FrameInfo::plain(1));
    }

    #[test]
    fn h264_ohne_slice_faellt_auf_tabelle_zurueck() {
        let data = vec![0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x00, 0x01, 0x68, 0xce];
        let info = unencrypted_prefix(&data, FrameKind::Key, Some(VideoCodec::H264)).unwrap();
        assert_eq!(info.unencrypted_bytes, 10);
        assert!(info.requires_nalu_processing);
    }
}
