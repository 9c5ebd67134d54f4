//! H.264 RBSP Emulation Prevention
//!
//! Im verschluesselten Bereich eines H.264 Frames duerfen keine Startcodes
//! (`00 00 01`) entstehen. Nach zwei Null-Bytes wird deshalb vor jedem Byte
//! `<= 0x03` ein `0x03` eingefuegt und beim Empfang wieder entfernt.

const EMULATION_PREVENTION_BYTE: u8 = 0x03;

/// Fuegt Emulation-Prevention-Bytes ein
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 4);
    let mut zeros = 0usize;

    for &byte in data {
        if zeros >= 2 && byte <= EMULATION_PREVENTION_BYTE {
            out.push(EMULATION_PREVENTION_BYTE);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }

    out
}

/// Entfernt Emulation-Prevention-Bytes (`00 00 03` wird zu `00 00`)
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if data.len() - i >= 3
            && data[i] == 0
            && data[i + 1] == 0
            && data[i + 2] == EMULATION_PREVENTION_BYTE
        {
            out.extend_from_slice(&data[i..i + 2]);
            i += 3;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }

    out
}

/// Enthaelt der Puffer mindestens eine `00 00 03` Sequenz?
pub fn needs_unescaping(data: &[u8]) -> bool {
    data.windows(3)
        .any(|w| w[0] == 0 && w[1] == 0 && w[2] == EMULATION_PREVENTION_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_verhindert_startcodes() {
        let escaped = escape(&[0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(escaped, vec![0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]);
        assert!(!escaped.windows(3).any(|w| w == [0, 0, 1]));
    }

    #[test]
    fn hohe_bytes_bleiben_unveraendert() {
        let data = [0x00, 0x00, 0x04, 0xff, 0x00, 0x00, 0x80];
        assert_eq!(escape(&data), data.to_vec());
        assert!(!needs_unescaping(&data));
    }

    #[test]
    fn unescape_kehrt_escape_um() {
        let samples: [&[u8]; 4] = [
            &[],
            &[0x00, 0x00, 0x00, 0x00, 0x00],
            &[0x00, 0x00, 0x03, 0x00, 0x00, 0x02, 0x11],
            &[0x42, 0x00, 0x00, 0x01, 0x00, 0x00, 0x03],
        ];
        for sample in samples {
            let escaped = escape(sample);
            assert_eq!(unescape(&escaped), sample.to_vec(), "Sample {sample:02x?}");
        }
    }

    #[test]
    fn needs_unescaping_erkennt_sequenz() {
        assert!(needs_unescaping(&[0x11, 0x00, 0x00, 0x03, 0x01]));
        assert!(!needs_unescaping(&[0x00, 0x00]));
    }
}
