//! Text/binary classification for virtual WebSocket payloads.

use crate::msg::WsDataType;

/// How many leading bytes the heuristic inspects.
const SNIFF_LEN: usize = 1024;

/// Classify an outgoing payload: a NUL byte or any byte in `0x80..=0x9F`
/// within the first kilobyte marks it binary (base64 on the wire);
/// everything else travels as text. Non-UTF-8 data is binary regardless.
pub fn classify(data: &[u8]) -> WsDataType {
    let prefix = &data[..data.len().min(SNIFF_LEN)];
    let looks_binary = prefix
        .iter()
        .any(|byte| *byte == 0 || (0x80..=0x9F).contains(byte));
    if looks_binary || std::str::from_utf8(data).is_err() {
        WsDataType::ArrayBuffer
    } else {
        WsDataType::String
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_plain_text_is_string() {
        assert_eq!(classify(b"hello world"), WsDataType::String);
        assert_eq!(classify(b""), WsDataType::String);
        assert_eq!(classify("snowman \u{2603}".as_bytes()), WsDataType::String);
    }

    #[test]
    fn test_nul_byte_is_binary() {
        assert_eq!(classify(b"abc\0def"), WsDataType::ArrayBuffer);
    }

    #[test]
    fn test_control_range_is_binary() {
        assert_eq!(classify(&[b'a', 0x80, b'b']), WsDataType::ArrayBuffer);
        assert_eq!(classify(&[0x9F]), WsDataType::ArrayBuffer);
    }

    #[test]
    fn test_marker_beyond_prefix_is_text() {
        // the heuristic only sniffs the first kilobyte
        let mut data = vec![b'a'; 2048];
        data[1500] = 0;
        // ... but a NUL is still valid UTF-8, so this stays text
        assert_eq!(classify(&data), WsDataType::String);
    }

    #[test]
    fn test_invalid_utf8_is_binary_even_past_prefix() {
        let mut data = vec![b'a'; 2048];
        data[1500] = 0xFF;
        assert_eq!(classify(&data), WsDataType::ArrayBuffer);
    }
}
