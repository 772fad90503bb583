use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

use crate::error::PeerLinkError;
use crate::peer::types::SdpPayload;

// Ограничиваем размер распаковываемых данных до 256 KiB (защита от zip-bomb)
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

pub fn enc(p: &SdpPayload) -> Result<String, PeerLinkError> {
    // 1. JSON -> bytes
    let json = serde_json::to_vec(p).map_err(|e| PeerLinkError::Codec(e.to_string()))?;

    // 2. GZIP compress
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)
        .map_err(|e| PeerLinkError::Codec(e.to_string()))?;
    let compressed = gz.finish().map_err(|e| PeerLinkError::Codec(e.to_string()))?;

    // 3. base64
    Ok(general_purpose::STANDARD.encode(compressed))
}

pub fn dec(s: &str) -> Result<SdpPayload, PeerLinkError> {
    // 1. base64 -> bytes
    let compressed = general_purpose::STANDARD
        .decode(s)
        .map_err(|e| PeerLinkError::Codec(format!("base64: {e}")))?;

    // 2. gunzip с ограничением размера
    let gz = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    gz.take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut json)
        .map_err(|e| PeerLinkError::Codec(format!("gzip: {e}")))?;
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(PeerLinkError::Codec("payload exceeds 256 KiB".into()));
    }

    // 3. JSON -> struct
    serde_json::from_slice(&json).map_err(|e| PeerLinkError::Codec(format!("json: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    const SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn payload_survives_encoding() {
        let payload = SdpPayload {
            sdp: serde_json::from_value::<RTCSessionDescription>(
                serde_json::json!({ "type": "offer", "sdp": SDP }),
            )
            .unwrap(),
            id: "r1".into(),
            ts: 1_700_000_000,
        };
        let decoded = dec(&enc(&payload).unwrap()).unwrap();
        assert_eq!(decoded.id, "r1");
        assert_eq!(decoded.sdp.sdp, SDP);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(dec("not base64!!"), Err(PeerLinkError::Codec(_))));
        let not_gzip = general_purpose::STANDARD.encode(b"plain");
        assert!(matches!(dec(&not_gzip), Err(PeerLinkError::Codec(_))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let huge = vec![b' '; (MAX_DECOMPRESSED_SIZE as usize) + 16];
        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(&huge).unwrap();
        let encoded = general_purpose::STANDARD.encode(gz.finish().unwrap());
        assert!(matches!(dec(&encoded), Err(PeerLinkError::Codec(_))));
    }
}
