use thiserror::Error;

/// Non-real-time TCP frame used to fragment bulk/SysEx payloads:
/// `'M' 'N' seq(4) fragLen(2) fragBytes(fragLen)`, each
/// fragment ACKed with `'A' 'C' 'K' seq(4)`.
pub const DATA_MARKER: [u8; 2] = [b'M', b'N'];
pub const ACK_MARKER: [u8; 3] = [b'A', b'C', b'K'];
pub const MAX_FRAGMENT_LEN: usize = 1024;
const DATA_HEADER_LEN: usize = 2 + 4 + 2; // marker + seq + fragLen
const ACK_FRAME_LEN: usize = 3 + 4; // marker + seq

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NrtFrameError {
    #[error("fragment too long: {0} bytes (max {MAX_FRAGMENT_LEN})")]
    FragmentTooLong(usize),
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("bad marker: {0:?}")]
    BadMarker(Vec<u8>),
    #[error("declared fragLen {declared} exceeds available bytes {available}")]
    LengthMismatch { declared: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NrtFragment {
    pub sequence: u32,
    pub bytes: Vec<u8>,
}

impl NrtFragment {
    pub fn new(sequence: u32, bytes: Vec<u8>) -> Result<Self, NrtFrameError> {
        if bytes.len() > MAX_FRAGMENT_LEN {
            return Err(NrtFrameError::FragmentTooLong(bytes.len()));
        }
        Ok(Self { sequence, bytes })
    }

    /// Split `payload` into a sequence of fragments no larger than
    /// [`MAX_FRAGMENT_LEN`], with sequence numbers starting at
    /// `first_sequence` and incrementing by one per fragment.
    pub fn fragment(payload: &[u8], first_sequence: u32) -> Vec<Self> {
        if payload.is_empty() {
            return vec![Self { sequence: first_sequence, bytes: Vec::new() }];
        }
        payload
            .chunks(MAX_FRAGMENT_LEN)
            .enumerate()
            .map(|(i, chunk)| Self {
                sequence: first_sequence.wrapping_add(i as u32),
                bytes: chunk.to_vec(),
            })
            .collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DATA_HEADER_LEN + self.bytes.len());
        buf.extend_from_slice(&DATA_MARKER);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&(self.bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.bytes);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, NrtFrameError> {
        if data.len() < DATA_HEADER_LEN {
            return Err(NrtFrameError::Truncated(data.len()));
        }
        let marker = [data[0], data[1]];
        if marker != DATA_MARKER {
            return Err(NrtFrameError::BadMarker(marker.to_vec()));
        }
        let sequence = u32::from_be_bytes(data[2..6].try_into().unwrap());
        let frag_len = u16::from_be_bytes([data[6], data[7]]) as usize;
        let available = data.len() - DATA_HEADER_LEN;
        if frag_len > available {
            return Err(NrtFrameError::LengthMismatch { declared: frag_len, available });
        }
        if frag_len > MAX_FRAGMENT_LEN {
            return Err(NrtFrameError::FragmentTooLong(frag_len));
        }
        let bytes = data[DATA_HEADER_LEN..DATA_HEADER_LEN + frag_len].to_vec();
        Ok(Self { sequence, bytes })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrtAck {
    pub sequence: u32,
}

impl NrtAck {
    pub fn new(sequence: u32) -> Self {
        Self { sequence }
    }

    pub fn encode(&self) -> [u8; ACK_FRAME_LEN] {
        let mut buf = [0u8; ACK_FRAME_LEN];
        buf[..3].copy_from_slice(&ACK_MARKER);
        buf[3..].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, NrtFrameError> {
        if data.len() < ACK_FRAME_LEN {
            return Err(NrtFrameError::Truncated(data.len()));
        }
        if data[..3] != ACK_MARKER {
            return Err(NrtFrameError::BadMarker(data[..3].to_vec()));
        }
        let sequence = u32::from_be_bytes(data[3..7].try_into().unwrap());
        Ok(Self { sequence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_fragment() {
        let frag = NrtFragment::new(42, vec![1, 2, 3]).unwrap();
        let bytes = frag.encode();
        assert_eq!(NrtFragment::decode(&bytes).unwrap(), frag);
    }

    #[test]
    fn roundtrips_an_ack() {
        let ack = NrtAck::new(7);
        assert_eq!(NrtAck::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn fragments_payload_into_1kib_chunks() {
        let payload = vec![0xAAu8; MAX_FRAGMENT_LEN * 2 + 10];
        let frags = NrtFragment::fragment(&payload, 100);
        assert_eq!(frags.len(), 3);
        assert_eq!(frags[0].sequence, 100);
        assert_eq!(frags[1].sequence, 101);
        assert_eq!(frags[2].sequence, 102);
        assert_eq!(frags[0].bytes.len(), MAX_FRAGMENT_LEN);
        assert_eq!(frags[2].bytes.len(), 10);
    }

    #[test]
    fn rejects_fragment_over_1kib() {
        assert_eq!(
            NrtFragment::new(0, vec![0u8; MAX_FRAGMENT_LEN + 1]),
            Err(NrtFrameError::FragmentTooLong(MAX_FRAGMENT_LEN + 1))
        );
    }

    #[test]
    fn rejects_bad_ack_marker() {
        let mut bytes = NrtAck::new(1).encode();
        bytes[0] = b'X';
        assert!(matches!(NrtAck::decode(&bytes), Err(NrtFrameError::BadMarker(_))));
    }
}
