use thiserror::Error;

/// Real-time UDP frame used by the ring-buffer sender:
/// `'M' 'R' len(1) deviceId(2) timestampMicros(4) midiBytes(len)`.
/// Distinct from [`crate::packet::Packet`] — this is the fixed, allocation-
/// free wire shape fed directly from ring buffer slots, capped at 4 MIDI
/// bytes per record.
pub const MARKER: [u8; 2] = [b'M', b'R'];
pub const MAX_MIDI_LEN: usize = 4;
pub const FRAME_HEADER_LEN: usize = 2 + 1 + 2 + 4; // marker + len + deviceId + timestamp

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtFrameError {
    #[error("midi payload too long for rt frame: {0} bytes (max {MAX_MIDI_LEN})")]
    PayloadTooLong(usize),
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("bad marker: {0:?}")]
    BadMarker([u8; 2]),
    #[error("declared len {declared} exceeds available bytes {available}")]
    LengthMismatch { declared: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtFrame {
    pub device_id: u16,
    pub timestamp_micros: u32,
    pub midi: Vec<u8>,
}

impl RtFrame {
    pub fn new(device_id: u16, timestamp_micros: u32, midi: Vec<u8>) -> Result<Self, RtFrameError> {
        if midi.len() > MAX_MIDI_LEN {
            return Err(RtFrameError::PayloadTooLong(midi.len()));
        }
        Ok(Self { device_id, timestamp_micros, midi })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.midi.len());
        buf.extend_from_slice(&MARKER);
        buf.push(self.midi.len() as u8);
        buf.extend_from_slice(&self.device_id.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_micros.to_be_bytes());
        buf.extend_from_slice(&self.midi);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, RtFrameError> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(RtFrameError::Truncated(data.len()));
        }
        let marker = [data[0], data[1]];
        if marker != MARKER {
            return Err(RtFrameError::BadMarker(marker));
        }
        let len = data[2] as usize;
        let device_id = u16::from_be_bytes([data[3], data[4]]);
        let timestamp_micros = u32::from_be_bytes(data[5..9].try_into().unwrap());
        let available = data.len() - FRAME_HEADER_LEN;
        if len > available {
            return Err(RtFrameError::LengthMismatch { declared: len, available });
        }
        if len > MAX_MIDI_LEN {
            return Err(RtFrameError::PayloadTooLong(len));
        }
        let midi = data[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
        Ok(Self { device_id, timestamp_micros, midi })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_note_on() {
        let frame = RtFrame::new(7, 123456, vec![0x90, 0x40, 0x7F]).unwrap();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 3);
        assert_eq!(RtFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn rejects_payload_over_four_bytes() {
        assert_eq!(RtFrame::new(0, 0, vec![0; 5]), Err(RtFrameError::PayloadTooLong(5)));
    }

    #[test]
    fn rejects_bad_marker() {
        let mut bytes = RtFrame::new(1, 0, vec![0x80, 1, 2]).unwrap().encode();
        bytes[0] = b'X';
        assert_eq!(RtFrame::decode(&bytes), Err(RtFrameError::BadMarker([b'X', b'R'])));
    }

    #[test]
    fn rejects_truncated_frame() {
        assert_eq!(RtFrame::decode(&[b'M', b'R', 2]), Err(RtFrameError::Truncated(3)));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = RtFrame::new(1, 0, vec![0x80, 1, 2]).unwrap().encode();
        bytes[2] = 4; // claims 4 bytes of midi, only 3 present
        assert!(matches!(RtFrame::decode(&bytes), Err(RtFrameError::LengthMismatch { .. })));
    }
}
