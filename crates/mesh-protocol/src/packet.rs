use thiserror::Error;

use crate::context::ForwardingContext;
use crate::device_key::DeviceKey;
use crate::node_id::NodeId;

pub const MAGIC: u16 = 0x4D49; // "MI"
pub const VERSION: u8 = 0x01;
pub const HEADER_SIZE: usize = 20;

pub const FLAG_SYSEX: u8 = 1 << 0;
pub const FLAG_RELIABLE: u8 = 1 << 1;
pub const FLAG_FRAGMENT: u8 = 1 << 2;
pub const FLAG_HAS_CONTEXT: u8 = 1 << 3;
/// Not part of the documented header layout but needed to let Data,
/// Heartbeat, Ack, and Nack share one wire header: when set, bits 5-6 hold
/// a [`PacketKind`] discriminator instead of being part of the reserved
/// range. See DESIGN.md "packet kind discriminator".
const FLAG_CONTROL: u8 = 1 << 4;
const CONTROL_KIND_SHIFT: u8 = 5;
const CONTROL_KIND_MASK: u8 = 0b11 << CONTROL_KIND_SHIFT;

const CONTEXT_EXT_TYPE: u8 = 0xC1;
const CONTEXT_HEADER_SIZE: usize = 4; // type(1) + len(1) + hopCount(1) + deviceCount(1)
const CONTEXT_DEVICE_SIZE: usize = 6; // nodeHash(4) + deviceId(2)
pub const MAX_CONTEXT_DEVICES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Data,
    Heartbeat,
    Ack,
    Nack,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet too short: {0} bytes")]
    Truncated(usize),
    #[error("bad magic: {0:#06x}")]
    BadMagic(u16),
    #[error("unsupported version: {0}")]
    BadVersion(u8),
    #[error("buffer too small for serializeInto: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },
    #[error("context extension truncated or length mismatch")]
    BadContextExtension,
}

/// The on-wire MIDI mesh packet. Source/destination node identity is
/// carried only as a 32-bit hash on the wire; full [`NodeId`]s are
/// recovered via a
/// [`crate::uuid_registry::UuidRegistry`] lookup by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flags: u8,
    pub source_hash: u32,
    pub dest_hash: u32,
    pub sequence: u16,
    pub timestamp_micros: u32,
    pub device_id: u16,
    pub midi: Vec<u8>,
    /// Raw, already-serialized context extension bytes (type+len+hopCount+
    /// devices), present iff `flags & FLAG_HAS_CONTEXT`.
    context_ext: Option<Vec<u8>>,
}

impl Packet {
    fn base(
        kind: PacketKind,
        source: NodeId,
        dest: NodeId,
        device_id: u16,
        midi: Vec<u8>,
        sequence: u16,
        timestamp_micros: u32,
    ) -> Self {
        let mut flags = 0u8;
        if kind != PacketKind::Data {
            flags |= FLAG_CONTROL;
            let code = match kind {
                PacketKind::Data => unreachable!(),
                PacketKind::Heartbeat => 0u8,
                PacketKind::Ack => 1u8,
                PacketKind::Nack => 2u8,
            };
            flags |= code << CONTROL_KIND_SHIFT;
        }
        if midi.first() == Some(&0xF0) {
            flags |= FLAG_SYSEX | FLAG_RELIABLE;
        }
        Self {
            flags,
            source_hash: source.hash(),
            dest_hash: dest.hash(),
            sequence,
            timestamp_micros,
            device_id,
            midi,
            context_ext: None,
        }
    }

    pub fn data(
        source: NodeId,
        dest: NodeId,
        device_id: u16,
        midi: Vec<u8>,
        sequence: u16,
        timestamp_micros: u32,
    ) -> Self {
        Self::base(PacketKind::Data, source, dest, device_id, midi, sequence, timestamp_micros)
    }

    pub fn heartbeat(source: NodeId, dest: NodeId, sequence: u16, timestamp_micros: u32) -> Self {
        Self::base(PacketKind::Heartbeat, source, dest, 0, Vec::new(), sequence, timestamp_micros)
    }

    pub fn ack(source: NodeId, dest: NodeId, ack_sequence: u16, timestamp_micros: u32) -> Self {
        Self::base(PacketKind::Ack, source, dest, 0, Vec::new(), ack_sequence, timestamp_micros)
    }

    pub fn nack(source: NodeId, dest: NodeId, nack_sequence: u16, timestamp_micros: u32) -> Self {
        Self::base(PacketKind::Nack, source, dest, 0, Vec::new(), nack_sequence, timestamp_micros)
    }

    pub fn kind(&self) -> PacketKind {
        if self.flags & FLAG_CONTROL == 0 {
            return PacketKind::Data;
        }
        match (self.flags & CONTROL_KIND_MASK) >> CONTROL_KIND_SHIFT {
            0 => PacketKind::Heartbeat,
            1 => PacketKind::Ack,
            _ => PacketKind::Nack,
        }
    }

    pub fn is_sysex(&self) -> bool {
        self.flags & FLAG_SYSEX != 0
    }

    pub fn is_reliable(&self) -> bool {
        self.flags & FLAG_RELIABLE != 0
    }

    pub fn is_fragment(&self) -> bool {
        self.flags & FLAG_FRAGMENT != 0
    }

    pub fn has_context(&self) -> bool {
        self.flags & FLAG_HAS_CONTEXT != 0
    }

    pub fn set_reliable(&mut self, reliable: bool) {
        if reliable {
            self.flags |= FLAG_RELIABLE;
        } else {
            self.flags &= !FLAG_RELIABLE;
        }
    }

    pub fn set_fragment(&mut self, fragment: bool) {
        if fragment {
            self.flags |= FLAG_FRAGMENT;
        } else {
            self.flags &= !FLAG_FRAGMENT;
        }
    }

    /// Attach a forwarding context, capping the visited set at
    /// [`MAX_CONTEXT_DEVICES`] entries.
    pub fn set_context(&mut self, ctx: &ForwardingContext) {
        let devices: Vec<DeviceKey> = ctx.visited.iter().take(MAX_CONTEXT_DEVICES).copied().collect();
        let device_count = devices.len() as u8;
        let ext_len = (CONTEXT_HEADER_SIZE + devices.len() * CONTEXT_DEVICE_SIZE) as u8;

        let mut buf = Vec::with_capacity(ext_len as usize);
        buf.push(CONTEXT_EXT_TYPE);
        buf.push(ext_len);
        buf.push(ctx.hop_count);
        buf.push(device_count);
        for device in &devices {
            buf.extend_from_slice(&device.owner_node.hash().to_be_bytes());
            buf.extend_from_slice(&device.device_id.to_be_bytes());
        }

        self.context_ext = Some(buf);
        self.flags |= FLAG_HAS_CONTEXT;
    }

    pub fn clear_context(&mut self) {
        self.context_ext = None;
        self.flags &= !FLAG_HAS_CONTEXT;
    }

    /// Recover hop count and visited devices from the raw extension,
    /// resolving each visited node hash through `registry`. A visited-device
    /// hash with no registry entry is dropped from the set (the hop is
    /// still counted, so loop prevention degrades gracefully rather than
    /// failing outright) — the context is treated as absent for that hop
    /// when its hash has no registry entry.
    pub fn forwarding_context(&self, registry: &crate::uuid_registry::UuidRegistry) -> Option<ForwardingContext> {
        let raw = self.context_ext.as_ref()?;
        if raw.len() < CONTEXT_HEADER_SIZE || raw[0] != CONTEXT_EXT_TYPE {
            return None;
        }
        let hop_count = raw[2];
        let device_count = raw[3] as usize;
        let mut visited = std::collections::BTreeSet::new();
        let mut offset = CONTEXT_HEADER_SIZE;
        for _ in 0..device_count {
            if offset + CONTEXT_DEVICE_SIZE > raw.len() {
                break;
            }
            let hash = u32::from_be_bytes(raw[offset..offset + 4].try_into().unwrap());
            let device_id = u16::from_be_bytes(raw[offset + 4..offset + 6].try_into().unwrap());
            offset += CONTEXT_DEVICE_SIZE;
            match registry.lookup(hash) {
                Some(node) => {
                    visited.insert(DeviceKey::new(node, device_id));
                }
                None => {
                    tracing::debug!(hash = format!("{:08x}", hash), "unknown node hash in forwarding context");
                }
            }
        }
        Some(ForwardingContext { hop_count, visited })
    }

    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.midi.len() + self.context_ext.as_ref().map_or(0, Vec::len)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_size());
        self.write_header_and_payload(&mut buf);
        buf
    }

    /// Serialize into a caller-supplied buffer without writing anything if
    /// it's too small.
    pub fn serialize_into(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let need = self.total_size();
        if buf.len() < need {
            return Err(CodecError::BufferTooSmall { need, have: buf.len() });
        }
        let mut scratch = Vec::with_capacity(need);
        self.write_header_and_payload(&mut scratch);
        buf[..need].copy_from_slice(&scratch);
        Ok(need)
    }

    fn write_header_and_payload(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.push(VERSION);
        buf.push(self.flags);
        buf.extend_from_slice(&self.source_hash.to_be_bytes());
        buf.extend_from_slice(&self.dest_hash.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_micros.to_be_bytes());
        buf.extend_from_slice(&self.device_id.to_be_bytes());
        buf.extend_from_slice(&self.midi);
        if let Some(ctx) = &self.context_ext {
            buf.extend_from_slice(ctx);
        }
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::Truncated(data.len()));
        }

        let magic = u16::from_be_bytes([data[0], data[1]]);
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }

        let version = data[2];
        if version != VERSION {
            return Err(CodecError::BadVersion(version));
        }

        let flags = data[3];
        let source_hash = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let dest_hash = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let sequence = u16::from_be_bytes([data[12], data[13]]);
        let timestamp_micros = u32::from_be_bytes(data[14..18].try_into().unwrap());
        let device_id = u16::from_be_bytes([data[18], data[19]]);

        let rest = &data[HEADER_SIZE..];
        let (midi, context_ext) = if flags & FLAG_HAS_CONTEXT != 0 && !rest.is_empty() {
            split_context_extension(rest)?
        } else {
            (rest.to_vec(), None)
        };

        Ok(Self {
            flags,
            source_hash,
            dest_hash,
            sequence,
            timestamp_micros,
            device_id,
            midi,
            context_ext,
        })
    }
}

/// Scan `rest` (the bytes after the fixed header) backwards for the context
/// extension marker: truncated or mismatched-length extensions are a
/// deserialization failure.
fn split_context_extension(rest: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>), CodecError> {
    // The extension's own length byte tells us how far back it starts, so
    // scanning is really just: try every possible start position whose
    // second byte (extLength) would place the marker's start exactly
    // `extLength` bytes before the end of `rest`.
    if rest.len() < CONTEXT_HEADER_SIZE {
        return Err(CodecError::BadContextExtension);
    }

    for start in (0..=rest.len() - CONTEXT_HEADER_SIZE).rev() {
        if rest[start] != CONTEXT_EXT_TYPE {
            continue;
        }
        let ext_len = rest[start + 1] as usize;
        if start + ext_len != rest.len() {
            continue;
        }
        let device_count = rest[start + 3] as usize;
        let expected_len = CONTEXT_HEADER_SIZE + device_count * CONTEXT_DEVICE_SIZE;
        if ext_len != expected_len {
            continue;
        }
        return Ok((rest[..start].to_vec(), Some(rest[start..].to_vec())));
    }

    Err(CodecError::BadContextExtension)
}
