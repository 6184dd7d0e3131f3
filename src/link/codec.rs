//! # MAVLink Framing
//!
//! Splits received bytes into MAVLink 1 and MAVLink 2 frames and serializes
//! outbound messages as MAVLink 2.
//!
//! ```text
//! v1: FE len seq sys comp id                    payload crc crc
//! v2: FD len incompat compat seq sys comp id id id payload crc crc [signature]
//! ```
//!
//! A frame whose checksum does not match is skipped one byte at a time until
//! the next start marker. A frame with a valid checksum that the dialect
//! cannot parse comes out as BAD_DATA. The raw payload travels with every
//! decoded frame, so extension fields missing from the generated dialect
//! can still be read.

use std::sync::atomic::{AtomicU8, Ordering};

use bytes::{Buf, BytesMut};
use mavlink::{calculate_crc, MAVLinkV2MessageRaw, MavHeader, MavlinkVersion, Message};

use crate::protocol::dialect::MavMessage;
use crate::protocol::frame::Frame;

const V1_HEADER_LEN: usize = 6;
const V2_HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const IFLAG_SIGNED: u8 = 0x01;

/// Outcome of scanning the buffer at a start marker
enum Scan {
    /// More bytes are needed
    Incomplete,
    /// Not a frame, skip the marker
    Corrupt,
    /// A frame and the number of bytes it used
    Frame(Frame, usize),
}

/// Reassembles frames from bytes received in arbitrary chunks
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Buffer for readers that fill it in place
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Take the next complete frame
    ///
    /// # Returns
    ///
    /// * `Option<Frame>` - `None` until enough bytes for a frame arrived
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let Some(start) = self
                .buffer
                .iter()
                .position(|&b| b == mavlink::MAV_STX || b == mavlink::MAV_STX_V2)
            else {
                self.buffer.clear();
                return None;
            };
            self.buffer.advance(start);

            match scan(&self.buffer) {
                Scan::Incomplete => return None,
                Scan::Corrupt => self.buffer.advance(1),
                Scan::Frame(frame, len) => {
                    self.buffer.advance(len);
                    return Some(frame);
                }
            }
        }
    }
}

fn scan(buffer: &[u8]) -> Scan {
    let v2 = buffer[0] == mavlink::MAV_STX_V2;
    let header_len = if v2 { V2_HEADER_LEN } else { V1_HEADER_LEN };
    if buffer.len() < header_len {
        return Scan::Incomplete;
    }

    let payload_len = usize::from(buffer[1]);
    let signature_len = if v2 && buffer[2] & IFLAG_SIGNED != 0 { SIGNATURE_LEN } else { 0 };
    let body_end = header_len + payload_len;
    let frame_len = body_end + CHECKSUM_LEN + signature_len;
    if buffer.len() < frame_len {
        return Scan::Incomplete;
    }

    let (version, id, header) = if v2 {
        let header = MavHeader { sequence: buffer[4], system_id: buffer[5], component_id: buffer[6] };
        (MavlinkVersion::V2, u32::from_le_bytes([buffer[7], buffer[8], buffer[9], 0]), header)
    } else {
        let header = MavHeader { sequence: buffer[2], system_id: buffer[3], component_id: buffer[4] };
        (MavlinkVersion::V1, u32::from(buffer[5]), header)
    };

    let checksum = u16::from_le_bytes([buffer[body_end], buffer[body_end + 1]]);
    if checksum != calculate_crc(&buffer[1..body_end], MavMessage::extra_crc(id)) {
        return Scan::Corrupt;
    }

    let payload = &buffer[header_len..body_end];
    let frame = match MavMessage::parse(version, id, payload) {
        Ok(message) => Frame::from_wire(&header, &message, payload),
        Err(_) => Frame::bad_data(),
    };
    Scan::Frame(frame, frame_len)
}

/// Serializes outbound messages as MAVLink 2 under one source address
#[derive(Debug)]
pub struct FrameEncoder {
    system_id: u8,
    component_id: u8,
    sequence: AtomicU8,
}

impl FrameEncoder {
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
            sequence: AtomicU8::new(0),
        }
    }

    /// Serialize `message` with the next sequence number
    pub fn encode(&self, message: &MavMessage) -> Vec<u8> {
        let header = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let mut raw = MAVLinkV2MessageRaw::new();
        raw.serialize_message(header, message);
        raw.raw_bytes().to_vec()
    }
}

/// Build a MAVLink 2 frame around a hand-written payload
#[cfg(test)]
pub(crate) fn raw_v2_frame(header: MavHeader, id: u32, payload: &[u8]) -> Vec<u8> {
    let id_bytes = id.to_le_bytes();
    let mut bytes = vec![
        mavlink::MAV_STX_V2,
        payload.len() as u8,
        0,
        0,
        header.sequence,
        header.system_id,
        header.component_id,
        id_bytes[0],
        id_bytes[1],
        id_bytes[2],
    ];
    bytes.extend_from_slice(payload);
    let crc = calculate_crc(&bytes[1..], MavMessage::extra_crc(id));
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}
