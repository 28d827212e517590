use std::fmt;

use super::crc::checksum;

/// Function byte of the raw "reset energy" command. This is not a Modbus function,
/// the meter only answers it on the plain serial line.
pub const FUNCTION_RESET: u8 = 0x42;

/// Length of the reset frame on the wire, request and echo are identical
pub const RESET_FRAME_LEN: usize = 4;

/// A complete command frame: payload followed by its CRC16 (low byte first)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Appends the checksum to an arbitrary payload
    pub fn from_payload(payload: &[u8]) -> Self {
        let crc = checksum(payload);
        let mut bytes = Vec::with_capacity(payload.len() + crc.len());
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&crc);
        return Frame { bytes };
    }

    pub fn command(address: u8, function: u8) -> Self {
        return Frame::from_payload(&[address, function]);
    }

    pub fn reset(address: u8) -> Self {
        return Frame::command(address, FUNCTION_RESET);
    }

    pub fn as_bytes(&self) -> &[u8] {
        return &self.bytes;
    }

    pub fn len(&self) -> usize {
        return self.bytes.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.bytes.is_empty();
    }

    pub fn address(&self) -> Option<u8> {
        return self.bytes.first().copied();
    }

    pub fn to_hex(&self) -> String {
        return hex::encode_upper(&self.bytes);
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_frame_for_address_one() {
        let frame = Frame::reset(1);
        assert_eq!(frame.as_bytes(), &[0x01, 0x42, 0x80, 0x11]);
        assert_eq!(frame.to_string(), "01428011");
        assert_eq!(frame.address(), Some(1));
    }

    #[test]
    fn test_reset_frame_layout_for_all_addresses() {
        for address in 0..=u8::MAX {
            let frame = Frame::reset(address);
            let bytes = frame.as_bytes();
            assert_eq!(frame.len(), RESET_FRAME_LEN);
            assert_eq!(bytes[0], address);
            assert_eq!(bytes[1], FUNCTION_RESET);
            assert_eq!(bytes[2..], checksum(&bytes[0..2]));
        }
    }

    #[test]
    fn test_payload_grows_by_two() {
        let payload = [0x01, 0x04, 0x00, 0x00, 0x00, 0x0A];
        let frame = Frame::from_payload(&payload);
        assert_eq!(frame.len(), payload.len() + 2);
        assert_eq!(&frame.as_bytes()[..payload.len()], &payload);
        assert_eq!(frame.to_hex(), "01040000000A700D");
    }
}
