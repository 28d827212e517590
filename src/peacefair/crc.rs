/// CRC16 as used by Modbus RTU and the Peacefair raw commands.
/// The result is returned in wire order, low byte first.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    return crc.to_le_bytes();
}
