const TEST_UNIT_READY: u8 = 0x00;
const REQUEST_SENSE: u8 = 0x03;
const INQUIRY: u8 = 0x12;
const MODE_SENSE_6: u8 = 0x1A;
const START_STOP_UNIT: u8 = 0x1B;
const READ_CAPACITY_10: u8 = 0x25;
const READ_10: u8 = 0x28;
const WRITE_10: u8 = 0x2A;

pub fn test_unit_ready() -> Vec<u8> {
    vec![TEST_UNIT_READY, 0, 0, 0, 0, 0]
}

pub fn request_sense(alloc_len: u8) -> Vec<u8> {
    vec![REQUEST_SENSE, 0, 0, 0, alloc_len, 0]
}

pub fn inquiry(evpd: bool, page_code: u8, alloc_len: u16) -> Vec<u8> {
    let mut bytes = vec![INQUIRY, evpd as u8, page_code];
    bytes.extend_from_slice(alloc_len.to_be_bytes().as_slice());
    bytes.push(0);
    bytes
}

pub fn mode_sense(page_code: u8, alloc_len: u8) -> Vec<u8> {
    vec![MODE_SENSE_6, 0, page_code & 0b00111111, 0, alloc_len, 0]
}

pub fn start_stop_unit(load_eject: bool, start: bool) -> Vec<u8> {
    vec![
        START_STOP_UNIT,
        0,
        0,
        0,
        ((load_eject as u8) << 1) | start as u8,
        0,
    ]
}

pub fn read_capacity() -> Vec<u8> {
    vec![READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

pub fn read(lba: u32, len: u16) -> Vec<u8> {
    let mut bytes = vec![READ_10, 0];
    bytes.extend_from_slice(lba.to_be_bytes().as_slice());
    bytes.push(0);
    bytes.extend_from_slice(len.to_be_bytes().as_slice());
    bytes.push(0);
    bytes
}

pub fn write(lba: u32, len: u16) -> Vec<u8> {
    let mut bytes = read(lba, len);
    bytes[0] = WRITE_10;
    bytes
}

/// (key, ASC, ASCQ) of a fixed format sense response
pub fn sense_triple(data: &[u8]) -> (u8, u8, u8) {
    assert_eq!(18, data.len());
    assert_eq!(0x70, data[0]);
    (data[2] & 0x0F, data[12], data[13])
}
