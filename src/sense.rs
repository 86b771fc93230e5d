//! SCSI sense data
//!
//! Every failed command leaves a [SenseCode] on the addressed Logical Unit. The host
//! retrieves it with REQUEST SENSE, which returns the matching (key, ASC, ASCQ) triple in
//! fixed format.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/* Sense keys. SPC-4 table 48 */
const NO_SENSE: u8 = 0x00;
const NOT_READY: u8 = 0x02;
const MEDIUM_ERROR: u8 = 0x03;
const ILLEGAL_REQUEST: u8 = 0x05;
const UNIT_ATTENTION: u8 = 0x06;
const DATA_PROTECT: u8 = 0x07;
const ABORTED_COMMAND: u8 = 0x0B;

/// Length of a fixed format sense data response
pub const FIXED_SENSE_LEN: usize = 18;

const RESPONSE_CODE_CURRENT_FIXED: u8 = 0x70;
const ADDITIONAL_SENSE_LEN: u8 = (FIXED_SENSE_LEN - 8) as u8;

/// The reason of the last failure reported by a Logical Unit
#[repr(u8)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SenseCode {
    #[default]
    Ok = 0,
    CrcError,
    InvalidFieldInCbw,
    NoMedia,
    WriteFault,
    ReadError,
    AddrNotFound,
    InvalidOpCode,
    InvalidLba,
    InvalidParameter,
    CantEject,
    MediaChanged,
    DeviceReset,
    WriteProtected,
    InitRequired,
    SavePageNotSupported,
}

/// Sense key, additional sense code and its qualifier
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SenseTriple {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

const fn triple(key: u8, asc: u8, ascq: u8) -> SenseTriple {
    SenseTriple { key, asc, ascq }
}

// Indexed by SenseCode discriminant
const SENSE_TABLE: [SenseTriple; 16] = [
    triple(NO_SENSE, 0x00, 0x00),
    triple(ABORTED_COMMAND, 0x08, 0x03),
    triple(ILLEGAL_REQUEST, 0x24, 0x00),
    triple(NOT_READY, 0x3A, 0x00),
    triple(MEDIUM_ERROR, 0x03, 0x00),
    triple(MEDIUM_ERROR, 0x11, 0x00),
    triple(MEDIUM_ERROR, 0x12, 0x00),
    triple(ILLEGAL_REQUEST, 0x20, 0x00),
    triple(ILLEGAL_REQUEST, 0x21, 0x00),
    triple(ILLEGAL_REQUEST, 0x26, 0x00),
    triple(ILLEGAL_REQUEST, 0x53, 0x02),
    triple(UNIT_ATTENTION, 0x28, 0x00),
    triple(UNIT_ATTENTION, 0x29, 0x00),
    triple(DATA_PROTECT, 0x27, 0x00),
    triple(NOT_READY, 0x04, 0x02),
    triple(ILLEGAL_REQUEST, 0x39, 0x00),
];

impl SenseCode {
    pub const fn triple(self) -> SenseTriple {
        SENSE_TABLE[self as usize]
    }

    /// Whether the condition is reported once and then cleared
    pub const fn is_unit_attention(self) -> bool {
        matches!(self, SenseCode::MediaChanged | SenseCode::DeviceReset)
    }

    /// Writes a fixed format sense data response into `dst`
    ///
    /// # Panics
    /// Panics if `dst` is shorter than [FIXED_SENSE_LEN].
    pub fn write_fixed(self, dst: &mut [u8]) {
        let SenseTriple { key, asc, ascq } = self.triple();
        let dst = &mut dst[..FIXED_SENSE_LEN];
        dst.fill(0);
        dst[0] = RESPONSE_CODE_CURRENT_FIXED;
        dst[2] = key;
        dst[7] = ADDITIONAL_SENSE_LEN;
        dst[12] = asc;
        dst[13] = ascq;
    }
}

#[cfg(test)]
mod tests {
    use crate::sense::{SenseCode, SenseTriple, FIXED_SENSE_LEN};
    use num_enum::TryFromPrimitive;

    #[test]
    fn table_covers_every_code() {
        for raw in 0u8..16 {
            let code = SenseCode::try_from_primitive(raw).unwrap();
            assert_eq!(raw, u8::from(code));
            let _ = code.triple();
        }
        assert!(SenseCode::try_from_primitive(16).is_err());
    }

    #[test]
    fn well_known_triples() {
        assert_eq!(
            SenseTriple { key: 0x02, asc: 0x3A, ascq: 0x00 },
            SenseCode::NoMedia.triple()
        );
        assert_eq!(
            SenseTriple { key: 0x0B, asc: 0x08, ascq: 0x03 },
            SenseCode::CrcError.triple()
        );
        assert_eq!(
            SenseTriple { key: 0x05, asc: 0x53, ascq: 0x02 },
            SenseCode::CantEject.triple()
        );
        assert_eq!(
            SenseTriple { key: 0x06, asc: 0x29, ascq: 0x00 },
            SenseCode::DeviceReset.triple()
        );
        assert_eq!(
            SenseTriple { key: 0x05, asc: 0x39, ascq: 0x00 },
            SenseCode::SavePageNotSupported.triple()
        );
    }

    #[test]
    fn fixed_format_layout() {
        let mut buf = [0xAAu8; 20];
        SenseCode::WriteProtected.write_fixed(&mut buf);
        assert_eq!(
            [0x70, 0, 0x07, 0, 0, 0, 0, 0x0A, 0, 0, 0, 0, 0x27, 0x00, 0, 0, 0, 0],
            buf[..FIXED_SENSE_LEN]
        );
        // bytes past the response are left alone
        assert_eq!([0xAA, 0xAA], buf[FIXED_SENSE_LEN..]);
    }

    #[test]
    fn unit_attention_codes() {
        assert!(SenseCode::MediaChanged.is_unit_attention());
        assert!(SenseCode::DeviceReset.is_unit_attention());
        assert!(!SenseCode::NoMedia.is_unit_attention());
    }
}
