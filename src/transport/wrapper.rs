//! Command Block Wrapper and Command Status Wrapper

use crate::transport::{CommandStatus, DataDirection};

pub const CBW_SIGNATURE_LE: [u8; 4] = 0x43425355u32.to_le_bytes();
pub const CSW_SIGNATURE_LE: [u8; 4] = 0x53425355u32.to_le_bytes();

/// Length of a CBW
pub const CBW_LEN: usize = 31;
/// Length of a CSW
pub const CSW_LEN: usize = 13;

/// Longest command block a CBW may carry
pub const MAX_CB_LEN: usize = 16;
const MIN_CB_LEN: u8 = 1;

const DIRECTION_IN: u8 = 1 << 7;
const LUN_MASK: u8 = 0b0000_1111;

/// Received bytes don't form a CBW: wrong length or signature. BOT 6.2.1
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidCbw;

/// Command Block Wrapper
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandBlockWrapper {
    pub tag: u32,
    pub data_transfer_len: u32,
    pub direction: DataDirection,
    pub lun: u8,
    pub block_len: u8,
    pub block: [u8; MAX_CB_LEN],
}

impl CommandBlockWrapper {
    /// Parses a CBW checking its length and signature
    ///
    /// The command block length is not checked here. A well framed CBW with
    /// a meaningless block length is still a CBW, [is_meaningful] tells them apart.
    ///
    /// [is_meaningful]: CommandBlockWrapper::is_meaningful
    pub fn from_le_bytes(raw: &[u8]) -> Result<Self, InvalidCbw> {
        let raw: &[u8; CBW_LEN] = raw.try_into().map_err(|_| InvalidCbw)?;
        if !raw.starts_with(&CBW_SIGNATURE_LE) {
            return Err(InvalidCbw);
        }

        let mut block = [0u8; MAX_CB_LEN];
        block.copy_from_slice(&raw[15..]);

        Ok(CommandBlockWrapper {
            tag: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            data_transfer_len: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            direction: if raw[12] & DIRECTION_IN != 0 {
                DataDirection::In
            } else {
                DataDirection::Out
            },
            lun: raw[13] & LUN_MASK,
            block_len: raw[14],
            block,
        })
    }

    /// Whether the command block length is within 1..=16. BOT 6.2.2
    pub fn is_meaningful(&self) -> bool {
        (MIN_CB_LEN..=MAX_CB_LEN as u8).contains(&self.block_len)
    }

    /// Command block truncated to its declared length
    pub fn command_block(&self) -> &[u8] {
        &self.block[..(self.block_len as usize).min(MAX_CB_LEN)]
    }

    /// Tag and expected length of something that failed to parse, zero where missing
    pub(crate) fn salvage(raw: &[u8]) -> (u32, u32) {
        let field = |at: usize| {
            raw.get(at..at + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(0)
        };
        (field(4), field(8))
    }
}

/// Command Status Wrapper
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandStatusWrapper {
    pub tag: u32,
    pub residue: u32,
    pub status: CommandStatus,
}

impl CommandStatusWrapper {
    pub fn to_le_bytes(&self) -> [u8; CSW_LEN] {
        let mut csw = [0u8; CSW_LEN];
        csw[..4].copy_from_slice(CSW_SIGNATURE_LE.as_slice());
        csw[4..8].copy_from_slice(self.tag.to_le_bytes().as_slice());
        csw[8..12].copy_from_slice(self.residue.to_le_bytes().as_slice());
        csw[12] = self.status as u8;
        csw
    }
}
