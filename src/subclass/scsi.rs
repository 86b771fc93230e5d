//! SCSI transparent command set
//!
//! [dispatch] decodes a command block, validates it against the [Policy] of its opcode
//! and executes it. Fixed responses are built in the [TransportContext], block data is
//! never touched here: a [Dispatch] tells the transport what to stream and where.

use crate::context::{CommandState, TransportContext};
use crate::fmt::debug;
use crate::lun::BackingStore;
use crate::sense::{SenseCode, FIXED_SENSE_LEN};
use crate::transport::wrapper::{CommandBlockWrapper, MAX_CB_LEN};
use crate::transport::{CommandStatus, DataDirection};
use core::cmp::min;
use num_enum::TryFromPrimitive;

/// SCSI device subclass code
pub const SUBCLASS_SCSI: u8 = 0x06; // SCSI Transparent command set

/// Supported operation codes
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    /* SPC */
    TestUnitReady = 0x00,
    RequestSense = 0x03,
    Inquiry = 0x12,
    ModeSelect6 = 0x15,
    ModeSense6 = 0x1A,
    SendDiagnostic = 0x1D,

    /* SBC */
    StartStopUnit = 0x1B,
    PreventAllowMediumRemoval = 0x1E,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Write10 = 0x2A,
    Verify10 = 0x2F,
    SynchronizeCache10 = 0x35,
    ReadCapacity16 = 0x9E,

    /* MMC */
    ReadFormatCapacities = 0x23,
}

/// Data stage expected by an opcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Expect {
    NoData,
    ToHost,
    FromHost,
}

/// Validation rules of an opcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Policy {
    pub expect: Expect,
    /// Fails unless media is present and the unit is started
    pub needs_ready: bool,
    /// The host length must be exactly the computed one
    pub exact_len: bool,
}

const fn policy(expect: Expect, needs_ready: bool, exact_len: bool) -> Policy {
    Policy {
        expect,
        needs_ready,
        exact_len,
    }
}

impl Opcode {
    pub const fn policy(self) -> Policy {
        use Expect::*;

        match self {
            Opcode::Inquiry | Opcode::RequestSense => policy(ToHost, false, false),
            Opcode::ModeSense6
            | Opcode::ReadCapacity10
            | Opcode::ReadCapacity16
            | Opcode::ReadFormatCapacities => policy(ToHost, true, false),
            Opcode::Read10 => policy(ToHost, true, true),
            Opcode::Write10 => policy(FromHost, true, true),
            Opcode::ModeSelect6 => policy(FromHost, true, false),
            Opcode::StartStopUnit => policy(NoData, false, false),
            Opcode::TestUnitReady
            | Opcode::Verify10
            | Opcode::PreventAllowMediumRemoval
            | Opcode::SendDiagnostic
            | Opcode::SynchronizeCache10 => policy(NoData, true, false),
        }
    }
}

/// SCSI command
///
/// Refer to specifications (SPC,SBC,MMC)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScsiCommand {
    Unknown(u8),

    /* SPC */
    TestUnitReady,
    RequestSense {
        desc: bool,
        alloc_len: u8,
    },
    Inquiry {
        evpd: bool,
        page_code: u8,
        alloc_len: u16,
    },
    ModeSelect6 {
        save_pages: bool,
        param_list_len: u8,
    },
    ModeSense6 {
        dbd: bool,
        page_control: PageControl,
        page_code: u8,
        subpage_code: u8,
        alloc_len: u8,
    },
    SendDiagnostic {
        self_test: bool,
    },

    /* SBC */
    StartStopUnit {
        load_eject: bool,
        start: bool,
    },
    PreventAllowMediumRemoval {
        prevent: bool,
    },
    ReadCapacity10,
    ReadCapacity16 {
        service_action: u8,
        alloc_len: u32,
    },
    Read10 {
        lba: u32,
        len: u16,
    },
    Write10 {
        lba: u32,
        len: u16,
    },
    Verify10 {
        lba: u32,
        len: u16,
    },
    SynchronizeCache10,

    /* MMC */
    ReadFormatCapacities {
        alloc_len: u16,
    },
}

impl ScsiCommand {
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            ScsiCommand::Unknown(_) => return None,
            ScsiCommand::TestUnitReady => Opcode::TestUnitReady,
            ScsiCommand::RequestSense { .. } => Opcode::RequestSense,
            ScsiCommand::Inquiry { .. } => Opcode::Inquiry,
            ScsiCommand::ModeSelect6 { .. } => Opcode::ModeSelect6,
            ScsiCommand::ModeSense6 { .. } => Opcode::ModeSense6,
            ScsiCommand::SendDiagnostic { .. } => Opcode::SendDiagnostic,
            ScsiCommand::StartStopUnit { .. } => Opcode::StartStopUnit,
            ScsiCommand::PreventAllowMediumRemoval { .. } => Opcode::PreventAllowMediumRemoval,
            ScsiCommand::ReadCapacity10 => Opcode::ReadCapacity10,
            ScsiCommand::ReadCapacity16 { .. } => Opcode::ReadCapacity16,
            ScsiCommand::Read10 { .. } => Opcode::Read10,
            ScsiCommand::Write10 { .. } => Opcode::Write10,
            ScsiCommand::Verify10 { .. } => Opcode::Verify10,
            ScsiCommand::SynchronizeCache10 => Opcode::SynchronizeCache10,
            ScsiCommand::ReadFormatCapacities { .. } => Opcode::ReadFormatCapacities,
        })
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageControl {
    CurrentValues = 0b00,
    ChangeableValues = 0b01,
    DefaultValues = 0b10,
    SavedValues = 0b11,
}

/// Decodes a zero padded command block
pub fn parse_cb(cb: &[u8; MAX_CB_LEN]) -> ScsiCommand {
    let Ok(opcode) = Opcode::try_from_primitive(cb[0]) else {
        return ScsiCommand::Unknown(cb[0]);
    };

    let lba = u32::from_be_bytes([cb[2], cb[3], cb[4], cb[5]]);
    let len = u16::from_be_bytes([cb[7], cb[8]]);

    match opcode {
        Opcode::TestUnitReady => ScsiCommand::TestUnitReady,
        Opcode::RequestSense => ScsiCommand::RequestSense {
            desc: (cb[1] & 0b00000001) != 0,
            alloc_len: cb[4],
        },
        Opcode::Inquiry => ScsiCommand::Inquiry {
            evpd: (cb[1] & 0b00000001) != 0,
            page_code: cb[2],
            alloc_len: u16::from_be_bytes([cb[3], cb[4]]),
        },
        Opcode::ModeSelect6 => ScsiCommand::ModeSelect6 {
            save_pages: (cb[1] & 0b00000001) != 0,
            param_list_len: cb[4],
        },
        Opcode::ModeSense6 => ScsiCommand::ModeSense6 {
            dbd: (cb[1] & 0b00001000) != 0,
            page_control: PageControl::try_from_primitive(cb[2] >> 6)
                .unwrap_or(PageControl::SavedValues),
            page_code: cb[2] & 0b00111111,
            subpage_code: cb[3],
            alloc_len: cb[4],
        },
        Opcode::SendDiagnostic => ScsiCommand::SendDiagnostic {
            self_test: (cb[1] & 0b00000100) != 0,
        },
        Opcode::StartStopUnit => ScsiCommand::StartStopUnit {
            load_eject: (cb[4] & 0b00000010) != 0,
            start: (cb[4] & 0b00000001) != 0,
        },
        Opcode::PreventAllowMediumRemoval => ScsiCommand::PreventAllowMediumRemoval {
            prevent: (cb[4] & 0b00000011) != 0,
        },
        Opcode::ReadCapacity10 => ScsiCommand::ReadCapacity10,
        Opcode::ReadCapacity16 => ScsiCommand::ReadCapacity16 {
            service_action: cb[1] & 0b00011111,
            alloc_len: u32::from_be_bytes([cb[10], cb[11], cb[12], cb[13]]),
        },
        Opcode::Read10 => ScsiCommand::Read10 { lba, len },
        Opcode::Write10 => ScsiCommand::Write10 { lba, len },
        Opcode::Verify10 => ScsiCommand::Verify10 { lba, len },
        Opcode::SynchronizeCache10 => ScsiCommand::SynchronizeCache10,
        Opcode::ReadFormatCapacities => ScsiCommand::ReadFormatCapacities { alloc_len: len },
    }
}

/// What the transport does after [dispatch]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// No data stage, send the status
    Status,
    /// The command failed, the sense is recorded and the status is set
    Failed,
    /// Send the first `len` bytes of the fixed response
    Respond(usize),
    /// Stream `len` bytes of the backing store starting at `offset` to the host
    ReadBlocks { offset: u64, len: u32 },
    /// Receive `len` bytes into the backing store starting at `offset`
    WriteBlocks { offset: u64, len: u32 },
    /// Receive `len` bytes of parameter data and drop them
    Discard(u32),
}

/* Response layouts */
const STD_INQUIRY_LEN: usize = 96;
const VERSION_DESCRIPTORS: [u8; 8] = [
    0x00, 0x80, // SAM-4
    0x17, 0x30, // USB Mass Storage Bulk-Only
    0x04, 0x60, // SPC-4
    0x04, 0xC0, // SBC-3
];

const VPD_SUPPORTED_PAGES: u8 = 0x00;
const VPD_SERIAL_NUMBER: u8 = 0x80;
const VPD_DEVICE_IDENTIFICATION: u8 = 0x83;
const VPD_BLOCK_LIMITS: u8 = 0xB0;
const VPD_BLOCK_LIMITS_LEN: usize = 64;

const MODE_PAGE_CACHING: u8 = 0x08;
const MODE_PAGE_ALL: u8 = 0x3F;
const MODE_HEADER_LEN: usize = 4;
const MODE_WRITE_PROTECT: u8 = 0x80;
const CACHING_PAGE_LEN: usize = 20;
const CACHING_PAGE_CHANGEABLE: [u8; CACHING_PAGE_LEN] = [
    0x08, 0x12, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xE1, 0xFF, 0xFF,
    0xFF, 0x00, 0x00, 0x00, 0x00,
];

const READ_CAPACITY_10_LEN: usize = 8;
const READ_CAPACITY_16_LEN: usize = 32;
const READ_CAPACITY_16_SERVICE_ACTION: u8 = 0x10;
const READ_FORMAT_CAPACITIES_LEN: usize = 12;
const FORMATTED_MEDIA: u8 = 0x02;

/// Runs a single command
///
/// Resets the command state from `cbw`, then validates and executes the command. Every
/// failure is recorded as the sense of the addressed LUN and [Dispatch::Failed] is
/// returned. The residue left in [TransportContext::command] is what a CSW reports if
/// no data is moved.
pub fn dispatch<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
    cbw: &CommandBlockWrapper,
) -> Dispatch {
    ctx.command = CommandState {
        tag: cbw.tag,
        direction: cbw.direction,
        lun: cbw.lun,
        residue: cbw.data_transfer_len,
        status: CommandStatus::Passed,
    };

    if cbw.lun as usize >= LUNS {
        debug!("usb: scsi: LUN out of range: {}", cbw.lun);
        ctx.fail(SenseCode::InvalidFieldInCbw);
        return Dispatch::Failed;
    }

    let result = if cbw.is_meaningful() {
        let command = parse_cb(&cbw.block);
        debug!("usb: scsi: Command: {}", command);
        execute(ctx, command)
    } else {
        Err(SenseCode::InvalidFieldInCbw)
    };

    match result {
        Ok(dispatch) => dispatch,
        Err(sense) => {
            debug!("usb: scsi: Command failed: {}", sense);
            ctx.fail(sense);
            Dispatch::Failed
        }
    }
}

fn execute<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
    command: ScsiCommand,
) -> Result<Dispatch, SenseCode> {
    let Some(opcode) = command.opcode() else {
        return Err(SenseCode::InvalidOpCode);
    };
    let policy = opcode.policy();

    match command {
        ScsiCommand::Unknown(_) => Err(SenseCode::InvalidOpCode),
        ScsiCommand::TestUnitReady
        | ScsiCommand::Verify10 { .. }
        | ScsiCommand::PreventAllowMediumRemoval { .. } => {
            check(ctx, policy, 0)?;
            Ok(Dispatch::Status)
        }
        ScsiCommand::SendDiagnostic { self_test } => {
            if !self_test {
                return Err(SenseCode::InvalidFieldInCbw);
            }
            check(ctx, policy, 0)?;
            Ok(Dispatch::Status)
        }
        ScsiCommand::SynchronizeCache10 => {
            check(ctx, policy, 0)?;
            ctx.current_lun()
                .store_mut()
                .flush()
                .map_err(|_| SenseCode::WriteFault)?;
            Ok(Dispatch::Status)
        }
        ScsiCommand::StartStopUnit { load_eject, start } => {
            check(ctx, policy, 0)?;
            if load_eject {
                ctx.current_lun().set_stopped(!start);
            }
            Ok(Dispatch::Status)
        }
        ScsiCommand::Inquiry {
            evpd, page_code, ..
        } => {
            let len = if evpd {
                write_vpd_page(ctx, page_code)?
            } else if page_code != 0 {
                return Err(SenseCode::InvalidParameter);
            } else {
                write_standard_inquiry(ctx)
            };
            respond(ctx, policy, len)
        }
        ScsiCommand::RequestSense { desc, .. } => {
            if desc {
                return Err(SenseCode::InvalidFieldInCbw);
            }
            let actual = check(ctx, policy, FIXED_SENSE_LEN as u32)?;
            let lun = ctx.current_lun();
            let sense = lun.last_sense();
            if sense.is_unit_attention() {
                lun.set_sense(SenseCode::Ok);
            }
            sense.write_fixed(&mut ctx.response);
            Ok(Dispatch::Respond(actual as usize))
        }
        ScsiCommand::ModeSense6 {
            page_control,
            page_code,
            ..
        } => {
            let len = write_mode_sense(ctx, page_control, page_code)?;
            respond(ctx, policy, len)
        }
        ScsiCommand::ModeSelect6 { save_pages, .. } => {
            if save_pages {
                return Err(SenseCode::InvalidFieldInCbw);
            }
            // parameter data is accepted whatever the host sends
            let residue = ctx.command.residue;
            let actual = check(ctx, policy, residue)?;
            Ok(if actual == 0 {
                Dispatch::Status
            } else {
                Dispatch::Discard(actual)
            })
        }
        ScsiCommand::ReadCapacity10 => {
            let lun = ctx.current_lun();
            let (last_lba, block_size) = (lun.last_lba(), lun.block_size());
            let buf = &mut ctx.response[..READ_CAPACITY_10_LEN];
            buf[..4].copy_from_slice(&last_lba.to_be_bytes());
            buf[4..].copy_from_slice(&block_size.to_be_bytes());
            respond(ctx, policy, READ_CAPACITY_10_LEN)
        }
        ScsiCommand::ReadCapacity16 { service_action, .. } => {
            if service_action != READ_CAPACITY_16_SERVICE_ACTION {
                return Err(SenseCode::InvalidFieldInCbw);
            }
            let lun = ctx.current_lun();
            let (last_lba, block_size) = (lun.last_lba(), lun.block_size());
            let buf = &mut ctx.response[..READ_CAPACITY_16_LEN];
            buf.fill(0);
            buf[..8].copy_from_slice(&(last_lba as u64).to_be_bytes());
            buf[8..12].copy_from_slice(&block_size.to_be_bytes());
            respond(ctx, policy, READ_CAPACITY_16_LEN)
        }
        ScsiCommand::ReadFormatCapacities { .. } => {
            let lun = ctx.current_lun();
            let (block_count, block_size) = (lun.block_count(), lun.block_size());
            let buf = &mut ctx.response[..READ_FORMAT_CAPACITIES_LEN];
            buf[..3].fill(0);
            buf[3] = 0x08; // capacity list length
            buf[4..8].copy_from_slice(&block_count.to_be_bytes());
            buf[8..].copy_from_slice(&block_size.to_be_bytes());
            buf[8] = FORMATTED_MEDIA; // descriptor type over the unused top byte
            respond(ctx, policy, READ_FORMAT_CAPACITIES_LEN)
        }
        ScsiCommand::Read10 { lba, len } => {
            let expected = block_transfer_len(ctx, len)?;
            check(ctx, policy, expected)?;
            let lun = ctx.current_lun();
            if !lun.contains(lba, len as u32) {
                return Err(SenseCode::InvalidLba);
            }
            Ok(if expected == 0 {
                Dispatch::Status
            } else {
                Dispatch::ReadBlocks {
                    offset: lun.offset_of(lba),
                    len: expected,
                }
            })
        }
        ScsiCommand::Write10 { lba, len } => {
            let expected = block_transfer_len(ctx, len)?;
            check(ctx, policy, expected)?;
            let lun = ctx.current_lun();
            if !lun.is_writable() {
                return Err(SenseCode::WriteProtected);
            }
            if !lun.contains(lba, len as u32) {
                return Err(SenseCode::InvalidLba);
            }
            Ok(if expected == 0 {
                Dispatch::Status
            } else {
                Dispatch::WriteBlocks {
                    offset: lun.offset_of(lba),
                    len: expected,
                }
            })
        }
    }
}

/// Checks the host's direction and length against `policy` and the LUN state
///
/// Returns the number of bytes to move. For commands that may be shorter than the
/// host's length the residue already accounts for them.
fn check<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
    policy: Policy,
    expected: u32,
) -> Result<u32, SenseCode> {
    let residue = ctx.command.residue;
    let to_host = ctx.command.direction == DataDirection::In;

    if (policy.expect == Expect::ToHost) != to_host
        || (policy.exact_len && expected != residue)
        || (expected != 0 && residue == 0)
        || (expected == 0 && residue != 0)
    {
        return Err(SenseCode::InvalidParameter);
    }

    if policy.needs_ready {
        let lun = ctx.current_lun();
        match lun.last_sense() {
            // reported until REQUEST SENSE picks it up
            SenseCode::MediaChanged => return Err(SenseCode::MediaChanged),
            _ if !lun.is_ready() => return Err(SenseCode::NoMedia),
            _ => lun.set_sense(SenseCode::Ok),
        }
    }

    if policy.exact_len {
        Ok(expected)
    } else {
        let actual = min(expected, residue);
        ctx.command.residue -= actual;
        Ok(actual)
    }
}

fn respond<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
    policy: Policy,
    len: usize,
) -> Result<Dispatch, SenseCode> {
    let actual = check(ctx, policy, len as u32)?;
    Ok(Dispatch::Respond(actual as usize))
}

fn block_transfer_len<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
    blocks: u16,
) -> Result<u32, SenseCode> {
    let block_size = ctx.current_lun().block_size();
    u32::try_from(blocks as u64 * block_size as u64).map_err(|_| SenseCode::InvalidParameter)
}

fn write_standard_inquiry<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
) -> usize {
    let identity = &ctx.identity;
    let buf = &mut ctx.response[..STD_INQUIRY_LEN];
    buf.fill(0);
    buf[0] = 0x00; // direct access block device
    buf[1] = if identity.removable { 0x80 } else { 0x00 };
    buf[2] = 0x06; // SPC-4
    buf[3] = 0x02; // response data format
    buf[4] = (STD_INQUIRY_LEN - 5) as u8;
    buf[8..16].copy_from_slice(&identity.vendor);
    buf[16..32].copy_from_slice(&identity.product);
    buf[32..36].copy_from_slice(&identity.revision);
    // 20 vendor specific and 2 reserved bytes
    buf[58..66].copy_from_slice(&VERSION_DESCRIPTORS);
    STD_INQUIRY_LEN
}

fn write_vpd_page<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
    page_code: u8,
) -> Result<usize, SenseCode> {
    let lun = ctx.command.lun;
    let identity = &ctx.identity;
    let buf = &mut ctx.response;

    let len = match page_code {
        VPD_SUPPORTED_PAGES => {
            let pages = [
                VPD_SUPPORTED_PAGES,
                VPD_SERIAL_NUMBER,
                VPD_DEVICE_IDENTIFICATION,
                VPD_BLOCK_LIMITS,
            ];
            buf[4..8].copy_from_slice(&pages);
            4 + pages.len()
        }
        VPD_SERIAL_NUMBER => {
            buf[4..16].copy_from_slice(&identity.serial);
            16
        }
        VPD_DEVICE_IDENTIFICATION => {
            // binary EUI-64 designator associated with the logical unit
            buf[4..8].copy_from_slice(&[0x01, 0x02, 0x00, 0x08]);
            buf[8..16].copy_from_slice(&identity.eui64);
            buf[15] = buf[15].wrapping_add(lun);
            16
        }
        VPD_BLOCK_LIMITS => {
            let buf = &mut buf[..VPD_BLOCK_LIMITS_LEN];
            buf.fill(0);
            buf[6..8].copy_from_slice(&0x0800u16.to_be_bytes()); // optimal transfer granularity
            buf[8..12].copy_from_slice(&0x4000u32.to_be_bytes()); // maximum transfer length
            buf[12..16].copy_from_slice(&0x4000u32.to_be_bytes()); // optimal transfer length
            buf[16..20].copy_from_slice(&0x4000u32.to_be_bytes()); // maximum prefetch length
            VPD_BLOCK_LIMITS_LEN
        }
        _ => return Err(SenseCode::InvalidFieldInCbw),
    };

    buf[0] = 0x00;
    buf[1] = page_code;
    buf[2..4].copy_from_slice(&((len - 4) as u16).to_be_bytes());
    Ok(len)
}

fn write_mode_sense<S: BackingStore, const LUNS: usize>(
    ctx: &mut TransportContext<S, LUNS>,
    page_control: PageControl,
    page_code: u8,
) -> Result<usize, SenseCode> {
    if page_control == PageControl::SavedValues {
        return Err(SenseCode::SavePageNotSupported);
    }
    let writable = ctx.current_lun().is_writable();
    let buf = &mut ctx.response[..MODE_HEADER_LEN + CACHING_PAGE_LEN];
    buf.fill(0);

    let len = match page_code {
        MODE_PAGE_CACHING | MODE_PAGE_ALL => {
            let page = &mut buf[MODE_HEADER_LEN..];
            if page_control == PageControl::ChangeableValues {
                page.copy_from_slice(&CACHING_PAGE_CHANGEABLE);
            } else {
                page[0] = MODE_PAGE_CACHING;
                page[1] = (CACHING_PAGE_LEN - 2) as u8;
            }
            MODE_HEADER_LEN + CACHING_PAGE_LEN
        }
        _ => MODE_HEADER_LEN,
    };

    buf[0] = (len - 1) as u8; // mode data length
    buf[2] = if writable { 0x00 } else { MODE_WRITE_PROTECT };
    Ok(len)
}
