//! Bulk Only Transport (BBB/BOT)
//!
//! [BulkOnly] is a usb-device class running the whole command cycle: it receives CBWs,
//! hands them to the [SCSI] command set, streams block data through a pair of
//! [BufferPipe]s and answers with CSWs.
//!
//! Endpoint activity only moves packets between the endpoints and the pipes. Whenever
//! a buffer is completed an [Event] is queued and [BulkOnly::process] consumes the queue
//! in order, so the transport state is only ever changed from one place.
//!
//! [SCSI]: crate::subclass::scsi

use crate::context::{CommandState, TransportContext, RESPONSE_MAX_LEN};
use crate::fmt::{error, info, trace, warning};
use crate::identity::Identity;
use crate::lun::{BackingStore, LogicalUnit};
use crate::pipe::{BufferPipe, FromHost, Progress, ToHost};
use crate::power::LinkPower;
use crate::sense::SenseCode;
use crate::subclass::scsi::{dispatch, Dispatch, SUBCLASS_SCSI};
use crate::transport::event::{BusEvent, Event, EventQueue};
use crate::transport::wrapper::{CommandBlockWrapper, CBW_LEN, CSW_LEN};
use crate::transport::{CommandStatus, DataDirection};
use crate::CLASS_MASS_STORAGE;
use core::borrow::BorrowMut;
use core::cmp::min;
use usb_device::bus::{InterfaceNumber, UsbBus, UsbBusAllocator};
use usb_device::class::{ControlIn, ControlOut, UsbClass};
use usb_device::class_prelude::DescriptorWriter;
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::endpoint::{Endpoint, EndpointAddress, In, Out};
use usb_device::{UsbDirection, UsbError};

/// Bulk Only Transport interface protocol
pub(crate) const TRANSPORT_BBB: u8 = 0x50;

const CLASS_SPECIFIC_BULK_ONLY_MASS_STORAGE_RESET: u8 = 0xFF;
const CLASS_SPECIFIC_GET_MAX_LUN: u8 = 0xFE;

/// Number of buffers in each direction
pub const PIPE_DEPTH: usize = 2;

const MAX_LUNS: usize = 16;
const PACKET_SIZES: [u16; 6] = [8, 16, 32, 64, 512, 1024];

/// Bulk Only Transport error
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BulkOnlyError {
    /// Number of Logical Units out of 1..=16. Refer to USB BBB doc
    InvalidMaxLun,
    /// Not a valid bulk endpoint packet size
    InvalidPacketSize,
    /// A pipe buffer cannot fit a CBW, a single packet or the longest fixed response
    BufferTooSmall,
    /// A pipe buffer is not a whole number of packets
    BufferMisaligned,
    /// Malformed class specific request
    InvalidRequest,
}

/// Bulk Only Transport state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportState {
    /// Not configured by the host
    Inactive,
    /// Waiting for a CBW
    CommandWait,
    /// Command execution and its data stage
    Data,
    /// CSW queued
    Status,
    /// An invalid CBW has been received. Both endpoints stay halted until a
    /// Bulk-Only Mass Storage Reset
    PhaseError,
}

/// Progress of the data stage
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum DataPhase {
    None,
    /// A fixed response is in the IN pipe
    Response,
    /// `remaining` bytes still to be queued to the host
    Read { offset: u64, remaining: u32 },
    /// `remaining` bytes still to be received from the host
    Write { offset: u64, remaining: u32 },
    Discard { remaining: u32 },
}

/// Bulk Only Transport with the SCSI command set
///
/// Owns both bulk endpoints, a double buffered pipe in each direction and `LUNS`
/// [LogicalUnit]s. The class callbacks of [UsbClass] only move packets, the application
/// is expected to call [process] regularly, usually right after `UsbDevice::poll`.
/// Bus level changes that usb-device doesn't report to classes are passed in with
/// [bus_event].
///
/// [process]: crate::transport::bbb::BulkOnly::process
/// [bus_event]: crate::transport::bbb::BulkOnly::bus_event
pub struct BulkOnly<'alloc, Bus: UsbBus, Buf: BorrowMut<[u8]>, S, P, const LUNS: usize> {
    interface: InterfaceNumber,
    in_ep: Endpoint<'alloc, Bus, In>,
    out_ep: Endpoint<'alloc, Bus, Out>,
    in_halted: bool,
    out_halted: bool,
    in_pipe: BufferPipe<ToHost, Buf, PIPE_DEPTH>,
    out_pipe: BufferPipe<FromHost, Buf, PIPE_DEPTH>,
    events: EventQueue,
    state: TransportState,
    configured: bool,
    phase: DataPhase,
    ctx: TransportContext<S, LUNS>,
    power: P,
}

impl<'alloc, Bus, Buf, S, P, const LUNS: usize> BulkOnly<'alloc, Bus, Buf, S, P, LUNS>
where
    Bus: UsbBus,
    Buf: BorrowMut<[u8]>,
    S: BackingStore,
    P: LinkPower,
{
    /// Creates a Bulk Only Transport instance
    ///
    /// # Arguments
    /// * `alloc` - [UsbBusAllocator]
    /// * `packet_size` - Maximum USB packet size. Allowed values: 8,16,32,64,512,1024
    /// * `luns` - Logical Units, addressed by their index
    /// * `in_buf`, `out_buf` - pipe storage, each split into [PIPE_DEPTH] buffers. Every
    ///   buffer is **required** to be a whole number of packets and to fit a `CBW` and
    ///   the longest fixed response. It is **recommended** that it fits at least one block
    /// * `power` - [LinkPower] hooks, `()` if not needed
    ///
    /// # Errors
    /// * [InvalidMaxLun]
    /// * [InvalidPacketSize]
    /// * [BufferTooSmall]
    /// * [BufferMisaligned]
    ///
    /// # Panics
    /// Panics if endpoint allocations fails.
    ///
    /// [InvalidMaxLun]: crate::transport::bbb::BulkOnlyError::InvalidMaxLun
    /// [InvalidPacketSize]: crate::transport::bbb::BulkOnlyError::InvalidPacketSize
    /// [BufferTooSmall]: crate::transport::bbb::BulkOnlyError::BufferTooSmall
    /// [BufferMisaligned]: crate::transport::bbb::BulkOnlyError::BufferMisaligned
    /// [UsbBusAllocator]: usb_device::bus::UsbBusAllocator
    pub fn new(
        alloc: &'alloc UsbBusAllocator<Bus>,
        packet_size: u16,
        luns: [LogicalUnit<S>; LUNS],
        in_buf: Buf,
        out_buf: Buf,
        power: P,
    ) -> Result<Self, BulkOnlyError> {
        if !(1..=MAX_LUNS).contains(&LUNS) {
            return Err(BulkOnlyError::InvalidMaxLun);
        }
        if !PACKET_SIZES.contains(&packet_size) {
            return Err(BulkOnlyError::InvalidPacketSize);
        }

        let in_pipe = BufferPipe::new(in_buf);
        let out_pipe = BufferPipe::new(out_buf);

        let packet_size_usize = packet_size as usize;
        let min_len = CBW_LEN.max(packet_size_usize).max(RESPONSE_MAX_LEN);
        for slot_len in [in_pipe.slot_len(), out_pipe.slot_len()] {
            if slot_len < min_len {
                return Err(BulkOnlyError::BufferTooSmall);
            }
            if slot_len % packet_size_usize != 0 {
                return Err(BulkOnlyError::BufferMisaligned);
            }
        }

        Ok(BulkOnly {
            interface: alloc.interface(),
            in_ep: alloc.bulk(packet_size),
            out_ep: alloc.bulk(packet_size),
            in_halted: false,
            out_halted: false,
            in_pipe,
            out_pipe,
            events: EventQueue::new(),
            state: TransportState::Inactive,
            configured: false,
            phase: DataPhase::None,
            ctx: TransportContext::new(luns),
            power,
        })
    }

    /// Replaces the INQUIRY identification data
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.ctx.identity = identity;
        self
    }

    /// Drives the transport
    ///
    /// Moves whatever packets the endpoints allow and handles every pending event.
    pub fn process(&mut self) {
        self.pump();
        while let Some(event) = self.events.next() {
            self.handle(event);
            self.pump();
        }
    }

    /// Reports a bus level change, handled by the next [process]
    ///
    /// `UsbDevice::state()` changes can be translated with [BusEvent::from_state_change].
    ///
    /// [process]: crate::transport::bbb::BulkOnly::process
    pub fn bus_event(&mut self, event: BusEvent) -> bool {
        self.events.post(Event::Bus(event))
    }

    /// Reports media insertion or removal on `lun`, handled by the next [process]
    ///
    /// The unit reports MEDIUM CHANGED to the next command that needs media.
    ///
    /// [process]: crate::transport::bbb::BulkOnly::process
    pub fn notify_media_change(&mut self, lun: u8, present: bool) -> bool {
        self.events.post(Event::MediaChanged { lun, present })
    }

    /// CLEAR_FEATURE(ENDPOINT_HALT) addressed to one of the bulk endpoints
    ///
    /// Returns `false` if `ep` is not ours. In the phase error state the halt is kept,
    /// only a Bulk-Only Mass Storage Reset clears it. BOT 6.6.1
    pub fn clear_halt(&mut self, ep: EndpointAddress) -> bool {
        let is_in = ep == self.in_ep.address();
        if !is_in && ep != self.out_ep.address() {
            return false;
        }

        if self.state == TransportState::PhaseError {
            info!("usb: bbb: Phase error, keep halt");
            return true;
        }

        if is_in {
            info!("usb: bbb: Unstall IN ep");
            self.in_ep.unstall();
            self.in_halted = false;
        } else {
            info!("usb: bbb: Unstall OUT ep");
            self.out_ep.unstall();
            self.out_halted = false;
        }
        true
    }

    /// Bulk-Only Mass Storage Reset. BOT 3.1
    ///
    /// Drops the command in progress and clears both halts. Logical Unit state is kept.
    ///
    /// # Errors
    /// Returns [BulkOnlyError::InvalidRequest] if the request fields are not as required.
    pub fn bot_reset(&mut self, value: u16, index: u16, length: u16) -> Result<(), BulkOnlyError> {
        if value != 0 || index != self.interface_index() || length != 0 {
            return Err(BulkOnlyError::InvalidRequest);
        }

        info!("usb: bbb: Bulk-Only Mass Storage Reset");
        self.reset_datapath();
        self.events.post(Event::BotReset);
        Ok(())
    }

    /// Highest Logical Unit index. BOT 3.2
    pub fn max_lun(&self) -> u8 {
        (LUNS - 1) as u8
    }

    /// Whether the link may enter a low power state
    ///
    /// Stays `false` between a CBW and its CSW.
    pub fn lpm_allowed(&self) -> bool {
        !self.ctx.is_busy()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Whether a command is between its CBW and its CSW
    pub fn is_busy(&self) -> bool {
        self.ctx.is_busy()
    }

    pub fn context(&self) -> &TransportContext<S, LUNS> {
        &self.ctx
    }

    pub fn lun(&self, lun: u8) -> Option<&LogicalUnit<S>> {
        self.ctx.lun(lun)
    }

    pub fn power(&self) -> &P {
        &self.power
    }

    /// Bulk endpoint addresses: (IN, OUT)
    pub fn endpoints(&self) -> (EndpointAddress, EndpointAddress) {
        (self.in_ep.address(), self.out_ep.address())
    }

    #[inline]
    fn packet_size(&self) -> usize {
        self.in_ep.max_packet_size() as usize // same for both In and Out EPs
    }

    #[inline]
    fn interface_index(&self) -> u16 {
        u8::from(self.interface) as u16
    }

    fn pump(&mut self) {
        self.service_out();
        self.service_in();
    }

    /// Reads packets into the OUT pipe
    fn service_out(&mut self) {
        if self.out_halted {
            return;
        }

        let packet_size = self.packet_size();
        let out_ep = &self.out_ep;
        loop {
            let progress = self
                .out_pipe
                .fill_packet(packet_size, |buf| match out_ep.read(buf) {
                    Ok(count) => Ok(count),
                    Err(UsbError::WouldBlock) => Ok(0),
                    Err(err) => Err(err),
                });

            match progress {
                Ok(Progress::Idle) => break,
                Ok(Progress::Packet) => {}
                Ok(Progress::Buffer) => {
                    let event = if self.state == TransportState::CommandWait {
                        Event::CbwReceived
                    } else {
                        Event::DataReceived
                    };
                    self.events.post(event);
                }
                Err(_err) => {
                    error!("usb: bbb: OUT ep failed: {}", _err);
                    self.events.post(Event::TransferFailed(UsbDirection::Out));
                    break;
                }
            }
        }
    }

    /// Writes packets from the IN pipe
    fn service_in(&mut self) {
        if self.in_halted {
            return;
        }

        let packet_size = self.packet_size();
        let in_ep = &self.in_ep;
        loop {
            let progress = self
                .in_pipe
                .drain_packet(packet_size, |packet| match in_ep.write(packet) {
                    Ok(count) => Ok(count),
                    Err(UsbError::WouldBlock) => Ok(0),
                    Err(err) => Err(err),
                });

            match progress {
                Ok(Progress::Idle) => break,
                Ok(Progress::Packet) => {}
                Ok(Progress::Buffer) => {
                    self.events.post(Event::DataSent);
                }
                Err(_err) => {
                    error!("usb: bbb: IN ep failed: {}", _err);
                    self.events.post(Event::TransferFailed(UsbDirection::In));
                    break;
                }
            }
        }
    }

    fn handle(&mut self, event: Event) {
        trace!("usb: bbb: Event: {}", event);
        match event {
            Event::Bus(bus) => self.handle_bus(bus),
            Event::BotReset => {
                if self.configured {
                    self.enter_cbw_wait();
                }
            }
            Event::CbwReceived => self.handle_cbw(),
            Event::DataReceived => self.handle_data_received(),
            Event::DataSent => self.handle_data_sent(),
            Event::TransferFailed(direction) => self.handle_transfer_failed(direction),
            Event::DispatchDone => self.finish_command(),
            Event::MediaChanged { lun, present } => match self.ctx.lun_mut(lun) {
                Some(unit) => unit.set_media_present(present),
                None => warning!("usb: bbb: Media change on unknown LUN: {}", lun),
            },
        }
    }

    fn handle_bus(&mut self, event: BusEvent) {
        info!("usb: bbb: Bus event: {}", event);
        match event {
            BusEvent::Reset | BusEvent::Connect | BusEvent::Disconnect => {
                self.configured = false;
                self.reset_datapath();
                self.ctx.bus_reset();
                self.enter_state(TransportState::Inactive);
            }
            BusEvent::Configured => {
                if !self.configured {
                    self.configured = true;
                    self.reset_datapath();
                    self.ctx.configure();
                    self.enter_cbw_wait();
                }
            }
            BusEvent::Deconfigured => {
                self.configured = false;
                self.reset_datapath();
                self.ctx.end_command();
                self.enter_state(TransportState::Inactive);
            }
            BusEvent::Suspend => self.power.suspend(),
            BusEvent::Resume => {}
        }
    }

    fn handle_cbw(&mut self) {
        if self.state != TransportState::CommandWait {
            return;
        }

        // one extra byte, so that an overlong CBW doesn't parse
        let mut raw = [0u8; CBW_LEN + 1];
        let len = {
            let Ok(mut grant) = self.out_pipe.acquire() else {
                return;
            };
            let data = grant.data();
            let len = min(data.len(), raw.len());
            raw[..len].copy_from_slice(&data[..len]);
            len
        };
        let raw = &raw[..len];

        match CommandBlockWrapper::from_le_bytes(raw) {
            Ok(cbw) => self.start_command(cbw),
            Err(_) => {
                // BOT 6.6.1
                warning!("usb: bbb: Invalid CBW, len: {}", len);
                let (tag, residue) = CommandBlockWrapper::salvage(raw);
                self.ctx.command = CommandState {
                    tag,
                    residue,
                    status: CommandStatus::PhaseError,
                    ..Default::default()
                };
                self.queue_csw();
            }
        }
    }

    fn start_command(&mut self, cbw: CommandBlockWrapper) {
        info!("usb: bbb: Recv CBW: {}", cbw);
        self.ctx.busy = true;
        self.power.set_lpm_enabled(false);
        self.power.wake_link();
        self.enter_state(TransportState::Data);

        match dispatch(&mut self.ctx, &cbw) {
            Dispatch::Status | Dispatch::Failed => {
                self.events.post(Event::DispatchDone);
            }
            Dispatch::Respond(len) => {
                self.phase = DataPhase::Response;
                self.queue_response(len);
            }
            Dispatch::ReadBlocks { offset, len } => {
                self.phase = DataPhase::Read {
                    offset,
                    remaining: len,
                };
                self.fill_in_pipe();
                self.check_data_done();
            }
            Dispatch::WriteBlocks { offset, len } => {
                self.phase = DataPhase::Write {
                    offset,
                    remaining: len,
                };
                self.out_pipe.arm(len as usize);
            }
            Dispatch::Discard(len) => {
                self.phase = DataPhase::Discard { remaining: len };
                self.out_pipe.arm(len as usize);
            }
        }
    }

    fn queue_response(&mut self, len: usize) {
        let queued = match self.in_pipe.acquire() {
            Ok(mut grant) => {
                grant.buf_mut()[..len].copy_from_slice(self.ctx.response(len));
                grant.commit(len).is_ok()
            }
            Err(_) => false,
        };

        if !queued {
            error!("usb: bbb: No buffer for response");
            self.ctx.command.residue += len as u32;
            self.ctx.fail(SenseCode::CrcError);
            self.finish_command();
        }
    }

    /// Queues as much of a block read as the IN pipe takes
    fn fill_in_pipe(&mut self) {
        while let DataPhase::Read { offset, remaining } = self.phase {
            if remaining == 0 {
                break;
            }
            let Ok(mut grant) = self.in_pipe.acquire() else {
                break;
            };

            let buf = grant.buf_mut();
            let len = min(remaining as usize, buf.len());
            let read = self
                .ctx
                .current_lun()
                .store_mut()
                .read(offset, &mut buf[..len]);

            if read.is_err() || grant.commit(len).is_err() {
                error!("usb: bbb: Read failed at offset: {}", offset);
                self.ctx.fail(SenseCode::ReadError);
                // whatever is queued still goes out
                self.phase = DataPhase::Read {
                    offset,
                    remaining: 0,
                };
                break;
            }

            self.ctx.command.residue -= len as u32;
            self.phase = DataPhase::Read {
                offset: offset + len as u64,
                remaining: remaining - len as u32,
            };
            trace!("usb: bbb: Data residue: {}", self.ctx.command.residue);
        }
    }

    fn handle_data_received(&mut self) {
        if self.state != TransportState::Data
            || !matches!(self.phase, DataPhase::Write { .. } | DataPhase::Discard { .. })
        {
            return;
        }

        let mut written = true;
        while let Ok(mut grant) = self.out_pipe.acquire() {
            let data = grant.data();
            written = match &mut self.phase {
                DataPhase::Write { offset, remaining } => {
                    let len = min(data.len(), *remaining as usize);
                    let result = self
                        .ctx
                        .current_lun()
                        .store_mut()
                        .write(*offset, &data[..len]);
                    if result.is_ok() {
                        *offset += len as u64;
                        *remaining -= len as u32;
                        self.ctx.command.residue -= len as u32;
                    }
                    result.is_ok()
                }
                DataPhase::Discard { remaining } => {
                    *remaining -= min(data.len(), *remaining as usize) as u32;
                    true
                }
                _ => true,
            };
            grant.discard();

            if !written {
                break;
            }
        }

        if !written {
            error!("usb: bbb: Write failed");
            self.out_pipe.reset();
            self.ctx.fail(SenseCode::WriteFault);
            self.finish_command();
            return;
        }

        if !self.check_data_done() && !self.out_pipe.is_armed() {
            // the host ended the transfer early with a short packet
            warning!("usb: bbb: Data stage ended early");
            self.ctx.fail(SenseCode::CrcError);
            self.finish_command();
        }
        trace!("usb: bbb: Data residue: {}", self.ctx.command.residue);
    }

    fn handle_data_sent(&mut self) {
        match self.state {
            TransportState::Data => {
                self.fill_in_pipe();
                self.check_data_done();
            }
            TransportState::Status if self.in_pipe.is_idle() => self.status_sent(),
            _ => {}
        }
    }

    fn handle_transfer_failed(&mut self, direction: UsbDirection) {
        match (self.state, direction) {
            (TransportState::Data, UsbDirection::In) => {
                let lost = self.in_pipe.reset();
                self.ctx.command.residue += lost as u32;
                self.ctx.fail(SenseCode::CrcError);
                self.finish_command();
            }
            (TransportState::Data, UsbDirection::Out) => {
                self.out_pipe.reset();
                self.ctx.fail(SenseCode::CrcError);
                self.finish_command();
            }
            (TransportState::CommandWait, UsbDirection::Out) => {
                self.out_pipe.reset();
                self.out_pipe.arm(CBW_LEN);
            }
            (TransportState::Status, UsbDirection::In) => {
                self.in_pipe.reset();
                self.enter_cbw_wait();
            }
            _ => {}
        }
    }

    /// Finishes the command once its data stage is complete
    fn check_data_done(&mut self) -> bool {
        let done = match self.phase {
            DataPhase::None => true,
            DataPhase::Response | DataPhase::Read { remaining: 0, .. } => self.in_pipe.is_idle(),
            DataPhase::Read { .. } => false,
            DataPhase::Write { remaining, .. } | DataPhase::Discard { remaining } => remaining == 0,
        };
        if done && self.state == TransportState::Data {
            self.finish_command();
        }
        done
    }

    /// Queues the CSW and halts the data endpoint if the host expects more data. BOT 6.7
    fn finish_command(&mut self) {
        if self.state != TransportState::Data {
            return;
        }

        self.phase = DataPhase::None;
        self.out_pipe.arm(0);
        self.queue_csw();

        let CommandState {
            direction, residue, ..
        } = self.ctx.command;
        if residue != 0 {
            match direction {
                DataDirection::In => self.stall_in_ep(),
                DataDirection::Out => self.stall_out_ep(),
            }
        }
    }

    fn queue_csw(&mut self) {
        let csw = self.ctx.command.csw();
        info!("usb: bbb: Send CSW: {}", csw);

        match self.in_pipe.acquire() {
            Ok(mut grant) => {
                grant.buf_mut()[..CSW_LEN].copy_from_slice(&csw.to_le_bytes());
                if let Err(_err) = grant.commit(CSW_LEN) {
                    error!("usb: bbb: CSW not queued: {}", _err);
                }
            }
            Err(_err) => error!("usb: bbb: No buffer for CSW: {}", _err),
        }

        self.ctx.busy = false;
        self.power.set_lpm_enabled(true);
        self.enter_state(TransportState::Status);
    }

    fn status_sent(&mut self) {
        if self.ctx.command.status == CommandStatus::PhaseError {
            self.stall_eps();
            self.enter_state(TransportState::PhaseError);
        } else {
            self.enter_cbw_wait();
        }
    }

    fn enter_cbw_wait(&mut self) {
        self.phase = DataPhase::None;
        self.ctx.end_command();
        self.out_pipe.arm(CBW_LEN);
        self.enter_state(TransportState::CommandWait);
        self.power.wake_link();
    }

    /// Drops everything in flight and clears both halts
    fn reset_datapath(&mut self) {
        self.events.drop_transfers();
        self.in_pipe.reset();
        self.out_pipe.reset();
        self.unstall_eps();
        self.phase = DataPhase::None;
        self.ctx.busy = false;
        self.power.set_lpm_enabled(true);
    }

    #[inline]
    fn stall_eps(&mut self) {
        self.stall_in_ep();
        self.stall_out_ep();
    }

    #[inline]
    fn stall_in_ep(&mut self) {
        info!("usb: bbb: Stall IN ep");
        self.in_ep.stall();
        self.in_halted = true;
    }

    #[inline]
    fn stall_out_ep(&mut self) {
        info!("usb: bbb: Stall OUT ep");
        self.out_ep.stall();
        self.out_halted = true;
    }

    #[inline]
    fn unstall_eps(&mut self) {
        self.in_ep.unstall();
        self.out_ep.unstall();
        self.in_halted = false;
        self.out_halted = false;
    }

    #[inline]
    fn enter_state(&mut self, state: TransportState) {
        info!("usb: bbb: Enter state: {}", state);
        self.state = state;
    }
}

impl<Bus, Buf, S, P, const LUNS: usize> UsbClass<Bus> for BulkOnly<'_, Bus, Buf, S, P, LUNS>
where
    Bus: UsbBus,
    Buf: BorrowMut<[u8]>,
    S: BackingStore,
    P: LinkPower,
{
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.iad(
            self.interface,
            1,
            CLASS_MASS_STORAGE,
            SUBCLASS_SCSI,
            TRANSPORT_BBB,
            None,
        )?;
        writer.interface(self.interface, CLASS_MASS_STORAGE, SUBCLASS_SCSI, TRANSPORT_BBB)?;
        writer.endpoint(&self.in_ep)?;
        writer.endpoint(&self.out_ep)?;
        Ok(())
    }

    fn reset(&mut self) {
        info!("usb: bbb: Recv reset");
        self.reset_datapath();
        self.events.post(Event::Bus(BusEvent::Reset));
    }

    fn poll(&mut self) {
        self.pump();
    }

    fn control_out(&mut self, xfer: ControlOut<Bus>) {
        let req = *xfer.request();

        match (req.request_type, req.recipient) {
            (RequestType::Standard, Recipient::Endpoint)
                if req.request == Request::CLEAR_FEATURE
                    && req.value == Request::FEATURE_ENDPOINT_HALT =>
            {
                let ep = EndpointAddress::from((req.index as u8) & 0x8F);
                // accepted even when the halt is kept, so the device doesn't clear it on its own
                if self.clear_halt(ep) {
                    if let Err(_err) = xfer.accept() {
                        error!("usb: bbb: Failed to accept Clear Feature: {}", _err);
                    }
                }
            }
            (RequestType::Class, Recipient::Interface)
                if req.request == CLASS_SPECIFIC_BULK_ONLY_MASS_STORAGE_RESET
                    && req.index == self.interface_index() =>
            {
                let result = match self.bot_reset(req.value, req.index, req.length) {
                    Ok(()) => xfer.accept(),
                    Err(_) => xfer.reject(),
                };
                if let Err(_err) = result {
                    error!("usb: bbb: Failed to answer Mass Storage Reset: {}", _err);
                }
            }
            _ => {}
        }
    }

    fn control_in(&mut self, xfer: ControlIn<Bus>) {
        let req = *xfer.request();

        // not interested in this request
        if !(req.request_type == RequestType::Class
            && req.recipient == Recipient::Interface
            && req.index == self.interface_index())
        {
            return;
        }

        info!("usb: bbb: Recv ctrl_in: {}", req.request);

        // BOT 3.2
        if req.request == CLASS_SPECIFIC_GET_MAX_LUN {
            let result = if req.value == 0 && req.length == 1 {
                xfer.accept_with(&[self.max_lun()])
            } else {
                xfer.reject()
            };
            if let Err(_err) = result {
                error!("usb: bbb: Failed to answer Get Max Lun: {}", _err);
            }
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr == self.out_ep.address() {
            self.service_out();
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr == self.in_ep.address() {
            self.service_in();
        }
    }
}
