//! State shared by the transport and the command dispatcher

use crate::identity::Identity;
use crate::lun::{BackingStore, LogicalUnit};
use crate::sense::SenseCode;
use crate::transport::wrapper::CommandStatusWrapper;
use crate::transport::{CommandStatus, DataDirection};

/// Longest fixed response a command may produce (standard INQUIRY data)
pub const RESPONSE_MAX_LEN: usize = 96;

/// Bookkeeping of the command in flight
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandState {
    pub tag: u32,
    pub direction: DataDirection,
    pub lun: u8,
    /// Bytes requested by the host and not transferred yet
    pub residue: u32,
    pub status: CommandStatus,
}

impl CommandState {
    pub(crate) fn csw(&self) -> CommandStatusWrapper {
        CommandStatusWrapper {
            tag: self.tag,
            residue: self.residue,
            status: self.status,
        }
    }
}

/// Logical Units plus everything the transport knows about the current command
pub struct TransportContext<S, const LUNS: usize> {
    pub(crate) luns: [LogicalUnit<S>; LUNS],
    pub(crate) command: CommandState,
    pub(crate) busy: bool,
    pub(crate) identity: Identity,
    pub(crate) response: [u8; RESPONSE_MAX_LEN],
}

impl<S: BackingStore, const LUNS: usize> TransportContext<S, LUNS> {
    pub fn new(luns: [LogicalUnit<S>; LUNS]) -> Self {
        Self {
            luns,
            command: CommandState::default(),
            busy: false,
            identity: Identity::default(),
            response: [0u8; RESPONSE_MAX_LEN],
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn lun(&self, lun: u8) -> Option<&LogicalUnit<S>> {
        self.luns.get(lun as usize)
    }

    pub fn lun_mut(&mut self, lun: u8) -> Option<&mut LogicalUnit<S>> {
        self.luns.get_mut(lun as usize)
    }

    pub fn command(&self) -> &CommandState {
        &self.command
    }

    /// Whether a command is between its CBW and its CSW
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// First `len` bytes of the last fixed response
    pub fn response(&self, len: usize) -> &[u8] {
        &self.response[..len.min(RESPONSE_MAX_LEN)]
    }

    /// Marks the current command as failed and records `sense` on the addressed LUN
    pub(crate) fn fail(&mut self, sense: SenseCode) {
        self.command.status = CommandStatus::Failed;
        if let Some(lun) = self.luns.get_mut(self.command.lun as usize) {
            lun.set_sense(sense);
        }
    }

    /// LUN addressed by the current command
    ///
    /// The dispatcher checks the index before any handler runs.
    pub(crate) fn current_lun(&mut self) -> &mut LogicalUnit<S> {
        let index = (self.command.lun as usize).min(LUNS.saturating_sub(1));
        &mut self.luns[index]
    }

    pub(crate) fn end_command(&mut self) {
        self.command = CommandState::default();
        self.busy = false;
    }

    /// Bus reset: every LUN reports a reset once, stopped units start again
    pub(crate) fn bus_reset(&mut self) {
        self.end_command();
        self.luns.iter_mut().for_each(LogicalUnit::power_on_reset);
    }

    /// A new configuration restarts stopped units
    pub(crate) fn configure(&mut self) {
        self.end_command();
        self.luns.iter_mut().for_each(|lun| lun.set_stopped(false));
    }
}
