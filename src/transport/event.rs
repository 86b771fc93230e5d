//! Events driving the transport worker
//!
//! Completion callbacks and bus notifications never touch the transport state directly.
//! They post an [Event] and the worker consumes the queue in order.

use crate::fmt::warning;
use heapless::Deque;
use usb_device::device::UsbDeviceState;
use usb_device::UsbDirection;

/// Capacity of the event queue
pub const EVENT_QUEUE_LEN: usize = 16;

/// Bus level notification
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    /// USB bus reset
    Reset,
    /// Cable attached
    Connect,
    /// Cable detached
    Disconnect,
    Suspend,
    Resume,
    /// The host has selected a configuration
    Configured,
    /// The host has selected configuration 0
    Deconfigured,
}

impl BusEvent {
    /// Translates a [UsbDeviceState] change reported by `UsbDevice::state()`
    ///
    /// Returns `None` if the change means nothing to the transport.
    pub fn from_state_change(prev: UsbDeviceState, now: UsbDeviceState) -> Option<BusEvent> {
        use UsbDeviceState::*;

        match (prev, now) {
            (prev, now) if prev == now => None,
            (_, Suspend) => Some(BusEvent::Suspend),
            (Suspend, _) => Some(BusEvent::Resume),
            (_, Configured) => Some(BusEvent::Configured),
            (Configured, Addressed) => Some(BusEvent::Deconfigured),
            (_, Default) => Some(BusEvent::Reset),
            _ => None,
        }
    }
}

/// Work item of the transport worker
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Event {
    Bus(BusEvent),
    /// Bulk-Only Mass Storage Reset has been accepted
    BotReset,
    /// A buffer has been filled while waiting for a CBW
    CbwReceived,
    /// A buffer has been filled during a data stage
    DataReceived,
    /// A buffer has been drained
    DataSent,
    /// The endpoint reported an error while moving packets
    TransferFailed(UsbDirection),
    /// A command completed without a data stage or failed validation
    DispatchDone,
    MediaChanged { lun: u8, present: bool },
}

impl Event {
    /// Whether the event belongs to the datapath and is void once it is reset
    pub(crate) fn is_transfer(&self) -> bool {
        matches!(
            self,
            Event::CbwReceived
                | Event::DataReceived
                | Event::DataSent
                | Event::TransferFailed(_)
                | Event::DispatchDone
        )
    }
}

pub(crate) struct EventQueue {
    inner: Deque<Event, EVENT_QUEUE_LEN>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Deque::new(),
        }
    }

    /// Returns `false` if the queue is full and the event has been dropped
    pub(crate) fn post(&mut self, event: Event) -> bool {
        match self.inner.push_back(event) {
            Ok(()) => true,
            Err(event) => {
                warning!("usb: bbb: Event queue full, dropped: {}", event);
                false
            }
        }
    }

    pub(crate) fn next(&mut self) -> Option<Event> {
        self.inner.pop_front()
    }

    /// Drops pending transfer events, bus and media events stay in order
    pub(crate) fn drop_transfers(&mut self) {
        for _ in 0..self.inner.len() {
            if let Some(event) = self.inner.pop_front() {
                if !event.is_transfer() {
                    // there is room, one slot was just freed
                    let _ = self.inner.push_back(event);
                }
            }
        }
    }
}
