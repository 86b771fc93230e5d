#![allow(dead_code)]

use crate::common::bbb::{Cbw, Csw, DataDirection, DummyUsbBus};
use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Duration;
use usb_device::bus::UsbBusAllocator;
use usb_device::device::{UsbDeviceBuilder, UsbVidPid};
use usbd_msc::lun::{LogicalUnit, RamDisk};
use usbd_msc::power::LinkPower;
use usbd_msc::transport::bbb::BulkOnly;
use usbd_msc::transport::event::BusEvent;

pub mod bbb;
pub mod scsi;

pub const PACKET_SIZE: [u16; 4] = [8, 16, 32, 64];
pub const BLOCK_SIZE: u32 = 512;
pub const BLOCKS: u32 = 8;

const TIMEOUT: Duration = Duration::from_secs(5);

pub type Disk = RamDisk<Vec<u8>>;
pub type Msc<'a, const LUNS: usize> =
    BulkOnly<'a, DummyUsbBus, [u8; 1024], Disk, PowerLog, LUNS>;

/// Records what the transport asked of the link
#[derive(Default, Debug)]
pub struct PowerLog {
    pub lpm_enabled: Option<bool>,
    pub suspends: usize,
    pub wakes: usize,
}

impl LinkPower for PowerLog {
    fn suspend(&mut self) {
        self.suspends += 1;
    }

    fn set_lpm_enabled(&mut self, enabled: bool) {
        self.lpm_enabled = Some(enabled);
    }

    fn wake_link(&mut self) {
        self.wakes += 1;
    }
}

/// A disk whose every byte holds the index of its block
pub fn disk() -> LogicalUnit<Disk> {
    let data = (0..BLOCK_SIZE * BLOCKS)
        .map(|i| (i / BLOCK_SIZE) as u8)
        .collect();
    LogicalUnit::new(RamDisk::new(data), BLOCK_SIZE, BLOCKS)
}

pub struct Device<'a, const LUNS: usize> {
    pub bus: DummyUsbBus,
    pub msc: Msc<'a, LUNS>,
    pub packet_size: u16,
}

impl<const LUNS: usize> Device<'_, LUNS> {
    /// Drive Device until no pending IO operations left
    pub fn dev_io(&mut self) {
        let mut bytes_processed = self.bus.bytes_processed();
        loop {
            self.msc.process();
            let new = self.bus.bytes_processed();
            if new == bytes_processed {
                break;
            } else {
                bytes_processed = new;
            }
        }
    }

    /// Runs a command which is expected to end with a CSW right after its data
    pub fn exec(&mut self, cbw: Cbw, data_out: &[u8], data_in_len: usize) -> (Vec<u8>, Csw) {
        self.bus.write_cbw(cbw);
        self.bus.write_data(data_out);
        self.dev_io();
        let data = self.bus.read_n_bytes(data_in_len);
        self.dev_io();
        let csw = self.bus.read_cs().expect("no CSW");
        self.dev_io();
        (data, csw)
    }

    /// REQUEST SENSE on `lun`
    pub fn sense(&mut self, lun: u8) -> (u8, u8, u8) {
        let mut cbw = Cbw::new(18, DataDirection::In, scsi::request_sense(18));
        cbw.lun = lun;
        let (data, csw) = self.exec(cbw, &[], 18);
        assert_eq!(bbb::CommandStatus::Passed, csw.status);
        scsi::sense_triple(&data)
    }

    pub fn test_unit_ready(&mut self, lun: u8) -> Csw {
        let mut cbw = Cbw::new(0, DataDirection::Out, scsi::test_unit_ready());
        cbw.lun = lun;
        self.exec(cbw, &[], 0).1
    }
}

/// Runs `test` on a freshly configured device for every packet size
pub fn run<const LUNS: usize>(
    luns: fn() -> [LogicalUnit<Disk>; LUNS],
    test: fn(&mut Device<'_, LUNS>),
) {
    timeout(TIMEOUT, move || {
        for packet_size in PACKET_SIZE {
            let bus = DummyUsbBus::new();
            let usb_bus = UsbBusAllocator::new(bus.clone());
            let msc = BulkOnly::new(
                &usb_bus,
                packet_size,
                luns(),
                [0u8; 1024],
                [0u8; 1024],
                PowerLog::default(),
            )
            .unwrap();
            let _usb_dev = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(0xabcd, 0xabcd)).build();

            let mut device = Device {
                bus,
                msc,
                packet_size,
            };
            device.msc.bus_event(BusEvent::Configured);
            device.dev_io();

            test(&mut device);
        }
    });
}

pub fn timeout<F, T>(timeout: Duration, f: F)
where
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = sync_channel(0);
    thread::spawn(move || {
        f();
        tx.send(()).unwrap();
    });
    rx.recv_timeout(timeout).expect("timeout");
}
