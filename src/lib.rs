//! USB Mass Storage Bulk-Only Transport for [usb-device]
//!
//! A complete device side of the USB Mass Storage class: [Bulk Only] transport, a
//! [SCSI] transparent command set and up to 16 [Logical Units] backed by any
//! [BackingStore].
//!
//! # Layout
//! * [Bulk Only] - CBW/CSW handling, data stage streaming, error recovery
//! * [SCSI] - command decoding, validation and fixed responses
//! * [Buffer Pipe] - double buffered data path between the endpoints and the transport
//! * [Sense] - sense codes reported by REQUEST SENSE
//! * [Link power] - hooks for low power link states
//!
//! # Features
//! | Feature | Description                           |
//! | ------- |---------------------------------------|
//! | `defmt` | Enable logging via [defmt](https://crates.io/crates/defmt) crate |
//!
//! [usb-device]: https://crates.io/crates/usb-device
//! [SCSI]: crate::subclass::scsi
//! [Bulk Only]: crate::transport::bbb
//! [Logical Units]: crate::lun::LogicalUnit
//! [BackingStore]: crate::lun::BackingStore
//! [Buffer Pipe]: crate::pipe
//! [Sense]: crate::sense
//! [Link power]: crate::power

#![no_std]

pub mod context;
pub(crate) mod fmt;
pub mod identity;
pub mod lun;
pub mod pipe;
pub mod power;
pub mod sense;
pub mod subclass;
pub mod transport;

/// USB Mass Storage Class code
pub const CLASS_MASS_STORAGE: u8 = 0x08;
