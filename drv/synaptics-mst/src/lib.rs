// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Userspace driver for updating the firmware of Synaptics MST hubs over
//! the DisplayPort AUX channel.
//!
//! The kernel exposes one character device per AUX endpoint
//! (`/dev/drm_dp_aux*`) through which DPCD registers can be read and
//! written at byte granularity. On top of that sit, in order:
//!
//! * [`AuxDevice`] -- the open endpoint, including the Synaptics vendor
//!   probe ([`aux`]);
//! * [`Connection`] -- the vendor remote-control (RC) transport: chunked
//!   command staging, completion polling, cascade tunneling to downstream
//!   hubs, and RC enable/disable gating ([`connection`]);
//! * [`Device`] -- one hub's identity plus the enumeration and firmware
//!   update flows ([`device`]);
//! * [`FirmwareImage`] -- pre-flight validation of an update payload
//!   ([`image`]).
//!
//! Everything is synchronous and single-threaded; one session may be open
//! per process at a time.

pub mod aux;
pub mod connection;
pub mod device;
pub mod image;

pub use aux::{AuxDevice, AuxNode};
pub use connection::Connection;
pub use device::Device;
pub use image::FirmwareImage;

pub use drv_synaptics_mst_api::{BoardId, DeviceKind, RcStatus, UpdcCommand};

use std::io;
use thiserror::Error;

/// Errors produced by the driver.
///
/// Transport-level failures (`SeekFail`, `AccessFail`, `RcTimeout`,
/// `RcRejected`) bubble up unchanged so callers can see exactly what the
/// hub reported; the firmware pipeline wraps them in the stage-specific
/// kinds at the bottom.
#[derive(Debug, Error)]
pub enum MstError {
    /// Another AUX session is already open in this process. The protocol
    /// state (one RC register window, one addressing context) cannot be
    /// shared.
    #[error("an AUX session is already active in this process")]
    SessionBusy,

    #[error("failed to open AUX node `{path}`")]
    AuxOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The endpoint opened but did not pass the vendor probe: either the
    /// RC capability bit is missing or the OUI is not Synaptics.
    #[error("device on `{path}` is not a Synaptics MST hub")]
    NotSynaptics { path: String },

    #[error("seek to DPCD offset {offset:#x} failed")]
    SeekFail { offset: u32 },

    /// A read or write at the AUX endpoint failed or transferred fewer
    /// bytes than requested. Short transfers are never retried.
    #[error("AUX transfer at DPCD offset {offset:#x} failed")]
    AccessFail {
        offset: u32,
        #[source]
        source: Option<io::Error>,
    },

    /// The hub did not clear the RC busy bit within the completion window.
    #[error("RC command {cmd:#04x} timed out")]
    RcTimeout { cmd: u8 },

    /// The hub completed the RC command with a nonzero result. `code` is
    /// the raw result byte; [`RcStatus::from_code`] decodes the known
    /// values.
    #[error("hub rejected RC command {cmd:#04x} with status {code:#04x}")]
    RcRejected { cmd: u8, code: u8 },

    #[error("invalid firmware image: {0}")]
    ImageInvalid(&'static str),

    #[error(
        "firmware image is for board {image:#06x}, device is {device:#06x}"
    )]
    BoardMismatch { image: u16, device: u16 },

    /// The operation needs identity data that only
    /// [`Device::enumerate`](device::Device::enumerate) fills in.
    #[error("device has not been enumerated")]
    NotEnumerated,

    #[error("flash erase failed")]
    FlashEraseFailed(#[source] Box<MstError>),

    #[error("flash write failed at offset {offset:#06x}")]
    FlashWriteFailed {
        offset: u32,
        #[source]
        source: Box<MstError>,
    },

    #[error(
        "flash checksum mismatch after write: host {host:#010x}, \
         device {device:#010x}"
    )]
    FlashVerifyFailed { host: u32, device: u32 },
}
