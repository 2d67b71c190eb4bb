// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The AUX endpoint: seek-addressed byte I/O on a DPCD address space.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use drv_synaptics_mst_api::{RcCap, REG_RC_CAP, REG_VENDOR_ID, SYNAPTICS_OUI};
use log::debug;

use crate::MstError;

/// Byte-level access to a DPCD address space.
///
/// Implemented by [`AuxDevice`] over the kernel's AUX character devices;
/// tests substitute an in-memory hub model. Transfers are exact: a short
/// read or write is an error, never accumulated across calls.
pub trait AuxNode {
    fn read_at(&mut self, offset: u32, buf: &mut [u8])
        -> Result<(), MstError>;
    fn write_at(&mut self, offset: u32, buf: &[u8]) -> Result<(), MstError>;
}

/// Path of the AUX character device with the given index, of which the
/// kernel exposes up to three.
pub fn aux_node_path(index: u8) -> Option<&'static str> {
    match index {
        0 => Some("/dev/drm_dp_aux0"),
        1 => Some("/dev/drm_dp_aux1"),
        2 => Some("/dev/drm_dp_aux2"),
        _ => None,
    }
}

// One RC register window and one addressing context exist per process, so
// at most one endpoint may be open at a time.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// An open AUX endpoint that answered the Synaptics vendor probe.
///
/// The endpoint is closed when the value is dropped; [`AuxDevice::close`]
/// exists for making that explicit at the end of a session. Double-close
/// cannot be expressed.
pub struct AuxDevice {
    file: File,
    path: String,
}

impl AuxDevice {
    /// Opens `path` read-write and probes it for a Synaptics MST hub: bit
    /// 2 of `REG_RC_CAP` must be set and the three OUI bytes must read
    /// `90 CC 24`. Any probe miss, including an unreadable register,
    /// reports [`MstError::NotSynaptics`] and the handle is dropped.
    pub fn open(path: &str) -> Result<Self, MstError> {
        if SESSION_ACTIVE.swap(true, Ordering::Acquire) {
            return Err(MstError::SessionBusy);
        }

        let file = match OpenOptions::new().read(true).write(true).open(path)
        {
            Ok(file) => file,
            Err(source) => {
                SESSION_ACTIVE.store(false, Ordering::Release);
                return Err(MstError::AuxOpen {
                    path: path.to_owned(),
                    source,
                });
            }
        };

        // From here on dropping `dev` releases the session slot.
        let mut dev = AuxDevice {
            file,
            path: path.to_owned(),
        };

        let not_synaptics = || MstError::NotSynaptics {
            path: path.to_owned(),
        };

        let mut cap = [0u8; 1];
        if dev.read_at(REG_RC_CAP, &mut cap).is_err()
            || !RcCap::from_bits_truncate(cap[0])
                .contains(RcCap::RC_CAPABLE)
        {
            return Err(not_synaptics());
        }

        let mut oui = [0u8; 3];
        if dev.read_at(REG_VENDOR_ID, &mut oui).is_err()
            || oui != SYNAPTICS_OUI
        {
            return Err(not_synaptics());
        }

        debug!("{path}: Synaptics MST hub present");
        Ok(dev)
    }

    /// Opens the AUX node with the given index (`/dev/drm_dp_aux0..2`).
    pub fn open_index(index: u8) -> Result<Self, MstError> {
        let path = aux_node_path(index).ok_or_else(|| MstError::AuxOpen {
            path: format!("/dev/drm_dp_aux{index}"),
            source: std::io::ErrorKind::NotFound.into(),
        })?;
        Self::open(path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Releases the endpoint.
    pub fn close(self) {}
}

impl Drop for AuxDevice {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

impl AuxNode for AuxDevice {
    fn read_at(
        &mut self,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), MstError> {
        let pos = self
            .file
            .seek(SeekFrom::Start(offset.into()))
            .map_err(|_| MstError::SeekFail { offset })?;
        if pos != u64::from(offset) {
            return Err(MstError::SeekFail { offset });
        }
        let n = self.file.read(buf).map_err(|source| {
            MstError::AccessFail {
                offset,
                source: Some(source),
            }
        })?;
        if n != buf.len() {
            return Err(MstError::AccessFail {
                offset,
                source: None,
            });
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u32, buf: &[u8]) -> Result<(), MstError> {
        let pos = self
            .file
            .seek(SeekFrom::Start(offset.into()))
            .map_err(|_| MstError::SeekFail { offset })?;
        if pos != u64::from(offset) {
            return Err(MstError::SeekFail { offset });
        }
        let n = self.file.write(buf).map_err(|source| {
            MstError::AccessFail {
                offset,
                source: Some(source),
            }
        })?;
        if n != buf.len() {
            return Err(MstError::AccessFail {
                offset,
                source: None,
            });
        }
        Ok(())
    }
}
