// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory Synaptics hub (optionally a cascade of them) for driving
//! the driver end-to-end: a DPCD register file plus an interpreter for the
//! RC opcodes the update flow uses. Tunneled DPCD opcodes route into child
//! hubs, so nested RC commands execute exactly as they would on hardware.

use std::cell::RefCell;
use std::rc::Rc;

use drv_synaptics_mst::{AuxNode, MstError};
use drv_synaptics_mst_api::{
    ADDR_CUSTOMER_ID, ENABLE_RC_MAGIC, RC_CMD_BUSY, REG_CHIP_ID,
    REG_FIRMWARE_VERSION, REG_RC_CAP, REG_RC_CMD, REG_RC_DATA, REG_RC_LEN,
    REG_RC_OFFSET, REG_RC_RESULT, REG_VENDOR_ID, SYNAPTICS_OUI,
};

const DPCD_SIZE: usize = 0x800;
const EEPROM_SIZE: usize = 0x10000;
const DATA_WINDOW: usize = 32;

/// One event as seen by the simulated hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Raw AUX read at the endpoint.
    AuxRead { offset: u32, len: usize },
    /// Raw AUX write at the endpoint.
    AuxWrite { offset: u32, len: usize },
    /// An RC command executed by some hub in the tree.
    Rc {
        hub: &'static str,
        op: u8,
        offset: u32,
        len: u32,
    },
}

/// Event log shared by every hub in one simulated tree.
#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// `(hub, offset, len)` of every executed RC command matching `op`.
    pub fn rc_commands(&self, op: u8) -> Vec<(&'static str, u32, u32)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match *e {
                Event::Rc {
                    hub,
                    op: o,
                    offset,
                    len,
                } if o == op => Some((hub, offset, len)),
                _ => None,
            })
            .collect()
    }

    /// Hub names of executed RC commands matching `op`, in order.
    pub fn rc_targets(&self, op: u8) -> Vec<&'static str> {
        self.rc_commands(op).iter().map(|&(hub, ..)| hub).collect()
    }

    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }
}

struct Hub {
    name: &'static str,
    dpcd: Vec<u8>,
    eeprom: Vec<u8>,
    children: [Option<SimHub>; 4],
    rc_enabled: bool,
    /// Never clear the busy bit; commands hang forever.
    stuck_busy: bool,
    /// Queued one-shot failures for `WriteToEeprom`: `(offset, status)`.
    write_failures: Vec<(u32, u8)>,
    checksum_override: Option<u32>,
    log: EventLog,
}

/// Cloneable handle to a simulated hub; the handle for the root of a tree
/// doubles as the [`AuxNode`] endpoint.
#[derive(Clone)]
pub struct SimHub(Rc<RefCell<Hub>>);

impl SimHub {
    /// A hub that passes the Synaptics probe.
    pub fn synaptics(log: &EventLog, name: &'static str) -> Self {
        let mut dpcd = vec![0u8; DPCD_SIZE];
        dpcd[REG_RC_CAP as usize] = 0x04;
        dpcd[REG_VENDOR_ID as usize..REG_VENDOR_ID as usize + 3]
            .copy_from_slice(&SYNAPTICS_OUI);
        SimHub(Rc::new(RefCell::new(Hub {
            name,
            dpcd,
            eeprom: vec![0u8; EEPROM_SIZE],
            children: [None, None, None, None],
            rc_enabled: false,
            stuck_busy: false,
            write_failures: Vec::new(),
            checksum_override: None,
            log: log.clone(),
        })))
    }

    /// A hub that fails the probe (no RC capability, no OUI).
    pub fn blank(log: &EventLog, name: &'static str) -> Self {
        let hub = Self::synaptics(log, name);
        {
            let mut h = hub.0.borrow_mut();
            h.dpcd[REG_RC_CAP as usize] = 0;
            h.dpcd[REG_VENDOR_ID as usize..REG_VENDOR_ID as usize + 3]
                .copy_from_slice(&[0, 0, 0]);
        }
        hub
    }

    pub fn with_version(self, version: [u8; 3]) -> Self {
        self.0.borrow_mut().dpcd[REG_FIRMWARE_VERSION as usize..]
            [..3]
            .copy_from_slice(&version);
        self
    }

    pub fn with_chip_id(self, chip: [u8; 2]) -> Self {
        self.0.borrow_mut().dpcd[REG_CHIP_ID as usize..][..2]
            .copy_from_slice(&chip);
        self
    }

    pub fn with_customer_id(self, id: [u8; 2]) -> Self {
        self.0.borrow_mut().eeprom[ADDR_CUSTOMER_ID as usize..][..2]
            .copy_from_slice(&id);
        self
    }

    /// Hangs `child` off downstream port `port`.
    pub fn attach(&self, port: u8, child: &SimHub) {
        self.0.borrow_mut().children[port as usize] =
            Some(child.clone());
    }

    pub fn set_stuck_busy(&self) {
        self.0.borrow_mut().stuck_busy = true;
    }

    /// The next `WriteToEeprom` staged at exactly `offset` completes with
    /// `status` instead of writing.
    pub fn fail_write_once(&self, offset: u32, status: u8) {
        self.0.borrow_mut().write_failures.push((offset, status));
    }

    pub fn set_checksum_override(&self, sum: u32) {
        self.0.borrow_mut().checksum_override = Some(sum);
    }

    pub fn rc_enabled(&self) -> bool {
        self.0.borrow().rc_enabled
    }

    pub fn eeprom(&self, offset: usize, len: usize) -> Vec<u8> {
        self.0.borrow().eeprom[offset..offset + len].to_vec()
    }

    fn reg32(h: &Hub, base: u32) -> u32 {
        let base = base as usize;
        u32::from_le_bytes(h.dpcd[base..base + 4].try_into().unwrap())
    }

    fn complete(&self, status: u8) {
        let mut h = self.0.borrow_mut();
        h.dpcd[REG_RC_CMD as usize] &= !RC_CMD_BUSY;
        h.dpcd[REG_RC_RESULT as usize] = status;
    }

    fn window(&self, len: usize) -> Vec<u8> {
        let h = self.0.borrow();
        h.dpcd[REG_RC_DATA as usize..][..len.min(DATA_WINDOW)].to_vec()
    }

    fn fill_window(&self, data: &[u8]) {
        let mut h = self.0.borrow_mut();
        h.dpcd[REG_RC_DATA as usize..][..data.len()]
            .copy_from_slice(data);
    }

    fn dpcd_write(&self, offset: u32, buf: &[u8]) -> Result<(), MstError> {
        let end = offset as usize + buf.len();
        if end > DPCD_SIZE {
            return Err(MstError::AccessFail {
                offset,
                source: None,
            });
        }
        self.0.borrow_mut().dpcd[offset as usize..end]
            .copy_from_slice(buf);
        if offset == REG_RC_CMD && buf[0] & RC_CMD_BUSY != 0 {
            self.execute_rc();
        }
        Ok(())
    }

    fn dpcd_read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MstError> {
        let end = offset as usize + buf.len();
        if end > DPCD_SIZE {
            return Err(MstError::AccessFail {
                offset,
                source: None,
            });
        }
        buf.copy_from_slice(&self.0.borrow().dpcd[offset as usize..end]);
        Ok(())
    }

    fn execute_rc(&self) {
        let (op, offset, len, stuck, enabled, log) = {
            let h = self.0.borrow();
            (
                h.dpcd[REG_RC_CMD as usize] & !RC_CMD_BUSY,
                Self::reg32(&h, REG_RC_OFFSET),
                Self::reg32(&h, REG_RC_LEN),
                h.stuck_busy,
                h.rc_enabled,
                h.log.clone(),
            )
        };

        if stuck {
            return;
        }

        log.push(Event::Rc {
            hub: self.0.borrow().name,
            op,
            offset,
            len,
        });

        // Enable/disable pass the gate; everything else needs RC on.
        if !enabled && op != 0x01 && op != 0x02 {
            self.complete(4);
            return;
        }

        let status = match op {
            // EnableRc: requires the magic token.
            0x01 => {
                if len == 5 && self.window(5) == ENABLE_RC_MAGIC {
                    self.0.borrow_mut().rc_enabled = true;
                    0
                } else {
                    1
                }
            }
            // DisableRc
            0x02 => {
                self.0.borrow_mut().rc_enabled = false;
                0
            }
            // CalEepromChecksum over [offset, offset + len)
            0x11 => {
                let sum = {
                    let h = self.0.borrow();
                    h.checksum_override.unwrap_or_else(|| {
                        h.eeprom[offset as usize..(offset + len) as usize]
                            .iter()
                            .fold(0u32, |s, &b| s.wrapping_add(u32::from(b)))
                    })
                };
                self.fill_window(&sum.to_le_bytes());
                0
            }
            // FlashErase
            0x14 => {
                self.0.borrow_mut().eeprom.fill(0xff);
                0
            }
            // WriteToEeprom
            0x20 => {
                let failure = {
                    let mut h = self.0.borrow_mut();
                    match h
                        .write_failures
                        .iter()
                        .position(|&(o, _)| o == offset)
                    {
                        Some(i) => Some(h.write_failures.remove(i).1),
                        None => None,
                    }
                };
                match failure {
                    Some(status) => status,
                    None => {
                        let data = self.window(len as usize);
                        let mut h = self.0.borrow_mut();
                        h.eeprom[offset as usize..][..data.len()]
                            .copy_from_slice(&data);
                        0
                    }
                }
            }
            // ReadFromEeprom
            0x90 => {
                let data = {
                    let h = self.0.borrow();
                    h.eeprom[offset as usize..][..(len as usize).min(DATA_WINDOW)]
                        .to_vec()
                };
                self.fill_window(&data);
                0
            }
            // WriteToTxDpcd, one opcode per port
            0x30..=0x33 => {
                let port = (op - 0x30) as usize;
                let child = self.0.borrow().children[port].clone();
                match child {
                    Some(child) => {
                        let data = self.window(len as usize);
                        match child.dpcd_write(offset, &data) {
                            Ok(()) => 0,
                            Err(_) => 3,
                        }
                    }
                    None => 3,
                }
            }
            // ReadFromTxDpcd
            0xa0..=0xa3 => {
                let port = (op - 0xa0) as usize;
                let child = self.0.borrow().children[port].clone();
                match child {
                    Some(child) => {
                        let mut data =
                            vec![0u8; (len as usize).min(DATA_WINDOW)];
                        match child.dpcd_read(offset, &mut data) {
                            Ok(()) => {
                                self.fill_window(&data);
                                0
                            }
                            Err(_) => 3,
                        }
                    }
                    None => 3,
                }
            }
            // Anything else the model does not implement.
            _ => 2,
        };

        self.complete(status);
    }
}

impl AuxNode for SimHub {
    fn read_at(
        &mut self,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), MstError> {
        self.0.borrow().log.push(Event::AuxRead {
            offset,
            len: buf.len(),
        });
        self.dpcd_read(offset, buf)
    }

    fn write_at(&mut self, offset: u32, buf: &[u8]) -> Result<(), MstError> {
        self.0.borrow().log.push(Event::AuxWrite {
            offset,
            len: buf.len(),
        });
        self.dpcd_write(offset, buf)
    }
}
