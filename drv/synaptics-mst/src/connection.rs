// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The remote-control transport: DPCD access with cascade tunneling, the
//! chunked RC command engine, and RC gating.
//!
//! A hub is addressed by `(layer, rad)`. Layer 0 is the hub wired to the
//! AUX endpoint itself; deeper hubs hang off numbered downstream (TX)
//! ports of their parent. The RAD packs one 2-bit port selector per layer,
//! the root's selector in the lowest bits. A DPCD transaction addressed at
//! depth `n` is carried as an RC command to the hub at depth `n - 1`,
//! whose own register pokes recurse the same way until they reach the raw
//! endpoint, so the recursion depth is passed explicitly down the call
//! chain. Every level of that recursion observes the same `(layer, rad)`.

use std::thread;
use std::time::{Duration, Instant};

use drv_synaptics_mst_api::{
    RcCap, RcStatus, UpdcCommand, ENABLE_RC_MAGIC, RC_CMD_BUSY, REG_RC_CAP,
    REG_RC_CMD, REG_RC_DATA, REG_RC_LEN, REG_RC_OFFSET, REG_VENDOR_ID,
    SYNAPTICS_OUI, UNIT_SIZE,
};
use log::{debug, error};
use zerocopy::{
    byteorder::{LittleEndian, U32},
    IntoBytes,
};

use crate::aux::AuxNode;
use crate::MstError;

/// How long a hub gets to clear the busy bit after a command is issued.
const MAX_WAIT_TIME: Duration = Duration::from_secs(3);

/// Pause between completion polls. Each poll is a full (possibly
/// tunneled) register read, so this only bounds the busy-spin on an idle
/// hub.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// An AUX endpoint together with the cascade addressing context.
pub struct Connection<A> {
    aux: A,
    layer: u8,
    rad: u16,
}

impl<A: AuxNode> Connection<A> {
    pub fn new(aux: A, layer: u8, rad: u16) -> Self {
        Self { aux, layer, rad }
    }

    /// Re-addresses the connection. The next DPCD or RC operation starts
    /// tunneling from scratch at the new depth.
    pub fn configure(&mut self, layer: u8, rad: u16) {
        self.layer = layer;
        self.rad = rad;
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    pub fn rad(&self) -> u16 {
        self.rad
    }

    /// Reads `buf.len()` bytes of DPCD at `offset` from the addressed hub.
    pub fn read_dpcd(
        &mut self,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), MstError> {
        self.dpcd_read(self.layer, offset, buf)
    }

    /// Writes `buf` to DPCD at `offset` on the addressed hub.
    pub fn write_dpcd(
        &mut self,
        offset: u32,
        buf: &[u8],
    ) -> Result<(), MstError> {
        self.dpcd_write(self.layer, offset, buf)
    }

    /// Downstream port selecting the next hop when `remain` tunnel steps
    /// are still to be taken.
    fn tunnel_port(&self, remain: u8) -> u8 {
        ((self.rad >> ((remain - 1) * 2)) & 0x3) as u8
    }

    fn dpcd_read(
        &mut self,
        remain: u8,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<(), MstError> {
        if self.layer == 0 || remain == 0 {
            self.aux.read_at(offset, buf)
        } else {
            let port = self.tunnel_port(remain);
            self.rc_get(
                remain - 1,
                UpdcCommand::ReadFromTxDpcd.for_tx_port(port),
                offset,
                buf,
            )
        }
    }

    fn dpcd_write(
        &mut self,
        remain: u8,
        offset: u32,
        buf: &[u8],
    ) -> Result<(), MstError> {
        if self.layer == 0 || remain == 0 {
            self.aux.write_at(offset, buf)
        } else {
            let port = self.tunnel_port(remain);
            self.rc_set(
                remain - 1,
                UpdcCommand::WriteToTxDpcd.for_tx_port(port),
                offset,
                buf,
            )
        }
    }

    /// Executes RC command `cmd` carrying `data` to `offset` on the
    /// addressed hub, chunking through the 32-byte data window. An empty
    /// payload still issues the command once.
    pub fn rc_set_command(
        &mut self,
        cmd: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<(), MstError> {
        self.rc_set(self.layer, cmd, offset, data)
    }

    /// Executes RC command `cmd` reading `out.len()` bytes from `offset`
    /// on the addressed hub, chunking through the data window.
    pub fn rc_get_command(
        &mut self,
        cmd: u8,
        offset: u32,
        out: &mut [u8],
    ) -> Result<(), MstError> {
        self.rc_get(self.layer, cmd, offset, out)
    }

    /// Executes an RC command whose argument is distinct from its returned
    /// payload: stages `cmd_data` (if any) plus `cmd_offset`/`cmd_length`,
    /// issues `cmd` once, then reads `out.len()` bytes back from the data
    /// window. No chunk loop.
    pub fn rc_special_get_command(
        &mut self,
        cmd: u8,
        cmd_offset: u32,
        cmd_length: u32,
        cmd_data: Option<&[u8]>,
        out: &mut [u8],
    ) -> Result<(), MstError> {
        self.rc_special_get(
            self.layer,
            cmd,
            cmd_offset,
            cmd_length,
            cmd_data,
            out,
        )
    }

    fn rc_set(
        &mut self,
        remain: u8,
        cmd: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<(), MstError> {
        let mut cur_offset = offset;
        let mut data = data;
        loop {
            let cur_length = data.len().min(UNIT_SIZE);
            let (chunk, rest) = data.split_at(cur_length);
            if !chunk.is_empty() {
                self.dpcd_write(remain, REG_RC_DATA, chunk)?;
                self.stage_offset_len(remain, cur_offset, cur_length as u32)?;
            }
            self.issue_and_wait(remain, cmd)?;
            data = rest;
            cur_offset += cur_length as u32;
            if data.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn rc_get(
        &mut self,
        remain: u8,
        cmd: u8,
        offset: u32,
        out: &mut [u8],
    ) -> Result<(), MstError> {
        let mut cur_offset = offset;
        let mut out = out;
        while !out.is_empty() {
            let cur_length = out.len().min(UNIT_SIZE);
            self.stage_offset_len(remain, cur_offset, cur_length as u32)?;
            self.issue_and_wait(remain, cmd)?;
            let (chunk, rest) = out.split_at_mut(cur_length);
            self.dpcd_read(remain, REG_RC_DATA, chunk)?;
            out = rest;
            cur_offset += cur_length as u32;
        }
        Ok(())
    }

    fn rc_special_get(
        &mut self,
        remain: u8,
        cmd: u8,
        cmd_offset: u32,
        cmd_length: u32,
        cmd_data: Option<&[u8]>,
        out: &mut [u8],
    ) -> Result<(), MstError> {
        if cmd_length != 0 {
            if let Some(data) = cmd_data {
                self.dpcd_write(remain, REG_RC_DATA, data)?;
            }
            self.stage_offset_len(remain, cmd_offset, cmd_length)?;
        }
        self.issue_and_wait(remain, cmd)?;
        if !out.is_empty() {
            self.dpcd_read(remain, REG_RC_DATA, out)?;
        }
        Ok(())
    }

    // The hub latches everything on the command write, so offset and
    // length have to be in place first; staging order is data, offset,
    // length, command.
    fn stage_offset_len(
        &mut self,
        remain: u8,
        offset: u32,
        length: u32,
    ) -> Result<(), MstError> {
        let offset = U32::<LittleEndian>::new(offset);
        self.dpcd_write(remain, REG_RC_OFFSET, offset.as_bytes())?;
        let length = U32::<LittleEndian>::new(length);
        self.dpcd_write(remain, REG_RC_LEN, length.as_bytes())
    }

    fn issue_and_wait(&mut self, remain: u8, cmd: u8) -> Result<(), MstError> {
        self.dpcd_write(remain, REG_RC_CMD, &[RC_CMD_BUSY | cmd])?;

        let deadline = Instant::now() + MAX_WAIT_TIME;
        loop {
            // One read covers the command register and the result register
            // behind it.
            let mut status = [0u8; 2];
            self.dpcd_read(remain, REG_RC_CMD, &mut status)?;

            if status[0] & RC_CMD_BUSY == 0 {
                let code = status[1];
                if code != 0 {
                    error!(
                        "RC command {cmd:#04x} rejected: {:?}",
                        RcStatus::from_code(code)
                    );
                    return Err(MstError::RcRejected { cmd, code });
                }
                return Ok(());
            }

            if Instant::now() > deadline {
                error!("RC command {cmd:#04x} timed out");
                return Err(MstError::RcTimeout { cmd });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Enables remote control on every hub between the endpoint and the
    /// addressed hub, root first -- an inner hub cannot accept RC traffic
    /// until its parent relays it. Aborts at the first failure; hubs
    /// already enabled stay enabled.
    pub fn enable_remote_control(&mut self) -> Result<(), MstError> {
        for i in 0..=self.layer {
            debug!("enabling remote control at layer {i}");
            self.rc_set(i, UpdcCommand::EnableRc.into(), 0, &ENABLE_RC_MAGIC)?;
        }
        Ok(())
    }

    /// Disables remote control along the cascade path, leaf first.
    pub fn disable_remote_control(&mut self) -> Result<(), MstError> {
        for i in (0..=self.layer).rev() {
            debug!("disabling remote control at layer {i}");
            self.rc_set(i, UpdcCommand::DisableRc.into(), 0, &[])?;
        }
        Ok(())
    }

    /// Runs the Synaptics vendor probe against the currently addressed
    /// hub, over tunneled DPCD. Any read failure counts as a miss.
    pub fn probe_hub(&mut self) -> bool {
        let mut cap = [0u8; 1];
        if self.read_dpcd(REG_RC_CAP, &mut cap).is_err() {
            return false;
        }
        if !RcCap::from_bits_truncate(cap[0]).contains(RcCap::RC_CAPABLE) {
            return false;
        }
        let mut oui = [0u8; 3];
        if self.read_dpcd(REG_VENDOR_ID, &mut oui).is_err() {
            return false;
        }
        oui == SYNAPTICS_OUI
    }
}
