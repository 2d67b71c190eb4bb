// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hub device model: identity, enumeration, and the firmware update
//! pipeline.

use drv_synaptics_mst_api::{
    BoardId, DeviceKind, UpdcCommand, ADDR_CUSTOMER_ID, BLOCK_UNIT,
    REG_CHIP_ID, REG_FIRMWARE_VERSION,
};
use log::{debug, warn};

use crate::aux::{AuxDevice, AuxNode};
use crate::connection::Connection;
use crate::image::FirmwareImage;
use crate::MstError;

/// One Synaptics MST hub, named by how it is reached: the AUX node index
/// plus its `(layer, rad)` position in the cascade.
///
/// The identity fields filled in by [`Device::enumerate`] are read-only for
/// the rest of the device's life; nothing else mutates them.
pub struct Device {
    kind: DeviceKind,
    aux_index: u8,
    layer: u8,
    rad: u16,
    version: Option<String>,
    board_id: Option<BoardId>,
    chip_id: Option<String>,
}

impl Device {
    pub fn new(kind: DeviceKind, aux_index: u8, layer: u8, rad: u16) -> Self {
        Self {
            kind,
            aux_index,
            layer,
            rad,
            version: None,
            board_id: None,
            chip_id: None,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn aux_index(&self) -> u8 {
        self.aux_index
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    pub fn rad(&self) -> u16 {
        self.rad
    }

    /// Firmware version, `v{major}.{minor}.{build}`, once enumerated.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn board_id(&self) -> Option<BoardId> {
        self.board_id
    }

    /// Chip identifier, `VMM{..}`, once enumerated.
    pub fn chip_id(&self) -> Option<&str> {
        self.chip_id.as_deref()
    }

    /// Opens this device's AUX node.
    pub fn open_aux(&self) -> Result<AuxDevice, MstError> {
        AuxDevice::open_index(self.aux_index)
    }

    /// Reads the device's identity: opens the AUX node, enables remote
    /// control along the cascade path, reads firmware version, board ID
    /// (from EEPROM) and chip ID, then disables remote control and closes.
    ///
    /// On error the identity fields that were already read stay filled in;
    /// remote control is still disabled best-effort before returning.
    pub fn enumerate(&mut self) -> Result<(), MstError> {
        let aux = self.open_aux()?;
        self.enumerate_on(aux)
    }

    /// [`Device::enumerate`] over a caller-supplied endpoint.
    pub fn enumerate_on<A: AuxNode>(
        &mut self,
        aux: A,
    ) -> Result<(), MstError> {
        let mut conn = Connection::new(aux, self.layer, self.rad);
        conn.enable_remote_control()?;
        let result = self.read_identity(&mut conn);
        if let Err(e) = conn.disable_remote_control() {
            warn!("failed to disable remote control after enumerate: {e}");
        }
        result
    }

    fn read_identity<A: AuxNode>(
        &mut self,
        conn: &mut Connection<A>,
    ) -> Result<(), MstError> {
        let mut version = [0u8; 3];
        conn.read_dpcd(REG_FIRMWARE_VERSION, &mut version)?;
        self.version = Some(format!(
            "v{:01}.{:02}.{:03}",
            version[0], version[1], version[2]
        ));

        let mut customer = [0u8; 2];
        conn.rc_get_command(
            UpdcCommand::ReadFromEeprom.into(),
            ADDR_CUSTOMER_ID,
            &mut customer,
        )?;
        self.board_id = Some(BoardId::from_customer_id(customer));

        let mut chip = [0u8; 2];
        conn.read_dpcd(REG_CHIP_ID, &mut chip)?;
        self.chip_id = Some(format!("VMM{:02x}{:02x}", chip[0], chip[1]));

        debug!(
            "{} hub on aux {}: {} {} ({})",
            self.kind,
            self.aux_index,
            self.chip_id.as_deref().unwrap_or("?"),
            self.version.as_deref().unwrap_or("?"),
            self.board_id.unwrap_or(BoardId::UNKNOWN),
        );
        Ok(())
    }

    /// Probes whether a Synaptics hub answers behind downstream port
    /// `tx_port` of this device, over an already-open connection.
    ///
    /// Leaves `conn` addressed at the probed child, mirroring how a
    /// successful probe is normally followed by talking to that child.
    pub fn scan_cascade_device<A: AuxNode>(
        &self,
        conn: &mut Connection<A>,
        tx_port: u8,
    ) -> bool {
        let layer = self.layer + 1;
        let rad = self.rad | (u16::from(tx_port) << (2 * self.layer));
        conn.configure(layer, rad);
        conn.probe_hub()
    }

    /// Asks the hub to sum `length` bytes of flash starting at `offset`.
    pub fn flash_checksum<A: AuxNode>(
        &self,
        conn: &mut Connection<A>,
        length: u32,
        offset: u32,
    ) -> Result<u32, MstError> {
        let mut sum = [0u8; 4];
        conn.rc_special_get_command(
            UpdcCommand::CalEepromChecksum.into(),
            offset,
            length,
            None,
            &mut sum,
        )?;
        Ok(u32::from_le_bytes(sum))
    }

    /// Flashes `payload` to the hub: validate, erase, program, verify.
    ///
    /// `progress` is called with a completion percentage after each
    /// successfully written block. Validation happens before the AUX node
    /// is even opened; an invalid image generates no device traffic at
    /// all. If the erase has happened, any later failure leaves the flash
    /// partially written -- the only recovery is re-running the update.
    pub fn write_firmware(
        &self,
        payload: &[u8],
        progress: impl FnMut(u8),
    ) -> Result<(), MstError> {
        FirmwareImage::parse(payload)?;
        let aux = self.open_aux()?;
        self.write_firmware_on(aux, payload, progress)
    }

    /// [`Device::write_firmware`] over a caller-supplied endpoint.
    pub fn write_firmware_on<A: AuxNode>(
        &self,
        aux: A,
        payload: &[u8],
        mut progress: impl FnMut(u8),
    ) -> Result<(), MstError> {
        let image = FirmwareImage::parse(payload)?;

        // The image names the board it was built for; flashing a mismatch
        // bricks the dock.
        if let Some(image_board) = image.board_id() {
            let device_board =
                self.board_id.ok_or(MstError::NotEnumerated)?;
            if image_board != device_board.raw() {
                return Err(MstError::BoardMismatch {
                    image: image_board,
                    device: device_board.raw(),
                });
            }
        }

        let mut conn = Connection::new(aux, self.layer, self.rad);
        conn.enable_remote_control()?;
        let result = self.flash_image(&mut conn, &image, &mut progress);
        if let Err(e) = conn.disable_remote_control() {
            warn!("failed to disable remote control after update: {e}");
        }
        result
    }

    fn flash_image<A: AuxNode>(
        &self,
        conn: &mut Connection<A>,
        image: &FirmwareImage<'_>,
        progress: &mut impl FnMut(u8),
    ) -> Result<(), MstError> {
        debug!("erasing SPI flash");
        conn.rc_set_command(
            UpdcCommand::FlashErase.into(),
            0,
            &0xffffu16.to_le_bytes(),
        )
        .map_err(|e| MstError::FlashEraseFailed(Box::new(e)))?;

        let payload = image.as_bytes();
        let write_loops = payload.len().div_ceil(BLOCK_UNIT);
        debug!("writing {} bytes in {write_loops} blocks", payload.len());

        for (i, block) in payload.chunks(BLOCK_UNIT).enumerate() {
            let offset = (i * BLOCK_UNIT) as u32;
            let mut attempt = conn.rc_set_command(
                UpdcCommand::WriteToEeprom.into(),
                offset,
                block,
            );
            if attempt.is_err() {
                // One retry per block; transient write faults do happen.
                attempt = conn.rc_set_command(
                    UpdcCommand::WriteToEeprom.into(),
                    offset,
                    block,
                );
            }
            attempt.map_err(|source| MstError::FlashWriteFailed {
                offset,
                source: Box::new(source),
            })?;

            let percent = if write_loops > 1 {
                (i * 100 / (write_loops - 1)) as u8
            } else {
                100
            };
            progress(percent);
        }

        let host = image.checksum();
        let device =
            self.flash_checksum(conn, payload.len() as u32, 0)?;
        if host != device {
            return Err(MstError::FlashVerifyFailed { host, device });
        }
        debug!("flash checksum verified ({host:#010x})");
        Ok(())
    }
}
