// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pre-flight validation of a firmware image.
//!
//! The image mirrors the hub's EEPROM layout: two EDID-style blocks, two
//! 256-byte configuration blocks, then the code region introduced by a
//! big-endian size field at 0x400. Every region carries an additive
//! checksum whose byte sum must be 0 mod 256. Validation is pure; it
//! depends only on the bytes.

use zerocopy::byteorder::{BigEndian, U16};

use crate::MstError;

/// Largest image the flash can hold.
pub const MAX_IMAGE_SIZE: usize = 0x10000;

const EDID_BLOCK_SIZE: usize = 128;
const CONFIG_BLOCK_SIZE: usize = 256;
const CONFIG_A_OFFSET: usize = 0x100;
const CONFIG_B_OFFSET: usize = 0x200;
const CODE_OFFSET: usize = 0x400;
/// Offset of the board identifier inside the first configuration block,
/// matching `ADDR_CUSTOMER_ID` in EEPROM.
const BOARD_ID_OFFSET: usize = 0x10e;
/// The code checksum covers the two size bytes plus a 15-byte block the
/// flash format reserves after the code proper. Vendor-format constant.
const CODE_TRAILER: usize = 17;

/// A firmware image whose structural checks all passed.
///
/// Regions the image is too short to contain are not checked: vendor
/// images fill the full layout, but the update path accepts any prefix of
/// it and flashes exactly the bytes given.
pub struct FirmwareImage<'a> {
    data: &'a [u8],
}

impl<'a> FirmwareImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, MstError> {
        if data.is_empty() || data.len() > MAX_IMAGE_SIZE {
            return Err(MstError::ImageInvalid("invalid file size"));
        }

        Self::check_region(data, 0, EDID_BLOCK_SIZE, "EDID block 0 checksum")?;
        Self::check_region(
            data,
            EDID_BLOCK_SIZE,
            EDID_BLOCK_SIZE,
            "EDID block 1 checksum",
        )?;
        Self::check_region(
            data,
            CONFIG_A_OFFSET,
            CONFIG_BLOCK_SIZE,
            "configuration block A checksum",
        )?;
        Self::check_region(
            data,
            CONFIG_B_OFFSET,
            CONFIG_BLOCK_SIZE,
            "configuration block B checksum",
        )?;

        if data.len() >= CODE_OFFSET + 2 {
            let code_size = usize::from(
                U16::<BigEndian>::from_bytes([
                    data[CODE_OFFSET],
                    data[CODE_OFFSET + 1],
                ])
                .get(),
            );
            if code_size >= 0xffff {
                return Err(MstError::ImageInvalid("invalid firmware size"));
            }
            let code_region = data
                .get(CODE_OFFSET..CODE_OFFSET + code_size + CODE_TRAILER)
                .ok_or(MstError::ImageInvalid("invalid firmware size"))?;
            if !Self::sums_to_zero(code_region) {
                return Err(MstError::ImageInvalid(
                    "firmware code checksum",
                ));
            }
        }

        Ok(FirmwareImage { data })
    }

    /// Board the image was built for: the big-endian identifier at 0x10E,
    /// mirroring the EEPROM location. `None` if the image does not reach
    /// that far.
    pub fn board_id(&self) -> Option<u16> {
        let bytes = self.data.get(BOARD_ID_OFFSET..BOARD_ID_OFFSET + 2)?;
        Some(U16::<BigEndian>::from_bytes([bytes[0], bytes[1]]).get())
    }

    /// 32-bit wrapping byte sum over the whole image; the value the hub's
    /// flash-checksum command reports back after a faithful write.
    pub fn checksum(&self) -> u32 {
        Self::byte_sum(self.data)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check_region(
        data: &[u8],
        offset: usize,
        len: usize,
        what: &'static str,
    ) -> Result<(), MstError> {
        match data.get(offset..offset + len) {
            // Image ends before this region; nothing to check.
            None => Ok(()),
            Some(region) if Self::sums_to_zero(region) => Ok(()),
            Some(_) => Err(MstError::ImageInvalid(what)),
        }
    }

    fn byte_sum(bytes: &[u8]) -> u32 {
        bytes
            .iter()
            .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
    }

    fn sums_to_zero(bytes: &[u8]) -> bool {
        Self::byte_sum(bytes) & 0xff == 0
    }
}
