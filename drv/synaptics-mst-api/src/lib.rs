// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol constants shared by the Synaptics MST hub driver and its users.
//!
//! Synaptics VMM-series MST hubs expose a vendor-defined "remote control"
//! (RC) protocol in a small window of their DPCD address space. The host
//! stages a payload, an offset and a length, then writes an opcode with the
//! busy bit set; the hub clears the busy bit when the command has completed
//! and reports a result code in the adjacent register. Everything here is a
//! pass-through from the vendor header and must not be renumbered.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use num_derive::FromPrimitive;

/// RC capability register; bit 2 advertises RC support.
pub const REG_RC_CAP: u32 = 0x4b0;
/// RC state machine register. Not consulted by the update flow, listed for
/// completeness.
pub const REG_RC_STATE: u32 = 0x4b1;
/// RC command register. Written as `RC_CMD_BUSY | opcode`; the hub clears
/// the busy bit on completion.
pub const REG_RC_CMD: u32 = 0x4b2;
/// RC result register, directly after the command register so a 2-byte read
/// at [`REG_RC_CMD`] fetches both.
pub const REG_RC_RESULT: u32 = 0x4b3;
/// Staged transfer length, 4 bytes little-endian.
pub const REG_RC_LEN: u32 = 0x4b8;
/// Staged target offset, 4 bytes little-endian.
pub const REG_RC_OFFSET: u32 = 0x4bc;
/// RC data window.
pub const REG_RC_DATA: u32 = 0x4c0;
/// IEEE OUI of the branch device.
pub const REG_VENDOR_ID: u32 = 0x500;
/// Two-byte chip identifier (VMM family).
pub const REG_CHIP_ID: u32 = 0x507;
/// Three-byte firmware version. The vendor header spells this register
/// `REG_FIRMWARE_VERSIOIN`; the value is what matters.
pub const REG_FIRMWARE_VERSION: u32 = 0x50a;

/// EEPROM offset of the two-byte customer/board identifier, big-endian. The
/// firmware image mirrors the EEPROM layout, so the same offset inside an
/// image names the board it was built for.
pub const ADDR_CUSTOMER_ID: u32 = 0x10e;

/// Synaptics IEEE OUI, as read from [`REG_VENDOR_ID`].
pub const SYNAPTICS_OUI: [u8; 3] = [0x90, 0xcc, 0x24];

/// Busy flag in the RC command register.
pub const RC_CMD_BUSY: u8 = 0x80;

/// Magic token that [`UpdcCommand::EnableRc`] must carry at offset 0.
pub const ENABLE_RC_MAGIC: [u8; 5] = *b"PRIUS";

/// Size in bytes of the RC data window, and therefore the largest payload a
/// single RC command moves. Longer transfers are chunked.
pub const UNIT_SIZE: usize = 32;

/// Size in bytes of one EEPROM write block during a firmware update.
pub const BLOCK_UNIT: usize = 64;

bitflags! {
    /// Bits of [`REG_RC_CAP`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RcCap: u8 {
        /// The branch device implements the RC protocol.
        const RC_CAPABLE = 1 << 2;
    }
}

/// RC opcodes ("UPDC" commands in the vendor header).
///
/// The full vendor set is listed; the update flow only issues a subset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdcCommand {
    EnableRc = 0x01,
    DisableRc = 0x02,
    GetId = 0x03,
    GetVersion = 0x04,
    FlashMapping = 0x07,
    EnableFlashChipErase = 0x08,
    CalEepromChecksum = 0x11,
    FlashErase = 0x14,
    CalEepromCheckCrc8 = 0x16,
    CalEepromCheckCrc16 = 0x17,
    WriteToEeprom = 0x20,
    WriteToMemory = 0x21,
    WriteToTxDpcd = 0x30,
    ReadFromEeprom = 0x90,
    ReadFromMemory = 0x91,
    ReadFromTxDpcd = 0xa0,
}

impl From<UpdcCommand> for u8 {
    fn from(c: UpdcCommand) -> u8 {
        c as u8
    }
}

impl UpdcCommand {
    /// Opcode addressing a tunneled DPCD transaction at downstream port
    /// `port`. Only meaningful for `WriteToTxDpcd` and `ReadFromTxDpcd`,
    /// which occupy four consecutive opcodes each, one per TX port.
    pub fn for_tx_port(self, port: u8) -> u8 {
        debug_assert!(matches!(
            self,
            UpdcCommand::WriteToTxDpcd | UpdcCommand::ReadFromTxDpcd
        ));
        debug_assert!(port < 4);
        self as u8 + port
    }
}

/// Result codes the hub reports in [`REG_RC_RESULT`] once the busy bit
/// clears. Values outside this set are propagated raw.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RcStatus {
    Success = 0,
    Invalid = 1,
    Unsupported = 2,
    Failed = 3,
    Disabled = 4,
}

impl RcStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(code)
    }
}

/// How a hub is reached from the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// Directly addressable through an AUX node.
    Direct,
    /// Behind one or more cascade ports of another hub.
    Remote,
    Unknown,
}

impl core::str::FromStr for DeviceKind {
    // Anything unrecognized parses as `Unknown`.
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "DIRECT" => DeviceKind::Direct,
            "REMOTE" => DeviceKind::Remote,
            _ => DeviceKind::Unknown,
        })
    }
}

impl core::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DeviceKind::Direct => "DIRECT",
            DeviceKind::Remote => "REMOTE",
            DeviceKind::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// The two-byte customer/board identifier from EEPROM.
///
/// The high byte selects the customer family, the low byte the product.
/// Identifiers from families we do not know how to decode are stored as
/// [`BoardId::UNKNOWN`] rather than kept raw.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BoardId(u16);

impl BoardId {
    pub const X6: BoardId = BoardId(0x0110);
    pub const X7: BoardId = BoardId(0x0111);
    pub const WD15_TB15_WIRE: BoardId = BoardId(0x0112);
    pub const CTKM5_WIRELESS: BoardId = BoardId(0x0113);
    pub const UNKNOWN: BoardId = BoardId(0xffff);

    const FAMILY_DELL: u8 = 0x01;
    const FAMILY_EVB: u8 = 0x00;

    /// Decodes the big-endian identifier read from
    /// [`ADDR_CUSTOMER_ID`].
    pub fn from_customer_id(bytes: [u8; 2]) -> Self {
        match bytes[0] {
            Self::FAMILY_DELL | Self::FAMILY_EVB => {
                BoardId(u16::from_be_bytes(bytes))
            }
            _ => Self::UNKNOWN,
        }
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for BoardId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            BoardId::X6 => f.write_str("Dell X6 Platform"),
            BoardId::X7 => f.write_str("Dell X7 Platform"),
            BoardId::WD15_TB15_WIRE => f.write_str("Dell WD15/TB15 wired Dock"),
            BoardId::CTKM5_WIRELESS => f.write_str("Dell CTKM5 Wireless Dock"),
            BoardId(id) if id >> 8 == Self::FAMILY_EVB as u16 => {
                f.write_str("SYNA evb board")
            }
            BoardId(id) => write!(f, "unknown board {id:#06x}"),
        }
    }
}
