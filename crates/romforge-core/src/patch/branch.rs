//! Branch and pointer encodings that structural edits know how to relocate.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::byteio::{read_u16, read_u32, write_u16, write_u32};
use crate::error::{Error, Result};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BranchKind {
    /// ARM `B`/`BL`: signed 24-bit word displacement from PC+8.
    Arm,
    /// Thumb `BL` pair: signed 22-bit halfword displacement from PC+4.
    ThumbBl,
    /// Thumb unconditional `B`: signed 11-bit halfword displacement from PC+4.
    ThumbB,
    /// Little-endian 32-bit pointer.
    Absolute32,
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    i64::from(((value << shift) as i32) >> shift)
}

impl BranchKind {
    /// Encoded size in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::ThumbB => 2,
            Self::Arm | Self::ThumbBl | Self::Absolute32 => 4,
        }
    }

    /// Smallest byte adjustment the encoding can express.
    pub fn granularity(self) -> i64 {
        match self {
            Self::Arm => 4,
            Self::ThumbBl | Self::ThumbB => 2,
            Self::Absolute32 => 1,
        }
    }

    pub fn is_relative(self) -> bool {
        !matches!(self, Self::Absolute32)
    }

    fn pc_bias(self) -> i64 {
        match self {
            Self::Arm => 8,
            Self::ThumbBl | Self::ThumbB => 4,
            Self::Absolute32 => 0,
        }
    }

    /// Bits available for the byte displacement, sign included.
    fn displacement_bits(self) -> u32 {
        match self {
            Self::Arm => 26,
            Self::ThumbBl => 23,
            Self::ThumbB => 12,
            Self::Absolute32 => 33,
        }
    }

    fn not_a_branch(self, offset: usize) -> Error {
        Error::NotABranch {
            offset,
            kind: self.into(),
        }
    }

    /// Read the encoded value at `offset`.
    ///
    /// For relative kinds this is the signed byte displacement; for
    /// [`BranchKind::Absolute32`] it is the pointer itself.
    pub fn read(self, buf: &[u8], offset: usize) -> Result<i64> {
        match self {
            Self::Arm => {
                let word = read_u32(buf, offset).ok_or_else(|| self.not_a_branch(offset))?;
                // cond=1111 is BLX, which switches state and is not relocated here.
                if (word >> 25) & 0b111 != 0b101 || word >> 28 == 0xF {
                    return Err(self.not_a_branch(offset));
                }
                Ok(sign_extend(word & 0x00FF_FFFF, 24) << 2)
            }
            Self::ThumbBl => {
                let hi = read_u16(buf, offset).ok_or_else(|| self.not_a_branch(offset))?;
                let lo = read_u16(buf, offset + 2).ok_or_else(|| self.not_a_branch(offset))?;
                if hi & 0xF800 != 0xF000 || lo & 0xF800 != 0xF800 {
                    return Err(self.not_a_branch(offset));
                }
                let imm = (u32::from(hi & 0x07FF) << 11) | u32::from(lo & 0x07FF);
                Ok(sign_extend(imm, 22) << 1)
            }
            Self::ThumbB => {
                let half = read_u16(buf, offset).ok_or_else(|| self.not_a_branch(offset))?;
                if half & 0xF800 != 0xE000 {
                    return Err(self.not_a_branch(offset));
                }
                Ok(sign_extend(u32::from(half & 0x07FF), 11) << 1)
            }
            Self::Absolute32 => read_u32(buf, offset)
                .map(i64::from)
                .ok_or_else(|| self.not_a_branch(offset)),
        }
    }

    /// Absolute target of the instruction at `offset`, in buffer offsets.
    ///
    /// Pointers are returned as stored.
    pub fn target(self, buf: &[u8], offset: usize) -> Result<i64> {
        let value = self.read(buf, offset)?;
        if self.is_relative() {
            Ok(offset as i64 + self.pc_bias() + value)
        } else {
            Ok(value)
        }
    }

    /// Encode `value` over the existing instruction at `offset`.
    ///
    /// The existing bytes supply the condition and opcode bits, so this fails
    /// with `NotABranch` on anything that does not already decode as `self`.
    pub fn write(self, buf: &mut [u8], offset: usize, value: i64) -> Result<()> {
        let encoded = self.encode(buf, offset, value)?;
        buf[offset..offset + self.width()].copy_from_slice(&encoded[..self.width()]);
        Ok(())
    }

    /// Bytes of the instruction at `offset` after adding `adjustment` to its value.
    pub fn relocated(self, buf: &[u8], offset: usize, adjustment: i64) -> Result<[u8; 4]> {
        let granularity = self.granularity();
        if adjustment % granularity != 0 {
            return Err(Error::MisalignedRelocation {
                offset,
                adjustment,
                granularity,
            });
        }
        let value = self.read(buf, offset)?;
        self.encode(buf, offset, value + adjustment)
    }

    fn encode(self, buf: &[u8], offset: usize, value: i64) -> Result<[u8; 4]> {
        self.read(buf, offset)?;

        let bits = self.displacement_bits();
        let in_range = match self {
            Self::Absolute32 => (0..=i64::from(u32::MAX)).contains(&value),
            _ => {
                let limit = 1i64 << (bits - 1);
                (-limit..limit).contains(&value) && value % self.granularity() == 0
            }
        };
        if !in_range {
            return Err(Error::BranchOutOfRange {
                offset,
                kind: self.into(),
                displacement: value,
            });
        }

        let mut out = [0u8; 4];
        let width = self.width();
        out[..width].copy_from_slice(&buf[offset..offset + width]);
        match self {
            Self::Arm => {
                let word = read_u32(&out, 0).unwrap_or_default();
                let imm = ((value >> 2) as u32) & 0x00FF_FFFF;
                write_u32(&mut out, 0, (word & 0xFF00_0000) | imm);
            }
            Self::ThumbBl => {
                let imm = ((value >> 1) as u32) & 0x003F_FFFF;
                write_u16(&mut out, 0, 0xF000 | ((imm >> 11) & 0x07FF) as u16);
                write_u16(&mut out, 2, 0xF800 | (imm & 0x07FF) as u16);
            }
            Self::ThumbB => {
                let imm = ((value >> 1) as u32) & 0x07FF;
                write_u16(&mut out, 0, 0xE000 | imm as u16);
            }
            Self::Absolute32 => write_u32(&mut out, 0, value as u32),
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_decode() {
        // BL +0x100 at offset 0: EB00003E targets 0x100.
        let buf = 0xEB00_003Eu32.to_le_bytes();
        assert_eq!(BranchKind::Arm.read(&buf, 0).unwrap(), 0xF8);
        assert_eq!(BranchKind::Arm.target(&buf, 0).unwrap(), 0x100);

        // B -8 (branch to self): EAFFFFFE.
        let buf = 0xEAFF_FFFEu32.to_le_bytes();
        assert_eq!(BranchKind::Arm.target(&buf, 0).unwrap(), 0);
    }

    #[test]
    fn test_arm_keeps_condition_bits() {
        // BNE +0x10
        let mut buf = 0x1A00_0002u32.to_le_bytes().to_vec();
        let bytes = BranchKind::Arm.relocated(&buf, 0, -8).unwrap();
        buf.copy_from_slice(&bytes);
        assert_eq!(read_u32(&buf, 0).unwrap(), 0x1A00_0000);
        assert_eq!(BranchKind::Arm.target(&buf, 0).unwrap(), 8);
    }

    #[test]
    fn test_thumb_bl_roundtrip_target() {
        let mut buf = vec![0u8; 8];
        write_u16(&mut buf, 4, 0xF000);
        write_u16(&mut buf, 6, 0xF800);
        assert_eq!(BranchKind::ThumbBl.target(&buf, 4).unwrap(), 8);

        BranchKind::ThumbBl.write(&mut buf, 4, -0x2000).unwrap();
        assert_eq!(BranchKind::ThumbBl.read(&buf, 4).unwrap(), -0x2000);
        assert_eq!(read_u16(&buf, 4).unwrap() & 0xF800, 0xF000);
        assert_eq!(read_u16(&buf, 6).unwrap() & 0xF800, 0xF800);
    }

    #[test]
    fn test_thumb_b_range() {
        let mut buf = 0xE000u16.to_le_bytes().to_vec();
        BranchKind::ThumbB.write(&mut buf, 0, -2048).unwrap();
        assert_eq!(BranchKind::ThumbB.read(&buf, 0).unwrap(), -2048);
        assert!(matches!(
            BranchKind::ThumbB.write(&mut buf, 0, 2048),
            Err(Error::BranchOutOfRange { kind: "thumb_b", .. })
        ));
    }

    #[test]
    fn test_absolute_pointer() {
        let buf = 0x0200_1000u32.to_le_bytes();
        let bytes = BranchKind::Absolute32.relocated(&buf, 0, 0x30).unwrap();
        assert_eq!(u32::from_le_bytes(bytes), 0x0200_1030);
        assert!(BranchKind::Absolute32.relocated(&buf, 0, -0x0300_0000).is_err());
    }

    #[test]
    fn test_rejects_non_branches_and_misalignment() {
        let buf = 0xE1A0_0000u32.to_le_bytes(); // mov r0, r0
        assert!(matches!(
            BranchKind::Arm.read(&buf, 0),
            Err(Error::NotABranch { kind: "arm", .. })
        ));
        let buf = 0xEA00_0000u32.to_le_bytes();
        assert!(matches!(
            BranchKind::Arm.relocated(&buf, 0, 6),
            Err(Error::MisalignedRelocation { granularity: 4, .. })
        ));
        assert!(BranchKind::ThumbB.read(&[0x00], 0).is_err());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(BranchKind::ThumbBl.to_string(), "thumb_bl");
        assert_eq!("absolute32".parse::<BranchKind>().unwrap(), BranchKind::Absolute32);
    }
}
