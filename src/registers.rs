//! Z80 register snapshot types used by the register get/set machinery.
use core::fmt;
#[cfg(feature = "serde")] use serde::{Serialize, Deserialize, Serializer, de::{
                                            self, Deserializer, Visitor, SeqAccess}};

/// The interrupt mode enum.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum InterruptMode {
    #[default]
    Mode0 = 0,
    Mode1 = 1,
    Mode2 = 2,
}

impl core::convert::TryFrom<u8> for InterruptMode {
    type Error = ();

    #[inline(always)]
    fn try_from(im: u8) -> Result<Self, Self::Error> {
        match im {
            0 => Ok(InterruptMode::Mode0),
            1 => Ok(InterruptMode::Mode1),
            2 => Ok(InterruptMode::Mode2),
            _ => Err(())
        }
    }
}

/// A register pair that can be treated as a single 16-bit register or as
/// separate 8-bit (MSB/LSB) registers.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, Debug)]
pub struct RegisterPair([u8; 2]);

impl RegisterPair {
    #[inline]
    pub fn get16(self) -> u16 {
        u16::from_le_bytes(self.0)
    }

    #[inline]
    pub fn set16(&mut self, val: u16) {
        self.0 = val.to_le_bytes();
    }

    #[inline]
    pub fn get8hi(self) -> u8 {
        let [_, hi] = self.0;
        hi
    }

    #[inline]
    pub fn get8lo(self) -> u8 {
        let [lo, _] = self.0;
        lo
    }

    #[inline]
    pub fn set8hi(&mut self, val: u8) {
        self.0[1] = val;
    }

    #[inline]
    pub fn set8lo(&mut self, val: u8) {
        self.0[0] = val;
    }

    #[inline]
    pub fn get(self) -> (u8, u8) {
        let [lo, hi] = self.0;
        (hi, lo)
    }

    #[inline]
    pub fn set(&mut self, hi: u8, lo: u8) {
        self.0 = [lo, hi];
    }

    #[inline]
    pub fn inc16(&mut self) {
        self.set16(self.get16().wrapping_add(1));
    }

    #[inline]
    pub fn dec16(&mut self) {
        self.set16(self.get16().wrapping_sub(1));
    }
}

impl From<u16> for RegisterPair {
    fn from(uint: u16) -> Self {
        RegisterPair(uint.to_le_bytes())
    }
}

impl From<[u8; 2]> for RegisterPair {
    fn from(pair: [u8; 2]) -> Self {
        RegisterPair(pair)
    }
}

#[cfg(feature = "serde")]
impl Serialize for RegisterPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where S: Serializer
    {
        serializer.serialize_u16(self.get16())
    }
}

#[cfg(feature = "serde")]
struct RegisterPairVisitor;

#[cfg(feature = "serde")]
impl<'de> Visitor<'de> for RegisterPairVisitor {
    type Value = RegisterPair;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an unsigned 16-bit integer, a tuple of 8-bit integers or a hex string")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        if value <= u64::from(u16::MAX) {
            Ok(RegisterPair::from(value as u16))
        } else {
            Err(E::custom(format_args!("RegisterPair out of range: {}", value)))
        }
    }

    fn visit_u16<E: de::Error>(self, value: u16) -> Result<Self::Value, E> {
        Ok(RegisterPair::from(value))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where A: SeqAccess<'de>
    {
        if let Some(lo) = seq.next_element::<u8>()? {
            if let Some(hi) = seq.next_element::<u8>()? {
                if seq.next_element::<u8>()?.is_none() {
                    return Ok(RegisterPair::from([lo, hi]))
                }
            }
        }
        Err(de::Error::custom("RegisterPair expects a tuple of 8-bit integers"))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
        let body = if let Some(hex) = s.strip_prefix('$') {
            hex
        }
        else if let Some(hex) = s.strip_prefix("0x") {
            hex
        }
        else {
            s
        };
        let uint = u16::from_str_radix(body, 16).map_err(|_|
                        de::Error::custom("RegisterPair expects a hexadecimal string"))?;
        Ok(RegisterPair::from(uint))
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for RegisterPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(RegisterPairVisitor)
        }
        else {
            deserializer.deserialize_u16(RegisterPairVisitor)
        }
    }
}

/// A full snapshot of the target CPU registers.
///
/// The tracker owns the current instance: the register get sequence fills it
/// in field by field as the injected instructions execute, and the set
/// sequence is patched from it before injection starts. Debug-protocol
/// collaborators consume it read-only.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Z80Registers {
    pub pc: RegisterPair,
    pub sp: RegisterPair,
    pub af: RegisterPair,
    pub bc: RegisterPair,
    pub de: RegisterPair,
    pub hl: RegisterPair,
    pub ix: RegisterPair,
    pub iy: RegisterPair,
    pub af_alt: RegisterPair,
    pub bc_alt: RegisterPair,
    pub de_alt: RegisterPair,
    pub hl_alt: RegisterPair,
    pub i: u8,
    pub r: u8,
    pub im: InterruptMode,
    pub int_enabled: bool,
}

impl Z80Registers {
    pub fn clear(&mut self) {
        *self = Z80Registers::default();
    }
}

fn write_flags(f: &mut fmt::Formatter<'_>, af: RegisterPair) -> fmt::Result {
    let fl = af.get8lo();
    write!(f, "{}{}-{}-{}{}{}",
        if fl & 0x80 != 0 { 'S' } else { '-' },
        if fl & 0x40 != 0 { 'Z' } else { '-' },
        if fl & 0x10 != 0 { 'H' } else { '-' },
        if fl & 0x04 != 0 { 'P' } else { '-' },
        if fl & 0x02 != 0 { 'N' } else { '-' },
        if fl & 0x01 != 0 { 'C' } else { '-' })
}

/// Renders the snapshot in the textual layout consumed by remote debug
/// front-ends.
impl fmt::Display for Z80Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PC={:04x} SP={:04x} BC={:04x} AF={:04x} HL={:04x} DE={:04x} IX={:04x} IY={:04x}",
            self.pc.get16(), self.sp.get16(), self.bc.get16(), self.af.get16(),
            self.hl.get16(), self.de.get16(), self.ix.get16(), self.iy.get16())?;
        write!(f, " AF'={:04x} BC'={:04x} HL'={:04x} DE'={:04x} I={:02x} R={:02x}",
            self.af_alt.get16(), self.bc_alt.get16(), self.hl_alt.get16(),
            self.de_alt.get16(), self.i, self.r)?;
        write!(f, "  F=")?;
        write_flags(f, self.af)?;
        write!(f, " F'=")?;
        write_flags(f, self.af_alt)?;
        write!(f, " IM{} IFF{}", self.im as u8, if self.int_enabled { "12" } else { "" })
    }
}
