//! Control bus bits as decoded from the raw GPIO level word.
use bitflags::bitflags;
use crate::host::pins;

bitflags! {
    /// The state of the Z80 control lines during one machine cycle.
    ///
    /// Bit positions are part of the socket contract and must not drift
    /// if the crate is retargeted to different silicon.
    #[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
    pub struct CtrlFlags: u8 {
        const RD     = 1 << 0;
        const WR     = 1 << 1;
        const MREQ   = 1 << 2;
        const IORQ   = 1 << 3;
        const M1     = 1 << 4;
        const WAIT   = 1 << 5;
        const BUSACK = 1 << 6;
    }
}

impl CtrlFlags {
    /// Decodes a raw GPIO level snapshot. The physical lines are active low;
    /// M1 is piggy-backed onto the low data-bus line.
    pub fn from_levels(levels: u32) -> Self {
        let mut flags = CtrlFlags::empty();
        if levels & (1 << pins::RD_BAR) == 0 {
            flags |= CtrlFlags::RD;
        }
        if levels & (1 << pins::WR_BAR) == 0 {
            flags |= CtrlFlags::WR;
        }
        if levels & (1 << pins::MREQ_BAR) == 0 {
            flags |= CtrlFlags::MREQ;
        }
        if levels & (1 << pins::IORQ_BAR) == 0 {
            flags |= CtrlFlags::IORQ;
        }
        if levels & (1 << pins::M1_PIB_BAR) == 0 {
            flags |= CtrlFlags::M1;
        }
        if levels & (1 << pins::WAIT_BAR) == 0 {
            flags |= CtrlFlags::WAIT;
        }
        if levels & (1 << pins::BUSACK_BAR) == 0 {
            flags |= CtrlFlags::BUSACK;
        }
        flags
    }

    /// A settled combination of control lines that identifies a machine
    /// cycle. The write strobe is asserted after the memory request line,
    /// so an unsettled sample fails this test.
    #[inline]
    pub fn is_valid_cycle(self) -> bool {
        (self.intersects(CtrlFlags::MREQ | CtrlFlags::IORQ)
            && self.intersects(CtrlFlags::RD | CtrlFlags::WR))
            || self.is_irq_ack()
    }

    /// The CPU samples the data bus this cycle: a memory or I/O read, or an
    /// interrupt acknowledge fetching the vector.
    #[inline]
    pub fn is_reading(self) -> bool {
        (self.contains(CtrlFlags::RD)
            && self.intersects(CtrlFlags::MREQ | CtrlFlags::IORQ))
            || self.is_irq_ack()
    }

    /// Interrupt acknowledge: IORQ during an M1 cycle with no BUSACK.
    #[inline]
    pub fn is_irq_ack(self) -> bool {
        self.contains(CtrlFlags::M1 | CtrlFlags::IORQ)
            && !self.contains(CtrlFlags::BUSACK)
    }

    /// Opcode fetch read.
    #[inline]
    pub fn is_instr_fetch(self) -> bool {
        self.contains(CtrlFlags::M1 | CtrlFlags::RD)
    }
}
