//! This module defines the interfaces between the bus engine and the board.

/// Physical pin and multiplexer assignments.
///
/// The values are bit-exact to the board wiring and must be preserved if the
/// crate is retargeted: the address latch, the mux select encoding and the
/// PWM-driven wait enables all depend on them.
pub mod pins {
    /// BUSRQ output to the Z80 (active low).
    pub const BUSRQ_BAR: u32 = 19;
    /// BUSACK input from the Z80 (active low).
    pub const BUSACK_BAR: u32 = 2;
    /// Multiplexer select lines.
    pub const MUX_0: u32 = 11;
    pub const MUX_1: u32 = 9;
    pub const MUX_2: u32 = 10;
    /// PWM channel outputs feeding the IORQ/MREQ wait flip-flops.
    pub const IORQ_WAIT_EN: u32 = 12;
    pub const MREQ_WAIT_EN: u32 = 13;
    /// Control bus lines (active low, inputs unless bus master).
    pub const WR_BAR: u32 = 17;
    pub const RD_BAR: u32 = 18;
    pub const MREQ_BAR: u32 = 0;
    pub const IORQ_BAR: u32 = 1;
    /// Base of the 8-bit data-bus field in the GPIO level word.
    pub const DATA_BUS: u32 = 20;
    /// M1 piggy-backed onto the low data-bus line through a resistor.
    pub const M1_PIB_BAR: u32 = 20;
    /// Address latch output enable onto the host bus (active low).
    pub const PUSH_ADDR_BAR: u32 = 3;
    /// Clocks for the address high shift register and low counter.
    pub const HADDR_CK: u32 = 7;
    pub const LADDR_CK: u32 = 16;
    /// Data bus transceiver direction (set = towards the Pi).
    pub const DATA_DIR_IN: u32 = 6;
    /// WAIT input from the backplane (active low).
    pub const WAIT_BAR: u32 = 5;
    /// Target clock output.
    pub const CLOCK: u32 = 4;

    /// Low bit position of the 3-bit mux select field.
    pub const MUX_LOW_BIT: u32 = 9;
    /// Mux select values. The shift/counter pair shares the mux timing, so
    /// the access order used by the engine is fixed.
    pub const MUX_HADDR_SER_LOW: u32 = 0x00;
    pub const MUX_DATA_OE_BAR_LOW: u32 = 0x01;
    pub const MUX_IRQ_BAR_LOW: u32 = 0x02;
    pub const MUX_LADDR_OE_BAR: u32 = 0x03;
    pub const MUX_LADDR_CLR_BAR_LOW: u32 = 0x04;
    pub const MUX_RESET_Z80_BAR_LOW: u32 = 0x05;
    pub const MUX_NMI_BAR_LOW: u32 = 0x06;
    pub const MUX_HADDR_OE_BAR: u32 = 0x07;
    /// Shifting a high serial bit selects HADDR_OE; harmless as the data
    /// port is an input at that stage.
    pub const MUX_HADDR_SER_HIGH: u32 = MUX_HADDR_OE_BAR;
}

/// Machine-cycle-scale timing constants that make the protocol reliable on
/// real silicon.
pub mod cycles {
    /// Write strobe width towards the target.
    pub const DELAY_FOR_WRITE_TO_TARGET: u32 = 25;
    /// Settle time before sampling the data port.
    pub const DELAY_FOR_READ_FROM_PIB: u32 = 25;
    /// Pulse widths for the address counter/shift-register clocks.
    pub const DELAY_FOR_CLEAR_LOW_ADDR: u32 = 20;
    pub const DELAY_FOR_LOW_ADDR_SET: u32 = 20;
    pub const DELAY_FOR_HIGH_ADDR_SET: u32 = 20;
    /// Data transceiver direction turnaround.
    pub const DELAY_FOR_DATA_DIRN: u32 = 20;

    /// Default bus-action pulse lengths in target T-states.
    pub const RESET_PULSE_T_STATES: u32 = 100;
    pub const NMI_PULSE_T_STATES: u32 = 32;
    pub const IRQ_PULSE_T_STATES: u32 = 32;
    /// BUSACK must arrive within this many T-states of BUSRQ.
    pub const MAX_WAIT_FOR_BUSACK_T_STATES: u32 = 1000;
}

/// The raw pin and multiplexer seam between the engine and the board.
///
/// One implementation exists per board revision; tests drive the engine
/// against a simulated implementation. Methods are primitive on purpose:
/// every protocol decision (latch ordering, settle delays, the double
/// flip-flop clear) belongs to the engine, not the board layer.
pub trait BusHardware {
    /// Snapshot of the GPIO level word. Bit positions per [pins].
    fn bus_levels(&mut self) -> u32;
    /// Drives the 3-bit mux select field to the given [pins] `MUX_*` value.
    fn mux_set(&mut self, select: u32);
    /// Returns the mux to its idle encoding, deactivating all output enables.
    fn mux_clear(&mut self);
    /// One full clock pulse to the low-address counter.
    fn laddr_clock(&mut self);
    /// One full clock pulse to the high-address shift register.
    fn haddr_clock(&mut self);
    /// Data port direction: drive towards the target bus.
    fn data_set_output(&mut self);
    /// Data port direction: read from the target bus.
    fn data_set_input(&mut self);
    /// Places a byte on the data port. Only meaningful while output.
    fn data_write(&mut self, byte: u8);
    /// Asserts or releases BUSRQ.
    fn set_busrq(&mut self, asserted: bool);
    /// Enables the address latch outputs onto the host address bus.
    fn set_addr_push(&mut self, enabled: bool);
    /// Switches MREQ/IORQ/RD/WR between inputs and driven outputs.
    fn ctrl_dir_output(&mut self, output: bool);
    /// Drives the four control lines while they are outputs.
    /// `true` asserts the (active low) line.
    fn drive_ctrl(&mut self, mreq: bool, iorq: bool, rd: bool, wr: bool);
    /// Sets the PWM idle levels that enable wait-state generation per bus
    /// kind.
    fn wait_enable(&mut self, memory: bool, io: bool);
    /// Clears the wait flip-flops. The two latches share one PWM FIFO feed,
    /// so the implementation must write the clear value for both channels
    /// even when only one is being cleared.
    fn wait_clear(&mut self, memory: bool, io: bool);
}

/// A time source for the bounded settle and timeout loops.
///
/// The engine never sleeps against an OS scheduler; it busy-waits in bounded
/// loops against this trait, which lets tests simulate elapsed time
/// deterministically.
pub trait Clock {
    /// An opaque instant produced by [Clock::now].
    type Timestamp: Copy;
    /// The current instant.
    fn now(&mut self) -> Self::Timestamp;
    /// Microseconds elapsed since `since`.
    fn elapsed_us(&mut self, since: Self::Timestamp) -> u32;
    /// Busy-wait for the given number of microseconds.
    fn delay_us(&mut self, us: u32);
    /// Busy-wait for an electrical settle period measured in SoC cycles.
    fn settle(&mut self, cycles: u32);
}

/// A deterministic [Clock] counting simulated microseconds.
///
/// Every delay advances the counter by the requested amount, so timeout
/// paths can be exercised without real waits. Please refer to it as a
/// template for implementing the [Clock] trait against real hardware
/// timers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TickClock {
    us: u64,
}

impl TickClock {
    /// Advances simulated time without going through a delay call.
    #[inline]
    pub fn advance_us(&mut self, us: u64) {
        self.us += us;
    }
}

impl Clock for TickClock {
    type Timestamp = u64;

    #[inline]
    fn now(&mut self) -> u64 {
        // Polling the clock costs a little real time; modelling that keeps
        // ack/settle loops finite under simulation.
        self.us += 1;
        self.us
    }

    #[inline]
    fn elapsed_us(&mut self, since: u64) -> u32 {
        // Polling costs a little real time too; see now().
        self.us += 1;
        self.us.saturating_sub(since) as u32
    }

    #[inline]
    fn delay_us(&mut self, us: u32) {
        self.us += u64::from(us);
    }

    #[inline]
    fn settle(&mut self, _cycles: u32) {}
}

impl From<u64> for TickClock {
    fn from(us: u64) -> Self {
        TickClock { us }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_clock_works() {
        let mut clock = TickClock::default();
        let t0 = clock.now();
        clock.delay_us(250);
        assert!(clock.elapsed_us(t0) >= 250);
        let t1 = clock.now();
        // Every poll advances time a little.
        assert_eq!(clock.elapsed_us(t1), 1);
        clock.advance_us(10);
        assert_eq!(clock.elapsed_us(t1), 12);
        // Settling consumes no simulated time.
        let before = clock.elapsed_us(t1);
        clock.settle(1000);
        assert_eq!(clock.elapsed_us(t1), before + 1);
    }
}
