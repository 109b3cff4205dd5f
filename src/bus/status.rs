//! Wait-cycle and bus-action diagnostics counters.
use core::fmt;

/// Counters accumulated by the wait service loop.
///
/// `cycle_avg_ns` and `cycle_max_us` measure the time spent handling a
/// single wait cycle from detection to data drive.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BusStatus {
    pub cycle_count: u32,
    pub mreq_reads: u32,
    pub mreq_writes: u32,
    pub iorq_reads: u32,
    pub iorq_writes: u32,
    pub irq_acks: u32,
    /// Control lines never settled into a decodable combination.
    pub decode_timeouts: u32,
    /// BUSACK did not arrive within the acknowledge timeout.
    pub busrq_failures: u32,
    pub irq_during_busack: u32,
    pub irq_without_wait: u32,
    pub spurious_busrq: u32,
    pub cycle_avg_ns: u32,
    pub cycle_max_us: u32,
    pub(crate) accum_us: u32,
    pub(crate) avging_count: u32,
}

impl BusStatus {
    pub fn clear(&mut self) {
        *self = BusStatus::default();
    }

    /// Folds one wait cycle's elapsed handling time into the average and
    /// maximum. Averaging restarts once the accumulator nears overflow.
    pub(crate) fn record_cycle_us(&mut self, elapsed_us: u32) {
        self.cycle_count = self.cycle_count.wrapping_add(1);
        if self.accum_us > 1_000_000_000 {
            self.accum_us = 0;
            self.avging_count = 0;
        }
        if elapsed_us < 1_000_000 {
            self.accum_us += elapsed_us;
            self.avging_count += 1;
            self.cycle_avg_ns = self.accum_us.saturating_mul(1000) / self.avging_count;
        }
        if self.cycle_max_us < elapsed_us {
            self.cycle_max_us = elapsed_us;
        }
    }
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c={} avgNs={} maxUs={} busRqFail={} decodeTimeouts={}",
            self.cycle_count, self.cycle_avg_ns, self.cycle_max_us,
            self.busrq_failures, self.decode_timeouts)?;
        write!(f, " mreqRd={} mreqWr={} iorqRd={} iorqWr={} irqAck={}",
            self.mreq_reads, self.mreq_writes, self.iorq_reads,
            self.iorq_writes, self.irq_acks)?;
        write!(f, " badBusrq={} irqDuringBusAck={} irqNoWait={}",
            self.spurious_busrq, self.irq_during_busack, self.irq_without_wait)
    }
}
