//! The bus-socket seam between the engine and its consumers.
use crate::flags::CtrlFlags;
use crate::host::cycles;
use super::action::{BusAction, BusActionReason};
use super::BusControl;

/// Maximum number of sockets that can register with one engine.
pub const MAX_BUS_SOCKETS: usize = 10;

/// Identifies a registered socket. Doubles as the index of the socket's
/// handler in the slice passed to `service`, in registration order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SocketId(pub(crate) usize);

impl SocketId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Static registration parameters of a socket.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SocketInfo {
    /// Generate wait states on memory requests while this socket is enabled.
    pub wait_on_memory: bool,
    /// Generate wait states on I/O requests while this socket is enabled.
    pub wait_on_io: bool,
    /// Pulse durations in target T-states; 0 selects the default.
    pub reset_duration_t_states: u32,
    pub nmi_duration_t_states: u32,
    pub irq_duration_t_states: u32,
}

impl Default for SocketInfo {
    fn default() -> Self {
        SocketInfo {
            wait_on_memory: false,
            wait_on_io: false,
            reset_duration_t_states: cycles::RESET_PULSE_T_STATES,
            nmi_duration_t_states: cycles::NMI_PULSE_T_STATES,
            irq_duration_t_states: cycles::IRQ_PULSE_T_STATES,
        }
    }
}

/// What a socket decided about the bus cycle it was shown.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Decision {
    /// The cycle is not for this socket.
    #[default]
    NotDecoded,
    /// Drive this byte onto the data bus if the CPU is reading.
    Value(u8),
    /// Drive this byte as a substituted instruction fetch.
    InjectOpcode(u8),
}

impl Decision {
    /// The byte to place on the data bus, if any.
    #[inline]
    pub fn byte(self) -> Option<u8> {
        match self {
            Decision::NotDecoded => None,
            Decision::Value(byte) | Decision::InjectOpcode(byte) => Some(byte),
        }
    }

    /// Folds another socket's decision over this one. A later decoded
    /// result replaces an earlier one.
    #[inline]
    pub fn merge(self, other: Decision) -> Decision {
        match other {
            Decision::NotDecoded => self,
            decided => decided,
        }
    }
}

/// A consumer of bus cycles and bus-action completions.
///
/// One implementation is registered per [SocketId]. Callbacks receive the
/// engine as a [BusControl] trait object so they can raise further actions
/// from inside a callback.
pub trait BusSocket {
    /// Called for every wait cycle while the socket is enabled, with the
    /// latched address, the data-bus byte and the decoded control lines.
    fn on_wait_cycle(&mut self, bus: &mut dyn BusControl,
                     addr: u16, data: u8, flags: CtrlFlags) -> Decision;

    /// Called when a bus action completes (or fails, with
    /// [BusActionReason::BusRequestFailed]), and for the paging
    /// notifications around opcode injection.
    fn on_bus_action_complete(&mut self, _bus: &mut dyn BusControl,
                              _action: BusAction, _reason: BusActionReason) {}
}

/// Per-socket mutable state held by the engine.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SocketRecord {
    pub info: SocketInfo,
    pub enabled: bool,
    pub hold_requested: bool,
    pub reset_pending: bool,
    pub nmi_pending: bool,
    pub irq_pending: bool,
    pub busrq_pending: bool,
    pub busrq_reason: BusActionReason,
}

impl SocketRecord {
    pub fn new(info: SocketInfo) -> Self {
        SocketRecord {
            info,
            enabled: false,
            hold_requested: false,
            reset_pending: false,
            nmi_pending: false,
            irq_pending: false,
            busrq_pending: false,
            busrq_reason: BusActionReason::General,
        }
    }

    /// The highest-priority action this socket is asking for.
    pub fn next_action(&self) -> Option<BusAction> {
        if self.busrq_pending {
            Some(BusAction::BusRequest)
        }
        else if self.reset_pending {
            Some(BusAction::Reset)
        }
        else if self.nmi_pending {
            Some(BusAction::Nmi)
        }
        else if self.irq_pending {
            Some(BusAction::Irq)
        }
        else {
            None
        }
    }

    /// Drops the pending flag matching a completed or cancelled action.
    pub fn clear_down(&mut self, action: BusAction) {
        match action {
            BusAction::BusRequest => self.busrq_pending = false,
            BusAction::Reset => self.reset_pending = false,
            BusAction::Nmi => self.nmi_pending = false,
            BusAction::Irq => self.irq_pending = false,
            _ => {}
        }
    }

    /// Microseconds equivalent of a T-state count at the given clock rate,
    /// never less than a microsecond.
    pub fn us_from_t_states(t_states: u32, clock_hz: u32) -> u32 {
        let t_states = u64::from(t_states.max(1));
        let us = t_states * 1_000_000 / u64::from(clock_hz.max(1));
        (us as u32).max(1)
    }

    /// Assert duration for an action, or the acknowledge timeout for a bus
    /// request.
    pub fn assert_us(&self, action: BusAction, clock_hz: u32) -> u32 {
        let t_states = match action {
            BusAction::BusRequest => cycles::MAX_WAIT_FOR_BUSACK_T_STATES,
            BusAction::Reset => self.info.reset_duration_t_states,
            BusAction::Nmi => self.info.nmi_duration_t_states,
            BusAction::Irq => self.info.irq_duration_t_states,
            _ => return 0,
        };
        Self::us_from_t_states(t_states, clock_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_merge_works() {
        let d = Decision::NotDecoded.merge(Decision::Value(0x42));
        assert_eq!(d, Decision::Value(0x42));
        assert_eq!(d.merge(Decision::NotDecoded), Decision::Value(0x42));
        assert_eq!(d.merge(Decision::InjectOpcode(0x00)), Decision::InjectOpcode(0x00));
        assert_eq!(Decision::NotDecoded.byte(), None);
        assert_eq!(Decision::InjectOpcode(0xC3).byte(), Some(0xC3));
    }

    #[test]
    fn socket_record_priority_works() {
        let mut rec = SocketRecord::new(SocketInfo::default());
        assert_eq!(rec.next_action(), None);
        rec.irq_pending = true;
        assert_eq!(rec.next_action(), Some(BusAction::Irq));
        rec.nmi_pending = true;
        assert_eq!(rec.next_action(), Some(BusAction::Nmi));
        rec.reset_pending = true;
        assert_eq!(rec.next_action(), Some(BusAction::Reset));
        rec.busrq_pending = true;
        assert_eq!(rec.next_action(), Some(BusAction::BusRequest));
        rec.clear_down(BusAction::BusRequest);
        assert_eq!(rec.next_action(), Some(BusAction::Reset));
        rec.clear_down(BusAction::Reset);
        rec.clear_down(BusAction::Nmi);
        assert_eq!(rec.next_action(), Some(BusAction::Irq));
    }

    #[test]
    fn t_state_conversion_works() {
        // 100 T-states at 1MHz is 100us.
        assert_eq!(SocketRecord::us_from_t_states(100, 1_000_000), 100);
        // Sub-microsecond durations round up to 1us.
        assert_eq!(SocketRecord::us_from_t_states(1, 32_000_000), 1);
        // Zero T-states behaves as one.
        assert_eq!(SocketRecord::us_from_t_states(0, 1_000_000), 1);
    }
}
