//! Bus action types and the arbitration state held by the engine.

/// A bus-level operation the engine can perform on behalf of a socket.
///
/// The first four are arbitrated one at a time; the paging variants are
/// notifications fanned out around opcode injection and never occupy the
/// action slot.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusAction {
    Reset,
    Nmi,
    Irq,
    BusRequest,
    PageOutForInject,
    PageInForInject,
}

/// Why a bus action was requested; passed through to the completion
/// callbacks so consumers can tell their own requests apart.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BusActionReason {
    #[default]
    General,
    /// Target memory was just programmed.
    Programming,
    /// Mirroring target memory into a shadow copy.
    MemoryMirror,
    /// Refreshing a display from target memory.
    Display,
    /// Reported instead of the original reason when BUSACK never arrived.
    BusRequestFailed,
}

/// The lifecycle of the single in-flight bus action.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub(crate) enum ActionPhase {
    #[default]
    None,
    /// Picked from a socket but not yet asserted on the hardware.
    Pending,
    /// Asserted; waiting for acknowledge or pulse expiry.
    Asserted,
}

/// Arbitration state. One action is in flight at a time; sockets keep their
/// pending flags raised until the action completes or times out.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ActionState<T> {
    pub phase: ActionPhase,
    pub action: BusAction,
    pub socket: usize,
    /// When the action became pending; bounds the total time to assertion.
    pub pending_since: Option<T>,
    /// When the hardware line was asserted.
    pub asserted_at: Option<T>,
    /// Assert duration (or acknowledge timeout) in microseconds.
    pub assert_max_us: u32,
}

impl<T> Default for ActionState<T> {
    fn default() -> Self {
        ActionState {
            phase: ActionPhase::None,
            action: BusAction::Reset,
            socket: 0,
            pending_since: None,
            asserted_at: None,
            assert_max_us: 0,
        }
    }
}

impl<T> ActionState<T> {
    #[inline]
    pub fn clear(&mut self) {
        *self = ActionState::default();
    }
}
