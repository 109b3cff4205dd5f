//! The bus engine: wait-state service, cycle decoding, bus mastership and
//! multi-consumer action arbitration.
use core::fmt;

use arrayvec::ArrayVec;
use log::{debug, warn};

use crate::flags::CtrlFlags;
use crate::host::{cycles, pins, BusHardware, Clock};

mod action;
mod socket;
mod status;

pub use action::{BusAction, BusActionReason};
use action::{ActionPhase, ActionState};
pub use socket::{BusSocket, Decision, SocketId, SocketInfo, MAX_BUS_SOCKETS};
use socket::SocketRecord;
pub use status::BusStatus;

/// The error type returned by bus operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusError {
    /// BUSACK was not asserted within the acknowledge timeout.
    NoBusAck,
    /// The socket table is full.
    TooManySockets,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::NoBusAck => f.write_str("no BUSACK from target"),
            BusError::TooManySockets => f.write_str("bus socket table is full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BusError {}

/// Timing parameters of the engine.
///
/// The defaults suit a 1MHz externally clocked target; raise
/// `target_clock_hz` to shorten the pulse durations derived from T-state
/// counts.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize),
           serde(default))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BusConfig {
    /// Frequency the target CPU is clocked at.
    pub target_clock_hz: u32,
    /// Acknowledge timeout for a synchronous bus takeover.
    pub max_wait_for_busack_us: u32,
    /// A pending action not asserted within this window is abandoned.
    pub max_pending_action_us: u32,
    /// Bounds of the control-line settle loop.
    pub max_ctrl_settle_us: u32,
    pub min_ctrl_settle_loops: u32,
    /// How long to poll for the end of a read cycle on wait release.
    pub max_end_of_read_us: u32,
    /// Minimum length of a generated wait state.
    pub wait_cycle_us: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            target_clock_hz: 1_000_000,
            max_wait_for_busack_us: 250,
            max_pending_action_us: 100_000,
            max_ctrl_settle_us: 10,
            min_ctrl_settle_loops: 100,
            max_end_of_read_us: 10,
            wait_cycle_us: 1,
        }
    }
}

/// The engine surface exposed to socket callbacks.
///
/// [BusEngine] implements this trait and hands itself to callbacks as a
/// trait object, so a socket can raise actions or take the bus from inside
/// its own callback.
pub trait BusControl {
    /// Requests a target reset pulse. A zero duration selects the socket's
    /// configured default.
    fn request_reset(&mut self, id: SocketId, duration_t_states: u32);
    /// Requests a non-maskable interrupt pulse.
    fn request_nmi(&mut self, id: SocketId, duration_t_states: u32);
    /// Requests a maskable interrupt pulse.
    fn request_irq(&mut self, id: SocketId, duration_t_states: u32);
    /// Requests bus mastership. BUSRQ is asserted synchronously when no
    /// other action is in flight; completion arrives via the socket
    /// callback.
    fn request_bus(&mut self, id: SocketId, reason: BusActionReason);
    /// Enables or disables a socket and refreshes wait-state generation.
    fn socket_enable(&mut self, id: SocketId, enabled: bool);
    /// Changes whether the socket wants wait states on memory requests.
    fn wait_on_memory(&mut self, id: SocketId, wait: bool);
    /// Changes whether the socket wants wait states on I/O requests.
    fn wait_on_io(&mut self, id: SocketId, wait: bool);
    /// Raises or drops this socket's hold request. The target is kept in
    /// the current memory wait while any enabled socket requests a hold.
    fn wait_hold(&mut self, id: SocketId, hold: bool);
    /// Releases an asserted wait immediately once no hold remains.
    fn wait_release(&mut self);
    fn wait_is_held(&self) -> bool;
    /// Skips the address/data latch read for the next wait cycle. Used
    /// while single stepping to avoid disturbing the address latch.
    fn suspend_bus_detail_one_cycle(&mut self);
    /// Asks all enabled sockets to page target hardware out (start of
    /// opcode injection) or back in (after injection). Notifications are
    /// delivered from the service loop.
    fn page_for_injection(&mut self, id: SocketId, page_out: bool);
    /// Reads a block of target memory (or I/O space), optionally taking
    /// bus mastership for the duration.
    fn block_read(&mut self, addr: u16, data: &mut [u8],
                  busrq_and_release: bool, iorq: bool) -> Result<(), BusError>;
    /// Writes a block of target memory (or I/O space).
    fn block_write(&mut self, addr: u16, data: &[u8],
                   busrq_and_release: bool, iorq: bool) -> Result<(), BusError>;
    /// The engine currently holds bus mastership.
    fn is_under_control(&self) -> bool;
    fn target_clock_hz(&self) -> u32;
}

/// Owns the board seam and runs the bus protocol.
///
/// Socket handlers live outside the engine and are passed to
/// [service][BusEngine::service] as a slice indexed by [SocketId]
/// registration order.
pub struct BusEngine<H: BusHardware, C: Clock> {
    hw: H,
    clock: C,
    config: BusConfig,
    sockets: ArrayVec<SocketRecord, MAX_BUS_SOCKETS>,
    status: BusStatus,
    action: ActionState<C::Timestamp>,
    wait_asserted: bool,
    wait_started: Option<C::Timestamp>,
    wait_cycle_us: u32,
    wait_hold: bool,
    wait_suspended: bool,
    suspend_detail_one_cycle: bool,
    read_in_progress: bool,
    busack_seen: bool,
    page_in_pending: bool,
    page_out_pending: bool,
    under_control: bool,
}

impl<H: BusHardware, C: Clock> BusEngine<H, C> {
    /// Creates the engine and parks the board: all lines released, mux
    /// idle, wait-state generation off.
    pub fn new(mut hw: H, clock: C, config: BusConfig) -> Self {
        hw.set_busrq(false);
        hw.set_addr_push(false);
        hw.ctrl_dir_output(false);
        hw.data_set_input();
        hw.mux_clear();
        hw.wait_enable(false, false);
        let wait_cycle_us = config.wait_cycle_us;
        BusEngine {
            hw,
            clock,
            config,
            sockets: ArrayVec::new(),
            status: BusStatus::default(),
            action: ActionState::default(),
            wait_asserted: false,
            wait_started: None,
            wait_cycle_us,
            wait_hold: false,
            wait_suspended: false,
            suspend_detail_one_cycle: false,
            read_in_progress: false,
            busack_seen: false,
            page_in_pending: false,
            page_out_pending: false,
            under_control: false,
        }
    }

    /// Registers a socket. The returned id is also the index of the
    /// socket's handler in the slice passed to [service][BusEngine::service].
    pub fn add_socket(&mut self, info: SocketInfo) -> Result<SocketId, BusError> {
        if self.sockets.is_full() {
            return Err(BusError::TooManySockets);
        }
        let id = SocketId(self.sockets.len());
        self.sockets.push(SocketRecord::new(info));
        Ok(id)
    }

    #[inline]
    pub fn status(&self) -> &BusStatus {
        &self.status
    }

    pub fn status_clear(&mut self) {
        self.status.clear();
    }

    #[inline]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Changes the minimum length of generated wait states.
    pub fn wait_set_cycle_us(&mut self, us: u32) {
        self.wait_cycle_us = us;
    }

    /// Suspends or resumes wait processing entirely. Bus actions continue
    /// to be arbitrated.
    pub fn wait_system_suspend(&mut self, suspend: bool) {
        self.wait_suspended = suspend;
    }

    /// Fills target I/O space with 0xff so un-decoded ports read empty.
    pub fn clear_all_io(&mut self) -> Result<(), BusError> {
        let empty = [0xffu8; 0x100];
        self.block_write(0, &empty, true, true)
    }

    /// One pass of the bus service loop: deliver deferred paging
    /// notifications, arbitrate actions, then detect and complete wait
    /// states. `handlers` is indexed by [SocketId].
    pub fn service(&mut self, handlers: &mut [&mut dyn BusSocket]) {
        if self.page_out_pending {
            self.page_out_pending = false;
            self.page_callback(handlers, BusAction::PageOutForInject);
        }
        self.bus_action_check();
        self.bus_action_handle_active(handlers);

        if self.wait_suspended {
            return;
        }

        if !self.wait_asserted {
            let flags = CtrlFlags::from_levels(self.hw.bus_levels());
            let busack = flags.contains(CtrlFlags::BUSACK);
            let busack_expected = self.under_control
                || (self.action.phase == ActionPhase::Asserted
                    && self.action.action == BusAction::BusRequest);
            if busack && !busack_expected && !self.busack_seen {
                self.status.spurious_busrq += 1;
            }
            self.busack_seen = busack;
            if flags.contains(CtrlFlags::WAIT) && !busack {
                self.wait_started = Some(self.clock.now());
                self.wait_asserted = true;
                self.wait_handle_new(handlers);
            }
            else if !self.wait_on_memory_any() {
                // Memory waits are off so an assert cannot collide with a
                // wait about to be serviced.
                self.bus_action_handle_start();
            }
        }

        if self.wait_asserted {
            let flags = CtrlFlags::from_levels(self.hw.bus_levels());
            let mut release = true;
            if flags.contains(CtrlFlags::MREQ) && self.wait_hold {
                release = false;
                // Keep in-flight action timers alive while held.
                let now = self.clock.now();
                self.action.pending_since = Some(now);
                self.action.asserted_at = Some(now);
            }
            if release {
                let expired = match self.wait_started {
                    Some(t0) => self.clock.elapsed_us(t0) >= self.wait_cycle_us,
                    None => true,
                };
                if expired {
                    self.bus_action_handle_start();
                    self.wait_release_now();
                }
            }
        }
    }

    /// Takes bus mastership synchronously, waiting for BUSACK.
    pub fn request_and_take(&mut self) -> Result<(), BusError> {
        self.control_request();
        let start = self.clock.now();
        while !self.control_acknowledged() {
            if self.clock.elapsed_us(start) >= self.config.max_wait_for_busack_us {
                if self.control_acknowledged() {
                    break;
                }
                self.control_release(false);
                self.status.busrq_failures += 1;
                return Err(BusError::NoBusAck);
            }
            self.clock.delay_us(1);
        }
        self.control_take();
        Ok(())
    }

    /// Releases bus mastership, optionally pulsing reset while BUSRQ is
    /// still held so the target restarts cleanly.
    pub fn release(&mut self, reset_target: bool) {
        self.control_release(reset_target);
    }

    // ------------------------------------------------------------------
    // bus actions
    // ------------------------------------------------------------------

    /// Picks the next pending action when the slot is idle. First enabled
    /// socket in registration order wins; per socket the priority is
    /// BUSRQ, reset, NMI, IRQ.
    fn bus_action_check(&mut self) {
        if self.action.phase != ActionPhase::None {
            return;
        }
        for (idx, rec) in self.sockets.iter().enumerate() {
            if !rec.enabled {
                continue;
            }
            if let Some(action) = rec.next_action() {
                self.action.phase = ActionPhase::Pending;
                self.action.action = action;
                self.action.socket = idx;
                self.action.pending_since = Some(self.clock.now());
                return;
            }
        }
    }

    /// Asserts a pending action on the hardware.
    fn bus_action_handle_start(&mut self) -> bool {
        if self.action.phase != ActionPhase::Pending {
            return false;
        }
        let action = self.action.action;
        self.set_signal(action, true);
        self.action.asserted_at = Some(self.clock.now());
        self.action.assert_max_us = self.sockets[self.action.socket]
            .assert_us(action, self.config.target_clock_hz);
        self.action.phase = ActionPhase::Asserted;
        true
    }

    fn bus_action_handle_active(&mut self, handlers: &mut [&mut dyn BusSocket]) {
        if self.action.phase == ActionPhase::Pending {
            let timed_out = match self.action.pending_since {
                Some(t0) => self.clock.elapsed_us(t0) >= self.config.max_pending_action_us,
                None => false,
            };
            if timed_out {
                warn!("bus action {:?} abandoned before assert", self.action.action);
                let action = self.action.action;
                self.set_signal(action, false);
                self.bus_action_clear();
            }
        }
        if self.action.phase != ActionPhase::Asserted {
            return;
        }

        let action = self.action.action;
        if action == BusAction::BusRequest {
            if self.control_acknowledged() {
                self.control_take();
                let reason = self.sockets[self.action.socket].busrq_reason;
                // Clear first so an action raised from the callback can be
                // picked up before BUSRQ is released.
                self.bus_action_clear();
                self.bus_action_callback(handlers, BusAction::BusRequest, reason);
                self.control_release(false);
            }
            else if self.assert_expired() {
                let reason = BusActionReason::BusRequestFailed;
                warn!("BUSRQ not acknowledged within {}us", self.action.assert_max_us);
                self.status.busrq_failures += 1;
                self.bus_action_callback(handlers, BusAction::BusRequest, reason);
                self.hw.set_busrq(false);
                self.bus_action_clear();
            }
            return;
        }

        if action == BusAction::Irq {
            // An interrupt acknowledge cycle ends the IRQ early; holding
            // the line longer risks a double interrupt.
            let flags = CtrlFlags::from_levels(self.hw.bus_levels());
            if flags.contains(CtrlFlags::M1 | CtrlFlags::IORQ) {
                if flags.contains(CtrlFlags::BUSACK) {
                    // Not a genuine acknowledge while the bus is granted.
                    self.status.irq_during_busack += 1;
                }
                else {
                    if !flags.contains(CtrlFlags::WAIT) {
                        self.status.irq_without_wait += 1;
                    }
                    self.set_signal(BusAction::Irq, false);
                    self.bus_action_clear();
                    return;
                }
            }
        }

        if self.assert_expired() {
            self.bus_action_callback(handlers, action, BusActionReason::General);
            self.set_signal(action, false);
            self.bus_action_clear();
        }
    }

    fn assert_expired(&mut self) -> bool {
        match self.action.asserted_at {
            Some(t0) => {
                let max = self.action.assert_max_us;
                self.clock.elapsed_us(t0) >= max
            }
            None => false,
        }
    }

    /// Drops the pending flags of the in-flight action type on every
    /// socket and frees the action slot.
    fn bus_action_clear(&mut self) {
        let action = self.action.action;
        for rec in self.sockets.iter_mut() {
            rec.clear_down(action);
        }
        self.action.clear();
    }

    /// Fans a completion out to every registered socket. After a
    /// programming completion, a second round is delivered with the
    /// memory-mirror reason so shadow copies can refresh.
    fn bus_action_callback(&mut self, handlers: &mut [&mut dyn BusSocket],
                           action: BusAction, reason: BusActionReason) {
        for idx in 0..self.sockets.len() {
            if let Some(handler) = handlers.get_mut(idx) {
                handler.on_bus_action_complete(&mut *self, action, reason);
            }
        }
        if reason == BusActionReason::Programming {
            for idx in 0..self.sockets.len() {
                if let Some(handler) = handlers.get_mut(idx) {
                    handler.on_bus_action_complete(&mut *self, action,
                                                   BusActionReason::MemoryMirror);
                }
            }
        }
    }

    /// Paging notifications go to enabled sockets only.
    fn page_callback(&mut self, handlers: &mut [&mut dyn BusSocket],
                     action: BusAction) {
        for idx in 0..self.sockets.len() {
            if !self.sockets[idx].enabled {
                continue;
            }
            if let Some(handler) = handlers.get_mut(idx) {
                handler.on_bus_action_complete(&mut *self, action,
                                               BusActionReason::General);
            }
        }
    }

    fn set_signal(&mut self, action: BusAction, asserted: bool) {
        match action {
            BusAction::BusRequest => self.hw.set_busrq(asserted),
            BusAction::Reset => if asserted {
                self.hw.mux_set(pins::MUX_RESET_Z80_BAR_LOW);
            } else {
                self.hw.mux_clear();
            },
            BusAction::Nmi => if asserted {
                self.hw.mux_set(pins::MUX_NMI_BAR_LOW);
            } else {
                self.hw.mux_clear();
            },
            BusAction::Irq => if asserted {
                self.hw.mux_set(pins::MUX_IRQ_BAR_LOW);
            } else {
                self.hw.mux_clear();
            },
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // wait handling
    // ------------------------------------------------------------------

    fn wait_on_memory_any(&self) -> bool {
        self.sockets.iter().any(|rec| rec.enabled && rec.info.wait_on_memory)
    }

    fn wait_on_io_any(&self) -> bool {
        self.sockets.iter().any(|rec| rec.enabled && rec.info.wait_on_io)
    }

    fn wait_enablement_update(&mut self) {
        let memory = self.wait_on_memory_any();
        let io = self.wait_on_io_any();
        self.hw.wait_enable(memory, io);
    }

    /// The engine-wide hold is the OR of the enabled sockets' requests.
    fn wait_hold_update(&mut self) {
        self.wait_hold = self.sockets.iter()
            .any(|rec| rec.enabled && rec.hold_requested);
    }

    /// Reads the control lines until they settle into a decodable
    /// combination. In a write cycle the strobe trails the request line,
    /// so early samples can look like neither a read nor a write. Returns
    /// None when the bound is exceeded; the cycle is then not decoded.
    fn control_bus_read(&mut self) -> Option<CtrlFlags> {
        let start = self.clock.now();
        let mut loops = 0u32;
        loop {
            let flags = CtrlFlags::from_levels(self.hw.bus_levels());
            if flags.is_valid_cycle() {
                return Some(flags);
            }
            loops += 1;
            if loops >= self.config.min_ctrl_settle_loops
                || self.clock.elapsed_us(start) >= self.config.max_ctrl_settle_us {
                self.status.decode_timeouts += 1;
                return None;
            }
        }
    }

    /// Latched address (high byte then low byte) followed by the data-bus
    /// byte. The mux is returned to idle so M1 is sampleable on the next
    /// cycle.
    fn addr_and_data_read(&mut self) -> (u16, u8) {
        self.hw.mux_set(pins::MUX_HADDR_OE_BAR);
        self.clock.settle(cycles::DELAY_FOR_READ_FROM_PIB);
        let high = (self.hw.bus_levels() >> pins::DATA_BUS) as u8;
        self.hw.mux_set(pins::MUX_LADDR_OE_BAR);
        self.clock.settle(cycles::DELAY_FOR_READ_FROM_PIB);
        let low = (self.hw.bus_levels() >> pins::DATA_BUS) as u8;
        self.hw.data_set_input();
        self.hw.mux_set(pins::MUX_DATA_OE_BAR_LOW);
        self.clock.settle(cycles::DELAY_FOR_READ_FROM_PIB);
        let data = (self.hw.bus_levels() >> pins::DATA_BUS) as u8;
        self.hw.mux_clear();
        (u16::from_le_bytes([low, high]), data)
    }

    /// Handles a newly detected wait: decode the cycle, fan it out to the
    /// enabled sockets, drive the merged decision back if the CPU is
    /// reading, and account the cycle.
    fn wait_handle_new(&mut self, handlers: &mut [&mut dyn BusSocket]) {
        let start = self.clock.now();

        if self.page_in_pending {
            self.page_in_pending = false;
            self.page_callback(handlers, BusAction::PageInForInject);
        }

        let flags = match self.control_bus_read() {
            Some(flags) => flags,
            // Undecodable cycle: no fan-out, no counters, no latch access.
            // The normal release path lets the target finish it.
            None => return,
        };
        let detail_suspended = self.suspend_detail_one_cycle;
        let (addr, data) = if detail_suspended {
            self.suspend_detail_one_cycle = false;
            (0, 0)
        } else {
            self.addr_and_data_read()
        };

        let mut decision = Decision::NotDecoded;
        for idx in 0..self.sockets.len() {
            if !self.sockets[idx].enabled {
                continue;
            }
            if let Some(handler) = handlers.get_mut(idx) {
                let verdict = handler.on_wait_cycle(&mut *self, addr, data, flags);
                decision = decision.merge(verdict);
            }
        }

        if flags.is_reading() {
            if let Some(byte) = decision.byte() {
                // A flip-flop holds the data output enable for the rest of
                // the IORQ/MREQ cycle once primed through the mux.
                self.hw.mux_set(pins::MUX_DATA_OE_BAR_LOW);
                self.hw.data_set_output();
                self.hw.data_write(byte);
                self.hw.mux_clear();
                self.read_in_progress = true;
            }
        }

        if flags.contains(CtrlFlags::MREQ) {
            if flags.contains(CtrlFlags::RD) {
                self.status.mreq_reads += 1;
            } else if flags.contains(CtrlFlags::WR) {
                self.status.mreq_writes += 1;
            }
        } else if flags.contains(CtrlFlags::IORQ) {
            if flags.contains(CtrlFlags::RD) {
                self.status.iorq_reads += 1;
            } else if flags.contains(CtrlFlags::WR) {
                self.status.iorq_writes += 1;
            } else if flags.contains(CtrlFlags::M1) {
                self.status.irq_acks += 1;
            }
        }
        let elapsed = self.clock.elapsed_us(start);
        self.status.record_cycle_us(elapsed);
    }

    /// Ends the current wait: clears the wait flip-flops so the target can
    /// finish the cycle, then waits out an in-progress driven read.
    fn wait_release_now(&mut self) {
        self.hw.wait_clear(self.wait_on_memory_any(), self.wait_on_io_any());
        self.wait_asserted = false;
        self.wait_started = None;
        self.wait_handle_read_release();
    }

    /// Keeps driving the data bus until the read cycle ends, then turns
    /// the data port around.
    fn wait_handle_read_release(&mut self) {
        if !self.read_in_progress {
            return;
        }
        let start = self.clock.now();
        loop {
            let flags = CtrlFlags::from_levels(self.hw.bus_levels());
            if !flags.intersects(CtrlFlags::MREQ | CtrlFlags::IORQ) {
                self.hw.data_set_input();
                break;
            }
            if self.clock.elapsed_us(start) >= self.config.max_end_of_read_us {
                debug!("read cycle still active at wait release");
                break;
            }
            self.clock.delay_us(1);
        }
        self.read_in_progress = false;
    }

    // ------------------------------------------------------------------
    // bus mastership
    // ------------------------------------------------------------------

    fn control_request(&mut self) {
        self.hw.data_set_input();
        self.hw.set_busrq(true);
    }

    fn control_acknowledged(&mut self) -> bool {
        self.hw.bus_levels() & (1 << pins::BUSACK_BAR) == 0
    }

    fn control_take(&mut self) {
        self.under_control = true;
        self.hw.ctrl_dir_output(true);
        self.hw.drive_ctrl(false, false, false, false);
        self.hw.set_addr_push(true);
    }

    fn control_release(&mut self, reset_target: bool) {
        // Prime the refresh-skipping flip-flop by faking an M1-less MREQ,
        // so the very first MREQ after BUSACK raises a wait again.
        self.hw.data_set_output();
        self.hw.data_write(1 << (pins::M1_PIB_BAR - pins::DATA_BUS));
        self.clock.delay_us(2);
        self.hw.drive_ctrl(true, false, false, false);
        self.clock.delay_us(2);
        self.hw.drive_ctrl(false, false, false, false);
        self.hw.data_set_input();
        self.clock.delay_us(2);
        self.hw.mux_clear();
        self.hw.wait_clear(self.wait_on_memory_any(), self.wait_on_io_any());
        self.hw.ctrl_dir_output(false);
        self.hw.set_addr_push(false);
        if reset_target {
            self.hw.mux_set(pins::MUX_RESET_Z80_BAR_LOW);
            self.hw.set_busrq(false);
            self.clock.delay_us(10);
            self.hw.mux_clear();
        } else {
            self.hw.set_busrq(false);
        }
        self.under_control = false;
    }

    // ------------------------------------------------------------------
    // address latch and target memory
    // ------------------------------------------------------------------

    /// Shifts the high address byte into the shift register. Nine pulses,
    /// as the output register trails the shift register by one clock.
    fn addr_high_set(&mut self, mut high: u8) {
        for _ in 0..9 {
            if high & 0x80 != 0 {
                self.hw.mux_set(pins::MUX_HADDR_SER_HIGH);
            } else {
                self.hw.mux_set(pins::MUX_HADDR_SER_LOW);
            }
            self.clock.settle(cycles::DELAY_FOR_HIGH_ADDR_SET);
            high <<= 1;
            self.hw.haddr_clock();
        }
        self.clock.settle(cycles::DELAY_FOR_HIGH_ADDR_SET);
        self.hw.mux_clear();
    }

    /// Clears the low-address counter and clocks the value in. One extra
    /// count, as the output register trails the counter by one pulse.
    fn addr_low_set(&mut self, low: u8) {
        self.clock.settle(cycles::DELAY_FOR_CLEAR_LOW_ADDR);
        self.hw.mux_set(pins::MUX_LADDR_CLR_BAR_LOW);
        self.clock.settle(cycles::DELAY_FOR_CLEAR_LOW_ADDR);
        self.hw.mux_clear();
        for _ in 0..u32::from(low) + 1 {
            self.hw.laddr_clock();
        }
    }

    fn addr_set(&mut self, addr: u16) {
        let [low, high] = addr.to_le_bytes();
        self.addr_high_set(high);
        self.addr_low_set(low);
    }

    /// Writes one byte at the currently latched address. The strobe
    /// trails the request line as it would on the real CPU.
    fn byte_write(&mut self, byte: u8, iorq: bool) {
        self.hw.data_write(byte);
        self.hw.mux_set(pins::MUX_DATA_OE_BAR_LOW);
        self.hw.data_set_output();
        self.hw.drive_ctrl(!iorq, iorq, false, false);
        self.hw.drive_ctrl(!iorq, iorq, false, true);
        self.clock.settle(cycles::DELAY_FOR_WRITE_TO_TARGET);
        self.hw.drive_ctrl(false, false, false, false);
        self.hw.data_set_input();
        self.hw.mux_clear();
    }
}

impl<H: BusHardware, C: Clock> BusControl for BusEngine<H, C> {
    fn request_reset(&mut self, id: SocketId, duration_t_states: u32) {
        if let Some(rec) = self.sockets.get_mut(id.0) {
            if duration_t_states > 0 {
                rec.info.reset_duration_t_states = duration_t_states;
            }
            rec.reset_pending = true;
        }
    }

    fn request_nmi(&mut self, id: SocketId, duration_t_states: u32) {
        if let Some(rec) = self.sockets.get_mut(id.0) {
            if duration_t_states > 0 {
                rec.info.nmi_duration_t_states = duration_t_states;
            }
            rec.nmi_pending = true;
        }
    }

    fn request_irq(&mut self, id: SocketId, duration_t_states: u32) {
        if let Some(rec) = self.sockets.get_mut(id.0) {
            if duration_t_states > 0 {
                rec.info.irq_duration_t_states = duration_t_states;
            }
            rec.irq_pending = true;
        }
    }

    fn request_bus(&mut self, id: SocketId, reason: BusActionReason) {
        let rec = match self.sockets.get_mut(id.0) {
            Some(rec) => rec,
            None => {
                debug!("request_bus from unknown socket {}", id.0);
                return;
            }
        };
        rec.busrq_pending = true;
        rec.busrq_reason = reason;
        // BUSRQ is not routed through the mux, so it can be asserted
        // without disturbing wait processing.
        self.bus_action_check();
        self.bus_action_handle_start();
    }

    fn socket_enable(&mut self, id: SocketId, enabled: bool) {
        if let Some(rec) = self.sockets.get_mut(id.0) {
            rec.enabled = enabled;
            self.wait_enablement_update();
            self.wait_hold_update();
        }
    }

    fn wait_on_memory(&mut self, id: SocketId, wait: bool) {
        if let Some(rec) = self.sockets.get_mut(id.0) {
            rec.info.wait_on_memory = wait;
            self.wait_enablement_update();
        }
    }

    fn wait_on_io(&mut self, id: SocketId, wait: bool) {
        if let Some(rec) = self.sockets.get_mut(id.0) {
            rec.info.wait_on_io = wait;
            self.wait_enablement_update();
        }
    }

    fn wait_hold(&mut self, id: SocketId, hold: bool) {
        if let Some(rec) = self.sockets.get_mut(id.0) {
            rec.hold_requested = hold;
            self.wait_hold_update();
        }
    }

    fn wait_release(&mut self) {
        if !self.wait_hold && self.wait_asserted {
            self.wait_release_now();
        }
    }

    fn wait_is_held(&self) -> bool {
        self.wait_hold && self.wait_asserted
    }

    fn suspend_bus_detail_one_cycle(&mut self) {
        self.suspend_detail_one_cycle = true;
    }

    fn page_for_injection(&mut self, id: SocketId, page_out: bool) {
        if self.sockets.get(id.0).is_none() {
            return;
        }
        if page_out {
            self.page_out_pending = true;
        } else {
            self.page_in_pending = true;
        }
    }

    fn block_read(&mut self, addr: u16, data: &mut [u8],
                  busrq_and_release: bool, iorq: bool) -> Result<(), BusError> {
        if busrq_and_release {
            self.request_and_take()?;
        }
        self.hw.data_set_input();
        self.addr_set(addr);
        self.hw.mux_set(pins::MUX_DATA_OE_BAR_LOW);
        let mut addr = addr;
        for slot in data.iter_mut() {
            self.hw.drive_ctrl(!iorq, iorq, true, false);
            self.clock.settle(cycles::DELAY_FOR_READ_FROM_PIB);
            *slot = (self.hw.bus_levels() >> pins::DATA_BUS) as u8;
            self.hw.drive_ctrl(false, false, false, false);
            self.hw.laddr_clock();
            addr = addr.wrapping_add(1);
            if addr & 0xff == 0 {
                // The counter only spans the low byte.
                self.addr_set(addr);
                self.hw.mux_set(pins::MUX_DATA_OE_BAR_LOW);
            }
        }
        self.hw.mux_clear();
        if busrq_and_release {
            self.control_release(false);
        }
        Ok(())
    }

    fn block_write(&mut self, addr: u16, data: &[u8],
                   busrq_and_release: bool, iorq: bool) -> Result<(), BusError> {
        if busrq_and_release {
            self.request_and_take()?;
        }
        self.addr_set(addr);
        let mut addr = addr;
        for &byte in data.iter() {
            self.byte_write(byte, iorq);
            self.hw.laddr_clock();
            addr = addr.wrapping_add(1);
            if addr & 0xff == 0 {
                self.addr_set(addr);
            }
        }
        self.hw.data_set_input();
        if busrq_and_release {
            self.control_release(false);
        }
        Ok(())
    }

    fn is_under_control(&self) -> bool {
        self.under_control
    }

    fn target_clock_hz(&self) -> u32 {
        self.config.target_clock_hz
    }
}
