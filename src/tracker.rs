//! Tracks instruction boundaries and reads or writes the CPU registers by
//! opcode injection.
use arrayvec::ArrayVec;
use log::debug;

use crate::breakpoints::Breakpoints;
use crate::bus::{BusAction, BusActionReason, BusControl, BusEngine, BusError,
                 BusSocket, Decision, SocketId, SocketInfo};
use crate::flags::CtrlFlags;
use crate::host::{BusHardware, Clock};
use crate::opconsts;
use crate::registers::Z80Registers;

mod sequence;
use sequence::{get_write_pos, GET_AF_STORE_POS, GET_GRAB_MEMORY_POS,
               GET_R_SAMPLE_FETCHES, GET_R_STORE_FETCHES, GET_R_STORE_POS,
               GET_SEQUENCE};

/// Longest injected program.
const MAX_CODE_SNIPPET_LEN: usize = 64;
/// Capture limit for the bytes of the instruction currently executing.
const MAX_BYTES_IN_INSTR: usize = 8;

/// Where the tracker is in its acquisition cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TrackerState {
    /// Watching for the first instruction boundary.
    #[default]
    Idle,
    /// At most one instruction from a boundary; inject there if stepping.
    AwaitingInstructionBoundary,
    /// Feeding an injected program to the CPU.
    Injecting,
    /// Injection finished; the next boundary may hold.
    PostInject,
}

/// How execution proceeds between injections.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum StepMode {
    /// Free-running; only breakpoints stop the target.
    Run,
    /// Stop at the next instruction.
    StepInto,
    /// Stop when a specific follow-on address is fetched.
    StepOver,
    /// Held at an instruction boundary.
    #[default]
    Paused,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum InjectProgress {
    General,
    /// The injected loop is about to restart; memory contents are stable.
    GrabMemory,
    Done,
}

/// The register/step tracker. Registers itself as one bus socket and
/// decodes every memory wait cycle the engine shows it.
///
/// While executing normally it follows opcode prefixes to know where
/// instruction boundaries are. To read or write registers it substitutes
/// its own instruction stream at a boundary; the target's memory is paged
/// out for the duration so the program's stack and stores do not land in
/// real memory.
pub struct Tracker {
    id: SocketId,
    enabled: bool,
    regs: Z80Registers,
    breakpoints: Breakpoints,
    state: TrackerState,
    step_mode: StepMode,
    step_over_pc: u16,
    snippet: [u8; MAX_CODE_SNIPPET_LEN],
    snippet_len: usize,
    snippet_pos: usize,
    snippet_write_idx: usize,
    set_regs: bool,
    post_inject_mirror: bool,
    display_while_stepping: bool,
    reset_pending: bool,
    disable_pending: bool,
    page_out_active: bool,
    prefix_tracker: [bool; 2],
    instr_bytes: ArrayVec<u8, MAX_BYTES_IN_INSTR>,
}

impl Tracker {
    /// Registers a socket for the tracker on the given engine.
    pub fn new<H, C>(engine: &mut BusEngine<H, C>) -> Result<Tracker, BusError>
        where H: BusHardware, C: Clock
    {
        let id = engine.add_socket(SocketInfo::default())?;
        Ok(Tracker::with_socket(id))
    }

    fn with_socket(id: SocketId) -> Tracker {
        Tracker {
            id,
            enabled: false,
            regs: Z80Registers::default(),
            breakpoints: Breakpoints::new(),
            state: TrackerState::Idle,
            step_mode: StepMode::Paused,
            step_over_pc: 0,
            snippet: [0; MAX_CODE_SNIPPET_LEN],
            snippet_len: 0,
            snippet_pos: 0,
            snippet_write_idx: 0,
            set_regs: false,
            post_inject_mirror: true,
            display_while_stepping: false,
            reset_pending: false,
            disable_pending: false,
            page_out_active: false,
            prefix_tracker: [false, false],
            instr_bytes: ArrayVec::new(),
        }
    }

    #[inline]
    pub fn socket_id(&self) -> SocketId {
        self.id
    }

    /// Turns tracking on or off. Enabling arms memory wait states; a
    /// disable during injection is deferred until the injected program
    /// finishes so the CPU is not abandoned mid-stream.
    pub fn enable(&mut self, bus: &mut dyn BusControl, enable: bool) {
        self.step_mode = StepMode::Paused;
        if enable {
            bus.socket_enable(self.id, true);
            self.enabled = true;
            bus.wait_on_memory(self.id, true);
        }
        else {
            bus.wait_hold(self.id, false);
            if self.state != TrackerState::Injecting {
                bus.wait_on_memory(self.id, false);
                bus.socket_enable(self.id, false);
                self.enabled = false;
                bus.page_for_injection(self.id, false);
                self.page_out_active = false;
            }
            else {
                self.disable_pending = true;
            }
        }
    }

    #[inline]
    pub fn is_tracking(&self) -> bool {
        self.enabled
    }

    pub fn is_paused(&self) -> bool {
        self.enabled && self.step_mode == StepMode::Paused
    }

    #[inline]
    pub fn state(&self) -> TrackerState {
        self.state
    }

    #[inline]
    pub fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    /// The most recently acquired register snapshot.
    #[inline]
    pub fn regs(&self) -> &Z80Registers {
        &self.regs
    }

    #[inline]
    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    #[inline]
    pub fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    /// Whether the registers are written back to target memory mirrors
    /// after each injection.
    pub fn set_post_inject_mirror(&mut self, mirror: bool) {
        self.post_inject_mirror = mirror;
    }

    /// Requests a display-reason bus grab at the end of the next
    /// injection, so a frame can be captured while stepping.
    pub fn request_display_grab(&mut self) {
        self.display_while_stepping = true;
    }

    /// Resets the target. Injection restarts as soon as the reset pulse
    /// completes.
    pub fn target_reset(&mut self, bus: &mut dyn BusControl) {
        self.reset_pending = true;
        bus.request_reset(self.id, 0);
    }

    /// Begins injecting a register set program carrying `regs` (or the
    /// current snapshot). Ignored while another injection runs.
    pub fn start_set_register_sequence(&mut self, bus: &mut dyn BusControl,
                                       regs: Option<&Z80Registers>) {
        if let Some(regs) = regs {
            self.regs = *regs;
        }
        if self.state == TrackerState::Injecting {
            debug!("register set rejected while injecting");
            return;
        }
        self.state = TrackerState::Injecting;
        bus.wait_hold(self.id, false);
        self.set_regs = true;
        self.snippet_pos = 0;
    }

    /// Runs a single instruction and pauses again.
    pub fn step_into(&mut self, bus: &mut dyn BusControl) {
        self.step_mode = StepMode::StepInto;
        self.release_any_hold(bus);
    }

    /// Runs until `next_pc` is fetched as an opcode; used to step over a
    /// call or a loop. The caller determines the follow-on address.
    pub fn step_over(&mut self, bus: &mut dyn BusControl, next_pc: u16) {
        self.step_over_pc = next_pc;
        self.step_mode = StepMode::StepOver;
        debug!("step-over until PC {:04x}", next_pc);
        self.release_any_hold(bus);
    }

    /// Resumes free-running execution.
    pub fn step_run(&mut self, bus: &mut dyn BusControl) {
        self.step_mode = StepMode::Run;
        self.release_any_hold(bus);
    }

    /// Holds again at the next instruction boundary. Used after the
    /// target has been programmed to come to a well-defined stop.
    pub fn step_pause(&mut self, bus: &mut dyn BusControl) {
        self.step_mode = StepMode::Paused;
        self.release_any_hold(bus);
    }

    fn release_any_hold(&mut self, bus: &mut dyn BusControl) {
        if bus.wait_is_held() {
            bus.wait_hold(self.id, false);
            bus.wait_release();
        }
    }

    /// Bytes of the instruction currently being tracked.
    pub fn instruction_bytes(&self) -> &[u8] {
        &self.instr_bytes
    }

    fn is_prefix(byte: u8) -> bool {
        matches!(byte, opconsts::DD_PREFIX | opconsts::ED_PREFIX
                     | opconsts::FD_PREFIX | opconsts::CB_PREFIX)
    }

    /// Follows M1 cycles through prefix bytes. Returns true when this
    /// cycle fetches the first byte of a new instruction.
    fn track_prefixed_instructions(&mut self, flags: CtrlFlags, code_byte: u8) -> bool {
        let mut first_byte = false;
        if flags.contains(CtrlFlags::M1) {
            self.prefix_tracker[0] = self.prefix_tracker[1];
            if !self.prefix_tracker[0] {
                first_byte = true;
            }
            self.prefix_tracker[1] = Self::is_prefix(code_byte);
        }
        else {
            // Not in the middle of a prefixed sequence on a non-M1 cycle.
            self.prefix_tracker = [false, false];
        }
        first_byte
    }

    fn handle_pending_disable(&mut self, bus: &mut dyn BusControl) -> bool {
        if !self.disable_pending {
            return false;
        }
        self.disable_pending = false;
        bus.wait_on_memory(self.id, false);
        bus.socket_enable(self.id, false);
        self.enabled = false;
        bus.wait_hold(self.id, false);
        bus.page_for_injection(self.id, false);
        self.page_out_active = false;
        true
    }

    /// Step-over and breakpoint checks; a hit switches to injection so
    /// the registers are captured, then pauses.
    fn handle_step_over_bkpts(&mut self, addr: u16, flags: CtrlFlags) {
        if self.state == TrackerState::Injecting
            || self.state == TrackerState::PostInject {
            return;
        }
        if self.step_mode == StepMode::StepOver
            && flags.contains(CtrlFlags::M1)
            && self.step_over_pc == addr {
            self.state = TrackerState::Injecting;
            self.step_mode = StepMode::Paused;
            debug!("step-over reached {:04x}", addr);
        }
        else if self.breakpoints.check_for_break(addr, flags).is_some() {
            self.state = TrackerState::Injecting;
            self.step_mode = StepMode::Paused;
            debug!("breakpoint hit at {:04x}", addr);
        }
    }

    fn handle_tracker_idle(&mut self, bus: &mut dyn BusControl,
                           flags: CtrlFlags, data: u8) {
        if self.handle_pending_disable(bus) {
            return;
        }
        let first_byte = self.track_prefixed_instructions(flags, data);
        if first_byte {
            self.state = TrackerState::AwaitingInstructionBoundary;
        }
        if first_byte || self.instr_bytes.is_full() {
            self.instr_bytes.clear();
        }
        self.instr_bytes.push(data);
    }

    /// One cycle of the register get program. Reads inject the next
    /// program byte; writes harvest register values from the address and
    /// data the CPU emits.
    fn handle_register_get(&mut self, addr: u16, data: u8,
                           flags: CtrlFlags) -> (InjectProgress, Decision) {
        let mut decision = Decision::NotDecoded;
        if flags.contains(CtrlFlags::WR) {
            match self.snippet_pos {
                get_write_pos::PUSH_AF => {
                    if self.snippet_write_idx == 0 {
                        // A stacked first; SP was one above the store.
                        self.regs.sp.set16(addr.wrapping_add(1));
                        self.regs.af.set8hi(data);
                        self.snippet[GET_AF_STORE_POS + 1] = data;
                        self.snippet_write_idx += 1;
                    }
                    else {
                        self.regs.af.set8lo(data);
                        self.snippet[GET_AF_STORE_POS] = data;
                    }
                }
                get_write_pos::LD_HL_A_R => {
                    self.regs.hl.set16(addr);
                    self.regs.r = data.wrapping_sub(GET_R_SAMPLE_FETCHES);
                    self.snippet[GET_R_STORE_POS] =
                        self.regs.r.wrapping_sub(GET_R_STORE_FETCHES);
                }
                get_write_pos::LD_HL_A_I => {
                    self.regs.i = data;
                }
                get_write_pos::LD_DE_A => {
                    self.regs.de.set16(addr);
                }
                get_write_pos::LD_BC_A => {
                    self.regs.bc.set16(addr);
                }
                get_write_pos::LD_HL_A_ALT => {
                    self.regs.hl_alt.set16(addr);
                }
                get_write_pos::LD_DE_A_ALT => {
                    self.regs.de_alt.set16(addr);
                }
                get_write_pos::LD_BC_A_ALT => {
                    self.regs.bc_alt.set16(addr);
                }
                get_write_pos::PUSH_AF_ALT => {
                    if self.snippet_write_idx == 0 {
                        self.regs.af_alt.set8hi(data);
                        self.snippet_write_idx += 1;
                    }
                    else {
                        self.regs.af_alt.set8lo(data);
                    }
                }
                get_write_pos::PUSH_IX => {
                    if self.snippet_write_idx == 0 {
                        self.regs.ix.set8hi(data);
                        self.snippet_write_idx += 1;
                    }
                    else {
                        self.regs.ix.set8lo(data);
                    }
                }
                get_write_pos::PUSH_IY => {
                    if self.snippet_write_idx == 0 {
                        self.regs.iy.set8hi(data);
                        self.snippet_write_idx += 1;
                    }
                    else {
                        self.regs.iy.set8lo(data);
                    }
                }
                _ => {}
            }
        }
        else {
            if self.snippet_pos == 0 {
                self.regs.pc.set16(addr);
                self.snippet[..GET_SEQUENCE.len()].copy_from_slice(&GET_SEQUENCE);
                self.snippet_len = GET_SEQUENCE.len();
            }
            decision = Decision::InjectOpcode(self.snippet[self.snippet_pos]);
            self.snippet_pos += 1;
            self.snippet_write_idx = 0;
        }

        if self.snippet_pos >= GET_SEQUENCE.len() {
            self.snippet_pos = 0;
            (InjectProgress::Done, decision)
        }
        else if self.snippet_pos == GET_GRAB_MEMORY_POS {
            (InjectProgress::GrabMemory, decision)
        }
        else {
            (InjectProgress::General, decision)
        }
    }

    /// One cycle of the register set program. Every cycle is a read, so
    /// the next program byte is injected unconditionally.
    fn handle_register_set(&mut self) -> (InjectProgress, Decision) {
        if self.snippet_pos == 0 {
            self.snippet_len = sequence::build_set_sequence(&self.regs, &mut self.snippet);
            if self.snippet_len == 0 {
                return (InjectProgress::Done, Decision::NotDecoded);
            }
        }
        let byte = self.snippet[self.snippet_pos];
        self.snippet_pos += 1;
        let progress = if self.snippet_pos >= self.snippet_len {
            InjectProgress::Done
        } else {
            InjectProgress::General
        };
        (progress, Decision::InjectOpcode(byte))
    }

    fn handle_injection(&mut self, bus: &mut dyn BusControl, addr: u16,
                        data: u8, flags: CtrlFlags) -> Decision {
        if !self.page_out_active {
            bus.page_for_injection(self.id, true);
            self.page_out_active = true;
        }

        let (progress, decision) = if self.set_regs {
            self.handle_register_set()
        } else {
            self.handle_register_get(addr, data, flags)
        };

        match progress {
            InjectProgress::GrabMemory => {
                if self.post_inject_mirror || self.display_while_stepping {
                    // The data OE flip-flop can stay enabled across a
                    // BUSRQ; keeping the grab synchronous with injection
                    // means the next cycle needs no bus detail and the
                    // latch is left alone.
                    bus.suspend_bus_detail_one_cycle();
                    bus.page_for_injection(self.id, false);
                    self.page_out_active = false;
                    let reason = if self.display_while_stepping {
                        BusActionReason::Display
                    } else {
                        BusActionReason::MemoryMirror
                    };
                    self.display_while_stepping = false;
                    bus.request_bus(self.id, reason);
                }
            }
            InjectProgress::Done => {
                self.prefix_tracker = [false, false];
                self.set_regs = false;
                self.snippet_pos = 0;
                bus.page_for_injection(self.id, false);
                self.page_out_active = false;
                self.state = TrackerState::PostInject;
                if self.step_mode == StepMode::StepInto {
                    self.step_mode = StepMode::Paused;
                }
            }
            InjectProgress::General => {}
        }
        decision
    }
}

impl BusSocket for Tracker {
    fn on_wait_cycle(&mut self, bus: &mut dyn BusControl, addr: u16,
                     data: u8, flags: CtrlFlags) -> Decision {
        // I/O cycles carry no instruction information.
        if !flags.contains(CtrlFlags::MREQ) {
            return Decision::NotDecoded;
        }

        match self.state {
            TrackerState::Idle | TrackerState::PostInject => {
                if self.state == TrackerState::PostInject
                    && self.step_mode == StepMode::Paused {
                    bus.wait_hold(self.id, true);
                }
                self.handle_step_over_bkpts(addr, flags);
                self.handle_tracker_idle(bus, flags, data);
                Decision::NotDecoded
            }
            TrackerState::AwaitingInstructionBoundary => {
                if self.handle_pending_disable(bus) {
                    return Decision::NotDecoded;
                }
                self.handle_step_over_bkpts(addr, flags);
                let first_byte = self.track_prefixed_instructions(flags, data);
                if !first_byte {
                    if !self.instr_bytes.is_full() {
                        self.instr_bytes.push(data);
                    }
                }
                else if self.step_mode == StepMode::StepInto
                    || self.display_while_stepping {
                    self.state = TrackerState::Injecting;
                }
                if self.state == TrackerState::Injecting {
                    self.set_regs = false;
                    self.snippet_pos = 0;
                    self.handle_injection(bus, addr, data, flags)
                } else {
                    Decision::NotDecoded
                }
            }
            TrackerState::Injecting => {
                self.handle_injection(bus, addr, data, flags)
            }
        }
    }

    fn on_bus_action_complete(&mut self, _bus: &mut dyn BusControl,
                              action: BusAction, _reason: BusActionReason) {
        if action == BusAction::Reset {
            self.prefix_tracker = [false, false];
            // A reset lands at the start of the program; capture and hold
            // right away.
            self.state = TrackerState::AwaitingInstructionBoundary;
            if self.reset_pending {
                self.reset_pending = false;
                self.state = TrackerState::Injecting;
            }
        }
    }
}
