//! A simulated board and target CPU for exercising the bus engine without
//! hardware.
//!
//! [SimBus] models the GPIO seam: the address latch pair, the data-bus
//! mux, wait flip-flops and the BUSRQ/BUSACK handshake. [TargetCpu]
//! executes the instruction forms the injection sequences are built from,
//! emitting machine cycles through the engine one at a time the way the
//! real CPU would.
// Each test binary uses a different subset of the rig.
#![allow(dead_code)]
use std::cell::RefCell;
use std::rc::Rc;

use z80bus::host::pins;
use z80bus::*;

pub fn init_log() {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Debug, simplelog::Config::default());
}

/// One machine cycle imposed on the bus by the simulated CPU.
#[derive(Clone, Copy, Debug)]
pub struct Cycle {
    pub addr: u16,
    pub data: u8,
    pub m1: bool,
    pub mreq: bool,
    pub iorq: bool,
    pub rd: bool,
    pub wr: bool,
}

impl Cycle {
    pub fn fetch(addr: u16) -> Cycle {
        Cycle { addr, data: 0, m1: true, mreq: true, iorq: false, rd: true, wr: false }
    }

    pub fn read(addr: u16) -> Cycle {
        Cycle { addr, data: 0, m1: false, mreq: true, iorq: false, rd: true, wr: false }
    }

    pub fn write(addr: u16, data: u8) -> Cycle {
        Cycle { addr, data, m1: false, mreq: true, iorq: false, rd: false, wr: true }
    }
}

#[derive(Default)]
struct SimState {
    mem: Vec<u8>,
    io: Vec<u8>,
    select: Option<u32>,
    haddr_shift: u8,
    haddr_out: u8,
    laddr_count: u8,
    laddr_out: u8,
    data_out: u8,
    data_dir_out: bool,
    ctrl_out: bool,
    drv_mreq: bool,
    drv_iorq: bool,
    drv_rd: bool,
    drv_wr: bool,
    busrq: bool,
    cpu_ack: bool,
    ack_enabled: bool,
    addr_push: bool,
    wait_en_mem: bool,
    wait_en_io: bool,
    wait_line: bool,
    cycle: Option<Cycle>,
    driven: Option<u8>,
    reset_pulses: u32,
    nmi_pulses: u32,
    irq_pulses: u32,
    irq_asserted: bool,
    wait_clears: u32,
}

impl SimState {
    fn latched_addr(&self) -> u16 {
        u16::from_le_bytes([self.laddr_out, self.haddr_out])
    }

    fn busack_active(&self) -> bool {
        self.cpu_ack || (self.busrq && self.ack_enabled)
    }
}

/// Cloneable handle to the simulated board; one clone goes to the engine,
/// another stays with the test.
#[derive(Clone)]
pub struct SimBus(Rc<RefCell<SimState>>);

impl Default for SimBus {
    fn default() -> Self {
        SimBus::new()
    }
}

impl SimBus {
    pub fn new() -> SimBus {
        SimBus(Rc::new(RefCell::new(SimState {
            mem: vec![0u8; 0x10000],
            io: vec![0xffu8; 0x100],
            ack_enabled: true,
            ..SimState::default()
        })))
    }

    pub fn load(&self, addr: u16, bytes: &[u8]) {
        let mut st = self.0.borrow_mut();
        for (i, &b) in bytes.iter().enumerate() {
            let a = addr.wrapping_add(i as u16) as usize;
            st.mem[a] = b;
        }
    }

    pub fn read_mem(&self, addr: u16) -> u8 {
        self.0.borrow().mem[addr as usize]
    }

    pub fn write_mem(&self, addr: u16, byte: u8) {
        self.0.borrow_mut().mem[addr as usize] = byte;
    }

    pub fn mem_slice(&self, addr: u16, len: usize) -> Vec<u8> {
        let st = self.0.borrow();
        st.mem[addr as usize..addr as usize + len].to_vec()
    }

    pub fn io_byte(&self, port: u8) -> u8 {
        self.0.borrow().io[port as usize]
    }

    pub fn set_ack_enabled(&self, enabled: bool) {
        self.0.borrow_mut().ack_enabled = enabled;
    }

    pub fn set_cpu_ack(&self, ack: bool) {
        self.0.borrow_mut().cpu_ack = ack;
    }

    pub fn busrq_asserted(&self) -> bool {
        self.0.borrow().busrq
    }

    pub fn wait_line(&self) -> bool {
        self.0.borrow().wait_line
    }

    pub fn reset_pulses(&self) -> u32 {
        self.0.borrow().reset_pulses
    }

    pub fn nmi_pulses(&self) -> u32 {
        self.0.borrow().nmi_pulses
    }

    pub fn irq_pulses(&self) -> u32 {
        self.0.borrow().irq_pulses
    }

    pub fn irq_asserted(&self) -> bool {
        self.0.borrow().irq_asserted
    }

    pub fn wait_clears(&self) -> u32 {
        self.0.borrow().wait_clears
    }

    pub fn begin_cycle(&self, cycle: Cycle) {
        let mut st = self.0.borrow_mut();
        st.driven = None;
        st.wait_line = (cycle.mreq && st.wait_en_mem) || (cycle.iorq && st.wait_en_io);
        st.cycle = Some(cycle);
    }

    pub fn end_cycle(&self) -> Option<u8> {
        let mut st = self.0.borrow_mut();
        st.cycle = None;
        st.wait_line = false;
        st.driven.take()
    }
}

impl BusHardware for SimBus {
    fn bus_levels(&mut self) -> u32 {
        let st = self.0.borrow();
        let mut levels = !0u32;
        if st.busack_active() {
            levels &= !(1 << pins::BUSACK_BAR);
        }
        if st.wait_line {
            levels &= !(1 << pins::WAIT_BAR);
        }
        let (mreq, iorq, rd, wr, m1) = if st.ctrl_out {
            (st.drv_mreq, st.drv_iorq, st.drv_rd, st.drv_wr, false)
        } else if let Some(c) = st.cycle {
            (c.mreq, c.iorq, c.rd, c.wr, c.m1)
        } else {
            (false, false, false, false, false)
        };
        if mreq { levels &= !(1 << pins::MREQ_BAR); }
        if iorq { levels &= !(1 << pins::IORQ_BAR); }
        if rd { levels &= !(1 << pins::RD_BAR); }
        if wr { levels &= !(1 << pins::WR_BAR); }
        let data_val: u8 = match st.select {
            Some(pins::MUX_DATA_OE_BAR_LOW) => {
                if st.ctrl_out && st.drv_rd {
                    let addr = st.latched_addr();
                    if st.drv_mreq {
                        st.mem[addr as usize]
                    } else if st.drv_iorq {
                        st.io[(addr & 0xff) as usize]
                    } else {
                        0xff
                    }
                } else if st.data_dir_out {
                    st.data_out
                } else if let Some(c) = st.cycle {
                    // Memory drives the bus on a read unless paged out.
                    if c.wr { c.data } else { st.mem[c.addr as usize] }
                } else {
                    0xff
                }
            }
            Some(pins::MUX_LADDR_OE_BAR) => match st.cycle {
                Some(c) => c.addr.to_le_bytes()[0],
                None => st.laddr_out,
            },
            Some(pins::MUX_HADDR_OE_BAR) => match st.cycle {
                Some(c) => c.addr.to_le_bytes()[1],
                None => st.haddr_out,
            },
            // M1 piggybacks on the low data line when no output is
            // enabled.
            _ => if m1 { 0xfe } else { 0xff },
        };
        levels &= !(0xffu32 << pins::DATA_BUS);
        levels |= u32::from(data_val) << pins::DATA_BUS;
        levels
    }

    fn mux_set(&mut self, select: u32) {
        let mut st = self.0.borrow_mut();
        if st.select != Some(select) {
            match select {
                pins::MUX_RESET_Z80_BAR_LOW => st.reset_pulses += 1,
                pins::MUX_NMI_BAR_LOW => st.nmi_pulses += 1,
                pins::MUX_IRQ_BAR_LOW => {
                    st.irq_pulses += 1;
                    st.irq_asserted = true;
                }
                pins::MUX_LADDR_CLR_BAR_LOW => {
                    st.laddr_count = 0;
                    st.laddr_out = 0;
                }
                _ => {}
            }
        }
        if select != pins::MUX_IRQ_BAR_LOW {
            st.irq_asserted = false;
        }
        st.select = Some(select);
    }

    fn mux_clear(&mut self) {
        let mut st = self.0.borrow_mut();
        st.select = None;
        st.irq_asserted = false;
    }

    fn laddr_clock(&mut self) {
        let mut st = self.0.borrow_mut();
        st.laddr_out = st.laddr_count;
        st.laddr_count = st.laddr_count.wrapping_add(1);
    }

    fn haddr_clock(&mut self) {
        let mut st = self.0.borrow_mut();
        let ser = (st.select == Some(pins::MUX_HADDR_SER_HIGH)) as u8;
        st.haddr_out = st.haddr_shift;
        st.haddr_shift = (st.haddr_shift << 1) | ser;
    }

    fn data_set_output(&mut self) {
        self.0.borrow_mut().data_dir_out = true;
    }

    fn data_set_input(&mut self) {
        self.0.borrow_mut().data_dir_out = false;
    }

    fn data_write(&mut self, byte: u8) {
        let mut st = self.0.borrow_mut();
        st.data_out = byte;
        if st.data_dir_out && st.select == Some(pins::MUX_DATA_OE_BAR_LOW)
            && st.cycle.is_some() {
            st.driven = Some(byte);
        }
    }

    fn set_busrq(&mut self, asserted: bool) {
        self.0.borrow_mut().busrq = asserted;
    }

    fn set_addr_push(&mut self, enabled: bool) {
        self.0.borrow_mut().addr_push = enabled;
    }

    fn ctrl_dir_output(&mut self, output: bool) {
        self.0.borrow_mut().ctrl_out = output;
    }

    fn drive_ctrl(&mut self, mreq: bool, iorq: bool, rd: bool, wr: bool) {
        let mut st = self.0.borrow_mut();
        st.drv_mreq = mreq;
        st.drv_iorq = iorq;
        st.drv_rd = rd;
        if wr && !st.drv_wr && st.ctrl_out {
            let addr = st.latched_addr();
            let byte = st.data_out;
            if mreq {
                st.mem[addr as usize] = byte;
            } else if iorq {
                st.io[(addr & 0xff) as usize] = byte;
            }
        }
        st.drv_wr = wr;
    }

    fn wait_enable(&mut self, memory: bool, io: bool) {
        let mut st = self.0.borrow_mut();
        st.wait_en_mem = memory;
        st.wait_en_io = io;
    }

    fn wait_clear(&mut self, _memory: bool, _io: bool) {
        let mut st = self.0.borrow_mut();
        st.wait_clears += 1;
        st.wait_line = false;
    }
}

/// Simulated target CPU registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuRegs {
    pub a: u8,
    pub f: u8,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub a_alt: u8,
    pub f_alt: u8,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    pub im: u8,
    pub iff: bool,
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stop {
    /// The engine is holding the target in a wait state.
    Held,
    /// The instruction budget ran out.
    Budget,
}

/// The engine, the tracker and a scripted CPU wired to one simulated
/// board.
pub struct TestRig {
    pub engine: BusEngine<SimBus, TickClock>,
    pub tracker: Tracker,
    pub bus: SimBus,
    pub cpu: CpuRegs,
    pending: Option<Cycle>,
}

impl TestRig {
    pub fn new() -> TestRig {
        let bus = SimBus::new();
        let mut engine = BusEngine::new(bus.clone(), TickClock::default(),
                                        BusConfig::default());
        let tracker = Tracker::new(&mut engine).unwrap();
        TestRig { engine, tracker, bus, cpu: CpuRegs::default(), pending: None }
    }

    pub fn service(&mut self) {
        self.engine.service(&mut [&mut self.tracker]);
    }

    pub fn service_n(&mut self, n: usize) {
        for _ in 0..n {
            self.service();
        }
    }

    /// Grants bus mastership whenever the engine raises BUSRQ between
    /// machine cycles, the way the CPU yields between instructions.
    fn grant_bus_if_requested(&mut self) {
        for _ in 0..10 {
            if !self.bus.busrq_asserted() {
                return;
            }
            self.bus.set_cpu_ack(true);
            for _ in 0..500 {
                self.service();
                if !self.bus.busrq_asserted() {
                    break;
                }
            }
            self.bus.set_cpu_ack(false);
        }
        panic!("BUSRQ never released");
    }

    /// Runs one machine cycle to completion, or returns None when the
    /// engine holds the target in the wait state. The held cycle stays
    /// pending and resumes on the next call.
    fn cycle(&mut self, cycle: Cycle) -> Option<u8> {
        if self.pending.is_none() {
            self.grant_bus_if_requested();
            self.bus.begin_cycle(cycle);
            self.pending = Some(cycle);
        }
        for _ in 0..100 {
            self.service();
            if !self.bus.wait_line() {
                let driven = self.bus.end_cycle();
                let done = self.pending.take().expect("pending cycle");
                return Some(if done.wr {
                    self.bus.write_mem(done.addr, done.data);
                    done.data
                } else {
                    driven.unwrap_or_else(|| self.bus.read_mem(done.addr))
                });
            }
            if self.engine.wait_is_held() {
                return None;
            }
        }
        panic!("wait state never released");
    }

    fn fetch(&mut self) -> Option<u8> {
        let byte = self.cycle(Cycle::fetch(self.cpu.pc))?;
        self.cpu.pc = self.cpu.pc.wrapping_add(1);
        self.cpu.r = self.cpu.r.wrapping_add(1);
        Some(byte)
    }

    fn read(&mut self, addr: u16) -> Option<u8> {
        self.cycle(Cycle::read(addr))
    }

    fn operand(&mut self) -> Option<u8> {
        let byte = self.read(self.cpu.pc)?;
        self.cpu.pc = self.cpu.pc.wrapping_add(1);
        Some(byte)
    }

    fn operand16(&mut self) -> Option<u16> {
        let lo = self.operand()?;
        let hi = self.operand()?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    fn write(&mut self, addr: u16, byte: u8) -> Option<()> {
        self.cycle(Cycle::write(addr, byte))?;
        Some(())
    }

    fn push16(&mut self, val: u16) -> Option<()> {
        let [lo, hi] = val.to_le_bytes();
        self.cpu.sp = self.cpu.sp.wrapping_sub(1);
        self.write(self.cpu.sp, hi)?;
        self.cpu.sp = self.cpu.sp.wrapping_sub(1);
        self.write(self.cpu.sp, lo)
    }

    fn pop16(&mut self) -> Option<u16> {
        let lo = self.read(self.cpu.sp)?;
        let hi = self.read(self.cpu.sp.wrapping_add(1))?;
        self.cpu.sp = self.cpu.sp.wrapping_add(2);
        Some(u16::from_le_bytes([lo, hi]))
    }

    fn af(&self) -> u16 {
        u16::from_le_bytes([self.cpu.f, self.cpu.a])
    }

    fn set_af(&mut self, val: u16) {
        let [f, a] = val.to_le_bytes();
        self.cpu.f = f;
        self.cpu.a = a;
    }

    /// Executes one instruction, returning None if the engine held the
    /// target mid-way. Covers the forms the injection programs use plus
    /// enough extras for test programs.
    fn step_instruction(&mut self) -> Option<()> {
        let opcode = self.fetch()?;
        match opcode {
            0x00 => {}                                      // nop
            0x3C => self.cpu.a = self.cpu.a.wrapping_add(1), // inc a
            0x3E => self.cpu.a = self.operand()?,            // ld a,n
            0x01 => self.cpu.bc = self.operand16()?,         // ld bc,nn
            0x11 => self.cpu.de = self.operand16()?,         // ld de,nn
            0x21 => self.cpu.hl = self.operand16()?,         // ld hl,nn
            0x31 => self.cpu.sp = self.operand16()?,         // ld sp,nn
            0x02 => self.write(self.cpu.bc, self.cpu.a)?,    // ld (bc),a
            0x12 => self.write(self.cpu.de, self.cpu.a)?,    // ld (de),a
            0x77 => self.write(self.cpu.hl, self.cpu.a)?,    // ld (hl),a
            0x33 => self.cpu.sp = self.cpu.sp.wrapping_add(1), // inc sp
            0xF5 => self.push16(self.af())?,                 // push af
            0xF1 => {                                        // pop af
                let af = self.pop16()?;
                self.set_af(af);
            }
            0x08 => {                                        // ex af,af'
                core::mem::swap(&mut self.cpu.a, &mut self.cpu.a_alt);
                core::mem::swap(&mut self.cpu.f, &mut self.cpu.f_alt);
            }
            0xD9 => {                                        // exx
                core::mem::swap(&mut self.cpu.bc, &mut self.cpu.bc_alt);
                core::mem::swap(&mut self.cpu.de, &mut self.cpu.de_alt);
                core::mem::swap(&mut self.cpu.hl, &mut self.cpu.hl_alt);
            }
            0x18 => {                                        // jr d
                let disp = self.operand()? as i8;
                self.cpu.pc = self.cpu.pc.wrapping_add(disp as u16);
            }
            0xC3 => self.cpu.pc = self.operand16()?,         // jp nn
            0xCD => {                                        // call nn
                let target = self.operand16()?;
                self.push16(self.cpu.pc)?;
                self.cpu.pc = target;
            }
            0xC9 => self.cpu.pc = self.pop16()?,             // ret
            0xF3 => self.cpu.iff = false,                    // di
            0xFB => self.cpu.iff = true,                     // ei
            0xDD | 0xFD => {
                let op2 = self.fetch()?;
                match op2 {
                    0x21 => {
                        let val = self.operand16()?;
                        if opcode == 0xDD { self.cpu.ix = val } else { self.cpu.iy = val }
                    }
                    0xE5 => {
                        let val = if opcode == 0xDD { self.cpu.ix } else { self.cpu.iy };
                        self.push16(val)?;
                    }
                    other => panic!("index opcode {:02x} not scripted", other),
                }
            }
            0xED => {
                let op2 = self.fetch()?;
                match op2 {
                    0x47 => self.cpu.i = self.cpu.a,         // ld i,a
                    0x4F => self.cpu.r = self.cpu.a,         // ld r,a
                    0x57 => self.cpu.a = self.cpu.i,         // ld a,i
                    0x5F => self.cpu.a = self.cpu.r,         // ld a,r
                    0x46 => self.cpu.im = 0,
                    0x56 => self.cpu.im = 1,
                    0x5E => self.cpu.im = 2,
                    other => panic!("ed opcode {:02x} not scripted", other),
                }
            }
            other => panic!("opcode {:02x} not scripted at {:04x}",
                            other, self.cpu.pc.wrapping_sub(1)),
        }
        Some(())
    }

    /// Runs until the engine holds the target or the budget is spent.
    pub fn run(&mut self, max_instructions: usize) -> Stop {
        for _ in 0..max_instructions {
            if self.step_instruction().is_none() {
                return Stop::Held;
            }
        }
        Stop::Budget
    }
}

impl Default for TestRig {
    fn default() -> Self {
        TestRig::new()
    }
}
