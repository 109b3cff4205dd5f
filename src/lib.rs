/*
    z80bus: software-defined Z80 bus controller library.
    Copyright (C) 2024  Rob Marsden

    z80bus is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    z80bus is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
/*! # z80bus

`z80bus` drives the address, data and control pins of a Z80 backplane from a
Raspberry-Pi-class SoC. It generates hardware WAIT states on demand, decodes
every memory and I/O machine cycle of the externally clocked CPU, arbitrates
reset/NMI/IRQ/bus-master requests between independent consumers, and can read
and write the CPU's internal registers with no on-chip debug support by
hijacking instruction fetch and feeding the CPU a fabricated instruction
stream ("opcode injection").

```text
  ________                 ___________                _______
 |        |  BUSRQ/BUSACK |           |  GPIO + mux  |       |=
 |  Z80   |<------------->| BusEngine |<============>|  SoC  |=
 |        |  WAIT/MREQ/.. |           |              |_______|=
 |________|<------------->|___________|
                                ^
                      bus-socket fan-out
                                |
                     [ Tracker | other sockets ]
```

The crate is built around a handful of traits, in the same spirit as a CPU
emulator exposes `Memory` and `Io` seams:

* [BusHardware] - the raw pin/mux seam; one implementation per board revision.
* [Clock] - a time source for the bounded electrical settle/timeout loops,
  so tests can run against simulated time. [TickClock] is a deterministic
  implementation suitable for tests.
* [BusSocket] - the consumer contract: a per-cycle callback returning a
  [Decision], and a completion callback for bus actions.

[BusEngine] owns the socket table, the wait-state service loop and bus-action
arbitration. [Tracker] registers itself as one socket and implements the
opcode-injection register get/set algorithm, single stepping and breakpoints
on top of the engine.

To build the crate with `no_std` support set `default-features` to `false`
and select the required features only.

## Example

```no_run
# struct Hw;
# impl z80bus::BusHardware for Hw {
#     fn bus_levels(&mut self) -> u32 { 0 }
#     fn mux_set(&mut self, _: u32) {}
#     fn mux_clear(&mut self) {}
#     fn laddr_clock(&mut self) {}
#     fn haddr_clock(&mut self) {}
#     fn data_set_output(&mut self) {}
#     fn data_set_input(&mut self) {}
#     fn data_write(&mut self, _: u8) {}
#     fn set_busrq(&mut self, _: bool) {}
#     fn set_addr_push(&mut self, _: bool) {}
#     fn ctrl_dir_output(&mut self, _: bool) {}
#     fn drive_ctrl(&mut self, _: bool, _: bool, _: bool, _: bool) {}
#     fn wait_enable(&mut self, _: bool, _: bool) {}
#     fn wait_clear(&mut self, _: bool, _: bool) {}
# }
# fn connect() -> impl z80bus::BusHardware { Hw }
use z80bus::*;

let hw = connect();
let mut engine = BusEngine::new(hw, TickClock::default(), BusConfig::default());
let mut tracker = Tracker::new(&mut engine).unwrap();
tracker.enable(&mut engine, true);
loop {
    engine.service(&mut [&mut tracker]);
}
```
*/
#![cfg_attr(not(feature = "std"), no_std)]

mod breakpoints;
mod bus;
mod flags;
pub mod host;
mod registers;
mod tracker;

pub use breakpoints::{Breakpoints, FastBreakpoint, Breakpoint, BreakpointHit};
pub use bus::{BusEngine, BusConfig, BusControl, BusError, BusStatus,
              BusSocket, SocketInfo, SocketId, Decision,
              BusAction, BusActionReason, MAX_BUS_SOCKETS};
pub use flags::CtrlFlags;
pub use host::{BusHardware, Clock, TickClock};
pub use registers::{Z80Registers, RegisterPair, InterruptMode};
pub use tracker::{Tracker, TrackerState, StepMode};

/// Z80 opcodes used by the injected register get/set sequences.
///
/// Only the opcodes the injection machinery composes its instruction
/// streams from are listed here.
pub mod opconsts {
    /// Extended opcode prefix.
    pub const ED_PREFIX     : u8 = 0xED;
    /// IX opcode prefix.
    pub const DD_PREFIX     : u8 = 0xDD;
    /// IY opcode prefix.
    pub const FD_PREFIX     : u8 = 0xFD;
    /// Bit operations opcode prefix.
    pub const CB_PREFIX     : u8 = 0xCB;
    /// No operation.
    pub const NOP_OPCODE    : u8 = 0x00;
    /// `PUSH AF`.
    pub const PUSH_AF_OPCODE: u8 = 0xF5;
    /// `POP AF`.
    pub const POP_AF_OPCODE : u8 = 0xF1;
    /// `INC SP`.
    pub const INC_SP_OPCODE : u8 = 0x33;
    /// `LD (HL),A`.
    pub const LD_HL_A_OPCODE: u8 = 0x77;
    /// `LD (DE),A`.
    pub const LD_DE_A_OPCODE: u8 = 0x12;
    /// `LD (BC),A`.
    pub const LD_BC_A_OPCODE: u8 = 0x02;
    /// `EXX`.
    pub const EXX_OPCODE    : u8 = 0xD9;
    /// `EX AF,AF'`.
    pub const EX_AF_OPCODE  : u8 = 0x08;
    /// `LD A,n` immediate load.
    pub const LD_A_N_OPCODE : u8 = 0x3E;
    /// `LD A,R` second byte after [ED_PREFIX].
    pub const LD_A_R_OP2    : u8 = 0x5F;
    /// `LD R,A` second byte after [ED_PREFIX].
    pub const LD_R_A_OP2    : u8 = 0x4F;
    /// `LD A,I` second byte after [ED_PREFIX].
    pub const LD_A_I_OP2    : u8 = 0x57;
    /// `LD I,A` second byte after [ED_PREFIX].
    pub const LD_I_A_OP2    : u8 = 0x47;
    /// `IM 0`/`IM 1`/`IM 2` second bytes after [ED_PREFIX].
    pub const IM0_OP2       : u8 = 0x46;
    pub const IM1_OP2       : u8 = 0x56;
    pub const IM2_OP2       : u8 = 0x5E;
    /// `PUSH BC`/`PUSH DE`/`PUSH HL` (HL also after an index prefix).
    pub const PUSH_BC_OPCODE: u8 = 0xC5;
    pub const PUSH_DE_OPCODE: u8 = 0xD5;
    pub const PUSH_HL_OPCODE: u8 = 0xE5;
    /// `LD BC,nn`/`LD DE,nn`/`LD HL,nn`/`LD SP,nn` immediate loads.
    pub const LD_BC_NN_OPCODE: u8 = 0x01;
    pub const LD_DE_NN_OPCODE: u8 = 0x11;
    pub const LD_HL_NN_OPCODE: u8 = 0x21;
    pub const LD_SP_NN_OPCODE: u8 = 0x31;
    /// Branch to a relative address.
    pub const JR_OPCODE     : u8 = 0x18;
    /// Branch to an absolute address.
    pub const JP_OPCODE     : u8 = 0xC3;
    /// Enable interrupts.
    pub const EI_OPCODE     : u8 = 0xFB;
    /// Disable interrupts.
    pub const DI_OPCODE     : u8 = 0xF3;
    /// Halt execution.
    pub const HALT_OPCODE   : u8 = 0x76;
}
