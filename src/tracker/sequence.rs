//! The injected instruction streams used to read and write the CPU
//! registers.
//!
//! The register get program loops forever; the tracker feeds it to the CPU
//! one fetch at a time and harvests register values from the addresses and
//! data the CPU emits while executing it. The register set program is
//! patched with the wanted values before injection and ends by jumping to
//! the restored program counter.
use crate::opconsts::*;
use crate::registers::Z80Registers;

/// Register get program. `push af` exposes AF on the stack, `ld (rr),a`
/// exposes each pair on the address bus, `exx`/`ex af,af'` swap in the
/// alternates, and the trailing `pop af` (with fabricated operands) plus
/// `jr` restore state and loop.
pub(crate) const GET_SEQUENCE: [u8; 36] = [
    PUSH_AF_OPCODE,
    ED_PREFIX, LD_A_R_OP2,
    LD_HL_A_OPCODE,
    ED_PREFIX, LD_A_I_OP2,
    LD_HL_A_OPCODE,
    INC_SP_OPCODE,
    INC_SP_OPCODE,
    LD_DE_A_OPCODE,
    LD_BC_A_OPCODE,
    EXX_OPCODE,
    LD_HL_A_OPCODE,
    LD_DE_A_OPCODE,
    LD_BC_A_OPCODE,
    EXX_OPCODE,
    EX_AF_OPCODE,
    PUSH_AF_OPCODE,
    INC_SP_OPCODE,
    INC_SP_OPCODE,
    EX_AF_OPCODE,
    DD_PREFIX, PUSH_HL_OPCODE,
    INC_SP_OPCODE,
    INC_SP_OPCODE,
    FD_PREFIX, PUSH_HL_OPCODE,
    LD_A_N_OPCODE, 0x00,
    ED_PREFIX, LD_R_A_OP2,
    POP_AF_OPCODE, 0x00, 0x00,
    JR_OPCODE, 0xDE,
];

/// Positions within [GET_SEQUENCE] patched while the program runs.
///
/// The R compensation constants account for the refresh increments the
/// injected program itself causes. R is sampled by `ld a,r` after 3
/// opcode fetches (push af plus the two bytes of ld a,r), so the value at
/// entry is the sample minus 3. The value restored by `ld r,a` must be
/// lowered by the opcode fetches still to come before the loop restarts
/// (pop af and jr).
pub(crate) const GET_R_STORE_POS: usize = 28;
pub(crate) const GET_AF_STORE_POS: usize = 32;
/// Reaching this fetch position means the loop is about to restart and
/// target memory is stable for grabbing.
pub(crate) const GET_GRAB_MEMORY_POS: usize = 34;
/// Fetches between reset of R and the sample point.
pub(crate) const GET_R_SAMPLE_FETCHES: u8 = 3;
/// Fetches between the store-back point and the loop restart.
pub(crate) const GET_R_STORE_FETCHES: u8 = 2;

/// Write-cycle positions of the get program, matched against the fetch
/// position counter after the opcode byte was supplied.
pub(crate) mod get_write_pos {
    pub const PUSH_AF: usize = 1;
    pub const LD_HL_A_R: usize = 4;
    pub const LD_HL_A_I: usize = 7;
    pub const LD_DE_A: usize = 10;
    pub const LD_BC_A: usize = 11;
    pub const LD_HL_A_ALT: usize = 13;
    pub const LD_DE_A_ALT: usize = 14;
    pub const LD_BC_A_ALT: usize = 15;
    pub const PUSH_AF_ALT: usize = 18;
    pub const PUSH_IX: usize = 23;
    pub const PUSH_IY: usize = 27;
}

/// Length of the register set program.
pub(crate) const SET_SEQUENCE_LEN: usize = 54;

/// Opcode fetches between `ld r,a` taking effect and the final jump
/// landing: ld a,n (1), the im instruction (2), ei or di (1) and jp (1).
/// The restored R is lowered by this much so it reads correctly at the
/// jump target.
pub(crate) const SET_R_FETCHES: u8 = 5;

mod patch {
    pub const IX: usize = 3;
    pub const IY: usize = 7;
    pub const HL_ALT: usize = 10;
    pub const DE_ALT: usize = 13;
    pub const BC_ALT: usize = 16;
    pub const HL: usize = 20;
    pub const DE: usize = 23;
    pub const BC: usize = 26;
    pub const AF_ALT: usize = 29;
    pub const AF: usize = 33;
    pub const SP: usize = 36;
    pub const I: usize = 39;
    pub const R: usize = 43;
    pub const A: usize = 47;
    pub const IM: usize = 49;
    pub const INT_EN: usize = 50;
    pub const PC: usize = 52;
}

fn store16(buf: &mut [u8], offset: usize, val: u16) {
    let [lo, hi] = val.to_le_bytes();
    buf[offset] = lo;
    buf[offset + 1] = hi;
}

/// Builds the register set program into `buf`, patched from `regs`.
/// Returns the program length, or 0 when `buf` is too short.
///
/// Opens with a nop in case the previous fetch was a prefix byte. The two
/// `pop af` instructions read their values from fabricated "stack" bytes
/// injected as operands, so SP is untouched until `ld sp,nn`.
pub(crate) fn build_set_sequence(regs: &Z80Registers, buf: &mut [u8]) -> usize {
    if buf.len() < SET_SEQUENCE_LEN {
        return 0;
    }
    let buf = &mut buf[..SET_SEQUENCE_LEN];
    buf.copy_from_slice(&[
        NOP_OPCODE,
        DD_PREFIX, LD_HL_NN_OPCODE, 0x00, 0x00,
        FD_PREFIX, LD_HL_NN_OPCODE, 0x00, 0x00,
        LD_HL_NN_OPCODE, 0x00, 0x00,
        LD_DE_NN_OPCODE, 0x00, 0x00,
        LD_BC_NN_OPCODE, 0x00, 0x00,
        EXX_OPCODE,
        LD_HL_NN_OPCODE, 0x00, 0x00,
        LD_DE_NN_OPCODE, 0x00, 0x00,
        LD_BC_NN_OPCODE, 0x00, 0x00,
        POP_AF_OPCODE, 0x00, 0x00,
        EX_AF_OPCODE,
        POP_AF_OPCODE, 0x00, 0x00,
        LD_SP_NN_OPCODE, 0x00, 0x00,
        LD_A_N_OPCODE, 0x00,
        ED_PREFIX, LD_I_A_OP2,
        LD_A_N_OPCODE, 0x00,
        ED_PREFIX, LD_R_A_OP2,
        LD_A_N_OPCODE, 0x00,
        ED_PREFIX, IM0_OP2,
        EI_OPCODE,
        JP_OPCODE, 0x00, 0x00,
    ]);
    store16(buf, patch::IX, regs.ix.get16());
    store16(buf, patch::IY, regs.iy.get16());
    store16(buf, patch::HL_ALT, regs.hl_alt.get16());
    store16(buf, patch::DE_ALT, regs.de_alt.get16());
    store16(buf, patch::BC_ALT, regs.bc_alt.get16());
    store16(buf, patch::HL, regs.hl.get16());
    store16(buf, patch::DE, regs.de.get16());
    store16(buf, patch::BC, regs.bc.get16());
    store16(buf, patch::AF_ALT, regs.af_alt.get16());
    store16(buf, patch::AF, regs.af.get16());
    store16(buf, patch::SP, regs.sp.get16());
    buf[patch::I] = regs.i;
    buf[patch::R] = regs.r.wrapping_sub(SET_R_FETCHES);
    buf[patch::A] = regs.af.get8hi();
    buf[patch::IM] = match regs.im as u8 {
        0 => IM0_OP2,
        1 => IM1_OP2,
        _ => IM2_OP2,
    };
    buf[patch::INT_EN] = if regs.int_enabled { EI_OPCODE } else { DI_OPCODE };
    store16(buf, patch::PC, regs.pc.get16());
    SET_SEQUENCE_LEN
}
