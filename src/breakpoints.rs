//! Breakpoint tables matched against opcode fetch addresses.
use arrayvec::{ArrayString, ArrayVec};

use crate::flags::CtrlFlags;

/// Capacity of the message-carrying breakpoint table.
pub const MAX_BREAKPOINTS: usize = 100;
/// Capacity of the fast table checked ahead of the slow one.
pub const MAX_FAST_BREAKPOINTS: usize = 4;
/// Capacity of a breakpoint hit message.
pub const MAX_HIT_MSG_LEN: usize = 32;

/// A single entry of the slow table.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Breakpoint {
    pub enabled: bool,
    pub pc: u16,
    pub message: ArrayString<MAX_HIT_MSG_LEN>,
}

/// A fast breakpoint holds an address only; its hit message is synthesized
/// from the slot index.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct FastBreakpoint {
    pub enabled: bool,
    pub pc: u16,
}

/// Where in which table a fetch address matched.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BreakpointHit {
    Fast(usize),
    Slow(usize),
}

/// The breakpoint store.
///
/// Fast breakpoints bypass the global enable and are scanned first, so a
/// handful of hot stop addresses stay cheap to check on every fetch even
/// when the slow table is fully populated. The slow table keeps an index
/// cache of its enabled entries which is rebuilt whenever an entry is
/// toggled, keeping the per-fetch scan proportional to the enabled count.
#[derive(Clone, Debug)]
pub struct Breakpoints {
    slow: [Breakpoint; MAX_BREAKPOINTS],
    enabled_idxs: ArrayVec<u8, MAX_BREAKPOINTS>,
    enabled: bool,
    fast: ArrayVec<FastBreakpoint, MAX_FAST_BREAKPOINTS>,
    last_hit: Option<BreakpointHit>,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Breakpoints {
            slow: [Breakpoint::default(); MAX_BREAKPOINTS],
            enabled_idxs: ArrayVec::new(),
            enabled: true,
            fast: ArrayVec::new(),
            last_hit: None,
        }
    }
}

impl Breakpoints {
    pub fn new() -> Self {
        Breakpoints::default()
    }

    /// Removes every breakpoint and re-enables the slow table globally.
    pub fn clear(&mut self) {
        *self = Breakpoints::default();
    }

    /// Turns the slow table on or off as a whole. Fast breakpoints are not
    /// affected.
    #[inline]
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn num_enabled(&self) -> usize {
        self.enabled_idxs.len()
    }

    /// Programs the fetch address of a slow table entry. Out of range
    /// indexes are ignored.
    pub fn set_pc(&mut self, idx: usize, pc: u16) {
        if let Some(bp) = self.slow.get_mut(idx) {
            bp.pc = pc;
        }
    }

    /// Sets the message reported when a slow table entry hits, truncated
    /// to the entry capacity.
    pub fn set_message(&mut self, idx: usize, message: &str) {
        if let Some(bp) = self.slow.get_mut(idx) {
            bp.message.clear();
            let len = message.len().min(bp.message.capacity());
            let mut end = len;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            let _ = bp.message.try_push_str(&message[..end]);
        }
    }

    /// Enables or disables a slow table entry and rebuilds the enabled
    /// index cache.
    pub fn enable(&mut self, idx: usize, enabled: bool) {
        if let Some(bp) = self.slow.get_mut(idx) {
            bp.enabled = enabled;
            self.enabled_idxs.clear();
            for (i, bp) in self.slow.iter().enumerate() {
                if bp.enabled {
                    self.enabled_idxs.push(i as u8);
                }
            }
        }
    }

    #[inline]
    pub fn breakpoint(&self, idx: usize) -> Option<&Breakpoint> {
        self.slow.get(idx)
    }

    /// Adds a fast breakpoint for `pc` or toggles an already registered one.
    /// Silently does nothing when the fast table is full.
    pub fn set_fast(&mut self, pc: u16, enabled: bool) {
        for fbp in self.fast.iter_mut() {
            if fbp.pc == pc {
                fbp.enabled = enabled;
                return;
            }
        }
        if enabled && !self.fast.is_full() {
            self.fast.push(FastBreakpoint { enabled: true, pc });
        }
    }

    pub fn clear_fast(&mut self) {
        self.fast.clear();
    }

    /// The table entry matched by the most recent successful
    /// [check_for_break][Breakpoints::check_for_break].
    #[inline]
    pub fn last_hit(&self) -> Option<BreakpointHit> {
        self.last_hit
    }

    /// Matches an opcode fetch against both tables. Non-fetch cycles never
    /// match. Returns the hit and records it for [last_hit][Breakpoints::last_hit].
    pub fn check_for_break(&mut self, addr: u16, flags: CtrlFlags) -> Option<BreakpointHit> {
        if !flags.is_instr_fetch() {
            return None;
        }
        for (i, fbp) in self.fast.iter().enumerate() {
            if fbp.enabled && fbp.pc == addr {
                let hit = BreakpointHit::Fast(i);
                self.last_hit = Some(hit);
                return Some(hit);
            }
        }
        if self.enabled {
            for &idx in self.enabled_idxs.iter() {
                if self.slow[idx as usize].pc == addr {
                    let hit = BreakpointHit::Slow(idx as usize);
                    self.last_hit = Some(hit);
                    return Some(hit);
                }
            }
        }
        None
    }
}
