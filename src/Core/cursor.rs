//! MCSP cursor protocol: CAS-based slot reservation for concurrent
//! consumers, tagged publish for the producer, and the producer-side
//! `sync` fold that computes the minimum reclaimable position from the
//! per-reader announcement table.
//!
//! Every cursor word handled here is tagged (see [`super::tagged`]). A
//! successful reservation CAS rewrites `output_pos` with the tag of the
//! `input_pos` it observed, which closes the tag-lap window: a CAS against a
//! stale snapshot fails on the tag even when the slot index has wrapped back
//! to the same value.

use std::sync::atomic::{
    AtomicU64, AtomicUsize,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};

use crossbeam_utils::CachePadded;

use super::tagged::{advance_upto, is_empty, next_slot, same_tagged, tag, value, VACANT};
use super::tagged::{incr_tagged, TAG_MASK};

/// Publishes a cursor advance with release semantics when dropped.
///
/// Batch consumers hold one of these across the user callback so the cursor
/// moves exactly once, no matter how the callback returns.
pub(crate) struct AdvanceOnDrop<'a> {
    pub cursor: &'a AtomicUsize,
    pub to: usize,
}

impl Drop for AdvanceOnDrop<'_> {
    fn drop(&mut self) {
        self.cursor.store(self.to, Release);
    }
}

/// Announces a reader position with release semantics when dropped.
///
/// Batch MCSP consumers hold one of these across the user callback so the
/// per-reader announcement happens exactly once, after the payloads have
/// been handed out.
pub(crate) struct AnnounceOnDrop<'a> {
    pub slot: &'a CachePadded<AtomicUsize>,
    pub to: usize,
}

impl Drop for AnnounceOnDrop<'_> {
    fn drop(&mut self) {
        announce(self.slot, self.to);
    }
}

/// Outcome of a successful reservation: the half-open slot range
/// `[begin, end)` in ring order now owned by the caller.
#[derive(Clone, Copy, Debug)]
pub struct Reserved {
    pub begin: usize,
    pub end: usize,
}

/// Reserve a single slot. With `check_once` the CAS is attempted exactly
/// once and a lost race reports `None`; otherwise the loop retries against
/// the freshly observed cursor until the ring drains.
pub fn reserve_one(
    output_pos: &AtomicU64,
    input_pos: &AtomicU64,
    ring_size: usize,
    check_once: bool,
) -> Option<Reserved> {
    let mut op = output_pos.load(Relaxed);
    loop {
        let ip = input_pos.load(Acquire);
        if is_empty(op, ip) {
            return None;
        }
        let next = next_slot(value(op), ring_size);
        let res = if check_once {
            output_pos.compare_exchange(op, same_tagged(ip, next), AcqRel, Relaxed)
        } else {
            output_pos.compare_exchange_weak(op, same_tagged(ip, next), AcqRel, Relaxed)
        };
        match res {
            Ok(_) => {
                return Some(Reserved {
                    begin: value(op),
                    end: next,
                })
            }
            Err(_) if check_once => return None,
            Err(seen) => op = seen,
        }
    }
}

/// Reserve every currently published slot.
pub fn reserve_all(output_pos: &AtomicU64, input_pos: &AtomicU64, check_once: bool) -> Option<Reserved> {
    let mut op = output_pos.load(Relaxed);
    loop {
        let ip = input_pos.load(Acquire);
        if is_empty(op, ip) {
            return None;
        }
        let res = if check_once {
            output_pos.compare_exchange(op, ip, AcqRel, Relaxed)
        } else {
            output_pos.compare_exchange_weak(op, ip, AcqRel, Relaxed)
        };
        match res {
            Ok(_) => {
                return Some(Reserved {
                    begin: value(op),
                    end: value(ip),
                })
            }
            Err(_) if check_once => return None,
            Err(seen) => op = seen,
        }
    }
}

/// Reserve up to `n` slots, clamped to what is published.
pub fn reserve_n(
    output_pos: &AtomicU64,
    input_pos: &AtomicU64,
    ring_size: usize,
    n: usize,
    check_once: bool,
) -> Option<Reserved> {
    let mut op = output_pos.load(Relaxed);
    loop {
        let ip = input_pos.load(Acquire);
        if is_empty(op, ip) {
            return None;
        }
        let next = advance_upto(value(op), value(ip), ring_size, n);
        let res = if check_once {
            output_pos.compare_exchange(op, same_tagged(ip, next), AcqRel, Relaxed)
        } else {
            output_pos.compare_exchange_weak(op, same_tagged(ip, next), AcqRel, Relaxed)
        };
        match res {
            Ok(_) => {
                return Some(Reserved {
                    begin: value(op),
                    end: next,
                })
            }
            Err(_) if check_once => return None,
            Err(seen) => op = seen,
        }
    }
}

/// Producer-side publish of slot `next_value`. Stores `input_pos` with an
/// incremented tag (release). When the tag wraps to zero the tag bits of
/// `output_pos` are cleared in place so consumer tag comparisons stay
/// consistent; the `AcqRel` fetch keeps the clear ordered against the
/// publishes around it.
pub fn publish(input_pos: &AtomicU64, current: u64, next_value: usize, output_pos: &AtomicU64) {
    let pos = incr_tagged(current, next_value);
    input_pos.store(pos, Release);
    if tag(pos) == 0 {
        output_pos.fetch_and(!TAG_MASK, AcqRel);
    }
}

/// Producer-side reclaim: fold the per-reader table down to the minimum
/// position every live reader has announced.
///
/// Announced positions split into those strictly greater than `prev_pos`
/// (readers ahead of the last sync) and those at or below it (readers that
/// reserved before the producer wrapped but announced after). A reader still
/// sitting exactly at `prev_pos` has made no progress since the last sync and
/// remains the bottleneck, so the fold short-circuits and reports `prev_pos`
/// unchanged. Vacant slots hold [`VACANT`], which never wins a minimum.
///
/// Runs only on the producer when it hits the one-slot guard; O(readers).
pub fn sync(prev_pos: usize, positions: &[CachePadded<AtomicUsize>], output_pos: &AtomicU64) -> usize {
    let cp = value(output_pos.load(Acquire));
    if cp == prev_pos {
        return prev_pos;
    }
    let mut gpos = if cp > prev_pos { cp } else { VACANT };
    let mut lpos = cp;
    for pos in positions {
        let announced = pos.load(Acquire);
        if announced == prev_pos {
            return prev_pos;
        }
        if announced > prev_pos {
            gpos = gpos.min(announced);
        } else {
            lpos = lpos.min(announced);
        }
    }
    if cp > prev_pos {
        gpos
    } else if gpos != VACANT {
        gpos
    } else {
        lpos
    }
}

/// Register a reader: make it live at the current shared consumer position
/// before it attempts any reservation.
pub fn set_reader(slot: &CachePadded<AtomicUsize>, output_pos: &AtomicU64) {
    slot.store(value(output_pos.load(Relaxed)), Relaxed);
}

/// Announce consumption up to `next_pos`. Release pairs with the acquire
/// loads in [`sync`], ordering payload reads before slot reuse.
pub fn announce(slot: &CachePadded<AtomicUsize>, next_pos: usize) {
    slot.store(next_pos, Release);
}

/// Vacate a reader slot on drop so the producer stops waiting on it.
pub fn park_reader(slot: &CachePadded<AtomicUsize>) {
    slot.store(VACANT, Release);
}
