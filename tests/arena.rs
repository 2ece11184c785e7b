// Byte-arena carve coverage: alignment, wrap-around, and the one-byte guard.

use ringq::Core::arena::{Arena, ArenaCursors};

#[repr(align(64))]
struct AlignedBuf([u8; 64]);

fn arena(buf: &mut AlignedBuf) -> Arena {
    Arena::new(buf.0.as_mut_ptr(), buf.0.len())
}

#[test]
fn aligned_requests_do_not_overlap() {
    // Two (size=20, align=16) requests in a 64-byte arena land at 0 and 32;
    // a third fails until space is reclaimed.
    let mut buf = AlignedBuf([0; 64]);
    let arena = arena(&mut buf);
    let mut cur = ArenaCursors::default();

    let first = arena.carve(&cur, 20, 16).expect("first request");
    assert_eq!(arena.offset_of(first.ptr), 0);
    assert_eq!(first.len, 20);
    cur.head = arena.offset_of(first.ptr) + first.len;

    let second = arena.carve(&cur, 20, 16).expect("second request");
    assert_eq!(arena.offset_of(second.ptr), 32);
    cur.head = arena.offset_of(second.ptr) + second.len;

    assert!(arena.carve(&cur, 20, 16).is_none());

    // First buffer consumed: tail moves to the second descriptor and the
    // wrap region opens up.
    cur.tail = 32;
    let third = arena.carve(&cur, 20, 16).expect("after reclaim");
    assert_eq!(arena.offset_of(third.ptr), 0);
}

#[test]
fn wrap_region_keeps_one_guard_byte() {
    let mut buf = AlignedBuf([0; 64]);
    let arena = arena(&mut buf);
    // Tail at 32: the wrap region is [0, 31), so 31 bytes fit and 32 do not.
    let cur = ArenaCursors { head: 60, tail: 32 };
    assert!(arena.carve(&cur, 31, 1).is_some());
    assert!(arena.carve(&cur, 32, 1).is_none());
}

#[test]
fn interior_region_respects_guard_and_alignment() {
    let mut buf = AlignedBuf([0; 64]);
    let arena = arena(&mut buf);
    // head < tail: only [head, tail - 1) is free.
    let cur = ArenaCursors { head: 8, tail: 40 };
    let span = arena.carve(&cur, 16, 16).expect("interior fit");
    assert_eq!(arena.offset_of(span.ptr), 16);
    assert!(arena.carve(&cur, 32, 1).is_none(), "31 free bytes at most");
    assert!(arena.carve(&cur, 31, 1).is_some());
}

#[test]
fn forward_region_preferred_over_wrap() {
    let mut buf = AlignedBuf([0; 64]);
    let arena = arena(&mut buf);
    let cur = ArenaCursors { head: 40, tail: 24 };
    let span = arena.carve(&cur, 8, 8).expect("forward fit");
    assert_eq!(arena.offset_of(span.ptr), 40);
}

#[test]
fn empty_arena_with_tail_at_zero_has_no_wrap_region() {
    let mut buf = AlignedBuf([0; 64]);
    let arena = arena(&mut buf);
    let cur = ArenaCursors { head: 60, tail: 0 };
    // Forward region holds 4 bytes; the wrap region does not exist because
    // the tail never left zero.
    assert!(arena.carve(&cur, 4, 1).is_some());
    assert!(arena.carve(&cur, 5, 1).is_none());
}

#[test]
fn alignment_larger_than_remaining_space_fails() {
    let mut buf = AlignedBuf([0; 64]);
    let arena = arena(&mut buf);
    let cur = ArenaCursors { head: 33, tail: 0 };
    // Aligning 33 up to 32 gives 64, past the end.
    assert!(arena.carve(&cur, 1, 32).is_none());
}
