// Unit coverage for the tagged-index algebra and the MCSP cursor protocol,
// driven directly against raw atomics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::Relaxed};

use crossbeam_utils::CachePadded;
use ringq::Core::cursor::{publish, reserve_all, reserve_n, reserve_one, sync};
use ringq::Core::tagged;

#[test]
fn pack_and_unpack_roundtrip() {
    let word = tagged::tagged(12345, 678);
    assert_eq!(tagged::value(word), 12345);
    assert_eq!(tagged::tag(word), 678);

    let bumped = tagged::incr_tagged(word, 3);
    assert_eq!(tagged::value(bumped), 3);
    assert_eq!(tagged::tag(bumped), 679);

    let same = tagged::same_tagged(word, 9);
    assert_eq!(tagged::value(same), 9);
    assert_eq!(tagged::tag(same), 678);
}

#[test]
fn tag_increment_wraps_inside_mask() {
    let word = tagged::tagged(7, tagged::TAG_MASK);
    let bumped = tagged::incr_tagged(word, 8);
    assert_eq!(tagged::tag(bumped), 0);
    assert_eq!(tagged::value(bumped), 8);
}

#[test]
fn empty_predicate_handles_tag_lap_window() {
    // Same value, same tag: empty.
    assert!(tagged::is_empty(tagged::tagged(2, 5), tagged::tagged(2, 5)));
    // Published slot ahead: not empty.
    assert!(!tagged::is_empty(tagged::tagged(2, 5), tagged::tagged(3, 6)));
    // Stale consumer snapshot with a higher tag than the input word: the
    // publish that the snapshot predates must win, so the queue reads empty.
    assert!(tagged::is_empty(tagged::tagged(2, 7), tagged::tagged(4, 3)));
}

#[test]
fn count_and_free_span() {
    assert_eq!(tagged::count(0, 3, 5), 3);
    assert_eq!(tagged::count(4, 1, 5), 2);
    assert_eq!(tagged::count(2, 2, 5), 0);

    // Fresh ring: whole capacity ahead of the input cursor.
    assert_eq!(tagged::free_span(0, 0, 5), 4);
    // Output ahead of input: linear run up to the guard slot.
    assert_eq!(tagged::free_span(3, 1, 5), 1);
    // Input ahead: run to end of ring, plus the wrap slot only if the
    // output has left slot zero.
    assert_eq!(tagged::free_span(1, 3, 5), 2);
    assert_eq!(tagged::free_span(0, 3, 5), 1);
}

#[test]
fn advance_upto_clamps_and_wraps() {
    assert_eq!(tagged::advance_upto(1, 4, 5, 2), 3);
    assert_eq!(tagged::advance_upto(1, 4, 5, 10), 4);
    assert_eq!(tagged::advance_upto(3, 1, 5, 1), 4);
    assert_eq!(tagged::advance_upto(3, 1, 5, 3), 1);
    assert_eq!(tagged::advance_upto(3, 1, 5, 9), 1);
}

#[test]
fn reserve_one_and_all_move_the_shared_cursor() {
    const RING: usize = 5;
    let output_pos = AtomicU64::new(0);
    let input_pos = AtomicU64::new(0);

    assert!(reserve_one(&output_pos, &input_pos, RING, false).is_none());

    // Publish three slots.
    for _ in 0..3 {
        let pos = input_pos.load(Relaxed);
        let next = tagged::next_slot(tagged::value(pos), RING);
        publish(&input_pos, pos, next, &output_pos);
    }

    let r = reserve_one(&output_pos, &input_pos, RING, false).unwrap();
    assert_eq!((r.begin, r.end), (0, 1));
    // Tag re-synchronised to the observed input tag.
    assert_eq!(
        tagged::tag(output_pos.load(Relaxed)),
        tagged::tag(input_pos.load(Relaxed))
    );

    let r = reserve_all(&output_pos, &input_pos, false).unwrap();
    assert_eq!((r.begin, r.end), (1, 3));
    assert!(reserve_all(&output_pos, &input_pos, true).is_none());
}

#[test]
fn reserve_n_clamps_to_published() {
    const RING: usize = 5;
    let output_pos = AtomicU64::new(0);
    let input_pos = AtomicU64::new(0);
    for _ in 0..2 {
        let pos = input_pos.load(Relaxed);
        let next = tagged::next_slot(tagged::value(pos), RING);
        publish(&input_pos, pos, next, &output_pos);
    }
    let r = reserve_n(&output_pos, &input_pos, RING, 10, false).unwrap();
    assert_eq!((r.begin, r.end), (0, 2));
}

#[test]
fn stale_snapshot_is_rejected_after_a_value_lap() {
    const RING: usize = 4;
    let output_pos = AtomicU64::new(0);
    let input_pos = AtomicU64::new(0);
    let stale = output_pos.load(Relaxed);

    // One full value lap: the slot index returns to zero but the tag moved.
    for _ in 0..RING {
        let pos = input_pos.load(Relaxed);
        let next = tagged::next_slot(tagged::value(pos), RING);
        publish(&input_pos, pos, next, &output_pos);
        assert!(reserve_one(&output_pos, &input_pos, RING, false).is_some());
    }

    let current = output_pos.load(Relaxed);
    assert_eq!(tagged::value(current), tagged::value(stale));
    assert_ne!(current, stale, "tag must disambiguate the lap");

    // A CAS carrying the stale snapshot cannot succeed.
    assert!(output_pos
        .compare_exchange(
            stale,
            tagged::same_tagged(input_pos.load(Relaxed), 1),
            std::sync::atomic::Ordering::AcqRel,
            Relaxed,
        )
        .is_err());
}

#[test]
fn stale_snapshot_rejected_up_to_tag_bound() {
    // The 16-bit tag tolerates up to 2^16 - 1 publishes between a
    // consumer's load and its CAS.
    const RING: usize = 4;
    let output_pos = AtomicU64::new(0);
    let input_pos = AtomicU64::new(0);
    let stale = output_pos.load(Relaxed);

    for _ in 0..(1u32 << tagged::TAG_BITS) - 1 {
        let pos = input_pos.load(Relaxed);
        let next = tagged::next_slot(tagged::value(pos), RING);
        publish(&input_pos, pos, next, &output_pos);
        assert!(reserve_one(&output_pos, &input_pos, RING, false).is_some());
    }
    assert_ne!(output_pos.load(Relaxed), stale);
}

#[test]
fn publish_tag_wrap_keeps_the_queue_consistent() {
    // Run past the tag wrap; the fetch_and clearing the consumer tag must
    // leave the empty predicate intact.
    const RING: usize = 4;
    let output_pos = AtomicU64::new(0);
    let input_pos = AtomicU64::new(0);
    for _ in 0..(1usize << tagged::TAG_BITS) + 7 {
        let pos = input_pos.load(Relaxed);
        let next = tagged::next_slot(tagged::value(pos), RING);
        publish(&input_pos, pos, next, &output_pos);
        assert!(reserve_one(&output_pos, &input_pos, RING, false).is_some());
        assert!(tagged::is_empty(
            output_pos.load(Relaxed),
            input_pos.load(Relaxed)
        ));
    }
}

fn positions(values: &[usize]) -> Vec<CachePadded<AtomicUsize>> {
    values.iter().map(|&v| CachePadded::new(AtomicUsize::new(v))).collect()
}

#[test]
fn sync_returns_minimum_live_position() {
    let output_pos = AtomicU64::new(tagged::tagged(3, 9));
    let table = positions(&[2, 3, tagged::VACANT]);
    assert_eq!(sync(1, &table, &output_pos), 2);
}

#[test]
fn sync_short_circuits_on_stalled_reader() {
    let output_pos = AtomicU64::new(tagged::tagged(3, 9));
    // Second reader still parked exactly at the previous cache value.
    let table = positions(&[2, 1, tagged::VACANT]);
    assert_eq!(sync(1, &table, &output_pos), 1);
}

#[test]
fn sync_ignores_vacant_readers() {
    let output_pos = AtomicU64::new(tagged::tagged(3, 4));
    let table = positions(&[tagged::VACANT, tagged::VACANT]);
    assert_eq!(sync(0, &table, &output_pos), 3);
}

#[test]
fn sync_prefers_lagging_positions_after_a_wrap() {
    // Producer cache sits at 3, shared cursor wrapped back to 1; a reader
    // that announced 1 is the true minimum.
    let output_pos = AtomicU64::new(tagged::tagged(1, 6));
    let table = positions(&[1, tagged::VACANT]);
    assert_eq!(sync(3, &table, &output_pos), 1);
}

#[test]
fn sync_no_progress_is_a_no_op() {
    let output_pos = AtomicU64::new(tagged::tagged(2, 1));
    let table = positions(&[tagged::VACANT]);
    assert_eq!(sync(2, &table, &output_pos), 2);
}
