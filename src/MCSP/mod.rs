//! Single-producer / multiple-concurrent-consumer queues.
//!
//! The producer is obtained once from the queue handle; consumers are
//! `Reader` handles created at a caller-chosen index below the queue's
//! reader limit. Readers reserve slots by CAS on a tagged cursor and
//! announce their progress through a per-reader position table that the
//! producer folds when it needs to reclaim space.

pub mod buffer;
pub mod function;
pub mod object;
