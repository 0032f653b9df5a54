//! Low-level primitives for building the storage engine.
//!
//! Includes positioned file I/O, file locking, segmented pagers, and the
//! page journal.

/// Concurrency primitives and synchronization.
///
/// Exclusive file locks that keep a second writer off a journal.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Positioned and vectored reads and writes over an open file.
pub mod io;

/// Segmented virtual pagers.
///
/// Heap-backed and memory-mapped page arenas that grow one segment at a time.
pub mod pager;

/// Write-ahead page journal for crash recovery.
///
/// Durable vectored writes of committed pages and replay into the main file.
pub mod journal;
