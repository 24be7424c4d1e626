//! Latch-and-spin concurrency primitive and a generic worker-thread
//! pattern, shared by the buffer pool, B-tree, and lock manager.

pub mod spinlock;
pub mod thread;

pub use spinlock::Spinlock;
pub use thread::Thread;
