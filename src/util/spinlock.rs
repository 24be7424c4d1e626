//! Read-write-spinlock, used as the page latch (spec §4.3, §5
//! "Latches vs. locks").
//!
//! A **reader** can enter once the door is un-locked and un-latched. A
//! **writer** can enter once the door is un-locked, un-latched, and
//! empty of other readers/writers. The caller spins rather than
//! blocking on an OS futex, which is appropriate since every latch hold
//! here (a page search step, an in-place record update) is short.

use std::{
    convert::TryFrom,
    fmt,
    ops::{Deref, DerefMut},
    result,
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

use crate::{err_at, Result};

pub struct Spinlock<T> {
    latchlock: AtomicU32,
    read_locks: AtomicU32,
    write_locks: AtomicU32,
    conflicts: AtomicU32,

    value: T,
}

impl<T> Spinlock<T> {
    const LATCH_FLAG: u32 = 0x4000_0000;
    const LOCK_FLAG: u32 = 0x8000_0000;
    const LATCH_LOCK_FLAG: u32 = 0xC000_0000;
    const READERS_FLAG: u32 = 0x3FFF_FFFF;

    pub fn new(value: T) -> Spinlock<T> {
        Spinlock {
            latchlock: AtomicU32::new(0),
            read_locks: AtomicU32::new(0),
            write_locks: AtomicU32::new(0),
            conflicts: AtomicU32::new(0),
            value,
        }
    }

    /// Acquire S latch.
    pub fn read(&self) -> ReadGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_LOCK_FLAG) == 0
                && self
                    .latchlock
                    .compare_exchange(old, old + 1, SeqCst, SeqCst)
                    .is_ok()
            {
                self.read_locks.fetch_add(1, SeqCst);
                break ReadGuard { door: self };
            }
            self.conflicts.fetch_add(1, SeqCst);
        }
    }

    /// Acquire X latch.
    pub fn write(&self) -> WriteGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_FLAG) == 0 {
                let new = old | Self::LATCH_FLAG;
                if self
                    .latchlock
                    .compare_exchange(old, new, SeqCst, SeqCst)
                    .is_ok()
                {
                    break;
                }
            }
            self.conflicts.fetch_add(1, SeqCst);
        }
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::READERS_FLAG) == 0 {
                let new = old | Self::LOCK_FLAG;
                if self
                    .latchlock
                    .compare_exchange(old, new, SeqCst, SeqCst)
                    .is_ok()
                {
                    self.write_locks.fetch_add(1, SeqCst);
                    let door = unsafe {
                        let door = self as *const Self as *mut Self;
                        door.as_mut().unwrap()
                    };
                    break WriteGuard { door };
                }
            }
            self.conflicts.fetch_add(1, SeqCst);
        }
    }

    pub fn to_stats(&self) -> Result<Stats> {
        Ok(Stats {
            latchlock: self.latchlock.load(SeqCst),
            read_locks: err_at!(FailConvert, usize::try_from(self.read_locks.load(SeqCst)))?,
            write_locks: err_at!(FailConvert, usize::try_from(self.write_locks.load(SeqCst)))?,
            conflicts: err_at!(FailConvert, usize::try_from(self.conflicts.load(SeqCst)))?,
        })
    }
}

/// Read-latch handle; dropping it releases the latch.
pub struct ReadGuard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.door.value
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_sub(1, SeqCst);
    }
}

/// Write-latch handle; dropping it releases the latch.
pub struct WriteGuard<'a, T> {
    door: &'a mut Spinlock<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.door.value
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.door.value
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.store(0, SeqCst);
    }
}

#[derive(Default)]
pub struct Stats {
    pub latchlock: u32,
    pub read_locks: usize,
    pub write_locks: usize,
    pub conflicts: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "{{ latchlock = {:X}, read_locks = {}, write_locks = {}, conflicts = {} }}",
            self.latchlock, self.read_locks, self.write_locks, self.conflicts
        )
    }
}

#[cfg(test)]
mod spinlock_test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_readers() {
        let lock = Arc::new(Spinlock::new(10));
        let mut handles = vec![];
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                let g = lock.read();
                assert_eq!(*g, 10);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_writer_excludes() {
        let lock = Spinlock::new(1);
        {
            let mut g = lock.write();
            *g = 2;
        }
        assert_eq!(*lock.read(), 2);
    }
}
