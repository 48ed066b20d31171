//! Per-key reader/writer coordination (spec §4.6), grounded in
//! `examples/original_source/locking.py`'s `locked_ro`/`locked_rw` and
//! `Accessor`.
//!
//! Targets single-process concurrency (spec §9 design note): the source's
//! multiprocessing manager is replaced by an in-process [`std::sync::Mutex`]
//! /[`std::sync::Condvar`] pair, keeping the RW algorithm identical.

use std::sync::{Condvar, Mutex, MutexGuard};

/// The three primitives the source keeps per resource key: a write-mutex,
/// a reader count, and a condition that wakes when the count reaches zero.
#[derive(Debug, Default)]
pub struct RwKey {
    write_mutex: Mutex<()>,
    readers: Mutex<u32>,
    reader_zero: Condvar,
}

impl RwKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` inside a read critical section: acquire the write-mutex only
    /// long enough to bump the reader count, then run unlocked so
    /// concurrent readers proceed in parallel.
    pub fn read<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = ReadGuard::acquire(self);
        f()
    }

    /// Run `f` inside a write critical section: hold the write-mutex for
    /// the whole call, first waiting for any in-flight readers to drain.
    pub fn write<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = WriteGuard::acquire(self);
        f()
    }

    /// Acquire a read guard that outlives a single call, for streaming
    /// operations that must hold the section open across an iterator.
    pub fn acquire_read(&self) -> ReadGuard<'_> {
        ReadGuard::acquire(self)
    }

    pub fn acquire_write(&self) -> WriteGuard<'_> {
        WriteGuard::acquire(self)
    }

    fn enter_read(&self) {
        let _write_guard = self.write_mutex.lock().unwrap_or_else(|e| e.into_inner());
        let mut count = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
    }

    fn exit_read(&self) {
        let mut count = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        *count -= 1;
        self.reader_zero.notify_all();
    }
}

/// RAII guard for a held read section; releasing decrements the reader
/// count and wakes any writer waiting for it to reach zero.
pub struct ReadGuard<'a> {
    key: &'a RwKey,
}

impl<'a> ReadGuard<'a> {
    fn acquire(key: &'a RwKey) -> Self {
        key.enter_read();
        Self { key }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.key.exit_read();
    }
}

/// RAII guard for a held write section; the write-mutex is released when
/// this is dropped.
pub struct WriteGuard<'a> {
    // Held only for its drop effect; `MutexGuard` itself releases the lock.
    _write_guard: MutexGuard<'a, ()>,
}

impl<'a> WriteGuard<'a> {
    fn acquire(key: &'a RwKey) -> Self {
        let write_guard = key.write_mutex.lock().unwrap_or_else(|e| e.into_inner());
        let mut count = key.readers.lock().unwrap_or_else(|e| e.into_inner());
        while *count != 0 {
            count = key
                .reader_zero
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
        drop(count);
        Self {
            _write_guard: write_guard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_run_concurrently() {
        let key = Arc::new(RwKey::new());
        let active = Arc::new(Mutex::new(0u32));
        let max_seen = Arc::new(Mutex::new(0u32));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let key = Arc::clone(&key);
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    key.read(|| {
                        let mut a = active.lock().unwrap();
                        *a += 1;
                        let mut m = max_seen.lock().unwrap();
                        *m = (*m).max(*a);
                        drop(a);
                        drop(m);
                        thread::sleep(Duration::from_millis(20));
                        *active.lock().unwrap() -= 1;
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(*max_seen.lock().unwrap() > 1, "readers should overlap");
    }

    #[test]
    fn writer_excludes_readers_and_other_writers() {
        let key = Arc::new(RwKey::new());
        let inside = Arc::new(Mutex::new(false));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let key = Arc::clone(&key);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    key.write(|| {
                        let mut flag = inside.lock().unwrap();
                        assert!(!*flag, "no two writers should overlap");
                        *flag = true;
                        drop(flag);
                        thread::sleep(Duration::from_millis(5));
                        *inside.lock().unwrap() = false;
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
