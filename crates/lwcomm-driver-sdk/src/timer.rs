// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The shared timer-service thread: every user-declared per-device
//! timer is ticked from one thread (spec §4.6 "Start sequence": "A
//! user timer registered with (interval_ms, callback, arg) fires on a
//! shared timer-service thread").
//!
//! Grounded on `user_timer.h`/`user_timer.cpp`'s `CUserTimer`, folded
//! here into one service thread per driver instead of one OS thread
//! per timer, matching the source's "shared timer-service thread" note.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

struct TimerEntry {
    id: u64,
    period: Duration,
    next_fire: Instant,
    callback: TimerCallback,
    cancelled: Arc<AtomicBool>,
}

/// An opaque handle returned by [`TimerService::create_timer`]; pass
/// it to [`TimerService::destroy_timer`] to stop the timer.
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

/// One thread ticking every timer registered against it, polled on a
/// fixed resolution (spec: "Callback latency is not bounded; users are
/// expected to keep handlers short").
pub struct TimerService {
    entries: Arc<Mutex<Vec<TimerEntry>>>,
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

const TICK: Duration = Duration::from_millis(10);

impl TimerService {
    pub fn start() -> TimerService {
        let entries: Arc<Mutex<Vec<TimerEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let thread = spawn_tick_thread(entries.clone(), running.clone());
        TimerService {
            entries,
            next_id: AtomicU64::new(1),
            running,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// `drv_create_timer`: register a timer with `period_ms`, firing
    /// `callback` on the shared thread starting after `phase_ms`.
    pub fn create_timer(&self, period_ms: u32, phase_ms: u32, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().push(TimerEntry {
            id,
            period: Duration::from_millis(period_ms as u64),
            next_fire: Instant::now() + Duration::from_millis(phase_ms as u64),
            callback,
            cancelled: cancelled.clone(),
        });
        TimerHandle { id, cancelled }
    }

    /// `drv_destroy_timer`.
    pub fn destroy_timer(&self, handle: &TimerHandle) {
        handle.cancelled.store(true, Ordering::SeqCst);
        self.entries.lock().retain(|e| e.id != handle.id);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn spawn_tick_thread(entries: Arc<Mutex<Vec<TimerEntry>>>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            let due: Vec<TimerCallback> = {
                let mut entries = entries.lock();
                let mut due = Vec::new();
                for entry in entries.iter_mut() {
                    if entry.cancelled.load(Ordering::SeqCst) {
                        continue;
                    }
                    if entry.next_fire <= now {
                        due.push(entry.callback.clone());
                        entry.next_fire = now + entry.period;
                    }
                }
                entries.retain(|e| !e.cancelled.load(Ordering::SeqCst));
                due
            };
            for callback in due {
                callback();
            }
            std::thread::sleep(TICK);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn timer_fires_repeatedly_until_destroyed() {
        let service = TimerService::start();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = service.create_timer(10, 0, Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(60));
        service.destroy_timer(&handle);
        let fired_before_stop = count.load(Ordering::SeqCst);
        assert!(fired_before_stop >= 2, "expected several ticks, got {fired_before_stop}");
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), fired_before_stop);
        service.stop();
    }
}
