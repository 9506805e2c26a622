//! Single-flight maintenance flag.
//!
//! The engine owns the only `MaintenanceMode`. Everyone else gets a
//! `MaintenanceStatus`, which can observe the flag but never set it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MaintenanceMode {
    active: Arc<AtomicBool>,
}

impl MaintenanceMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter maintenance, or `None` if a transform already holds it.
    pub fn try_acquire(&self) -> Option<MaintenanceGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| MaintenanceGuard {
                active: &self.active,
            })
    }

    pub fn status(&self) -> MaintenanceStatus {
        MaintenanceStatus {
            active: Arc::clone(&self.active),
        }
    }
}

/// Clears the flag when dropped, including during unwinding.
#[derive(Debug)]
pub struct MaintenanceGuard<'a> {
    active: &'a AtomicBool,
}

impl Drop for MaintenanceGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Read-only view of the maintenance flag.
#[derive(Debug, Clone)]
pub struct MaintenanceStatus {
    active: Arc<AtomicBool>,
}

impl MaintenanceStatus {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails() {
        let mode = MaintenanceMode::new();
        let status = mode.status();

        let guard = mode.try_acquire().unwrap();
        assert!(status.is_active());
        assert!(mode.try_acquire().is_none());

        drop(guard);
        assert!(!status.is_active());
        assert!(mode.try_acquire().is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let mode = MaintenanceMode::new();
        let status = mode.status();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = mode.try_acquire().unwrap();
            panic!("transform blew up");
        }));

        assert!(result.is_err());
        assert!(!status.is_active());
    }

    #[test]
    fn test_only_one_thread_wins() {
        let mode = Arc::new(MaintenanceMode::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mode = Arc::clone(&mode);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let guard = mode.try_acquire();
                    let won = guard.is_some();
                    // Hold long enough for the others to observe it.
                    std::thread::sleep(std::time::Duration::from_millis(200));
                    drop(guard);
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
