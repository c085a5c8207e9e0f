use std::sync::atomic::{AtomicBool, Ordering};

/// An in-process flag admitting one holder at a time.
///
/// The orchestrator keeps one for whole generation attempts and shares one with every orchestrator
/// prompting the same wallet, so a second signature prompt fails fast instead of queueing.
#[derive(Debug, Default)]
pub struct ExclusiveGuard {
    busy: AtomicBool,
}

impl ExclusiveGuard {
    /// Claims the guard, or returns `None` if it is already held.
    pub fn try_acquire(&self) -> Option<ExclusivePermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ExclusivePermit { guard: self })
    }

    /// Whether the guard is held.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the [`ExclusiveGuard`] when dropped.
#[derive(Debug)]
pub struct ExclusivePermit<'a> {
    guard: &'a ExclusiveGuard,
}

impl Drop for ExclusivePermit<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_admits_one_holder() {
        let guard = ExclusiveGuard::default();
        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn permit_is_released_on_early_return() {
        fn claim(guard: &ExclusiveGuard, bail: bool) -> Result<(), ()> {
            let _permit = guard.try_acquire().ok_or(())?;
            if bail {
                return Err(());
            }
            Ok(())
        }

        let guard = ExclusiveGuard::default();
        assert!(claim(&guard, true).is_err());
        assert!(!guard.is_busy());
        assert!(claim(&guard, false).is_ok());
    }
}
