use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::*;

/// A first-error-wins latch shared by every cursor over one space.
/// Once set it is never cleared: the space and its cursors must be
/// abandoned.
#[derive(Debug, Clone, Default)]
pub struct FaultLatch {
    error: Arc<Latched>,
}

#[derive(Debug, Default)]
struct Latched(AtomicPtr<Error>);

impl Drop for Latched {
    fn drop(&mut self) {
        let ptr = *self.0.get_mut();
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

impl FaultLatch {
    pub fn check(&self) -> Result<()> {
        let err_ptr: *const Error = self.error.0.load(Ordering::Acquire);

        if err_ptr.is_null() {
            Ok(())
        } else {
            let deref: &Error = unsafe { &*err_ptr };
            Err(deref.clone())
        }
    }

    pub fn is_set(&self) -> bool {
        !self.error.0.load(Ordering::Acquire).is_null()
    }

    /// Installs `error` unless a fault is already latched, in which case
    /// the earlier one is kept.
    pub fn set(&self, error: Error) {
        log::error!("latching space fault: {}", error);

        let ptr = Box::into_raw(Box::new(error));

        if self
            .error
            .0
            .compare_exchange(
                std::ptr::null_mut(),
                ptr,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // fault already installed, drop this one
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fault_wins_and_is_shared() {
        let latch = FaultLatch::default();
        let other = latch.clone();
        assert!(latch.check().is_ok());

        latch.set(Error::corruption("first"));
        other.set(Error::corruption("second"));

        assert_eq!(other.check(), Err(Error::corruption("first")));
        assert!(latch.is_set());
    }
}
