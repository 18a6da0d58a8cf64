//! Ownership token for the single capture binding a native layer can hold.
use std::sync::{Arc, LazyLock};

use log::trace;
use parking_lot::Mutex;

use crate::native::WindowHandle;

static PROCESS_WIDE: LazyLock<CaptureSlot> = LazyLock::new(CaptureSlot::new);

/// Tracks which window, if any, currently owns the capture binding.
///
/// Native capture layers keep one set of buffers for the whole process, so only one
/// [`crate::session::CaptureSession`] may be open per slot. Sessions backed by the platform
/// should share [`CaptureSlot::process_wide`]; tests and custom backends can create
/// independent slots with [`CaptureSlot::new`]. Clones share state.
#[derive(Clone, Default, Debug)]
pub struct CaptureSlot {
    active: Arc<Mutex<Option<WindowHandle>>>,
}

impl CaptureSlot {
    /// Creates a free slot that is not shared with anything else.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot guarding the process wide native capture state.
    #[inline]
    #[must_use]
    pub fn process_wide() -> Self {
        PROCESS_WIDE.clone()
    }

    /// The window bound by the session currently holding this slot.
    #[inline]
    #[must_use]
    pub fn active(&self) -> Option<WindowHandle> {
        *self.active.lock()
    }

    /// Takes the slot for `window`, or returns the window that already holds it.
    pub(crate) fn claim(&self, window: WindowHandle) -> Result<SlotGuard, WindowHandle> {
        let mut active = self.active.lock();
        if let Some(holder) = *active {
            return Err(holder);
        }

        trace!("Capture slot claimed by window {window}");
        *active = Some(window);

        Ok(SlotGuard { slot: self.clone(), window })
    }
}

/// Frees the slot when dropped.
#[derive(Debug)]
pub(crate) struct SlotGuard {
    slot: CaptureSlot,
    window: WindowHandle,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = self.slot.active.lock();
        if *active == Some(self.window) {
            *active = None;
            trace!("Capture slot released by window {}", self.window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_release() {
        let slot = CaptureSlot::new();
        let first = slot.claim(WindowHandle::new(1)).unwrap();

        assert_eq!(slot.claim(WindowHandle::new(2)).unwrap_err(), WindowHandle::new(1));
        assert_eq!(slot.active(), Some(WindowHandle::new(1)));

        drop(first);
        assert_eq!(slot.active(), None);

        let second = slot.claim(WindowHandle::new(2)).unwrap();
        assert_eq!(slot.active(), Some(WindowHandle::new(2)));
        drop(second);
    }

    #[test]
    fn clones_share_state_and_new_slots_do_not() {
        let slot = CaptureSlot::new();
        let clone = slot.clone();
        let other = CaptureSlot::new();

        let _guard = slot.claim(WindowHandle::new(7)).unwrap();

        assert_eq!(clone.active(), Some(WindowHandle::new(7)));
        assert!(clone.claim(WindowHandle::new(8)).is_err());
        assert_eq!(other.active(), None);
        assert!(other.claim(WindowHandle::new(8)).is_ok());
    }
}
