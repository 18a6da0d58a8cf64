//! The acquisition lifecycle for one window.
//!
//! # Example
//! ```no_run
//! use window_eye::{CaptureSession, CaptureSlot, NativeBackend, Settings, WindowHandle};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = NativeBackend::new(Settings::default());
//!     let mut session = CaptureSession::create(backend, &CaptureSlot::process_wide(), WindowHandle::new(0x3a0000a))?;
//!
//!     session.refresh()?;
//!     let frame = session.fetch_frame()?;
//!     println!("Captured {}x{}", frame.width(), frame.height());
//!
//!     session.close();
//!     Ok(())
//! }
//! ```
use log::{info, trace, warn};

use crate::frame::{self, Frame};
use crate::native::{BackendError, CaptureBackend, Geometry, WindowHandle};
use crate::slot::{CaptureSlot, SlotGuard};

/// Errors that can occur while using a [`CaptureSession`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The backend could not bind to the window. Pick another window.
    #[error("Failed to start capturing window {window}: {source}")]
    AcquisitionInit { window: WindowHandle, source: BackendError },
    /// The backend reported a geometry that breaks `stride >= width * 4` or has a zero dimension.
    #[error("Window {window} reported an inconsistent geometry: {geometry}")]
    InvalidGeometry { window: WindowHandle, geometry: Geometry },
    /// A single refresh failed. The session stays open and may be refreshed again.
    #[error("Failed to update the frame: {0}")]
    FrameUpdate(#[source] BackendError),
    /// The session was closed.
    #[error("Capture session is closed")]
    SessionClosed,
    /// Another session holds the capture slot.
    #[error("A capture session is already active for window {active}")]
    SessionAlreadyActive { active: WindowHandle },
    /// A frame was requested before any successful refresh.
    #[error("No frame has been captured yet")]
    NotRefreshed,
    /// Packing the native buffer failed.
    #[error(transparent)]
    FrameError(#[from] frame::Error),
}

#[derive(Eq, PartialEq, Clone, Copy, Debug)]
enum State {
    Open,
    Closed,
}

/// One active acquisition bound to one window.
///
/// Geometry is queried once at creation and stays fixed. The session owns the backend and the
/// capture slot until [`CaptureSession::close`] is called or the session is dropped.
pub struct CaptureSession<B: CaptureBackend> {
    backend: B,
    window: WindowHandle,
    geometry: Geometry,
    state: State,
    refreshed: bool,
    slot: Option<SlotGuard>,
}

impl<B: CaptureBackend> CaptureSession<B> {
    /// Binds `backend` to `window` and takes `slot`.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionAlreadyActive`] when another session holds `slot`; the backend is not
    ///   touched
    /// - [`Error::AcquisitionInit`] when the backend cannot bind to the window
    /// - [`Error::InvalidGeometry`] when the bound window reports an unusable geometry
    ///
    /// The backend is released and the slot freed on every error after the claim.
    pub fn create(mut backend: B, slot: &CaptureSlot, window: WindowHandle) -> Result<Self, Error> {
        let guard = slot.claim(window).map_err(|active| Error::SessionAlreadyActive { active })?;

        trace!("Binding capture backend to window {window}");
        if let Err(source) = backend.bind(window) {
            backend.release();
            return Err(Error::AcquisitionInit { window, source });
        }

        let geometry = backend.geometry();
        if !geometry.is_valid() {
            warn!("Window {window} reported an inconsistent geometry: {geometry}");
            backend.release();
            return Err(Error::InvalidGeometry { window, geometry });
        }

        info!("Capturing window {window} at {geometry}");

        Ok(Self { backend, window, geometry, state: State::Open, refreshed: false, slot: Some(guard) })
    }

    /// Captures the current contents of the window into the backend's buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] after [`CaptureSession::close`]
    /// - [`Error::FrameUpdate`] when the backend fails; the session stays open and the last
    ///   successful capture remains available to [`CaptureSession::fetch_frame`]
    pub fn refresh(&mut self) -> Result<(), Error> {
        self.ensure_open()?;

        self.backend.trigger_update().map_err(Error::FrameUpdate)?;
        self.refreshed = true;

        Ok(())
    }

    /// Copies the latest capture into a new packed, fully opaque [`Frame`].
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] after [`CaptureSession::close`]
    /// - [`Error::NotRefreshed`] before the first successful [`CaptureSession::refresh`]
    /// - [`Error::FrameError`] when the backend buffer is shorter than its geometry
    pub fn fetch_frame(&self) -> Result<Frame, Error> {
        self.ensure_open()?;

        if !self.refreshed {
            return Err(Error::NotRefreshed);
        }

        Ok(Frame::from_native(self.backend.buffer(), self.geometry)?)
    }

    /// Releases the backend and the capture slot. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }

        self.backend.release();
        self.slot = None;
        self.state = State::Closed;

        info!("Stopped capturing window {}", self.window);
    }

    /// Gets the window this session is bound to.
    #[inline]
    #[must_use]
    pub const fn window(&self) -> WindowHandle {
        self.window
    }

    /// Gets the geometry queried at creation.
    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Gets the width of produced frames.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.geometry.width()
    }

    /// Gets the height of produced frames.
    #[inline]
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.geometry.height()
    }

    /// Checks if the session is still open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(Error::SessionClosed),
        }
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Default, Debug)]
    struct Calls {
        binds: usize,
        updates: usize,
        releases: usize,
    }

    /// Serves `frames` one per update, then keeps the last one.
    struct FakeBackend {
        geometry: Geometry,
        frames: Vec<Vec<u8>>,
        buffer: Vec<u8>,
        refuse_bind: bool,
        fail_updates: bool,
        calls: Rc<RefCell<Calls>>,
    }

    impl FakeBackend {
        fn new(geometry: Geometry, frames: Vec<Vec<u8>>) -> (Self, Rc<RefCell<Calls>>) {
            let calls = Rc::new(RefCell::new(Calls::default()));
            let backend = Self {
                geometry,
                frames,
                buffer: Vec::new(),
                refuse_bind: false,
                fail_updates: false,
                calls: calls.clone(),
            };

            (backend, calls)
        }

        fn solid(geometry: Geometry, value: u8) -> (Self, Rc<RefCell<Calls>>) {
            Self::new(geometry, vec![vec![value; geometry.stride() * geometry.height() as usize]])
        }
    }

    impl CaptureBackend for FakeBackend {
        fn bind(&mut self, window: WindowHandle) -> Result<(), BackendError> {
            self.calls.borrow_mut().binds += 1;
            if self.refuse_bind {
                return Err(BackendError::WindowNotFound(window));
            }

            Ok(())
        }

        fn geometry(&self) -> Geometry {
            self.geometry
        }

        fn trigger_update(&mut self) -> Result<(), BackendError> {
            self.calls.borrow_mut().updates += 1;
            if self.fail_updates {
                return Err(BackendError::ResourceLost);
            }

            if !self.frames.is_empty() {
                self.buffer = self.frames.remove(0);
            }

            Ok(())
        }

        fn buffer(&self) -> &[u8] {
            &self.buffer
        }

        fn release(&mut self) {
            self.calls.borrow_mut().releases += 1;
        }
    }

    const WINDOW: WindowHandle = WindowHandle::new(0x0420_0007);

    #[test]
    fn create_caches_geometry() {
        let geometry = Geometry::new(64, 2, 260);
        let (backend, calls) = FakeBackend::solid(geometry, 1);
        let slot = CaptureSlot::new();

        let session = CaptureSession::create(backend, &slot, WINDOW).unwrap();

        assert!(session.is_open());
        assert_eq!(session.window(), WINDOW);
        assert_eq!(session.geometry(), geometry);
        assert_eq!((session.width(), session.height()), (64, 2));
        assert_eq!(slot.active(), Some(WINDOW));
        assert_eq!(calls.borrow().binds, 1);
    }

    #[test]
    fn unbindable_window_fails_and_frees_everything() {
        let (mut backend, calls) = FakeBackend::solid(Geometry::new(4, 4, 16), 0);
        backend.refuse_bind = true;
        let slot = CaptureSlot::new();

        let error = CaptureSession::create(backend, &slot, WINDOW).err().unwrap();

        assert!(matches!(
            error,
            Error::AcquisitionInit { window, source: BackendError::WindowNotFound(_) } if window == WINDOW
        ));
        assert_eq!(slot.active(), None);
        assert_eq!(calls.borrow().releases, 1);
    }

    #[test]
    fn stride_smaller_than_row_is_rejected() {
        let (backend, calls) = FakeBackend::solid(Geometry::new(64, 2, 255), 0);
        let slot = CaptureSlot::new();

        let error = CaptureSession::create(backend, &slot, WINDOW).err().unwrap();

        assert!(matches!(error, Error::InvalidGeometry { geometry, .. } if geometry.stride() == 255));
        assert_eq!(slot.active(), None);
        assert_eq!(calls.borrow().releases, 1);
    }

    #[test]
    fn zero_sized_window_is_rejected() {
        let (backend, _calls) = FakeBackend::solid(Geometry::new(0, 10, 0), 0);

        let error = CaptureSession::create(backend, &CaptureSlot::new(), WINDOW).err().unwrap();

        assert!(matches!(error, Error::InvalidGeometry { .. }));
    }

    #[test]
    fn second_session_is_rejected_while_first_is_open() {
        let slot = CaptureSlot::new();
        let (first, _) = FakeBackend::solid(Geometry::new(4, 4, 16), 0);
        let (second, second_calls) = FakeBackend::solid(Geometry::new(4, 4, 16), 0);
        let (third, _) = FakeBackend::solid(Geometry::new(4, 4, 16), 0);

        let mut session = CaptureSession::create(first, &slot, WINDOW).unwrap();

        let error = CaptureSession::create(second, &slot, WindowHandle::new(2)).err().unwrap();
        assert!(matches!(error, Error::SessionAlreadyActive { active } if active == WINDOW));
        assert_eq!(second_calls.borrow().binds, 0);
        assert_eq!(second_calls.borrow().releases, 0);

        session.close();
        let session = CaptureSession::create(third, &slot, WindowHandle::new(2)).unwrap();
        assert_eq!(slot.active(), Some(WindowHandle::new(2)));
        drop(session);
        assert_eq!(slot.active(), None);
    }

    #[test]
    fn fetch_before_refresh_fails() {
        let (backend, _) = FakeBackend::solid(Geometry::new(4, 4, 16), 9);
        let session = CaptureSession::create(backend, &CaptureSlot::new(), WINDOW).unwrap();

        assert!(matches!(session.fetch_frame(), Err(Error::NotRefreshed)));
    }

    #[test]
    fn fetch_packs_rows_and_forces_opaque_alpha() {
        let geometry = Geometry::new(64, 2, 260);
        let mut native = vec![0u8; 520];
        native[..256].fill(0x10);
        native[256..260].fill(0xEE);
        native[260..516].fill(0x20);
        native[516..].fill(0xEE);
        let (backend, _) = FakeBackend::new(geometry, vec![native]);
        let mut session = CaptureSession::create(backend, &CaptureSlot::new(), WINDOW).unwrap();

        session.refresh().unwrap();
        let frame = session.fetch_frame().unwrap();

        assert_eq!(frame.as_raw().len(), 512);
        assert!(!frame.as_raw().contains(&0xEE));
        assert_eq!(frame.pixel(63, 0), Some([0x10, 0x10, 0x10, 255]));
        assert_eq!(frame.pixel(0, 1), Some([0x20, 0x20, 0x20, 255]));
    }

    #[test]
    fn frames_do_not_alias_the_native_buffer() {
        let geometry = Geometry::new(2, 1, 8);
        let (backend, _) = FakeBackend::new(geometry, vec![vec![1; 8], vec![2; 8]]);
        let mut session = CaptureSession::create(backend, &CaptureSlot::new(), WINDOW).unwrap();

        session.refresh().unwrap();
        let first = session.fetch_frame().unwrap();
        session.refresh().unwrap();
        let second = session.fetch_frame().unwrap();
        session.close();

        assert_eq!(first.as_raw(), [1, 1, 1, 255, 1, 1, 1, 255]);
        assert_eq!(second.as_raw(), [2, 2, 2, 255, 2, 2, 2, 255]);
    }

    #[test]
    fn failed_refresh_keeps_session_open() {
        let geometry = Geometry::new(2, 1, 8);
        let (backend, calls) = FakeBackend::solid(geometry, 5);
        let mut session = CaptureSession::create(backend, &CaptureSlot::new(), WINDOW).unwrap();
        session.refresh().unwrap();

        session.backend.fail_updates = true;
        assert!(matches!(session.refresh(), Err(Error::FrameUpdate(BackendError::ResourceLost))));
        assert!(session.is_open());
        assert_eq!(session.fetch_frame().unwrap().as_raw(), [5, 5, 5, 255, 5, 5, 5, 255]);

        session.backend.fail_updates = false;
        session.refresh().unwrap();
        assert_eq!(calls.borrow().updates, 3);
    }

    #[test]
    fn close_is_idempotent() {
        let (backend, calls) = FakeBackend::solid(Geometry::new(4, 4, 16), 0);
        let slot = CaptureSlot::new();
        let mut session = CaptureSession::create(backend, &slot, WINDOW).unwrap();

        session.close();
        session.close();
        drop(session);

        assert_eq!(calls.borrow().releases, 1);
        assert_eq!(slot.active(), None);
    }

    #[test]
    fn closed_session_rejects_refresh_and_fetch() {
        let (backend, calls) = FakeBackend::solid(Geometry::new(4, 4, 16), 0);
        let mut session = CaptureSession::create(backend, &CaptureSlot::new(), WINDOW).unwrap();
        session.refresh().unwrap();

        session.close();

        assert!(!session.is_open());
        assert!(matches!(session.refresh(), Err(Error::SessionClosed)));
        assert!(matches!(session.fetch_frame(), Err(Error::SessionClosed)));
        assert_eq!(calls.borrow().updates, 1);
    }

    #[test]
    fn dropping_an_open_session_releases_backend_and_slot() {
        let (backend, calls) = FakeBackend::solid(Geometry::new(4, 4, 16), 0);
        let slot = CaptureSlot::new();

        drop(CaptureSession::create(backend, &slot, WINDOW).unwrap());

        assert_eq!(calls.borrow().releases, 1);
        assert_eq!(slot.active(), None);
    }

    #[test]
    fn short_native_buffer_is_reported() {
        let geometry = Geometry::new(4, 4, 16);
        let (backend, _) = FakeBackend::new(geometry, vec![vec![0; 10]]);
        let mut session = CaptureSession::create(backend, &CaptureSlot::new(), WINDOW).unwrap();
        session.refresh().unwrap();

        assert!(matches!(
            session.fetch_frame(),
            Err(Error::FrameError(frame::Error::BufferTooSmall { expected: 64, actual: 10 }))
        ));
    }
}
