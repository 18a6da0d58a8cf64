//! The seam between the capture core and the platform.
//!
//! [`CaptureBackend`] mirrors the handful of calls a native acquisition layer exposes (bind a
//! window, report its geometry, pull the newest contents into an internal buffer, hand out that
//! buffer, release everything). [`WindowSource`] does the same for window enumeration, including
//! the matching release call for whatever storage backs a listing.
//!
//! The core never talks to the platform directly, which keeps it testable with in-memory fakes.
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Bytes per pixel of every buffer handed out by a [`CaptureBackend`].
pub const BYTES_PER_PIXEL: usize = 4;

/// Opaque identifier of a native window (an `HWND` on Windows, an X11 window id on Linux).
///
/// Handles are never validated on construction; the first place a bad handle is noticed is
/// [`crate::session::CaptureSession::create`].
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, Debug)]
pub struct WindowHandle(u64);

impl WindowHandle {
    /// Wraps a raw native window id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw native window id.
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for WindowHandle {
    #[inline]
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Returned when a string is neither a decimal nor a `0x` prefixed hexadecimal window id.
#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
#[error("Invalid window handle: {0}")]
pub struct ParseWindowHandleError(#[from] ParseIntError);

impl FromStr for WindowHandle {
    type Err = ParseWindowHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16)?,
            None => s.parse()?,
        };

        Ok(Self(raw))
    }
}

/// Size and row layout of a backend's pixel buffer.
///
/// `stride` is the distance in bytes between the starts of two consecutive rows and may exceed
/// `width * 4` when the platform aligns rows.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub struct Geometry {
    width: u32,
    height: u32,
    stride: usize,
}

impl Geometry {
    /// Constructs a geometry as reported by a backend. Use [`Geometry::is_valid`] before relying
    /// on any of the derived lengths.
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32, stride: usize) -> Self {
        Self { width, height, stride }
    }

    /// Width in pixels.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per native row, padding included.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes of pixel data per row, padding excluded.
    #[inline]
    #[must_use]
    pub const fn row_len(&self) -> usize {
        (self.width as usize).saturating_mul(BYTES_PER_PIXEL)
    }

    /// Length of a packed frame of this geometry. Saturates on geometries that fail
    /// [`Geometry::is_valid`].
    #[inline]
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.row_len().saturating_mul(self.height as usize)
    }

    /// Smallest native buffer that holds every row. The padding of the last row is not required.
    ///
    /// Zero without rows; saturates on geometries that fail [`Geometry::is_valid`].
    #[inline]
    #[must_use]
    pub const fn min_buffer_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }

        (self.height as usize - 1).saturating_mul(self.stride).saturating_add(self.row_len())
    }

    /// Checks that both dimensions are positive, that `stride >= width * 4` and that none of the
    /// derived lengths overflow.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }

        let Some(row_len) = (self.width as usize).checked_mul(BYTES_PER_PIXEL) else {
            return false;
        };

        self.stride >= row_len
            && row_len.checked_mul(self.height as usize).is_some()
            && self.stride.checked_mul(self.height as usize).is_some()
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} (stride {})", self.width, self.height, self.stride)
    }
}

/// Errors reported by a native backend.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// The handle does not reference an existing window.
    #[error("Window {0} does not exist")]
    WindowNotFound(WindowHandle),
    /// The window or the platform cannot be captured this way.
    #[error("Capture is not supported: {0}")]
    Unsupported(String),
    /// An operation that needs a bound window was called without one.
    #[error("Backend is not bound to a window")]
    NotBound,
    /// The native capture resources disappeared, usually because the window was destroyed or
    /// resized.
    #[error("Native capture resources were lost")]
    ResourceLost,
    /// No frame arrived within the configured timeout.
    #[error("Timed out waiting for the first frame")]
    Timeout,
    /// Windows API error.
    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
    /// Could not open the X11 display.
    #[cfg(target_os = "linux")]
    #[error("Failed to connect to the X11 display: {0}")]
    X11Connect(#[from] x11rb::errors::ConnectError),
    /// The X11 connection broke.
    #[cfg(target_os = "linux")]
    #[error("X11 connection error: {0}")]
    X11Connection(#[from] x11rb::errors::ConnectionError),
    /// The X server rejected a request.
    #[cfg(target_os = "linux")]
    #[error("X11 request failed: {0}")]
    X11Reply(#[from] x11rb::errors::ReplyError),
    /// The X server rejected a request or ran out of resource ids.
    #[cfg(target_os = "linux")]
    #[error("X11 request failed: {0}")]
    X11ReplyOrId(#[from] x11rb::errors::ReplyOrIdError),
}

/// A native acquisition layer that captures one window at a time.
///
/// A backend is driven by [`crate::session::CaptureSession`]: `bind` once, `geometry` once right
/// after a successful bind, then any number of `trigger_update`/`buffer` pairs and finally
/// `release`. Pixels in [`CaptureBackend::buffer`] are 4 bytes each in R, G, B, X order; the
/// fourth byte carries no meaning.
pub trait CaptureBackend {
    /// Binds the backend to `window` and allocates whatever the platform needs to read it.
    ///
    /// # Errors
    ///
    /// Returns an error when the window does not exist, cannot be captured or the platform
    /// refuses access.
    fn bind(&mut self, window: WindowHandle) -> Result<(), BackendError>;

    /// Geometry of the internal buffer. Only meaningful after a successful bind.
    fn geometry(&self) -> Geometry;

    /// Captures the current contents of the bound window into the internal buffer.
    ///
    /// # Errors
    ///
    /// Returns an error when the window is gone or the capture resources were lost.
    fn trigger_update(&mut self) -> Result<(), BackendError>;

    /// The internal buffer, at least [`Geometry::min_buffer_len`] bytes once updated.
    fn buffer(&self) -> &[u8];

    /// Releases every native resource. Must be safe to call when unbound or already released.
    fn release(&mut self);
}

impl<T: CaptureBackend + ?Sized> CaptureBackend for Box<T> {
    #[inline]
    fn bind(&mut self, window: WindowHandle) -> Result<(), BackendError> {
        (**self).bind(window)
    }

    #[inline]
    fn geometry(&self) -> Geometry {
        (**self).geometry()
    }

    #[inline]
    fn trigger_update(&mut self) -> Result<(), BackendError> {
        (**self).trigger_update()
    }

    #[inline]
    fn buffer(&self) -> &[u8] {
        (**self).buffer()
    }

    #[inline]
    fn release(&mut self) {
        (**self).release();
    }
}

/// One window as reported by the platform, title still in its raw encoding.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct RawWindow {
    pub handle: WindowHandle,
    pub title: Vec<u8>,
}

impl RawWindow {
    #[inline]
    #[must_use]
    pub fn new(handle: WindowHandle, title: impl Into<Vec<u8>>) -> Self {
        Self { handle, title: title.into() }
    }
}

/// A native window enumeration call together with the release call for its result.
///
/// Every listing returned by [`WindowSource::enumerate`] is handed back to
/// [`WindowSource::release`] exactly once by [`crate::window::list_windows`].
pub trait WindowSource {
    /// Whatever storage the platform hands out for one enumeration.
    type Listing;

    /// Enumerates the currently open windows.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform query fails. An empty desktop is not an error.
    fn enumerate(&self) -> Result<Self::Listing, BackendError>;

    /// Entries of a listing in the order the platform returned them.
    fn entries<'a>(&self, listing: &'a Self::Listing) -> &'a [RawWindow];

    /// Frees the storage behind a listing.
    fn release(&self, listing: Self::Listing);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_handles() {
        assert_eq!("6354413".parse::<WindowHandle>().unwrap(), WindowHandle::new(6_354_413));
        assert_eq!("0x60f5ed".parse::<WindowHandle>().unwrap(), WindowHandle::new(0x60_f5ed));
        assert_eq!(" 0X10 ".parse::<WindowHandle>().unwrap(), WindowHandle::new(16));
        assert!("window".parse::<WindowHandle>().is_err());
        assert!("0x".parse::<WindowHandle>().is_err());
    }

    #[test]
    fn displays_handles_as_hex() {
        assert_eq!(WindowHandle::new(255).to_string(), "0xff");
    }

    #[test]
    fn geometry_lengths() {
        let geometry = Geometry::new(64, 2, 260);
        assert!(geometry.is_valid());
        assert_eq!(geometry.row_len(), 256);
        assert_eq!(geometry.frame_len(), 512);
        assert_eq!(geometry.min_buffer_len(), 516);
    }

    #[test]
    fn geometry_rejects_inconsistent_layouts() {
        assert!(!Geometry::new(0, 10, 0).is_valid());
        assert!(!Geometry::new(10, 0, 40).is_valid());
        assert!(!Geometry::new(10, 10, 39).is_valid());
        assert!(!Geometry::new(10, u32::MAX, usize::MAX).is_valid());
        assert!(Geometry::new(10, 10, 40).is_valid());
        assert!(!Geometry::default().is_valid());
    }

    #[test]
    fn lengths_of_invalid_geometries_do_not_panic() {
        assert_eq!(Geometry::default().min_buffer_len(), 0);
        assert_eq!(Geometry::default().frame_len(), 0);

        let narrow_stride = Geometry::new(10, 1, 4);
        assert!(!narrow_stride.is_valid());
        assert_eq!(narrow_stride.min_buffer_len(), 40);

        let huge = Geometry::new(10, u32::MAX, usize::MAX);
        assert_eq!(huge.min_buffer_len(), usize::MAX);
    }
}
