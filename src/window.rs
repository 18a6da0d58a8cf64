//! Discovering windows to capture.
use std::fmt;

use log::{error, trace};

use crate::native::{BackendError, RawWindow, WindowHandle, WindowSource};

/// Longest title, in bytes of native text, kept for a [`WindowEntry`].
pub const MAX_TITLE_LEN: usize = 255;

/// Returned when the platform fails to enumerate windows. Callers usually fall back to an empty
/// list with `unwrap_or_default`.
#[derive(thiserror::Error, Debug)]
#[error("Failed to enumerate windows: {0}")]
pub struct EnumerationError(#[from] pub BackendError);

/// Represents A Window That Can Be Passed To [`crate::session::CaptureSession::create`]
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct WindowEntry {
    handle: WindowHandle,
    title: String,
}

impl WindowEntry {
    /// Get The Window Handle
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> WindowHandle {
        self.handle
    }

    /// Get The Window Title
    #[inline]
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }
}

impl fmt::Display for WindowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.handle, self.title)
    }
}

/// Holds a listing and hands it back to its source when dropped, whatever path the caller takes.
struct Listing<'s, S: WindowSource> {
    source: &'s S,
    listing: Option<S::Listing>,
}

impl<S: WindowSource> Listing<'_, S> {
    fn entries(&self) -> &[RawWindow] {
        match &self.listing {
            Some(listing) => self.source.entries(listing),
            None => &[],
        }
    }
}

impl<S: WindowSource> Drop for Listing<'_, S> {
    fn drop(&mut self) {
        if let Some(listing) = self.listing.take() {
            self.source.release(listing);
        }
    }
}

/// Lists the currently open windows in the order the platform reports them.
///
/// Zero windows is a successful, empty result.
///
/// # Errors
///
/// Returns an [`EnumerationError`] when the platform query fails. The failure is logged.
pub fn list_windows<S: WindowSource>(source: &S) -> Result<Vec<WindowEntry>, EnumerationError> {
    let listing = match source.enumerate() {
        Ok(listing) => Listing { source, listing: Some(listing) },
        Err(e) => {
            error!("Failed to enumerate windows: {e}");
            return Err(EnumerationError(e));
        }
    };

    let windows = listing
        .entries()
        .iter()
        .map(|raw| WindowEntry { handle: raw.handle, title: decode_title(&raw.title) })
        .collect::<Vec<_>>();

    trace!("Enumerated {} windows", windows.len());

    Ok(windows)
}

/// Decodes a raw native title: stops at the first NUL, keeps at most [`MAX_TITLE_LEN`] bytes,
/// drops invalid UTF-8 and trims surrounding whitespace.
fn decode_title(raw: &[u8]) -> String {
    let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len()).min(MAX_TITLE_LEN);

    let mut title = String::with_capacity(end);
    for chunk in raw[..end].utf8_chunks() {
        title.push_str(chunk.valid());
    }

    title.trim().to_owned()
}

#[cfg(windows)]
pub use self::desktop::DesktopWindows;

#[cfg(windows)]
mod desktop {
    use log::warn;
    use windows::Win32::Foundation::{HWND, LPARAM, RECT};
    use windows::Win32::System::Threading::GetCurrentProcessId;
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GWL_EXSTYLE, GWL_STYLE, GetClientRect, GetWindowLongPtrW, GetWindowTextW,
        GetWindowThreadProcessId, IsWindowVisible, WS_CHILD, WS_EX_TOOLWINDOW,
    };
    use windows::core::BOOL;

    use crate::native::{BackendError, RawWindow, WindowHandle, WindowSource};

    /// Top Level Windows Of The Current Desktop, As Reported By `EnumWindows`
    #[derive(Clone, Copy, Default, Debug)]
    pub struct DesktopWindows;

    impl DesktopWindows {
        /// Check If The Window Is Visible, Top Level, Not A Tool Window And Not Ours
        fn is_capturable(window: HWND) -> bool {
            if !unsafe { IsWindowVisible(window).as_bool() } {
                return false;
            }

            let mut id = 0;
            unsafe { GetWindowThreadProcessId(window, Some(&raw mut id)) };
            if id == unsafe { GetCurrentProcessId() } {
                return false;
            }

            let mut rect = RECT::default();
            if unsafe { GetClientRect(window, &mut rect) }.is_ok() {
                let styles = unsafe { GetWindowLongPtrW(window, GWL_STYLE) };
                let ex_styles = unsafe { GetWindowLongPtrW(window, GWL_EXSTYLE) };

                if (ex_styles & WS_EX_TOOLWINDOW.0 as isize) != 0 {
                    return false;
                }
                if (styles & WS_CHILD.0 as isize) != 0 {
                    return false;
                }
            } else {
                warn!("GetClientRect failed");
            }

            true
        }

        /// Get The Title As UTF-8 Bytes
        fn title(window: HWND) -> Vec<u8> {
            let mut name = [0u16; 512];
            let len = unsafe { GetWindowTextW(window, &mut name) };
            let len = usize::try_from(len).unwrap_or(0).min(name.len());

            String::from_utf16_lossy(&name[..len]).into_bytes()
        }

        unsafe extern "system" fn enum_windows_callback(window: HWND, windows: LPARAM) -> BOOL {
            // SAFETY: `windows` is the `&mut Vec<RawWindow>` passed to `EnumWindows` below, which
            // outlives the enumeration.
            let windows = unsafe { &mut *(windows.0 as *mut Vec<RawWindow>) };

            if Self::is_capturable(window) {
                let handle = WindowHandle::new(window.0 as usize as u64);
                windows.push(RawWindow::new(handle, Self::title(window)));
            }

            BOOL::from(true)
        }
    }

    impl WindowSource for DesktopWindows {
        type Listing = Vec<RawWindow>;

        fn enumerate(&self) -> Result<Self::Listing, BackendError> {
            let mut windows = Vec::new();

            unsafe {
                EnumWindows(Some(Self::enum_windows_callback), LPARAM(&raw mut windows as isize))?;
            };

            Ok(windows)
        }

        fn entries<'a>(&self, listing: &'a Self::Listing) -> &'a [RawWindow] {
            listing
        }

        fn release(&self, listing: Self::Listing) {
            drop(listing);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    struct FakeSource {
        windows: Option<Vec<RawWindow>>,
        panic_on_entries: bool,
        released: Cell<usize>,
    }

    impl FakeSource {
        fn with(windows: Vec<RawWindow>) -> Self {
            Self { windows: Some(windows), panic_on_entries: false, released: Cell::new(0) }
        }

        fn failing() -> Self {
            Self { windows: None, panic_on_entries: false, released: Cell::new(0) }
        }
    }

    impl WindowSource for FakeSource {
        type Listing = Vec<RawWindow>;

        fn enumerate(&self) -> Result<Self::Listing, BackendError> {
            self.windows.clone().ok_or_else(|| BackendError::Unsupported("no display".to_owned()))
        }

        fn entries<'a>(&self, listing: &'a Self::Listing) -> &'a [RawWindow] {
            assert!(!self.panic_on_entries, "enumeration storage corrupted");
            listing
        }

        fn release(&self, _listing: Self::Listing) {
            self.released.set(self.released.get() + 1);
        }
    }

    #[test]
    fn empty_desktop_is_not_an_error() {
        let source = FakeSource::with(Vec::new());

        let windows = list_windows(&source).unwrap();

        assert!(windows.is_empty());
        assert_eq!(source.released.get(), 1);
    }

    #[test]
    fn enumeration_failure_is_reported() {
        let source = FakeSource::failing();

        let error = list_windows(&source).unwrap_err();

        assert!(matches!(error, EnumerationError(BackendError::Unsupported(_))));
        assert!(list_windows(&source).unwrap_or_default().is_empty());
        assert_eq!(source.released.get(), 0);
    }

    #[test]
    fn keeps_native_order_and_releases_once() {
        let source = FakeSource::with(vec![
            RawWindow::new(WindowHandle::new(30), "Terminal"),
            RawWindow::new(WindowHandle::new(10), "Editor"),
            RawWindow::new(WindowHandle::new(20), "Browser"),
        ]);

        let windows = list_windows(&source).unwrap();

        let handles = windows.iter().map(|w| w.handle().as_raw()).collect::<Vec<_>>();
        assert_eq!(handles, [30, 10, 20]);
        assert_eq!(windows[1].title(), "Editor");
        assert_eq!(windows[1].to_string(), "0xa Editor");
        assert_eq!(source.released.get(), 1);
    }

    #[test]
    fn listing_is_released_when_reading_it_panics() {
        let mut source = FakeSource::with(vec![RawWindow::new(WindowHandle::new(1), "x")]);
        source.panic_on_entries = true;

        let result = panic::catch_unwind(AssertUnwindSafe(|| list_windows(&source)));

        assert!(result.is_err());
        assert_eq!(source.released.get(), 1);
    }

    #[test]
    fn titles_drop_invalid_utf8_and_trim() {
        assert_eq!(decode_title(b"  Caf\xC3\xA9 \xFF\xFEmenu\t\n"), "Café menu");
        assert_eq!(decode_title(b"\xE2\x82"), "");
        assert_eq!(decode_title(b""), "");
    }

    #[test]
    fn titles_stop_at_nul() {
        assert_eq!(decode_title(b"Editor\0garbage after terminator"), "Editor");
    }

    #[test]
    fn titles_are_cut_to_255_bytes() {
        let long = vec![b'a'; 400];
        assert_eq!(decode_title(&long).len(), MAX_TITLE_LEN);

        // A two byte character straddling the limit is dropped, not replaced.
        let mut straddling = vec![b'b'; 254];
        straddling.extend_from_slice("é".as_bytes());
        assert_eq!(decode_title(&straddling), "b".repeat(254));
    }
}
