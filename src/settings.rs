use std::time::Duration;

/// Part Of The Window That Ends Up In The Frame
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub enum CaptureArea {
    /// The whole window, including the decorations drawn around it by the window manager.
    #[default]
    Window,
    /// Only The Client Area Of The Window
    Client,
}

/// Whether the cursor is drawn into captured frames. Ignored by backends that cannot toggle it.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub enum CursorCaptureSettings {
    /// Leave The Platform Default
    #[default]
    Default,
    WithCursor,
    WithoutCursor,
}

/// Whether the platform draws a highlight border around the captured window. Ignored by backends
/// that cannot toggle it.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub enum DrawBorderSettings {
    /// Leave The Platform Default
    #[default]
    Default,
    WithBorder,
    WithoutBorder,
}

/// Capture Settings Used To Construct A Native Backend
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct Settings {
    /// Part Of The Window To Capture
    pub area: CaptureArea,
    /// Cursor Visibility In Captured Frames
    pub cursor_capture: CursorCaptureSettings,
    /// Capture Border Around The Window
    pub draw_border: DrawBorderSettings,
    /// How long a backend that receives frames asynchronously waits for the very first one before
    /// a refresh fails.
    pub first_frame_timeout: Duration,
}

impl Settings {
    /// Default Wait For The First Frame Of A Session
    pub const DEFAULT_FIRST_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

    /// Create Capture Settings
    #[inline]
    #[must_use]
    pub const fn new(
        area: CaptureArea,
        cursor_capture: CursorCaptureSettings,
        draw_border: DrawBorderSettings,
    ) -> Self {
        Self { area, cursor_capture, draw_border, first_frame_timeout: Self::DEFAULT_FIRST_FRAME_TIMEOUT }
    }

    /// Replace The First Frame Timeout
    #[inline]
    #[must_use]
    pub const fn with_first_frame_timeout(mut self, timeout: Duration) -> Self {
        self.first_frame_timeout = timeout;
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(CaptureArea::default(), CursorCaptureSettings::default(), DrawBorderSettings::default())
    }
}
