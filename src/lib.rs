//! # Window Eye
//!
//! **Window Eye** pulls live frames from a single application window. Each frame is a tightly
//! packed RGBA buffer, 4 bytes per pixel, rows top to bottom, with every alpha byte set to 255.
//! It also lists the windows of the current desktop so you can pick one to capture.
//!
//! ## Features
//!
//! - Pull based: a frame is only produced when you ask for one.
//! - Row padding of the native buffer never leaks into frames.
//! - One capture at a time per [`CaptureSlot`], enforced at session creation.
//! - X11 (Composite extension) on Linux, Windows Graphics Capture on Windows.
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! window-eye = "0.1.0"
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use window_eye::{CaptureSession, CaptureSlot, NativeBackend, NativeWindowSource, Settings, list_windows};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Pick the first window whose title mentions an editor
//!     let windows = list_windows(&NativeWindowSource::default()).unwrap_or_default();
//!     let Some(entry) = windows.iter().find(|entry| entry.title().contains("Editor")) else {
//!         return Ok(());
//!     };
//!
//!     let backend = NativeBackend::new(Settings::default());
//!     let mut session = CaptureSession::create(backend, &CaptureSlot::process_wide(), entry.handle())?;
//!
//!     for _ in 0..10 {
//!         session.refresh()?;
//!         let frame = session.fetch_frame()?;
//!         println!("{}x{}, first pixel {:?}", frame.width(), frame.height(), frame.pixel(0, 0));
//!     }
//!
//!     Ok(())
//! }
//! ```
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::inconsistent_struct_constructor)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::ptr_as_ptr)]
#![warn(clippy::borrow_as_ptr)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]

#[cfg(windows)]
mod d3d11;
pub mod frame;
#[cfg(windows)]
pub mod graphics_capture_api;
pub mod native;
pub mod session;
pub mod settings;
pub mod slot;
pub mod window;
#[cfg(target_os = "linux")]
pub mod x11;

pub use frame::Frame;
pub use native::{CaptureBackend, Geometry, WindowHandle, WindowSource};
pub use session::CaptureSession;
pub use settings::Settings;
pub use slot::CaptureSlot;
pub use window::{WindowEntry, list_windows};

/// The capture backend of the current platform.
#[cfg(target_os = "linux")]
pub type NativeBackend = x11::X11Backend;
/// The window source of the current platform.
#[cfg(target_os = "linux")]
pub type NativeWindowSource = x11::X11WindowSource;

/// The capture backend of the current platform.
#[cfg(windows)]
pub type NativeBackend = graphics_capture_api::GraphicsCaptureBackend;
/// The window source of the current platform.
#[cfg(windows)]
pub type NativeWindowSource = window::DesktopWindows;
