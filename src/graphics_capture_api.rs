//! Pull based capture through the Windows Graphics Capture API.
//!
//! The frame pool is free threaded, so frames keep arriving without a message loop on the
//! calling thread. [`GraphicsCaptureBackend::trigger_update`] drains the pool down to the newest
//! frame, copies it into a staging texture and reads it back with the driver's row pitch as the
//! stride.
use std::thread;
use std::time::{Duration, Instant};

use log::{info, trace, warn};
use windows::Foundation::Metadata::ApiInformation;
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Foundation::{HWND, POINT, RECT};
use windows::Win32::Graphics::Direct3D11::{D3D11_BOX, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D};
use windows::Win32::Graphics::Dwm::{DWMWA_EXTENDED_FRAME_BOUNDS, DwmGetWindowAttribute};
use windows::Win32::Graphics::Gdi::ClientToScreen;
use windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess;
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::WindowsAndMessaging::{GetClientRect, IsWindow};
use windows::core::{HSTRING, Interface};

use crate::d3d11::{StagingTexture, create_d3d_device, create_direct3d_device};
use crate::native::{BackendError, CaptureBackend, Geometry, WindowHandle};
use crate::settings::{CaptureArea, CursorCaptureSettings, DrawBorderSettings, Settings};

const SESSION_CLASS: &str = "Windows.Graphics.Capture.GraphicsCaptureSession";
const FIRST_FRAME_POLL: Duration = Duration::from_millis(1);

struct Bound {
    window: HWND,
    d3d_device_context: ID3D11DeviceContext,
    _direct3d_device: IDirect3DDevice,
    _item: GraphicsCaptureItem,
    frame_pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    crop: D3D11_BOX,
    staging: StagingTexture,
    geometry: Geometry,
    buffer: Vec<u8>,
    has_frame: bool,
}

/// Struct To Capture A Window With The Graphics Capture Api
pub struct GraphicsCaptureBackend {
    settings: Settings,
    bound: Option<Bound>,
}

impl GraphicsCaptureBackend {
    /// Create An Unbound Backend
    #[inline]
    #[must_use]
    pub const fn new(settings: Settings) -> Self {
        Self { settings, bound: None }
    }

    #[inline]
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Check If The Graphics Capture Api Is Supported
    ///
    /// # Errors
    ///
    /// Returns an error when the API information query fails.
    pub fn is_supported() -> Result<bool, BackendError> {
        Ok(GraphicsCaptureSession::IsSupported()?)
    }

    fn is_property_present(property: &str) -> Result<bool, BackendError> {
        Ok(ApiInformation::IsPropertyPresent(&HSTRING::from(SESSION_CLASS), &HSTRING::from(property))?)
    }

    fn configure(&self, session: &GraphicsCaptureSession) -> Result<(), BackendError> {
        let capture_cursor = match self.settings.cursor_capture {
            CursorCaptureSettings::Default => None,
            CursorCaptureSettings::WithCursor => Some(true),
            CursorCaptureSettings::WithoutCursor => Some(false),
        };
        if let Some(capture_cursor) = capture_cursor {
            if Self::is_property_present("IsCursorCaptureEnabled")? {
                session.SetIsCursorCaptureEnabled(capture_cursor)?;
            } else {
                warn!("Toggling cursor capture is not supported, keeping the platform default");
            }
        }

        let draw_border = match self.settings.draw_border {
            DrawBorderSettings::Default => None,
            DrawBorderSettings::WithBorder => Some(true),
            DrawBorderSettings::WithoutBorder => Some(false),
        };
        if let Some(draw_border) = draw_border {
            if Self::is_property_present("IsBorderRequired")? {
                session.SetIsBorderRequired(draw_border)?;
            } else {
                warn!("Toggling the capture border is not supported, keeping the platform default");
            }
        }

        Ok(())
    }

    /// Region Of The Captured Surface To Keep
    fn crop_box(&self, window: HWND, width: u32, height: u32) -> Result<D3D11_BOX, BackendError> {
        let full = D3D11_BOX { left: 0, top: 0, front: 0, right: width, bottom: height, back: 1 };
        if self.settings.area == CaptureArea::Window {
            return Ok(full);
        }

        // The captured surface starts at the extended frame bounds, shadows excluded.
        let mut frame = RECT::default();
        unsafe {
            DwmGetWindowAttribute(
                window,
                DWMWA_EXTENDED_FRAME_BOUNDS,
                (&raw mut frame).cast(),
                std::mem::size_of::<RECT>() as u32,
            )?;
        };

        let mut client = RECT::default();
        unsafe { GetClientRect(window, &mut client)? };

        let mut origin = POINT::default();
        if !unsafe { ClientToScreen(window, &mut origin) }.as_bool() {
            return Err(BackendError::Unsupported("client area is not on screen".to_owned()));
        }

        let left = u32::try_from(origin.x - frame.left).unwrap_or(0).min(width);
        let top = u32::try_from(origin.y - frame.top).unwrap_or(0).min(height);
        let right = left.saturating_add(u32::try_from(client.right).unwrap_or(0)).min(width);
        let bottom = top.saturating_add(u32::try_from(client.bottom).unwrap_or(0)).min(height);

        if right <= left || bottom <= top {
            return Err(BackendError::Unsupported("client area is empty".to_owned()));
        }

        Ok(D3D11_BOX { left, top, front: 0, right, bottom, back: 1 })
    }

    fn copy_frame(bound: &mut Bound, frame: &Direct3D11CaptureFrame) -> Result<(), BackendError> {
        let size = frame.ContentSize()?;
        let (width, height) = (u32::try_from(size.Width).unwrap_or(0), u32::try_from(size.Height).unwrap_or(0));
        if width < bound.crop.right || height < bound.crop.bottom {
            info!("Window shrank to {width}x{height}, capture resources are stale");
            return Err(BackendError::ResourceLost);
        }

        let surface = frame.Surface()?;
        let access = surface.cast::<IDirect3DDxgiInterfaceAccess>()?;
        let texture = unsafe { access.GetInterface::<ID3D11Texture2D>()? };

        unsafe {
            bound.d3d_device_context.CopySubresourceRegion(
                bound.staging.texture(),
                0,
                0,
                0,
                0,
                &texture,
                0,
                Some(&bound.crop),
            );
        }

        if !bound.staging.read_into(&bound.d3d_device_context, &mut bound.buffer)? {
            return Err(BackendError::ResourceLost);
        }

        Ok(())
    }
}

impl CaptureBackend for GraphicsCaptureBackend {
    fn bind(&mut self, window: WindowHandle) -> Result<(), BackendError> {
        self.release();

        let hwnd = HWND(window.as_raw() as usize as *mut _);
        if !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
            return Err(BackendError::WindowNotFound(window));
        }

        if !Self::is_supported()? {
            return Err(BackendError::Unsupported("Windows Graphics Capture is not available".to_owned()));
        }

        let (d3d_device, d3d_device_context): (ID3D11Device, ID3D11DeviceContext) = create_d3d_device()?;
        let direct3d_device = create_direct3d_device(&d3d_device)?;

        let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()?;
        let item: GraphicsCaptureItem = unsafe { interop.CreateForWindow(hwnd)? };

        let size = item.Size()?;
        let (width, height) = (u32::try_from(size.Width).unwrap_or(0), u32::try_from(size.Height).unwrap_or(0));
        if width == 0 || height == 0 {
            return Err(BackendError::Unsupported(format!("window {window} has no visible area")));
        }

        let crop = self.crop_box(hwnd, width, height)?;

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &direct3d_device,
            DirectXPixelFormat::R8G8B8A8UIntNormalized,
            2,
            size,
        )?;
        let session = frame_pool.CreateCaptureSession(&item)?;
        self.configure(&session)?;

        let staging = StagingTexture::new(
            &d3d_device,
            &d3d_device_context,
            crop.right - crop.left,
            crop.bottom - crop.top,
        )?;
        let geometry = Geometry::new(staging.width(), staging.height(), staging.row_pitch());

        session.StartCapture()?;

        trace!("Graphics capture started for {window}, staging {geometry}");

        self.bound = Some(Bound {
            window: hwnd,
            d3d_device_context,
            _direct3d_device: direct3d_device,
            _item: item,
            frame_pool,
            session,
            crop,
            buffer: vec![0; geometry.stride() * geometry.height() as usize],
            staging,
            geometry,
            has_frame: false,
        });

        Ok(())
    }

    fn geometry(&self) -> Geometry {
        self.bound.as_ref().map(|bound| bound.geometry).unwrap_or_default()
    }

    fn trigger_update(&mut self) -> Result<(), BackendError> {
        let timeout = self.settings.first_frame_timeout;
        let bound = self.bound.as_mut().ok_or(BackendError::NotBound)?;

        // A destroyed window stops producing frames, which would otherwise look like an unchanged one.
        ensure_alive(bound.window)?;

        let mut newest = None;
        let deadline = Instant::now() + timeout;
        loop {
            while let Ok(frame) = bound.frame_pool.TryGetNextFrame() {
                newest = Some(frame);
            }

            if newest.is_some() || bound.has_frame {
                break;
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Timeout);
            }

            thread::sleep(FIRST_FRAME_POLL);
        }

        // No new frame means the window did not change; the previous contents stay valid.
        if let Some(frame) = newest {
            Self::copy_frame(bound, &frame)?;
            bound.has_frame = true;
        }

        Ok(())
    }

    fn buffer(&self) -> &[u8] {
        match &self.bound {
            Some(bound) => &bound.buffer,
            None => &[],
        }
    }

    fn release(&mut self) {
        if let Some(bound) = self.bound.take() {
            if let Err(e) = bound.session.Close() {
                warn!("Failed to close the capture session: {e}");
            }
            if let Err(e) = bound.frame_pool.Close() {
                warn!("Failed to close the frame pool: {e}");
            }
        }
    }
}

impl Drop for GraphicsCaptureBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fails With [`BackendError::ResourceLost`] Once The Window Is Destroyed
fn ensure_alive(window: HWND) -> Result<(), BackendError> {
    if unsafe { IsWindow(Some(window)) }.as_bool() {
        Ok(())
    } else {
        info!("Window {:#x} was destroyed", window.0 as usize);
        Err(BackendError::ResourceLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Handle values are multiples of 4 and this one is never handed out.
    const STALE_WINDOW: u64 = 0x7fff_fff0;

    #[test]
    fn destroyed_window_is_lost() {
        let window = HWND(STALE_WINDOW as usize as *mut _);

        assert!(matches!(ensure_alive(window), Err(BackendError::ResourceLost)));
    }

    #[test]
    fn binding_a_destroyed_window_fails() {
        let mut backend = GraphicsCaptureBackend::new(Settings::default());

        let error = backend.bind(WindowHandle::new(STALE_WINDOW)).unwrap_err();

        assert!(matches!(error, BackendError::WindowNotFound(_)));
        assert!(backend.buffer().is_empty());
    }

    #[test]
    fn unbound_backend_is_inert() {
        let mut backend = GraphicsCaptureBackend::new(Settings::default());

        assert!(!backend.geometry().is_valid());
        assert!(matches!(backend.trigger_update(), Err(BackendError::NotBound)));
        backend.release();
    }
}
