//! X11 capture through the Composite extension.
//!
//! Binding redirects the target window into off-screen storage, then every update names a fresh
//! pixmap for the window's backing store and reads it back with `GetImage` in `ZPixmap` format.
//! Rows of that image are padded to the scanline pad of the pixmap format, which is where a
//! stride larger than `width * 4` comes from.
use log::{info, trace, warn};
use rayon::iter::{IndexedParallelIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;
use x11rb::NONE;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::ReplyError;
use x11rb::protocol::composite::{self, ConnectionExt as _, Redirect};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, ImageFormat, ImageOrder, MapState, Pixmap, Window};
use x11rb::rust_connection::RustConnection;

use crate::native::{BYTES_PER_PIXEL, BackendError, CaptureBackend, Geometry, RawWindow, WindowHandle, WindowSource};
use crate::settings::{CaptureArea, Settings};

struct Bound {
    conn: RustConnection,
    window: Window,
    width: u16,
    height: u16,
    geometry: Geometry,
    image_order: ImageOrder,
    buffer: Vec<u8>,
}

/// Captures one X11 window. Opens its own display connection on bind and closes it on release.
///
/// With [`CaptureArea::Window`] the window manager frame announced through
/// `_NET_WM_FRAME_WINDOW` is captured instead of the client window when there is one.
pub struct X11Backend {
    settings: Settings,
    bound: Option<Bound>,
}

impl X11Backend {
    /// Creates an unbound backend.
    #[inline]
    #[must_use]
    pub const fn new(settings: Settings) -> Self {
        Self { settings, bound: None }
    }

    /// Gets the settings the backend was created with.
    #[inline]
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl CaptureBackend for X11Backend {
    fn bind(&mut self, window: WindowHandle) -> Result<(), BackendError> {
        self.release();

        let requested = Window::try_from(window.as_raw()).map_err(|_| BackendError::WindowNotFound(window))?;
        let (conn, _) = x11rb::connect(None)?;

        if conn.extension_information(composite::X11_EXTENSION_NAME)?.is_none() {
            return Err(BackendError::Unsupported("the X server has no Composite extension".to_owned()));
        }
        conn.composite_query_version(0, 4)?.reply()?;

        let target = match self.settings.area {
            CaptureArea::Window => on_window(frame_window(&conn, requested), window)?,
            CaptureArea::Client => requested,
        };

        let attributes = on_window(conn.get_window_attributes(target)?.reply(), window)?;
        if attributes.map_state != MapState::VIEWABLE {
            return Err(BackendError::Unsupported(format!("window {window} is not viewable")));
        }

        let drawable = on_window(conn.get_geometry(target)?.reply(), window)?;
        let format = conn
            .setup()
            .pixmap_formats
            .iter()
            .find(|format| format.depth == drawable.depth)
            .ok_or_else(|| BackendError::Unsupported(format!("no pixmap format for depth {}", drawable.depth)))?;
        let stride = stride_for(drawable.width, format.bits_per_pixel, format.scanline_pad).ok_or_else(|| {
            BackendError::Unsupported(format!("{} bits per pixel at depth {}", format.bits_per_pixel, drawable.depth))
        })?;
        let image_order = conn.setup().image_byte_order;

        conn.composite_redirect_window(target, Redirect::AUTOMATIC)?.ignore_error();
        conn.flush()?;

        let geometry = Geometry::new(u32::from(drawable.width), u32::from(drawable.height), stride);
        info!("Bound X11 window {target:#x} ({geometry})");

        self.bound = Some(Bound {
            conn,
            window: target,
            width: drawable.width,
            height: drawable.height,
            geometry,
            image_order,
            buffer: Vec::new(),
        });

        Ok(())
    }

    fn geometry(&self) -> Geometry {
        self.bound.as_ref().map_or_else(Geometry::default, |bound| bound.geometry)
    }

    fn trigger_update(&mut self) -> Result<(), BackendError> {
        let bound = self.bound.as_mut().ok_or(BackendError::NotBound)?;

        let pixmap: Pixmap = bound.conn.generate_id()?;
        on_capture(bound.conn.composite_name_window_pixmap(bound.window, pixmap)?.check())?;

        let image = bound
            .conn
            .get_image(ImageFormat::Z_PIXMAP, pixmap, 0, 0, bound.width, bound.height, !0)?
            .reply();
        bound.conn.free_pixmap(pixmap)?.ignore_error();
        let image = on_capture(image)?;

        if image.data.len() < bound.geometry.min_buffer_len() {
            warn!(
                "GetImage returned {} bytes, expected at least {}",
                image.data.len(),
                bound.geometry.min_buffer_len()
            );
            return Err(BackendError::ResourceLost);
        }

        bound.buffer = image.data;
        to_rgbx(&mut bound.buffer, bound.geometry, bound.image_order);

        Ok(())
    }

    fn buffer(&self) -> &[u8] {
        match &self.bound {
            Some(bound) => &bound.buffer,
            None => &[],
        }
    }

    fn release(&mut self) {
        let Some(bound) = self.bound.take() else {
            return;
        };

        if let Ok(cookie) = bound.conn.composite_unredirect_window(bound.window, Redirect::AUTOMATIC) {
            cookie.ignore_error();
        }
        if let Err(e) = bound.conn.flush() {
            warn!("Failed to flush the X11 connection on release: {e}");
        }

        trace!("Released X11 window {:#x}", bound.window);
    }
}

impl Drop for X11Backend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open, viewable client windows listed by the window manager, bottom to top.
#[derive(Clone, Copy, Default, Debug)]
pub struct X11WindowSource;

impl WindowSource for X11WindowSource {
    type Listing = Vec<RawWindow>;

    fn enumerate(&self) -> Result<Self::Listing, BackendError> {
        let (conn, screen) = x11rb::connect(None)?;
        let root = conn
            .setup()
            .roots
            .get(screen)
            .map(|screen| screen.root)
            .ok_or_else(|| BackendError::Unsupported(format!("screen {screen} does not exist")))?;

        let clients = client_list(&conn, root)?;
        let net_wm_name = conn.intern_atom(true, b"_NET_WM_NAME")?.reply()?.atom;
        let utf8_string = conn.intern_atom(true, b"UTF8_STRING")?.reply()?.atom;

        let mut windows = Vec::with_capacity(clients.len());
        for client in clients {
            match describe(&conn, client, net_wm_name, utf8_string) {
                Ok(Some(title)) => windows.push(RawWindow::new(WindowHandle::new(u64::from(client)), title)),
                Ok(None) => (),
                // Windows can vanish between listing and inspection.
                Err(ReplyError::X11Error(e)) => trace!("Skipping window {client:#x}: {e:?}"),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(windows)
    }

    fn entries<'a>(&self, listing: &'a Self::Listing) -> &'a [RawWindow] {
        listing
    }

    fn release(&self, listing: Self::Listing) {
        drop(listing);
    }
}

/// Maps protocol errors on a window to [`BackendError::WindowNotFound`].
fn on_window<T>(result: Result<T, ReplyError>, window: WindowHandle) -> Result<T, BackendError> {
    match result {
        Err(ReplyError::X11Error(_)) => Err(BackendError::WindowNotFound(window)),
        other => Ok(other?),
    }
}

/// Maps protocol errors during a capture to [`BackendError::ResourceLost`].
fn on_capture<T>(result: Result<T, ReplyError>) -> Result<T, BackendError> {
    match result {
        Err(ReplyError::X11Error(_)) => Err(BackendError::ResourceLost),
        other => Ok(other?),
    }
}

/// The frame window reparenting window managers announce for `window`, or `window` itself.
fn frame_window(conn: &RustConnection, window: Window) -> Result<Window, ReplyError> {
    let atom = conn.intern_atom(true, b"_NET_WM_FRAME_WINDOW")?.reply()?.atom;
    if atom == NONE {
        return Ok(window);
    }

    let reply = conn.get_property(false, window, atom, AtomEnum::WINDOW, 0, 1)?.reply()?;

    Ok(frame_or_client(window, reply.value32().and_then(|mut values| values.next())))
}

/// The announced frame, unless it is missing or `None`.
fn frame_or_client(client: Window, announced: Option<Window>) -> Window {
    announced.filter(|&frame| frame != NONE).unwrap_or(client)
}

/// Client windows from `_NET_CLIENT_LIST_STACKING`, falling back to `_NET_CLIENT_LIST`.
fn client_list(conn: &RustConnection, root: Window) -> Result<Vec<Window>, BackendError> {
    for name in [&b"_NET_CLIENT_LIST_STACKING"[..], &b"_NET_CLIENT_LIST"[..]] {
        let atom = conn.intern_atom(true, name)?.reply()?.atom;
        if atom == NONE {
            continue;
        }

        let reply = conn.get_property(false, root, atom, AtomEnum::WINDOW, 0, u32::MAX)?.reply()?;
        if reply.type_ == NONE {
            continue;
        }

        return match reply.value32() {
            Some(values) => Ok(values.collect()),
            None => Err(BackendError::Unsupported(format!("malformed {} property", String::from_utf8_lossy(name)))),
        };
    }

    Err(BackendError::Unsupported("the window manager does not publish a client list".to_owned()))
}

/// Raw title of a viewable window, `None` for unmapped windows and windows without a name.
fn describe(
    conn: &RustConnection,
    window: Window,
    net_wm_name: Atom,
    utf8_string: Atom,
) -> Result<Option<Vec<u8>>, ReplyError> {
    let attributes = conn.get_window_attributes(window)?.reply()?;
    if attributes.map_state != MapState::VIEWABLE {
        return Ok(None);
    }

    for (property, type_) in [(net_wm_name, utf8_string), (Atom::from(AtomEnum::WM_NAME), Atom::from(AtomEnum::ANY))] {
        if property == NONE {
            continue;
        }

        let reply = conn.get_property(false, window, property, type_, 0, u32::MAX)?.reply()?;
        if reply.type_ != NONE {
            return Ok(Some(reply.value));
        }
    }

    Ok(None)
}

/// Bytes per `ZPixmap` row, or `None` for formats that are not 4 bytes per pixel.
fn stride_for(width: u16, bits_per_pixel: u8, scanline_pad: u8) -> Option<usize> {
    if usize::from(bits_per_pixel) != BYTES_PER_PIXEL * 8 || scanline_pad == 0 || scanline_pad % 8 != 0 {
        return None;
    }

    let pad = usize::from(scanline_pad);
    let bits = usize::from(width) * usize::from(bits_per_pixel);

    Some(bits.div_ceil(pad) * pad / 8)
}

/// Reorders 32 bit `ZPixmap` pixels into R, G, B, X byte order. Row padding is left untouched.
fn to_rgbx(buffer: &mut [u8], geometry: Geometry, order: ImageOrder) {
    let row_len = geometry.row_len();
    let lsb_first = order == ImageOrder::LSB_FIRST;

    buffer.par_chunks_mut(geometry.stride()).take(geometry.height() as usize).for_each(|row| {
        for pixel in row[..row_len].chunks_exact_mut(BYTES_PER_PIXEL) {
            if lsb_first {
                // B, G, R, X
                pixel.swap(0, 2);
            } else {
                // X, R, G, B
                pixel.rotate_left(1);
            }
        }
    });
}
