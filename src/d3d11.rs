use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_9_1, D3D_FEATURE_LEVEL_9_2, D3D_FEATURE_LEVEL_9_3,
    D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_FLAG, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAP_READ,
    D3D11_MAPPED_SUBRESOURCE, D3D11_RESOURCE_MISC_FLAG, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_STAGING, D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;
use windows::core::Interface;

/// Used To Handle Direct3D Setup Errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to create a DirectX device with the recommended feature level")]
    FeatureLevelNotSatisfied,
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

impl From<Error> for crate::native::BackendError {
    fn from(value: Error) -> Self {
        match value {
            Error::FeatureLevelNotSatisfied => Self::Unsupported(value.to_string()),
            Error::WindowsError(e) => Self::WindowsError(e),
        }
    }
}

/// Create A Hardware ID3D11Device With Its Immediate Context
pub fn create_d3d_device() -> Result<(ID3D11Device, ID3D11DeviceContext), Error> {
    let feature_flags = [
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_10_0,
        D3D_FEATURE_LEVEL_9_3,
        D3D_FEATURE_LEVEL_9_2,
        D3D_FEATURE_LEVEL_9_1,
    ];

    let mut d3d_device = None;
    let mut feature_level = D3D_FEATURE_LEVEL::default();
    let mut d3d_device_context = None;
    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&feature_flags),
            D3D11_SDK_VERSION,
            Some(&mut d3d_device),
            Some(&mut feature_level),
            Some(&mut d3d_device_context),
        )?;
    };

    if feature_level.0 < D3D_FEATURE_LEVEL_11_0.0 {
        return Err(Error::FeatureLevelNotSatisfied);
    }

    match (d3d_device, d3d_device_context) {
        (Some(device), Some(context)) => Ok((device, context)),
        _ => Err(Error::FeatureLevelNotSatisfied),
    }
}

/// Wrap An ID3D11Device Into The WinRT IDirect3DDevice
pub fn create_direct3d_device(d3d_device: &ID3D11Device) -> Result<IDirect3DDevice, Error> {
    let dxgi_device: IDXGIDevice = d3d_device.cast()?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)? };
    let device: IDirect3DDevice = inspectable.cast()?;

    Ok(device)
}

/// CPU Readable RGBA8 Texture That Frames Are Copied Into
pub struct StagingTexture {
    texture: ID3D11Texture2D,
    width: u32,
    height: u32,
    row_pitch: usize,
}

impl StagingTexture {
    /// Create The Texture And Map It Once To Learn The Row Pitch
    pub fn new(device: &ID3D11Device, context: &ID3D11DeviceContext, width: u32, height: u32) -> Result<Self, Error> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: D3D11_BIND_FLAG(0).0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: D3D11_RESOURCE_MISC_FLAG(0).0 as u32,
        };

        let mut texture = None;
        unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture))? };
        let texture = texture.ok_or(Error::FeatureLevelNotSatisfied)?;

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { context.Map(&texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))? };
        let row_pitch = mapped.RowPitch as usize;
        unsafe { context.Unmap(&texture, 0) };

        Ok(Self { texture, width, height, row_pitch })
    }

    #[inline]
    #[must_use]
    pub const fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    #[must_use]
    pub const fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// Maps the texture and copies `height` rows of `row_pitch` bytes into `buffer`.
    ///
    /// Returns `false` without touching `buffer` when the driver reports a different row pitch
    /// than the one measured at creation.
    pub fn read_into(&self, context: &ID3D11DeviceContext, buffer: &mut [u8]) -> Result<bool, Error> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { context.Map(&self.texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))? };

        let same_layout = mapped.RowPitch as usize == self.row_pitch;
        if same_layout {
            let len = self.row_pitch * self.height as usize;
            // SAFETY: A mapped staging texture exposes `Height * RowPitch` readable bytes until
            // `Unmap` below.
            let mapped_data = unsafe { std::slice::from_raw_parts(mapped.pData.cast::<u8>(), len) };
            buffer[..len].copy_from_slice(mapped_data);
        }

        unsafe { context.Unmap(&self.texture, 0) };

        Ok(same_layout)
    }
}
