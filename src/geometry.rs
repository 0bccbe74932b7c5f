use serde::{Deserialize, Serialize};

/// Default height of the host's stream control bar, in logical pixels.
pub const DEFAULT_CONTROL_BAR_HEIGHT: u32 = 40;

/// Range a reported scale factor is clamped into before it is applied.
const MIN_SCALE_FACTOR: f64 = 0.25;
const MAX_SCALE_FACTOR: f64 = 8.0;

/// Size of the host window's content area in logical pixels, plus the
/// pixel density of the display it currently sits on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostGeometry {
    pub content_width: u32,
    pub content_height: u32,
    pub scale_factor: f64,
}

impl Default for HostGeometry {
    fn default() -> Self {
        Self {
            content_width: 1280,
            content_height: 720,
            scale_factor: 1.0,
        }
    }
}

/// The host window the client surface is embedded into.
#[derive(Debug, Clone, PartialEq)]
pub struct HostWindow {
    /// Native window handle, passed through to the embedding helper as-is.
    pub handle: String,
    pub geometry: HostGeometry,
}

/// A rectangle in host coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Which pixel space the bounds should be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelSpace {
    /// Device pixels; native window reparenting needs these.
    Physical,
    /// CSS/logical pixels; browser surfaces use these.
    Logical,
}

/// Region the stream occupies: the content area minus the control bar.
///
/// The height never drops below one pixel so a collapsed host window
/// still yields a valid rectangle. Scale factors outside a sane display
/// range are clamped into it.
pub fn stream_bounds(geometry: &HostGeometry, control_bar_height: u32, space: PixelSpace) -> Bounds {
    let scale = match space {
        PixelSpace::Physical if geometry.scale_factor.is_finite() && geometry.scale_factor > 0.0 => {
            geometry.scale_factor.clamp(MIN_SCALE_FACTOR, MAX_SCALE_FACTOR)
        }
        _ => 1.0,
    };
    let bar = (control_bar_height as f64 * scale).round() as i64;
    let width = (geometry.content_width as f64 * scale).round() as i64;
    let height = ((geometry.content_height as f64 * scale).round() as i64 - bar).max(1);
    Bounds {
        x: 0,
        y: i32::try_from(bar).unwrap_or(i32::MAX),
        width: u32::try_from(width.max(0)).unwrap_or(u32::MAX),
        height: u32::try_from(height).unwrap_or(u32::MAX),
    }
}
