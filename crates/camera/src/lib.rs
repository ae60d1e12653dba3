//! V4L2 capture feeding the MJPEG endpoint.
//!
//! The device is negotiated once at startup; the chosen resolution and frame
//! rate never change afterwards. Devices that can emit MJPG frames are passed
//! through untouched, anything else is captured as RGB24 and encoded here.

use std::fmt;
use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use log::*;
use rscam::{IntervalInfo, ResolutionInfo};
use tokio::sync::watch;
use tokio::task::spawn_blocking;

const MJPG: &[u8] = b"MJPG";
const RGB3: &[u8] = b"RGB3";

const MAX_WIDTH: u32 = 1920;
const MAX_HEIGHT: u32 = 1080;
const PREFERRED_FPS: u32 = 30;
const JPEG_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Camera resolution: {}x{}, frame rate: {} fps",
            self.width, self.height, self.fps
        )
    }
}

pub struct Camera {
    device: rscam::Camera,
    info: CameraInfo,
    passthrough: bool,
}

impl Camera {
    /// Open and start the device, negotiating format, resolution and frame
    /// rate against what it reports.
    pub fn open(path: &str) -> Result<Self> {
        let mut device =
            rscam::new(path).with_context(|| format!("opening camera {path}"))?;

        let passthrough = supports_format(&device, MJPG);
        let format = if passthrough { MJPG } else { RGB3 };
        let (width, height) = pick_resolution(&device, format)?;
        let fps = pick_fps(&device, format, (width, height))?;

        device
            .start(&rscam::Config {
                interval: (1, fps),
                resolution: (width, height),
                format,
                ..Default::default()
            })
            .map_err(|e| anyhow!("starting capture on {path}: {e:?}"))?;

        let info = CameraInfo { width, height, fps };
        info!("camera {path}: {info} (mjpg passthrough: {passthrough})");
        Ok(Self {
            device,
            info,
            passthrough,
        })
    }

    pub fn info(&self) -> CameraInfo {
        self.info
    }
}

fn supports_format(device: &rscam::Camera, fourcc: &[u8]) -> bool {
    device
        .formats()
        .filter_map(|f| f.ok())
        .any(|f| &f.format[..] == fourcc)
}

/// Largest resolution the device reports, capped at 1920x1080.
fn pick_resolution(device: &rscam::Camera, format: &[u8]) -> Result<(u32, u32)> {
    let info = device
        .resolutions(format)
        .map_err(|e| anyhow!("querying resolutions: {e:?}"))?;
    match info {
        ResolutionInfo::Discretes(list) => list
            .into_iter()
            .filter(|&(w, h)| w <= MAX_WIDTH && h <= MAX_HEIGHT)
            .max_by_key(|&(w, h)| w * h)
            .ok_or_else(|| anyhow!("device reports no usable resolution")),
        ResolutionInfo::Stepwise { max, .. } => {
            Ok((max.0.min(MAX_WIDTH), max.1.min(MAX_HEIGHT)))
        }
    }
}

/// 30 fps when offered, otherwise the fastest rate the device reports.
fn pick_fps(device: &rscam::Camera, format: &[u8], resolution: (u32, u32)) -> Result<u32> {
    let info = device
        .intervals(format, resolution)
        .map_err(|e| anyhow!("querying frame intervals: {e:?}"))?;
    let rates: Vec<u32> = match info {
        // An interval of (1, 30) is 30 frames per second.
        IntervalInfo::Discretes(list) => list
            .into_iter()
            .map(|(num, den)| den / num.max(1))
            .collect(),
        IntervalInfo::Stepwise { min, .. } => vec![min.1 / min.0.max(1)],
    };
    if rates.iter().any(|&r| r == PREFERRED_FPS) {
        return Ok(PREFERRED_FPS);
    }
    rates
        .into_iter()
        .max()
        .ok_or_else(|| anyhow!("device reports no frame interval"))
}

/// Capture frames forever, publishing each JPEG as the latest value.
///
/// A capture failure ends the task; open `/video_feed` responses then finish
/// once the sender is dropped.
pub async fn run_camera(camera: Camera, frame_tx: watch::Sender<Vec<u8>>) -> Result<()> {
    spawn_blocking(move || {
        let Camera {
            device,
            info,
            passthrough,
        } = camera;
        loop {
            let frame = device.capture().context("camera capture failed")?;
            let jpeg = if passthrough {
                frame.to_vec()
            } else {
                encode_jpeg(&frame, info.width, info.height)?
            };
            if frame_tx.send(jpeg).is_err() {
                return Ok(());
            }
        }
    })
    .await?
}

fn encode_jpeg(raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let img = RgbImage::from_raw(width, height, raw.to_vec()).ok_or_else(|| {
        anyhow!("frame size mismatch: {} bytes for {width}x{height}", raw.len())
    })?;
    let mut buf = Vec::new();
    img.write_to(
        &mut Cursor::new(&mut buf),
        image::ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_renders_as_banner_text() {
        let info = CameraInfo {
            width: 1920,
            height: 1080,
            fps: 30,
        };
        assert_eq!(
            info.to_string(),
            "Camera resolution: 1920x1080, frame rate: 30 fps"
        );
    }

    #[test]
    fn rgb_frames_encode_to_jpeg() {
        let raw = vec![0u8; 16 * 16 * 3];
        let jpeg = encode_jpeg(&raw, 16, 16).unwrap();
        // JPEG start-of-image marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn truncated_rgb_frame_is_rejected() {
        let raw = vec![0u8; 10];
        assert!(encode_jpeg(&raw, 16, 16).is_err());
    }
}
