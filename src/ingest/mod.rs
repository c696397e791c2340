//! Frame capture.
//!
//! - `stub://name?width=&height=&fps=&frames=`: generated frames, no hardware.
//! - Stream URLs and device indices: GStreamer (feature: capture-gstreamer).
//!
//! A worker owns its capture exclusively and releases it on every exit path.

mod synthetic;
#[cfg(feature = "capture-gstreamer")]
mod gst_capture;

pub use synthetic::{SyntheticConfig, SyntheticSource};

use anyhow::{bail, Result};

use crate::camera::CameraSource;
use crate::frame::Frame;

/// A live frame stream.
pub trait CaptureSource: Send {
    /// Read the next frame.
    ///
    /// `Ok(None)` is an empty read (no frame ready). Both empty and failed
    /// reads count toward the worker's consecutive failure budget.
    fn read(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device or stream. Safe to call more than once.
    fn release(&mut self);
}

/// Opens captures for camera sources.
pub trait CaptureOpener: Send + Sync {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureSource>>;
}

/// Capture for a configured camera source.
///
/// Synthetic for `stub://` URLs, GStreamer for everything else when the
/// `capture-gstreamer` feature is enabled.
pub struct CameraCapture {
    backend: CaptureBackend,
    released: bool,
}

enum CaptureBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "capture-gstreamer")]
    Gstreamer(gst_capture::GstreamerSource),
}

impl CameraCapture {
    pub fn open(source: &CameraSource) -> Result<Self> {
        let backend = match source {
            CameraSource::Missing => bail!("camera has no source configured"),
            CameraSource::Stream(url) if url.starts_with("stub://") => {
                CaptureBackend::Synthetic(SyntheticSource::new(SyntheticConfig::from_url(url)?))
            }
            _ => {
                #[cfg(feature = "capture-gstreamer")]
                {
                    CaptureBackend::Gstreamer(gst_capture::GstreamerSource::open(source)?)
                }
                #[cfg(not(feature = "capture-gstreamer"))]
                {
                    bail!("capturing from {} requires the capture-gstreamer feature", source)
                }
            }
        };
        log::info!("capture opened: {}", source);
        Ok(Self {
            backend,
            released: false,
        })
    }
}

impl CaptureSource for CameraCapture {
    fn read(&mut self) -> Result<Option<Frame>> {
        if self.released {
            bail!("capture already released");
        }
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureBackend::Gstreamer(source) => source.release(),
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Default opener used by `countd`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceOpener;

impl CaptureOpener for SourceOpener {
    fn open(&self, source: &CameraSource) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(CameraCapture::open(source)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_sources_open_without_hardware() -> Result<()> {
        let mut capture =
            SourceOpener.open(&CameraSource::Stream("stub://dock?width=64&height=48&fps=0".into()))?;
        let frame = capture.read()?.expect("synthetic frame");
        assert_eq!((frame.width, frame.height), (64, 48));
        capture.release();
        assert!(capture.read().is_err());
        Ok(())
    }

    #[test]
    fn missing_source_is_rejected() {
        assert!(SourceOpener.open(&CameraSource::Missing).is_err());
    }

    #[cfg(not(feature = "capture-gstreamer"))]
    #[test]
    fn real_sources_need_gstreamer() {
        let err = SourceOpener.open(&CameraSource::Device(0)).err().expect("must fail");
        assert!(err.to_string().contains("capture-gstreamer"));
    }
}
