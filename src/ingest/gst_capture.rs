use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;
use url::Url;

use crate::camera::CameraSource;
use crate::frame::Frame;

const PULL_TIMEOUT: Duration = Duration::from_millis(500);

/// GStreamer decode pipeline ending in an RGB appsink.
pub(super) struct GstreamerSource {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    description: String,
}

impl GstreamerSource {
    pub(super) fn open(source: &CameraSource) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let head = pipeline_head(source)?;
        let pipeline_description = format!(
            "{} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            head
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start capture pipeline for {}", source))?;

        Ok(Self {
            pipeline,
            appsink,
            frame_count: 0,
            description: source.to_string(),
        })
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.check_bus()?;

        let Some(sample) = self.appsink.try_pull_sample(gstreamer::ClockTime::from_mseconds(
            PULL_TIMEOUT.as_millis() as u64,
        )) else {
            return Ok(None);
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        let frame = Frame::new(pixels, width, height, self.frame_count)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    pub(super) fn release(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop capture pipeline for {}: {}", self.description, e);
        }
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Err(anyhow!("end of stream")),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Source elements up to decoded raw video.
fn pipeline_head(source: &CameraSource) -> Result<String> {
    match source {
        CameraSource::Device(index) => Ok(device_element(*index)),
        CameraSource::Stream(location) => match Url::parse(location) {
            Ok(url) if url.scheme() == "rtsp" || url.scheme() == "rtsps" => Ok(format!(
                "rtspsrc location=\"{}\" latency=0 ! decodebin",
                location
            )),
            Ok(_) => Ok(format!("uridecodebin uri=\"{}\"", location)),
            Err(_) => Ok(format!("filesrc location=\"{}\" ! decodebin", location)),
        },
        CameraSource::Missing => Err(anyhow!("camera has no source configured")),
    }
}

fn device_element(index: u32) -> String {
    if cfg!(target_os = "linux") {
        format!("v4l2src device=/dev/video{}", index)
    } else if cfg!(target_os = "windows") {
        format!("ksvideosrc device-index={}", index)
    } else {
        format!("avfvideosrc device-index={}", index)
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data.get(..len).context("sample buffer is truncated")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("sample buffer row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
