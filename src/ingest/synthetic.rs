use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};
use url::Url;

use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 10;

/// Parameters of a `stub://` source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Pacing rate; 0 yields frames as fast as they are read.
    pub fps: u32,
    /// Stop producing frames after this many; later reads are empty.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            frame_limit: None,
        }
    }
}

impl SyntheticConfig {
    /// Parse `stub://name?width=W&height=H&fps=F&frames=N`. All query keys are optional.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).context("parse stub url")?;
        if url.scheme() != "stub" {
            return Err(anyhow!("not a stub:// url: {}", raw));
        }
        let mut config = SyntheticConfig {
            name: url.host_str().unwrap_or("synthetic").to_string(),
            ..Default::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => config.width = parse_param(&key, &value)?,
                "height" => config.height = parse_param(&key, &value)?,
                "fps" => config.fps = parse_param(&key, &value)?,
                "frames" => config.frame_limit = Some(parse_param(&key, &value)?),
                other => log::warn!("stub://{}: ignoring unknown parameter '{}'", config.name, other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub://{}: frame size must be non-zero", config.name));
        }
        Ok(config)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid value '{}' for stub parameter '{}'", value, key))
}

/// Generated frames with a slowly shifting gradient, paced to `fps`.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::debug!(
            "synthetic source {} at {}x{} {} fps",
            config.name,
            config.width,
            config.height,
            config.fps
        );
        Self {
            config,
            frame_count: 0,
            next_due: None,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.pace();

        let pixels = self.generate_pixels();
        let frame = Frame::new(pixels, self.config.width, self.config.height, self.frame_count)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    pub(super) fn release(&mut self) {
        log::debug!(
            "synthetic source {} released after {} frames",
            self.config.name,
            self.frame_count
        );
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.fps;
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(self.next_due.unwrap_or(now).max(now) + interval);
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let len = width * self.config.height as usize * 3;
        let shift = (self.frame_count % 256) as usize;
        let mut pixels = vec![0u8; len];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = (y % 256) as u8;
            px[2] = 64;
        }
        pixels
    }
}
