//! V4L2 camera device.
//!
//! Backs both the Pi camera module (exposed through the bcm2835 V4L2
//! driver) and generic USB webcams. The device is opened and configured
//! once; frames are pulled from a memory-mapped buffer stream by the
//! producer thread.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::stream::CameraDevice;
use crate::config::CameraSettings;
use crate::frame::Frame;

pub struct V4l2Camera {
    settings: CameraSettings,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings) -> Result<Self> {
        Ok(Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.device)
            .with_context(|| format!("open v4l2 device {}", self.settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"BGR3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "failed to set format on {}: {}",
                    self.settings.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.settings.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", self.settings.device, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "connected to {} ({}x{})",
            self.settings.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }
}

impl CameraDevice for V4l2Camera {
    fn grab(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        if self.state.is_none() {
            self.connect()?;
        }
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let grabbed = state
            .with_mut(|fields| fields.stream.next())
            .map(|(buf, _meta)| buf.to_vec())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"));

        match grabbed {
            Ok(buf) => Ok(Frame::new(buf, self.active_width, self.active_height)),
            Err(err) => {
                // Force a reconnect on the next grab.
                self.state = None;
                Err(err)
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{} @ {} fps, {})",
            self.settings.device,
            self.settings.width,
            self.settings.height,
            self.settings.fps,
            self.settings.backend.label()
        )
    }
}
