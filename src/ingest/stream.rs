//! Producer-thread video stream with a latest-frame slot.
//!
//! One background thread per camera session grabs frames as fast as the
//! device delivers them and swaps each into a shared slot as an
//! `Arc<Frame>`. The consumer clones the `Arc` out of the slot without
//! ever blocking on capture. Single writer, single reader; the slot is
//! the only cross-thread resource.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;

use super::{FrameRead, FrameSource};
use crate::frame::Frame;

/// A camera that can be polled for frames from the producer thread.
pub trait CameraDevice: Send + 'static {
    /// Block until the device delivers the next frame.
    fn grab(&mut self) -> Result<Frame>;

    /// Human-readable device description for logs.
    fn describe(&self) -> String;
}

pub struct VideoStream {
    device: Option<Box<dyn CameraDevice>>,
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    description: String,
}

impl VideoStream {
    pub fn new(device: impl CameraDevice) -> Self {
        let description = device.describe();
        Self {
            device: Some(Box::new(device)),
            slot: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
            handle: None,
            description,
        }
    }
}

impl FrameSource for VideoStream {
    fn start(&mut self) -> Result<()> {
        let Some(mut device) = self.device.take() else {
            return Ok(());
        };
        let slot = Arc::clone(&self.slot);
        let stopped = Arc::clone(&self.stopped);
        log::info!("video stream starting: {}", self.description);

        self.handle = Some(std::thread::spawn(move || {
            while !stopped.load(Ordering::Relaxed) {
                match device.grab() {
                    Ok(frame) => {
                        if let Ok(mut guard) = slot.lock() {
                            *guard = Some(Arc::new(frame));
                        }
                    }
                    Err(e) => {
                        log::warn!("frame grab failed: {}", e);
                        std::thread::sleep(Duration::from_millis(50));
                    }
                }
            }
        }));
        Ok(())
    }

    fn read(&mut self) -> FrameRead {
        match self.slot.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(frame) => FrameRead::Frame(Arc::clone(frame)),
                None => FrameRead::Unavailable,
            },
            Err(_) => FrameRead::Unavailable,
        }
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("video stream thread panicked during shutdown");
            }
        }
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        self.stop();
    }
}
