use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::{sync::mpsc, task::JoinHandle, time::Duration};

use crate::{config::PlatformCapabilities, error::Error, local_track::LocalTrack};

/// Delay between disabling the camera and releasing the device.
pub const CAMERA_STOP_DELAY: Duration = Duration::from_secs(5);

/// Access to capture devices, used to re-acquire a camera that was stopped while disabled.
#[async_trait]
pub trait MediaDevices: Send + Sync + std::fmt::Debug {
    async fn acquire_camera(&self) -> Result<Arc<LocalTrack>, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureAction {
    /// Only the `enabled` flag changed.
    Toggled,
    /// The device is released after [`CAMERA_STOP_DELAY`] unless re-enabled first.
    StopScheduled,
    /// The track was stopped earlier and a fresh one must be acquired.
    Reacquire,
}

/// Camera enable/disable handling shared by both managers.
#[derive(Debug)]
pub(crate) struct CaptureController {
    capabilities: PlatformCapabilities,
    devices: Arc<dyn MediaDevices>,
    stop_timer: Option<JoinHandle<()>>,
}

impl CaptureController {
    pub fn new(capabilities: PlatformCapabilities, devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            capabilities,
            devices,
            stop_timer: None,
        }
    }

    /// Applies `enabled` to the camera track. When the platform keeps the device busy on
    /// disable, `on_stop` is delivered to `notify` after [`CAMERA_STOP_DELAY`].
    pub fn set_video_enabled<E: Send + 'static>(
        &mut self,
        track: &LocalTrack,
        enabled: bool,
        notify: mpsc::UnboundedSender<E>,
        on_stop: E,
    ) -> CaptureAction {
        track.set_enabled(enabled);
        self.cancel();

        if !self.capabilities.stops_capture_on_disable {
            return CaptureAction::Toggled;
        }

        if enabled {
            if track.is_stopped() {
                return CaptureAction::Reacquire;
            }
            return CaptureAction::Toggled;
        }

        self.stop_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(CAMERA_STOP_DELAY).await;
            let _ = notify.send(on_stop);
        }));
        CaptureAction::StopScheduled
    }

    /// Stops the camera if it is still disabled. Returns whether it was stopped now.
    pub fn stop_if_disabled(&mut self, track: &LocalTrack) -> bool {
        self.stop_timer = None;
        if track.enabled() || track.is_stopped() {
            return false;
        }
        track.stop();
        true
    }

    /// Asks the devices for a fresh camera. The future does not borrow the controller, so it can
    /// be awaited with the manager state unlocked.
    pub fn reacquire(&self) -> BoxFuture<'static, Result<Arc<LocalTrack>, Error>> {
        let devices = self.devices.clone();
        Box::pin(async move { devices.acquire_camera().await })
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
    }
}

/// Whether a camera acquired to replace `stopped` is still needed: `stopped` is still the
/// camera track and nobody disabled it meanwhile.
pub(crate) fn reacquired_camera_wanted(current: Option<&LocalTrack>, stopped: &LocalTrack) -> bool {
    current.is_some_and(|track| track.id == stopped.id && track.enabled())
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.cancel();
    }
}
