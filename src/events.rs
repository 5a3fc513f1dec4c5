use crate::types::{CameraIntrinsics, ImuSample, LighthouseModel, PulseEvent};
use crate::{Result, TrackdError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// A normalized sensor event handed to the fusion pipeline.
///
/// Events from different devices are not ordered relative to each other;
/// order them by their embedded timestamps.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    Pulse {
        device: Arc<str>,
        pulse: PulseEvent,
    },
    /// Sync marker from the lighthouse receiver. Not a spatial measurement.
    Vsync {
        device: Arc<str>,
        timestamp: u32,
    },
    Imu {
        device: Arc<str>,
        sequence: u8,
        samples: [ImuSample; 2],
    },
    CameraIntrinsics {
        device: Arc<str>,
        intrinsics: CameraIntrinsics,
    },
    LighthouseModel {
        device: Arc<str>,
        model: LighthouseModel,
    },
    /// The device's poll loop ended because the hardware went away.
    Disconnected {
        device: Arc<str>,
    },
}

impl TrackingEvent {
    pub fn device(&self) -> &str {
        match self {
            TrackingEvent::Pulse { device, .. }
            | TrackingEvent::Vsync { device, .. }
            | TrackingEvent::Imu { device, .. }
            | TrackingEvent::CameraIntrinsics { device, .. }
            | TrackingEvent::LighthouseModel { device, .. }
            | TrackingEvent::Disconnected { device } => device,
        }
    }
}

/// Create a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, EventStream) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    (EventSender { sender }, EventStream { receiver })
}

/// Producer half, cloned into every device thread.
///
/// Never blocks: when the consumer falls behind, events are dropped.
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<TrackingEvent>,
}

impl EventSender {
    /// Queue an event. Returns false once the consumer is gone.
    pub fn emit(&self, event: TrackingEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                log::trace!("Event channel full, dropping event");
                true
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Consumer half of the event channel.
pub struct EventStream {
    receiver: Receiver<TrackingEvent>,
}

impl EventStream {
    /// Receive the next event (blocks until available).
    pub fn recv(&self) -> Result<TrackingEvent> {
        self.receiver
            .recv()
            .map_err(|_| TrackdError::ChannelDisconnected)
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<TrackingEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<TrackingEvent> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => TrackdError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => TrackdError::ChannelDisconnected,
        })
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<TrackingEvent> {
        self.receiver.try_iter().collect()
    }
}
