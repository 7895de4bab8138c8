//! Device hot-plug monitoring
//!
//! Bridges the system's camera and interface change handlers into an async
//! event channel, so callers can consume arrival and removal events from a
//! tokio task instead of a native callback thread.

use crate::camera::CameraEvent;
use crate::interface::InterfaceEvent;
use crate::system::{CameraChangeHandler, InterfaceChangeHandler, System};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Camera,
    Interface,
}

/// Device event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(DeviceKind, String),
    Disconnected(DeviceKind, String),
    /// Reachability or permitted access modes changed
    Changed(DeviceKind, String),
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Connected(_, id)
            | DeviceEvent::Disconnected(_, id)
            | DeviceEvent::Changed(_, id) => id,
        }
    }

    fn from_camera(id: &str, event: CameraEvent) -> Self {
        let id = id.to_string();
        match event {
            CameraEvent::Detected => DeviceEvent::Connected(DeviceKind::Camera, id),
            CameraEvent::Missing => DeviceEvent::Disconnected(DeviceKind::Camera, id),
            CameraEvent::Reachable | CameraEvent::Unreachable => {
                DeviceEvent::Changed(DeviceKind::Camera, id)
            }
        }
    }

    fn from_interface(id: &str, event: InterfaceEvent) -> Self {
        let id = id.to_string();
        match event {
            InterfaceEvent::Detected => DeviceEvent::Connected(DeviceKind::Interface, id),
            InterfaceEvent::Missing => DeviceEvent::Disconnected(DeviceKind::Interface, id),
            InterfaceEvent::Reachable | InterfaceEvent::Unreachable => {
                DeviceEvent::Changed(DeviceKind::Interface, id)
            }
        }
    }
}

struct Subscription {
    system: Weak<System>,
    cameras: CameraChangeHandler,
    interfaces: InterfaceChangeHandler,
}

/// Device monitor for detecting camera and interface changes
pub struct DeviceMonitor {
    event_sender: mpsc::UnboundedSender<DeviceEvent>,
    event_receiver: RwLock<mpsc::UnboundedReceiver<DeviceEvent>>,
    subscription: Mutex<Option<Subscription>>,
}

impl DeviceMonitor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            event_sender: tx,
            event_receiver: RwLock::new(rx),
            subscription: Mutex::new(None),
        }
    }

    /// Start forwarding device events of `system`. Starting twice is a no-op.
    pub fn start(&self, system: &Arc<System>) {
        let mut subscription = self.subscription.lock().unwrap_or_else(PoisonError::into_inner);
        if subscription.is_some() {
            return;
        }

        log::info!("Starting device monitoring");

        let tx = self.event_sender.clone();
        let cameras = CameraChangeHandler::new(move |camera, event| {
            log::info!("Camera {:?}: {}", event, camera.get_id());
            let _ = tx.send(DeviceEvent::from_camera(camera.get_id(), event));
        });

        let tx = self.event_sender.clone();
        let interfaces = InterfaceChangeHandler::new(move |interface, event| {
            log::info!("Interface {:?}: {}", event, interface.get_id());
            let _ = tx.send(DeviceEvent::from_interface(interface.get_id(), event));
        });

        system.register_camera_change_handler(&cameras);
        system.register_interface_change_handler(&interfaces);

        *subscription = Some(Subscription {
            system: Arc::downgrade(system),
            cameras,
            interfaces,
        });
    }

    pub fn stop(&self) {
        let Some(subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        log::info!("Stopping device monitoring");
        if let Some(system) = subscription.system.upgrade() {
            system.unregister_camera_change_handler(&subscription.cameras);
            system.unregister_interface_change_handler(&subscription.interfaces);
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Get next device event (non-blocking)
    pub async fn poll_event(&self) -> Option<DeviceEvent> {
        let mut rx = self.event_receiver.write().await;
        rx.try_recv().ok()
    }

    /// Wait for next device event
    pub async fn wait_for_event(&self) -> Option<DeviceEvent> {
        let mut rx = self.event_receiver.write().await;
        rx.recv().await
    }

    /// Wait for the next device event, giving up after `timeout`
    pub async fn wait_for_event_timeout(&self, timeout: Duration) -> Option<DeviceEvent> {
        tokio::time::timeout(timeout, self.wait_for_event())
            .await
            .ok()
            .flatten()
    }
}

impl Default for DeviceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_event_mapping() {
        assert_eq!(
            DeviceEvent::from_camera("DEV_1", CameraEvent::Detected),
            DeviceEvent::Connected(DeviceKind::Camera, "DEV_1".to_string())
        );
        assert_eq!(
            DeviceEvent::from_interface("IF_1", InterfaceEvent::Missing),
            DeviceEvent::Disconnected(DeviceKind::Interface, "IF_1".to_string())
        );
        assert_eq!(
            DeviceEvent::from_camera("DEV_1", CameraEvent::Unreachable).device_id(),
            "DEV_1"
        );
    }

    #[tokio::test]
    async fn test_poll_on_idle_monitor_is_empty() {
        let monitor = DeviceMonitor::new();
        assert!(!monitor.is_monitoring());
        assert_eq!(monitor.poll_event().await, None);
        monitor.stop();
    }
}
