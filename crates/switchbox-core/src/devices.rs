//! Device service — USB hotplug monitoring (Linux only).
//!
//! Polls `/dev/bus/usb` every 5 seconds, diffs the known device set, and
//! publishes a synthetic inbound message for each add/remove so the agent
//! can react to hardware events the same way it reacts to chat messages.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

use crate::bus::queue::MessageBus;
use crate::bus::types::InboundMessage;

const USB_POLL_INTERVAL: Duration = Duration::from_secs(5);
const USB_BUS_PATH: &str = "/dev/bus/usb";

/// Monitors hardware events and feeds them into the message bus as
/// synthetic inbound messages addressed to the most recently active chat.
pub struct DeviceService {
    enabled: bool,
    monitor_usb: bool,
    bus: Arc<MessageBus>,
    last_destination: Mutex<(String, String)>,
    shutdown: Arc<Notify>,
}

impl DeviceService {
    pub fn new(bus: Arc<MessageBus>, enabled: bool, monitor_usb: bool) -> Self {
        Self {
            enabled,
            monitor_usb,
            bus,
            last_destination: Mutex::new((String::new(), String::new())),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Update the destination device events are delivered to. Mirrors
    /// `HeartbeatService::set_last_destination`.
    pub fn set_last_destination(&self, channel: impl Into<String>, chat_id: impl Into<String>) {
        let mut dest = self.last_destination.lock().unwrap();
        *dest = (channel.into(), chat_id.into());
    }

    /// Start monitoring. Returns immediately (no-op) unless enabled, on
    /// Linux, and `monitor_usb` is set.
    pub async fn start(&self) {
        if !self.enabled {
            return;
        }
        if !cfg!(target_os = "linux") {
            info!("device monitoring is only supported on Linux");
            return;
        }
        if !self.monitor_usb {
            return;
        }

        info!("device service started (USB monitoring enabled)");
        let mut known = scan_usb_devices();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(USB_POLL_INTERVAL) => {
                    let current = scan_usb_devices();

                    for added in current.difference(&known) {
                        self.notify(&format!("USB device connected: {added}")).await;
                    }
                    for removed in known.difference(&current) {
                        self.notify(&format!("USB device disconnected: {removed}")).await;
                    }

                    known = current;
                }
                _ = self.shutdown.notified() => {
                    info!("device service shutting down");
                    return;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    async fn notify(&self, message: &str) {
        info!(message, "device event");
        let (channel, chat_id) = self.last_destination.lock().unwrap().clone();
        if channel.is_empty() || chat_id.is_empty() {
            return;
        }
        let mut msg = InboundMessage::new(&channel, "system", &chat_id, format!("[Device Event] {message}"));
        msg.metadata.insert("source".to_string(), "device_service".to_string());
        let _ = self.bus.publish_inbound(msg).await;
    }
}

fn scan_usb_devices() -> HashSet<String> {
    let mut devices = HashSet::new();
    let root = Path::new(USB_BUS_PATH);
    if !root.exists() {
        return devices;
    }
    walk_files(root, &mut devices);
    devices
}

fn walk_files(dir: &Path, out: &mut HashSet<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, out);
        } else if path.is_file() {
            out.insert(path.display().to_string());
        }
    }
}
