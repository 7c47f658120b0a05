//! MIDI Engine
//!
//! Handles MIDI input from hardware controllers and virtual MIDI ports.
//! Uses midir for cross-platform MIDI access; parsed events are handed to
//! the shared collector, which mirrors note state and queues them for the
//! graph without blocking the delivery thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use midir::{MidiInput, MidiInputConnection, MidiInputPort};

use crate::engine::collector::MidiCollector;
use crate::graph::midi::MidiEvent;

/// How often the background thread rescans for hot-plugged devices.
const DEVICE_SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Information about a MIDI input device.
#[derive(Debug, Clone)]
pub struct MidiDeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Internal port index.
    pub index: usize,
}

/// Error type for MIDI operations.
#[derive(Debug)]
pub enum MidiError {
    /// Failed to initialize the MIDI subsystem.
    InitError(String),
    /// Failed to connect to a device.
    ConnectionError(String),
    /// Device not found.
    DeviceNotFound,
}

impl std::fmt::Display for MidiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MidiError::InitError(s) => write!(f, "MIDI init error: {}", s),
            MidiError::ConnectionError(s) => write!(f, "MIDI connection error: {}", s),
            MidiError::DeviceNotFound => write!(f, "MIDI device not found"),
        }
    }
}

impl std::error::Error for MidiError {}

/// Port list shared with the hot-plug scan thread.
struct PortList {
    ports: Vec<MidiInputPort>,
    names: Vec<String>,
}

/// MIDI engine for receiving hardware input.
///
/// One connection at a time; a background thread keeps the device list
/// fresh so hot-plugged controllers appear without restarting.
pub struct MidiEngine {
    collector: MidiCollector,
    /// Cached device list for the UI.
    devices: Vec<MidiDeviceInfo>,
    /// Currently selected device index (None = no device).
    selected_device: Option<usize>,
    connection: Option<MidiInputConnection<()>>,
    state: Arc<Mutex<PortList>>,
    scan_running: Arc<AtomicBool>,
    scan_thread: Option<thread::JoinHandle<()>>,
}

impl MidiEngine {
    /// Creates a MIDI engine delivering into the given collector.
    pub fn new(collector: MidiCollector) -> Result<Self, MidiError> {
        let midi_in =
            MidiInput::new("Plugin Host").map_err(|e| MidiError::InitError(e.to_string()))?;

        let ports: Vec<MidiInputPort> = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();

        let devices = device_list(&names);
        let state = Arc::new(Mutex::new(PortList { ports, names }));

        // Background thread for hot-plug detection.
        let scan_running = Arc::new(AtomicBool::new(true));
        let scan_thread = {
            let state = Arc::clone(&state);
            let running = Arc::clone(&scan_running);
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    thread::sleep(DEVICE_SCAN_INTERVAL);
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Ok(midi_in) = MidiInput::new("Plugin Host Scanner") {
                        let ports: Vec<MidiInputPort> = midi_in.ports();
                        let names: Vec<String> = ports
                            .iter()
                            .map(|p| {
                                midi_in
                                    .port_name(p)
                                    .unwrap_or_else(|_| "Unknown".to_string())
                            })
                            .collect();
                        if let Ok(mut state) = state.lock() {
                            state.ports = ports;
                            state.names = names;
                        }
                    }
                }
            })
        };

        Ok(Self {
            collector,
            devices,
            selected_device: None,
            connection: None,
            state,
            scan_running,
            scan_thread: Some(scan_thread),
        })
    }

    /// Enumerates available MIDI input devices, reflecting hot-plugs.
    pub fn enumerate_devices(&mut self) -> Vec<MidiDeviceInfo> {
        if let Ok(state) = self.state.lock() {
            self.devices = device_list(&state.names);
        }
        self.devices.clone()
    }

    /// Cached device list without rescanning.
    pub fn devices(&self) -> &[MidiDeviceInfo] {
        &self.devices
    }

    /// Currently selected device index.
    pub fn selected_device(&self) -> Option<usize> {
        self.selected_device
    }

    /// Connects to a MIDI device by index, replacing any prior connection.
    pub fn connect(&mut self, device_index: usize) -> Result<(), MidiError> {
        self.disconnect();

        let (port, port_name) = {
            let state = self
                .state
                .lock()
                .map_err(|_| MidiError::ConnectionError("port list poisoned".to_string()))?;

            match (state.ports.get(device_index), state.names.get(device_index)) {
                (Some(port), Some(name)) => (port.clone(), name.clone()),
                _ => return Err(MidiError::DeviceNotFound),
            }
        };

        let midi_in = MidiInput::new("Plugin Host Input")
            .map_err(|e| MidiError::InitError(e.to_string()))?;

        let collector = self.collector.clone();
        let source_name = port_name.clone();
        let connection = midi_in
            .connect(
                &port,
                "Plugin Host Input",
                move |_timestamp_us, data, _| {
                    if let Some(event) = MidiEvent::from_bytes(data) {
                        collector.push(event);
                        log::trace!("MIDI from {}: {:?}", source_name, event);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::ConnectionError(e.to_string()))?;

        self.connection = Some(connection);
        self.selected_device = Some(device_index);
        log::debug!("MIDI connected to device {}: {}", device_index, port_name);
        Ok(())
    }

    /// Disconnects from the current MIDI device.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            self.selected_device = None;
            log::debug!("MIDI disconnected");
        }
    }

    /// Whether a device is currently connected.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

impl Drop for MidiEngine {
    fn drop(&mut self) {
        self.scan_running.store(false, Ordering::Relaxed);
        self.disconnect();
        if let Some(thread) = self.scan_thread.take() {
            let _ = thread.join();
        }
    }
}

fn device_list(names: &[String]) -> Vec<MidiDeviceInfo> {
    names
        .iter()
        .enumerate()
        .map(|(index, name)| MidiDeviceInfo {
            name: name.clone(),
            index,
        })
        .collect()
}
