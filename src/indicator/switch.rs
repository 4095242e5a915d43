use crate::error::SwitchError;
use std::sync::atomic::{AtomicBool, Ordering};

/// Momentary push-button input sampled by the orchestrator
pub trait SwitchInput: Send + Sync {
    /// Whether the button is currently held down
    fn is_pressed(&self) -> Result<bool, SwitchError>;
}

/// Software switch for tests and hardware-less stations
#[derive(Debug, Default)]
pub struct MemorySwitch {
    pressed: AtomicBool,
}

impl MemorySwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::SeqCst);
    }
}

impl SwitchInput for MemorySwitch {
    fn is_pressed(&self) -> Result<bool, SwitchError> {
        Ok(self.pressed.load(Ordering::SeqCst))
    }
}

/// Push-button exposed as a key on a Linux input device
#[cfg(all(feature = "switch_evdev", target_os = "linux"))]
pub struct EvdevSwitch {
    device: parking_lot::Mutex<evdev::Device>,
    key: evdev::Key,
    device_path: String,
}

#[cfg(all(feature = "switch_evdev", target_os = "linux"))]
impl EvdevSwitch {
    /// Open the input device and check it can report the given key code
    pub fn open(device_path: &str, key_code: u16) -> Result<Self, SwitchError> {
        let device = evdev::Device::open(device_path).map_err(|e| SwitchError::DeviceOpen {
            device: device_path.to_string(),
            details: e.to_string(),
        })?;

        let key = evdev::Key::new(key_code);
        let supported = device
            .supported_keys()
            .map(|keys| keys.contains(key))
            .unwrap_or(false);
        if !supported {
            return Err(SwitchError::DeviceOpen {
                device: device_path.to_string(),
                details: format!("device does not report key code {}", key_code),
            });
        }

        tracing::info!(
            "Switch device opened: {} ({}), key {:?}",
            device_path,
            device.name().unwrap_or("Unknown"),
            key
        );

        Ok(Self {
            device: parking_lot::Mutex::new(device),
            key,
            device_path: device_path.to_string(),
        })
    }
}

#[cfg(all(feature = "switch_evdev", target_os = "linux"))]
impl SwitchInput for EvdevSwitch {
    fn is_pressed(&self) -> Result<bool, SwitchError> {
        let device = self.device.lock();
        let keys = device.get_key_state().map_err(|e| SwitchError::DeviceRead {
            details: format!("{}: {}", self.device_path, e),
        })?;
        Ok(keys.contains(self.key))
    }
}
