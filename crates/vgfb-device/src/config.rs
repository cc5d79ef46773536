//! Device and registry configuration.

use crate::geometry::{self, Resolution};
use crate::mode::Mode;
use serde::{Deserialize, Serialize};
use vgfb_memory::StoreConfig;

/// Configuration applied to every newly opened device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Resolution the device starts at
    pub initial_resolution: Resolution,
    /// Pixel depth in bits (24 or 32)
    pub bits_per_pixel: u32,
    /// Mode selected at creation time
    pub mode: Mode,
    /// Nominal refresh rate used for the pixel clock
    pub refresh_rate: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            initial_resolution: Resolution::new(800, 600),
            bits_per_pixel: 32,
            mode: Mode::Normal,
            refresh_rate: 60,
        }
    }
}

impl DeviceConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        geometry::validate(self.initial_resolution, self.bits_per_pixel)
            .map_err(|e| ConfigError::InvalidGeometry(e.to_string()))?;
        if self.refresh_rate == 0 {
            return Err(ConfigError::InvalidRefreshRate);
        }
        Ok(())
    }
}

/// Configuration for a device registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Settings for each opened device
    pub device: DeviceConfig,
    /// Maximum number of devices open at once
    pub max_devices: usize,
    /// Upper bound on screen memory across all devices (bytes)
    pub memory_budget: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            max_devices: 64,
            memory_budget: StoreConfig::default().memory_budget,
        }
    }
}

impl RegistryConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()?;
        if self.max_devices == 0 {
            return Err(ConfigError::NoDevicesAllowed);
        }
        if self.memory_budget == 0 {
            return Err(ConfigError::MemoryBudgetTooLow);
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            memory_budget: self.memory_budget,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid initial geometry: {0}")]
    InvalidGeometry(String),

    #[error("Refresh rate must be non-zero")]
    InvalidRefreshRate,

    #[error("Registry must allow at least one device")]
    NoDevicesAllowed,

    #[error("Memory budget must be non-zero")]
    MemoryBudgetTooLow,

    #[error("Parse error: {0}")]
    Parse(String),
}
