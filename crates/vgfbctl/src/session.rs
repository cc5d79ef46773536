//! One controlled device and the mappings opened through it.

use crate::command::Command;
use anyhow::Result;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use vgfb_device::{
    CancelToken, DeviceError, DeviceHandle, DeviceRegistry, MappingHandle, RegistryConfig, Rop,
};

pub struct Session {
    // Dropped in order: mappings, then the device, then the registry
    mappings: Vec<MappingHandle>,
    handle: DeviceHandle,
    registry: DeviceRegistry,
    cancel: CancelToken,
}

impl Session {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let registry = DeviceRegistry::new(config)?;
        let handle = registry.open_device()?;
        Ok(Self {
            mappings: Vec::new(),
            handle,
            registry,
            cancel: CancelToken::new(),
        })
    }

    /// Run a command. Returns `None` when the session should end.
    pub fn execute(&mut self, command: Command) -> Result<Option<Value>, DeviceError> {
        debug!(?command, "Executing command");
        let reply = match command {
            Command::SetResolution { width, height } => {
                self.handle.set_resolution(width, height)?;
                self.state()
            }
            Command::SetDepth(bits_per_pixel) => {
                let resolution = self.handle.query_geometry()?.resolution();
                self.handle.set_screen_info(resolution, bits_per_pixel)?;
                self.state()
            }
            Command::SetMode(mode) => {
                self.handle.set_mode(mode)?;
                json!({ "mode": mode })
            }
            Command::Map => {
                let mapping = self.handle.map_memory()?;
                let reply = json!({ "store_id": mapping.store_id(), "len": mapping.len() });
                self.mappings.push(mapping);
                reply
            }
            Command::Unmap => {
                if let Some(mapping) = self.mappings.pop() {
                    self.handle.unmap_memory(mapping);
                }
                self.state()
            }
            Command::Wait { timeout_ms } => {
                self.handle
                    .wait_for_resize_timeout(&self.cancel, Duration::from_millis(timeout_ms))?;
                json!({ "geometry": self.handle.query_geometry()? })
            }
            Command::Pan { x, y } => {
                self.handle.pan(x, y)?;
                json!({ "geometry": self.handle.query_geometry()? })
            }
            Command::Fill { rect, color } => {
                self.handle.fill_rect(rect, color, Rop::Copy)?;
                json!({ "filled": rect })
            }
            Command::Geometry => json!({ "geometry": self.handle.query_geometry()? }),
            Command::Stats => json!({
                "devices": self.registry.device_count(),
                "memory": self.registry.stats().snapshot(),
            }),
            Command::Quit => return Ok(None),
        };
        Ok(Some(reply))
    }

    fn state(&self) -> Value {
        json!({
            "resize_state": self.handle.resize_state(),
            "live_mappings": self.handle.live_mappings(),
            "geometry": self.handle.query_geometry().ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse;

    fn run(session: &mut Session, line: &str) -> Result<Option<Value>, DeviceError> {
        let command = parse(line).unwrap().unwrap();
        session.execute(command)
    }

    #[test]
    fn test_resize_while_mapped() {
        let mut session = Session::new(RegistryConfig::default()).unwrap();

        let mapped = run(&mut session, "map").unwrap().unwrap();
        assert_eq!(mapped["len"], 800 * 1200 * 4);

        let reply = run(&mut session, "set resolution 1024 768").unwrap().unwrap();
        assert_eq!(reply["resize_state"], "ResizePending");
        assert_eq!(reply["geometry"]["width"], 800);

        assert_eq!(
            run(&mut session, "wait 10").unwrap_err(),
            DeviceError::TimedOut
        );

        run(&mut session, "unmap").unwrap();
        let reply = run(&mut session, "wait").unwrap().unwrap();
        assert_eq!(reply["geometry"]["width"], 1024);
        assert_eq!(reply["geometry"]["stride"], 4096);
    }

    #[test]
    fn test_errors_are_reported() {
        let mut session = Session::new(RegistryConfig::default()).unwrap();

        assert!(matches!(
            run(&mut session, "set resolution 0 600"),
            Err(DeviceError::InvalidGeometry(_))
        ));
        assert!(matches!(
            run(&mut session, "set depth 16"),
            Err(DeviceError::InvalidGeometry(_))
        ));
        assert!(run(&mut session, "pan 0 601").is_err());
    }

    #[test]
    fn test_mode_and_stats() {
        let mut session = Session::new(RegistryConfig::default()).unwrap();

        let stats = run(&mut session, "stats").unwrap().unwrap();
        assert_eq!(stats["devices"], 1);
        assert_eq!(stats["memory"]["live_stores"], 1);

        run(&mut session, "set mode none").unwrap();
        assert!(matches!(
            run(&mut session, "map"),
            Err(DeviceError::NoScreenMemory)
        ));
        let stats = run(&mut session, "stats").unwrap().unwrap();
        assert_eq!(stats["memory"]["live_stores"], 0);

        assert_eq!(run(&mut session, "quit").unwrap(), None);
    }

    #[test]
    fn test_cancelled_wait() {
        let mut session = Session::new(RegistryConfig::default()).unwrap();
        run(&mut session, "map").unwrap();
        run(&mut session, "set resolution 640 480").unwrap();

        session.cancel.cancel();
        assert_eq!(
            run(&mut session, "wait").unwrap_err(),
            DeviceError::Interrupted
        );
    }
}
