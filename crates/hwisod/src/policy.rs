//! Policy preconditions for isolation operations.

use std::path::PathBuf;
use tracing::warn;

/// System-state checks consulted before mutating operations.
pub trait SystemPolicy {
    /// Administrative enable flag for the whole isolation feature.
    fn isolation_enabled(&self) -> bool;

    /// Manual isolation is only allowed while the chassis is off.
    fn chassis_powered_off(&self) -> bool;

    /// Bulk de-isolation is only allowed while the host is down.
    fn deisolation_allowed(&self) -> bool;
}

/// Policy backed by a chassis power-state file.
///
/// The file holds "on" or "off"; an absent file means the host has
/// never powered on, which counts as off.
pub struct FilePolicy {
    enabled: bool,
    chassis_state_file: PathBuf,
}

impl FilePolicy {
    pub fn new(enabled: bool, chassis_state_file: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            chassis_state_file: chassis_state_file.into(),
        }
    }
}

impl SystemPolicy for FilePolicy {
    fn isolation_enabled(&self) -> bool {
        self.enabled
    }

    fn chassis_powered_off(&self) -> bool {
        match std::fs::read_to_string(&self.chassis_state_file) {
            Ok(state) => state.trim().eq_ignore_ascii_case("off"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(
                    file = %self.chassis_state_file.display(),
                    "failed to read chassis state, assuming powered on: {e}"
                );
                false
            }
        }
    }

    fn deisolation_allowed(&self) -> bool {
        self.chassis_powered_off()
    }
}

/// Fixed policy for systems without a chassis state source, and for
/// tests.
pub struct StaticPolicy {
    pub enabled: bool,
    pub powered_off: bool,
}

impl SystemPolicy for StaticPolicy {
    fn isolation_enabled(&self) -> bool {
        self.enabled
    }

    fn chassis_powered_off(&self) -> bool {
        self.powered_off
    }

    fn deisolation_allowed(&self) -> bool {
        self.powered_off
    }
}
