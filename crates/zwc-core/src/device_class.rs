//! Device class triple advertised in the node information frame.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The basic/generic/specific device class triple of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClass {
    pub basic: u8,
    pub generic: u8,
    pub specific: u8,
}

impl DeviceClass {
    /// Create a device class triple.
    #[must_use]
    pub const fn new(basic: u8, generic: u8, specific: u8) -> Self {
        Self {
            basic,
            generic,
            specific,
        }
    }

    /// Whether the generic class identifies a controller-type device.
    #[must_use]
    pub const fn is_controller(self) -> bool {
        // Generic Controller (0x01) or Static Controller (0x02)
        matches!(self.generic, 0x01 | 0x02)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:02x}/0x{:02x}/0x{:02x}",
            self.basic, self.generic, self.specific
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_detection() {
        assert!(DeviceClass::new(0x02, 0x02, 0x01).is_controller());
        assert!(!DeviceClass::new(0x04, 0x10, 0x01).is_controller());
    }

    #[test]
    fn display_is_hex_triple() {
        assert_eq!(DeviceClass::new(0x04, 0x10, 0x01).to_string(), "0x04/0x10/0x01");
    }
}
