//! Command classes and the per-node command class registry entry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A Z-Wave command class.
///
/// Only the command classes the controller core touches are named; everything
/// else round-trips through [`CommandClass::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandClass {
    NoOperation,
    Basic,
    BinarySwitch,
    MultilevelSwitch,
    ColorSwitch,
    ThermostatMode,
    ThermostatSetpoint,
    AssociationGroupInfo,
    ZWavePlusInfo,
    MultiChannel,
    DoorLock,
    BarrierOperator,
    ManufacturerSpecific,
    WakeUp,
    Association,
    Version,
    MultiChannelAssociation,
    Security,
    /// Any command class not interpreted by the controller core.
    Other(u8),
}

impl CommandClass {
    /// The protocol identifier of this command class.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::NoOperation => 0x00,
            Self::Basic => 0x20,
            Self::BinarySwitch => 0x25,
            Self::MultilevelSwitch => 0x26,
            Self::ColorSwitch => 0x33,
            Self::ThermostatMode => 0x40,
            Self::ThermostatSetpoint => 0x43,
            Self::AssociationGroupInfo => 0x59,
            Self::ZWavePlusInfo => 0x5E,
            Self::MultiChannel => 0x60,
            Self::DoorLock => 0x62,
            Self::BarrierOperator => 0x66,
            Self::ManufacturerSpecific => 0x72,
            Self::WakeUp => 0x84,
            Self::Association => 0x85,
            Self::Version => 0x86,
            Self::MultiChannelAssociation => 0x8E,
            Self::Security => 0x98,
            Self::Other(id) => id,
        }
    }

    /// Convert from a protocol identifier.
    #[must_use]
    pub const fn from_id(id: u8) -> Self {
        match id {
            0x00 => Self::NoOperation,
            0x20 => Self::Basic,
            0x25 => Self::BinarySwitch,
            0x26 => Self::MultilevelSwitch,
            0x33 => Self::ColorSwitch,
            0x40 => Self::ThermostatMode,
            0x43 => Self::ThermostatSetpoint,
            0x59 => Self::AssociationGroupInfo,
            0x5E => Self::ZWavePlusInfo,
            0x60 => Self::MultiChannel,
            0x62 => Self::DoorLock,
            0x66 => Self::BarrierOperator,
            0x72 => Self::ManufacturerSpecific,
            0x84 => Self::WakeUp,
            0x85 => Self::Association,
            0x86 => Self::Version,
            0x8E => Self::MultiChannelAssociation,
            0x98 => Self::Security,
            other => Self::Other(other),
        }
    }

    /// Whether this command class controls a physical device output.
    ///
    /// Used by the association admissibility check: a group issuing the Basic
    /// CC may associate with any target that supports an actuator CC.
    #[must_use]
    pub const fn is_actuator(self) -> bool {
        matches!(
            self,
            Self::BinarySwitch
                | Self::MultilevelSwitch
                | Self::ColorSwitch
                | Self::ThermostatMode
                | Self::ThermostatSetpoint
                | Self::DoorLock
                | Self::BarrierOperator
        )
    }

    /// Human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoOperation => "No Operation",
            Self::Basic => "Basic",
            Self::BinarySwitch => "Binary Switch",
            Self::MultilevelSwitch => "Multilevel Switch",
            Self::ColorSwitch => "Color Switch",
            Self::ThermostatMode => "Thermostat Mode",
            Self::ThermostatSetpoint => "Thermostat Setpoint",
            Self::AssociationGroupInfo => "Association Group Information",
            Self::ZWavePlusInfo => "Z-Wave Plus Info",
            Self::MultiChannel => "Multi Channel",
            Self::DoorLock => "Door Lock",
            Self::BarrierOperator => "Barrier Operator",
            Self::ManufacturerSpecific => "Manufacturer Specific",
            Self::WakeUp => "Wake Up",
            Self::Association => "Association",
            Self::Version => "Version",
            Self::MultiChannelAssociation => "Multi Channel Association",
            Self::Security => "Security",
            Self::Other(_) => "unknown",
        }
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.as_str(), self.id())
    }
}

impl Serialize for CommandClass {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.id())
    }
}

impl<'de> Deserialize<'de> for CommandClass {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = u8::deserialize(deserializer)?;
        Ok(Self::from_id(id))
    }
}

/// Per-node registry entry for a command class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandClassInfo {
    /// The node advertises support for the command class.
    pub supported: bool,
    /// The node can control the command class on other nodes.
    pub controlled: bool,
    /// The command class must be wrapped in Security encapsulation.
    pub secure: bool,
    /// The highest implemented version (0 while unknown).
    pub version: u8,
}

impl CommandClassInfo {
    /// Entry for a supported command class at the given version.
    #[must_use]
    pub const fn supported(version: u8) -> Self {
        Self {
            supported: true,
            controlled: false,
            secure: false,
            version,
        }
    }

    /// Entry for a controlled command class.
    #[must_use]
    pub const fn controlled() -> Self {
        Self {
            supported: false,
            controlled: true,
            secure: false,
            version: 0,
        }
    }

    /// Merge another entry into this one, keeping the strongest claims.
    pub fn merge(&mut self, other: Self) {
        self.supported |= other.supported;
        self.controlled |= other.controlled;
        self.secure |= other.secure;
        self.version = self.version.max(other.version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip_for_named_classes() {
        for cc in [
            CommandClass::NoOperation,
            CommandClass::Basic,
            CommandClass::BinarySwitch,
            CommandClass::MultiChannel,
            CommandClass::Association,
            CommandClass::MultiChannelAssociation,
            CommandClass::AssociationGroupInfo,
            CommandClass::Security,
            CommandClass::WakeUp,
            CommandClass::Version,
            CommandClass::ZWavePlusInfo,
        ] {
            assert_eq!(CommandClass::from_id(cc.id()), cc);
        }
    }

    #[test]
    fn unknown_ids_are_preserved() {
        let cc = CommandClass::from_id(0x77);
        assert_eq!(cc, CommandClass::Other(0x77));
        assert_eq!(cc.id(), 0x77);
    }

    #[test]
    fn actuator_set() {
        assert!(CommandClass::BinarySwitch.is_actuator());
        assert!(CommandClass::MultilevelSwitch.is_actuator());
        assert!(CommandClass::DoorLock.is_actuator());
        assert!(!CommandClass::Basic.is_actuator());
        assert!(!CommandClass::Association.is_actuator());
    }

    #[test]
    fn serde_uses_the_raw_id() {
        let json = serde_json::to_string(&CommandClass::BinarySwitch).unwrap();
        assert_eq!(json, "37");
        let cc: CommandClass = serde_json::from_str("37").unwrap();
        assert_eq!(cc, CommandClass::BinarySwitch);
    }

    #[test]
    fn info_merge_keeps_strongest_claims() {
        let mut info = CommandClassInfo::supported(1);
        info.merge(CommandClassInfo::controlled());
        assert!(info.supported);
        assert!(info.controlled);
        assert_eq!(info.version, 1);

        info.merge(CommandClassInfo::supported(3));
        assert_eq!(info.version, 3);
    }
}
