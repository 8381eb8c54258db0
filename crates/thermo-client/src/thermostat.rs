//! Standard thermostat property table

use thermo_core::PropertySpec;

use crate::model::{CONNECTED, STATUS};

/// Properties exposed by the thermostat firmware, plus the client's own
/// connectivity flag and status text
pub fn thermostat_properties() -> Vec<PropertySpec> {
    vec![
        // Local
        PropertySpec::bool(CONNECTED, false).local_only(),
        PropertySpec::text(STATUS, "").local_only(),
        // Pins
        PropertySpec::int("tempPin1", 6),
        PropertySpec::int("tempPin2", 7),
        PropertySpec::int("ledPin", 13),
        PropertySpec::int("fanPin", 9),
        PropertySpec::int("fireplacePin", 10),
        PropertySpec::int("heatPin", 11),
        PropertySpec::int("coolPin", 12),
        // Outputs
        PropertySpec::bool("ledActive", false),
        PropertySpec::bool("fireplaceActive", false),
        PropertySpec::bool("fanActive", false),
        PropertySpec::bool("heatActive", false),
        PropertySpec::bool("coolActive", false),
        // Control
        PropertySpec::float("hysteresisTemp", 0.6).range(0.2, 10.0),
        PropertySpec::float("desiredTemp", 24.0),
        // Sensors
        PropertySpec::float("insideTemp", 24.0).read_only(),
        PropertySpec::float("insideHumidity", 50.0).read_only(),
        PropertySpec::float("outsideTemp", 24.0).read_only(),
        PropertySpec::float("outsideHumidity", 50.0).read_only(),
        // Network
        PropertySpec::text("wifiSsid", ""),
        PropertySpec::text("wifiPass", ""),
        PropertySpec::text("wifiIp", ""),
        // Hardware present
        PropertySpec::bool("fanPresent", false),
        PropertySpec::bool("fireplacePresent", false),
        PropertySpec::bool("heatPresent", false),
        PropertySpec::bool("coolPresent", false),
        // Modes
        PropertySpec::choice("heatMode", &["furnace", "fireplace"]),
        PropertySpec::choice("fanMode", &["off", "auto"]),
        PropertySpec::choice("systemMode", &["off", "heat", "cool"]),
        PropertySpec::text("version", ""),
    ]
}
