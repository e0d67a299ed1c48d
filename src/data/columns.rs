/// Canonical column names as constants
/// Measured current in amps
pub const CURRENT: &str = "current";
/// Measured voltage in volts
pub const VOLTAGE: &str = "voltage";
/// Measured power in watts
pub const POWER: &str = "power";
/// Acquisition time of the sample
pub const TIMESTAMP: &str = "timestamp";
/// Bus address of the device under test
pub const DEVICE_ADDRESS: &str = "device_address";
/// Free-text device model / category
pub const DEVICE_TYPE: &str = "device_type";
/// Ambient temperature in °C
pub const TEMPERATURE: &str = "temperature";
/// Relative humidity in %
pub const HUMIDITY: &str = "humidity";
/// Row position written by the synthetic generator
pub const SEQUENCE: &str = "sequence";

/// Header cell marking the column-name row of a spreadsheet export
pub const SHEET_HEADER_MARKER: &str = "序号";

/// Boolean column appended by anomaly detection
pub const ANOMALY_FLAG: &str = "anomaly_flag";
/// Suffix of the column appended by the filtering engine
pub const FILTERED_SUFFIX: &str = "_filtered";

/// Columns every measurement table must carry.
pub const REQUIRED: [&str; 3] = [CURRENT, VOLTAGE, POWER];

/// Accepted header spellings per canonical column, resolved by first match.
///
/// Required columns list the canonical spelling first so that a table which
/// already uses it never has an alias renamed over it.
pub const ALIASES: &[(&str, &[&str])] = &[
    (CURRENT, &["current", "Current", "I", "i"]),
    (VOLTAGE, &["voltage", "Voltage", "V", "v"]),
    (POWER, &["power", "Power", "P", "p"]),
    (TIMESTAMP, &["Timestamp", "time", "Time"]),
    (DEVICE_ADDRESS, &["address", "Address"]),
    (DEVICE_TYPE, &["type", "Type"]),
    (TEMPERATURE, &["Temperature", "temp"]),
    (HUMIDITY, &["Humidity", "RH"]),
    (SEQUENCE, &[SHEET_HEADER_MARKER]),
];

/// Name of the filtered column derived from `column`.
pub fn filtered(column: &str) -> String {
    format!("{column}{FILTERED_SUFFIX}")
}
