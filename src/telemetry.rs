//! Timestamped telemetry samples.
//!
//! A [`Telemetry`] sample is the unit of device state that drivers hand to loggers.
//! The base columns `device` and `timestamp` always come first, followed by the
//! device-specific fields in the order they were added. Sinks that write tabular
//! output (see `logging::csv_file`) rely on this to keep a stable column layout across a
//! session.

/// Current wall-clock time as seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// An immutable, timestamped, named numeric sample.
///
/// # Example
///
/// ```
/// use hwtest::telemetry::Telemetry;
///
/// let sample = Telemetry::at("network", 12.5)
///     .with_field("incremental_bytes", 84.0)
///     .with_field("cumulative_bytes", 1024.0);
///
/// assert_eq!(
///     sample.column_names(),
///     vec!["device", "timestamp", "incremental_bytes", "cumulative_bytes"]
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    device: String,
    timestamp: f64,
    fields: Vec<(String, f64)>,
}

impl Telemetry {
    /// Create an empty sample for `device`, stamped with the current time.
    pub fn new(device: impl Into<String>) -> Self {
        Self::at(device, now_timestamp())
    }

    /// Create an empty sample for `device` with an explicit timestamp.
    pub fn at(device: impl Into<String>, timestamp: f64) -> Self {
        Self {
            device: device.into(),
            timestamp,
            fields: Vec::new(),
        }
    }

    /// Append a field. A field with the same name replaces the earlier value in place.
    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    /// Device tag.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Device-specific fields, in insertion order.
    pub fn fields(&self) -> &[(String, f64)] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Column names: `device`, `timestamp`, then the fields.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.fields.len() + 2);
        names.push("device");
        names.push("timestamp");
        names.extend(self.fields.iter().map(|(n, _)| n.as_str()));
        names
    }

    /// Column values rendered as text, aligned with [`Telemetry::column_names`].
    pub fn column_values(&self) -> Vec<String> {
        let mut values = Vec::with_capacity(self.fields.len() + 2);
        values.push(self.device.clone());
        values.push(self.timestamp.to_string());
        values.extend(self.fields.iter().map(|(_, v)| v.to_string()));
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_columns_come_first() {
        let t = Telemetry::at("counter", 1.0)
            .with_field("cumulative_units", 3.0)
            .with_field("incremental_units", 1.0);

        assert_eq!(
            t.column_names(),
            vec!["device", "timestamp", "cumulative_units", "incremental_units"]
        );
        assert_eq!(t.column_values(), vec!["counter", "1", "3", "1"]);
    }

    #[test]
    fn repeated_field_keeps_position() {
        let t = Telemetry::at("d", 0.0)
            .with_field("a", 1.0)
            .with_field("b", 2.0)
            .with_field("a", 5.0);

        assert_eq!(t.fields().len(), 2);
        assert_eq!(t.fields()[0], ("a".to_string(), 5.0));
        assert_eq!(t.field("b"), Some(2.0));
        assert_eq!(t.field("missing"), None);
    }

    #[test]
    fn new_stamps_current_time() {
        let before = now_timestamp();
        let t = Telemetry::new("d");
        let after = now_timestamp();
        assert!(t.timestamp() >= before && t.timestamp() <= after);
        assert_eq!(t.device(), "d");
    }
}
