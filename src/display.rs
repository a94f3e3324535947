//! Latest-value board for front-ends.
//!
//! The core forwards each [`Reading`] with only the fields its line carried.
//! Holding the last known value of each quantity, and blanking them when the
//! session closes, is a display concern and lives here.

use crate::core::Reading;
use std::fmt;

const PLACEHOLDER: &str = "--";

/// Last known voltage, current and power.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadingBoard {
    voltage: Option<f64>,
    current: Option<f64>,
    power: Option<f64>,
}

impl ReadingBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the fields present in `reading`; keep the others.
    pub fn apply(&mut self, reading: &Reading) {
        if reading.voltage.is_some() {
            self.voltage = reading.voltage;
        }
        if reading.current.is_some() {
            self.current = reading.current;
        }
        if reading.power.is_some() {
            self.power = reading.power;
        }
    }

    /// Blank every value, e.g. after a disconnect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Voltage with two decimals, or `--`.
    pub fn voltage_text(&self) -> String {
        format_value(self.voltage, 2)
    }

    /// Current with three decimals, or `--`.
    pub fn current_text(&self) -> String {
        format_value(self.current, 3)
    }

    /// Power with two decimals, or `--`.
    pub fn power_text(&self) -> String {
        format_value(self.power, 2)
    }
}

impl fmt::Display for ReadingBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Voltage {} V | Current {} mA | Power {} W",
            self.voltage_text(),
            self.current_text(),
            self.power_text()
        )
    }
}

fn format_value(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => PLACEHOLDER.to_string(),
    }
}
