//! Reading parser.
//!
//! Turns one text line from the device into at most one [`Reading`]. Two payload
//! shapes are accepted:
//!
//! - CSV: `<voltage>,<current>,<power>[,...]`
//! - Tagged: free text containing a standalone `V`, `I`, `A` or `P` followed by an
//!   optional `=` and a signed decimal number, e.g. `V=12.4` or `P -3.5`.
//!
//! Anything else yields `None`. That is a normal outcome: meters print banners,
//! menus and echo lines, and none of those should disturb a session.

use crate::core::Reading;
use once_cell::sync::Lazy;
use regex::Regex;

/// Standalone tag letter, optional whitespace and `=`, then a signed decimal.
static TAGGED_VALUE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\b([VIAP])\s*=?\s*([-+]?\d*\.?\d+)").expect("tagged value pattern is valid")
});

/// Parse one trimmed line.
///
/// A line containing a comma is committed to the CSV interpretation and never
/// falls back to the tagged form, even when the CSV parse fails.
pub fn parse_reading(line: &str) -> Option<Reading> {
    if line.contains(',') {
        parse_csv(line)
    } else {
        parse_tagged(line)
    }
}

fn parse_csv(line: &str) -> Option<Reading> {
    let mut fields = line.split(',');
    let mut next = || fields.next()?.trim().parse::<f64>().ok();

    // All three or nothing.
    let voltage = next()?;
    let current = next()?;
    let power = next()?;
    Some(Reading::full(voltage, current, power))
}

fn parse_tagged(line: &str) -> Option<Reading> {
    let caps = TAGGED_VALUE.captures(line)?;
    let value: f64 = caps.get(2)?.as_str().parse().ok()?;

    let mut reading = Reading::default();
    match caps.get(1)?.as_str() {
        "V" => reading.voltage = Some(value),
        "I" | "A" => reading.current = Some(value),
        "P" => reading.power = Some(value),
        _ => return None,
    }
    Some(reading)
}
