//! Number and duration formatting shared by the engines

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole * 100`, rounded to two decimals; 0 when `whole` is 0
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        round2(part / whole * 100.0)
    }
}

/// Human-readable duration using the two largest units
///
/// The total is rounded to whole seconds first; the second unit is floored
/// and omitted when zero: `45s`, `2m 5s`, `2h 15m`, `3d 4h`, `1h`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;

    if total < 60 {
        format!("{}s", total)
    } else if total < 3_600 {
        with_remainder(total / 60, "m", total % 60, "s")
    } else if total < 86_400 {
        with_remainder(total / 3_600, "h", (total % 3_600) / 60, "m")
    } else {
        with_remainder(total / 86_400, "d", (total % 86_400) / 3_600, "h")
    }
}

fn with_remainder(major: u64, major_unit: &str, minor: u64, minor_unit: &str) -> String {
    if minor > 0 {
        format!("{}{} {}{}", major, major_unit, minor, minor_unit)
    } else {
        format!("{}{}", major, major_unit)
    }
}
