// Power source query - OS shim feeding the GPU selection heuristic.
//
// Only the charging-or-plugged vs. discharging distinction matters to device
// selection; the discharge tiers are reported for logging.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStatus {
    /// No battery present, or status unavailable.
    None,
    Charging,
    /// Discharging with more than 66% remaining.
    DischargingHigh,
    /// Discharging with more than 33% remaining.
    DischargingMid,
    /// Discharging with more than 5% remaining.
    DischargingLow,
    /// Discharging at 5% or below.
    DischargingCritical,
}

impl PowerStatus {
    /// True when running on battery power.
    pub fn is_discharging(self) -> bool {
        !matches!(self, PowerStatus::None | PowerStatus::Charging)
    }
}

/// Map a battery status string and charge percentage onto a PowerStatus.
fn classify(status: &str, capacity_percent: Option<i32>) -> PowerStatus {
    let status = status.trim();
    if status.eq_ignore_ascii_case("charging") {
        return PowerStatus::Charging;
    }
    if !status.eq_ignore_ascii_case("discharging") {
        // "Full", "Not charging", or anything unexpected: treat as plugged in.
        return PowerStatus::None;
    }
    match capacity_percent {
        Some(pct) if pct > 66 => PowerStatus::DischargingHigh,
        Some(pct) if pct > 33 => PowerStatus::DischargingMid,
        Some(pct) if pct > 5 => PowerStatus::DischargingLow,
        Some(_) => PowerStatus::DischargingCritical,
        None => PowerStatus::DischargingMid,
    }
}

/// Query the system battery state.
#[cfg(target_os = "linux")]
pub fn system_battery_status() -> PowerStatus {
    use std::fs;

    let Ok(entries) = fs::read_dir("/sys/class/power_supply") else {
        return PowerStatus::None;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        // Batteries expose a status file; AC adapters do not.
        let Ok(status) = fs::read_to_string(path.join("status")) else {
            continue;
        };
        let capacity = fs::read_to_string(path.join("capacity"))
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok());
        let classified = classify(&status, capacity);
        if classified != PowerStatus::None {
            log::debug!("Battery {:?}: {:?}", path.file_name(), classified);
            return classified;
        }
    }

    PowerStatus::None
}

#[cfg(not(target_os = "linux"))]
pub fn system_battery_status() -> PowerStatus {
    PowerStatus::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charging_beats_capacity() {
        assert_eq!(classify("Charging", Some(10)), PowerStatus::Charging);
    }

    #[test]
    fn discharge_tiers() {
        assert_eq!(classify("Discharging", Some(90)), PowerStatus::DischargingHigh);
        assert_eq!(classify("Discharging", Some(67)), PowerStatus::DischargingHigh);
        assert_eq!(classify("Discharging", Some(66)), PowerStatus::DischargingMid);
        assert_eq!(classify("Discharging", Some(34)), PowerStatus::DischargingMid);
        assert_eq!(classify("Discharging", Some(33)), PowerStatus::DischargingLow);
        assert_eq!(classify("Discharging", Some(6)), PowerStatus::DischargingLow);
        assert_eq!(classify("Discharging", Some(5)), PowerStatus::DischargingCritical);
        assert_eq!(classify("Discharging", Some(0)), PowerStatus::DischargingCritical);
    }

    #[test]
    fn full_or_unknown_is_none() {
        assert_eq!(classify("Full", Some(100)), PowerStatus::None);
        assert_eq!(classify("Not charging", Some(80)), PowerStatus::None);
        assert_eq!(classify("???", None), PowerStatus::None);
    }

    #[test]
    fn only_discharging_counts_as_on_battery() {
        assert!(!PowerStatus::None.is_discharging());
        assert!(!PowerStatus::Charging.is_discharging());
        assert!(PowerStatus::DischargingLow.is_discharging());
        assert!(PowerStatus::DischargingCritical.is_discharging());
    }
}
