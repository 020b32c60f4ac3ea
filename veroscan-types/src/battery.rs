//! Battery readings

use std::fmt;

/// Snapshot of the scanner battery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryInfo {
    /// State of charge (0-100)
    pub charge_percent: u8,

    /// Terminal voltage
    pub voltage_millivolts: u16,

    /// Positive while charging, negative while discharging
    pub current_milliamps: i16,

    /// Cell temperature in tenths of a kelvin
    pub temperature_decikelvin: u16,
}

impl BatteryInfo {
    /// Whether the charge is below `min_percent`
    pub fn is_low(&self, min_percent: u8) -> bool {
        self.charge_percent < min_percent
    }

    /// Cell temperature in degrees Celsius
    pub fn temperature_celsius(&self) -> f32 {
        f32::from(self.temperature_decikelvin) / 10.0 - 273.15
    }
}

impl fmt::Display for BatteryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Battery[{}%, {}mV, {}mA, {:.1}°C]",
            self.charge_percent,
            self.voltage_millivolts,
            self.current_milliamps,
            self.temperature_celsius()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_low() {
        let battery = BatteryInfo {
            charge_percent: 15,
            voltage_millivolts: 3600,
            current_milliamps: -120,
            temperature_decikelvin: 2982,
        };

        assert!(battery.is_low(20));
        assert!(!battery.is_low(10));
    }

    #[test]
    fn test_temperature_celsius() {
        let battery = BatteryInfo {
            charge_percent: 80,
            voltage_millivolts: 4000,
            current_milliamps: 0,
            temperature_decikelvin: 2982,
        };

        assert!((battery.temperature_celsius() - 25.05).abs() < 0.01);
    }
}
