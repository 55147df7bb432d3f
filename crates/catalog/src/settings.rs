use serde::{Deserialize, Serialize};

/// Runtime-tunable system settings.
///
/// All flags are mutable through explicit setters; the services read them at
/// operation time, so changes take effect without restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    maintenance_mode: bool,
    /// Default reserve fraction (percent) applied when an item carries none.
    default_reserve_percentage: u8,
    /// Default per-(worker, item) custody cap when no explicit limit is set.
    /// `None` means uncapped.
    default_custody_limit: Option<i64>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            maintenance_mode: false,
            default_reserve_percentage: 20,
            default_custody_limit: None,
        }
    }
}

impl SystemSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maintenance_mode(&self) -> bool {
        self.maintenance_mode
    }

    pub fn set_maintenance_mode(&mut self, on: bool) {
        self.maintenance_mode = on;
    }

    pub fn default_reserve_percentage(&self) -> u8 {
        self.default_reserve_percentage
    }

    pub fn set_default_reserve_percentage(&mut self, pct: u8) {
        self.default_reserve_percentage = pct.min(100);
    }

    pub fn default_custody_limit(&self) -> Option<i64> {
        self.default_custody_limit
    }

    pub fn set_default_custody_limit(&mut self, limit: Option<i64>) {
        self.default_custody_limit = limit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_percentage_is_clamped_to_100() {
        let mut settings = SystemSettings::new();
        settings.set_default_reserve_percentage(250);
        assert_eq!(settings.default_reserve_percentage(), 100);
    }

    #[test]
    fn settings_are_mutable() {
        let mut settings = SystemSettings::new();
        assert!(!settings.maintenance_mode());
        settings.set_maintenance_mode(true);
        assert!(settings.maintenance_mode());

        settings.set_default_custody_limit(Some(50));
        assert_eq!(settings.default_custody_limit(), Some(50));
    }
}
