use beespeed::TestConfiguration;
use std::time::Duration;

/// The knobs adjustable from the settings view.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ping_count: usize,
    pub duration_secs: u64,
    pub concurrency: usize,
}

impl Settings {
    pub fn from_config(config: &TestConfiguration) -> Self {
        Self {
            ping_count: config.ping_count,
            duration_secs: config.download_duration.as_secs().max(1),
            concurrency: config.download_concurrency,
        }
    }

    /// `base` with this view's values applied.
    pub fn apply(&self, base: &TestConfiguration) -> TestConfiguration {
        base.clone()
            .with_ping_count(self.ping_count)
            .with_duration(self.duration())
            .with_concurrency(self.concurrency)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    PingCount,
    Duration,
    Concurrency,
}

impl SettingsField {
    pub fn next(self) -> Self {
        match self {
            SettingsField::PingCount => SettingsField::Duration,
            SettingsField::Duration => SettingsField::Concurrency,
            SettingsField::Concurrency => SettingsField::PingCount,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::PingCount => SettingsField::Concurrency,
            SettingsField::Duration => SettingsField::PingCount,
            SettingsField::Concurrency => SettingsField::Duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_configuration() {
        let base = TestConfiguration::default().with_user_agent("ua");
        let settings = Settings {
            ping_count: 10,
            duration_secs: 3,
            concurrency: 8,
        };

        let config = settings.apply(&base);

        assert_eq!(config.ping_count, 10);
        assert_eq!(config.upload_duration, Duration::from_secs(3));
        assert_eq!(config.download_concurrency, 8);
        assert_eq!(config.user_agent.as_deref(), Some("ua"));
        assert_eq!(Settings::from_config(&config).concurrency, 8);
    }

    #[test]
    fn fields_cycle() {
        let field = SettingsField::PingCount;
        assert_eq!(field.next().next().next(), field);
        assert_eq!(field.prev(), SettingsField::Concurrency);
    }
}
