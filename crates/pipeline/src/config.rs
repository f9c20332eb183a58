use serde::{Deserialize, Serialize};
use time::Duration;

/// Tunables for the analysis and trend pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long a reader waits on a non-terminal slot before reporting a timeout.
    pub client_timeout_secs: u64,
    /// How long an `InFlight` slot may run before a new trigger may take it over.
    pub stale_in_flight_secs: u64,
    /// Fewest observations a closed window needs before a narrative is generated.
    pub minimum_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            client_timeout_secs: 120,
            stale_in_flight_secs: 120,
            minimum_sample: 3,
        }
    }
}

impl PipelineConfig {
    pub fn client_timeout(&self) -> Duration {
        saturating_seconds(self.client_timeout_secs)
    }

    pub fn stale_in_flight(&self) -> Duration {
        saturating_seconds(self.stale_in_flight_secs)
    }
}

/// Values past `i64::MAX` mean "effectively forever", never a negative span.
fn saturating_seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_style_input_keeps_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"minimum_sample": 5}"#).unwrap();
        assert_eq!(cfg.minimum_sample, 5);
        assert_eq!(cfg.client_timeout(), Duration::seconds(120));
        assert_eq!(cfg.stale_in_flight(), Duration::seconds(120));
    }

    #[test]
    fn huge_values_saturate_instead_of_wrapping() {
        let cfg = PipelineConfig {
            client_timeout_secs: u64::MAX,
            stale_in_flight_secs: u64::MAX,
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.stale_in_flight(), Duration::seconds(i64::MAX));
        assert_eq!(cfg.client_timeout(), Duration::seconds(i64::MAX));
        assert!(cfg.stale_in_flight().is_positive());
    }
}
