//! Run options and their defaulting rules

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::endpoint::ProxyEndpoint;

pub const DEFAULT_SAMPLE_RATE: f64 = 0.05;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60 * 60);
pub const MAX_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_UPDATE_URL: &str = "https://s3.amazonaws.com/lantern/proxybench.json";

pub const DEFAULT_URLS: &[&str] = &[
    "https://www.google.com/humans.txt",
    "https://www.facebook.com/humans.txt",
    "https://67.media.tumblr.com/avatar_4adfafc4c768_48.png",
    // YouTube
    "http://s.ytimg.com/yts/cssbin/www-pageframe-webp-vfl37g48Z.css",
    // Telegram
    "http://149.154.167.91/",
];

pub const TESTING_URL: &str = "http://i.ytimg.com/vi/video_id/0.jpg";
pub const TESTING_PROVIDER: &str = "testingProvider";
pub const TESTING_DATACENTER: &str = "testingDC";

/// Explicit overrides injected by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// When set, every round targets this single TLS proxy with a fixed URL
    pub testing_proxy: Option<String>,
}

impl Overrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn testing(addr: impl Into<String>) -> Self {
        Self {
            testing_proxy: Some(addr.into()),
        }
    }

    pub fn testing_proxy(&self) -> Option<&str> {
        self.testing_proxy.as_deref().filter(|a| !a.is_empty())
    }

    pub fn is_testing(&self) -> bool {
        self.testing_proxy().is_some()
    }
}

/// Options driving the sampling loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Probability in (0, 1] that a cycle runs a round
    #[serde(default)]
    pub sample_rate: f64,
    /// Base sleep between cycles
    #[serde(default, with = "period_format")]
    pub period: Duration,
    #[serde(default)]
    pub proxies: Vec<ProxyEndpoint>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, rename = "updateURL")]
    pub update_url: String,
}

impl RunOptions {
    /// Normalize every field. Idempotent.
    pub fn apply_defaults(&mut self, overrides: &Overrides) {
        if self.period.is_zero() {
            self.period = DEFAULT_PERIOD;
        }
        if self.period > MAX_PERIOD {
            self.period = MAX_PERIOD;
        }

        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        if self.sample_rate > 1.0 {
            self.sample_rate = 1.0;
        }

        if self.update_url.is_empty() && !overrides.is_testing() {
            self.update_url = DEFAULT_UPDATE_URL.to_string();
        }

        if self.urls.is_empty() {
            self.urls = DEFAULT_URLS.iter().map(|u| u.to_string()).collect();
        }

        if let Some(testing_proxy) = overrides.testing_proxy() {
            tracing::debug!("Overriding urls and proxy in testing mode");
            self.sample_rate = 1.0;
            self.urls = vec![TESTING_URL.to_string()];
            self.proxies = vec![ProxyEndpoint::https(
                testing_proxy,
                TESTING_PROVIDER,
                TESTING_DATACENTER,
            )];
        }
    }

    /// Consuming variant of [`RunOptions::apply_defaults`]
    pub fn with_defaults(mut self, overrides: &Overrides) -> Self {
        self.apply_defaults(overrides);
        self
    }

    /// Number of trials in one full round
    pub fn trials_per_round(&self) -> usize {
        self.urls.len() * self.proxies.len()
    }
}

/// Parse a Go-style duration string such as `1h`, `1h30m`, `1.5h` or `250ms`.
///
/// Negative durations are rejected.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut rest = s.strip_prefix('+').unwrap_or(s);
    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let value: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}

/// Render a duration in the same notation [`parse_duration`] accepts
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_nanos() != 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

mod period_format {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPeriod {
        Text(String),
        Nanos(i64),
    }

    pub fn serialize<S: Serializer>(period: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*period))
    }

    /// Unparseable or negative values decode as zero and get defaulted later
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = Option::<RawPeriod>::deserialize(deserializer)?;
        Ok(match raw {
            Some(RawPeriod::Text(text)) => parse_duration(&text).unwrap_or(Duration::ZERO),
            Some(RawPeriod::Nanos(nanos)) if nanos > 0 => Duration::from_nanos(nanos as u64),
            _ => Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("90m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("-1h"), None);
        assert_eq!(parse_duration("1d"), None);
        assert_eq!(parse_duration("h"), None);
    }

    #[test]
    fn test_format_duration_parses_back() {
        for d in [
            Duration::from_secs(3600),
            Duration::from_secs(120),
            Duration::from_secs(45),
            Duration::from_millis(1500),
        ] {
            assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
    }

    #[test]
    fn test_apply_defaults_fills_empty_options() {
        let opts = RunOptions::default().with_defaults(&Overrides::none());

        assert_eq!(opts.period, DEFAULT_PERIOD);
        assert_eq!(opts.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(opts.update_url, DEFAULT_UPDATE_URL);
        assert_eq!(opts.urls.len(), DEFAULT_URLS.len());
        assert!(opts.proxies.is_empty());
    }

    #[test]
    fn test_apply_defaults_is_idempotent() {
        let inputs = vec![
            RunOptions::default(),
            RunOptions {
                sample_rate: 0.5,
                period: Duration::from_secs(30),
                proxies: vec![ProxyEndpoint::https("1.2.3.4:443", "p", "dc")],
                urls: vec!["http://example.com/".to_string()],
                update_url: "http://config.example/opts.json".to_string(),
            },
            RunOptions {
                sample_rate: 7.0,
                period: Duration::from_secs(30 * 24 * 3600),
                ..Default::default()
            },
        ];

        for overrides in [Overrides::none(), Overrides::testing("127.0.0.1:9999")] {
            for input in &inputs {
                let once = input.clone().with_defaults(&overrides);
                let twice = once.clone().with_defaults(&overrides);
                assert_eq!(once, twice);
            }
        }
    }

    #[test]
    fn test_apply_defaults_bounds_malformed_values() {
        for rate in [0.0, -1.0, f64::NAN, f64::NEG_INFINITY] {
            let opts = RunOptions {
                sample_rate: rate,
                ..Default::default()
            }
            .with_defaults(&Overrides::none());
            assert_eq!(opts.sample_rate, DEFAULT_SAMPLE_RATE);
        }

        let opts = RunOptions {
            sample_rate: 3.0,
            period: Duration::from_secs(365 * 24 * 3600),
            ..Default::default()
        }
        .with_defaults(&Overrides::none());
        assert_eq!(opts.sample_rate, 1.0);
        assert_eq!(opts.period, MAX_PERIOD);

        let opts: RunOptions =
            serde_json::from_str(r#"{"period": "-5m", "sampleRate": -0.3}"#).unwrap();
        let opts = opts.with_defaults(&Overrides::none());
        assert!(opts.period > Duration::ZERO && opts.period <= MAX_PERIOD);
        assert!(opts.sample_rate > 0.0 && opts.sample_rate <= 1.0);
    }

    #[test]
    fn test_apply_defaults_testing_mode() {
        let opts = RunOptions {
            sample_rate: 0.01,
            proxies: vec![ProxyEndpoint::https("1.2.3.4:443", "p", "dc")],
            urls: vec!["http://example.com/".to_string()],
            ..Default::default()
        }
        .with_defaults(&Overrides::testing("127.0.0.1:4443"));

        assert_eq!(opts.sample_rate, 1.0);
        assert_eq!(opts.urls, vec![TESTING_URL.to_string()]);
        assert_eq!(opts.proxies.len(), 1);
        assert_eq!(
            opts.proxies[0].address_for(Protocol::Https),
            Some("127.0.0.1:4443")
        );
        assert_eq!(opts.proxies[0].provider, TESTING_PROVIDER);
        assert_eq!(opts.proxies[0].data_center, TESTING_DATACENTER);
        assert!(opts.update_url.is_empty());
        assert_eq!(opts.trials_per_round(), 1);
    }

    #[test]
    fn test_empty_testing_proxy_is_not_testing_mode() {
        let overrides = Overrides::testing("");
        assert!(!overrides.is_testing());
        let opts = RunOptions::default().with_defaults(&overrides);
        assert_eq!(opts.update_url, DEFAULT_UPDATE_URL);
    }

    #[test]
    fn test_decode_options_json() {
        let opts: RunOptions = serde_json::from_str(
            r#"{
                "sampleRate": 0.25,
                "period": "2h",
                "proxies": [
                    {"addr": "1.2.3.4:443", "provider": "do", "dataCenter": "nyc1"},
                    {"addrs": {"https": "5.6.7.8:443", "kcp": "5.6.7.8:9000"}, "provider": "vultr", "dataCenter": "tok"}
                ],
                "urls": ["http://example.com/a"],
                "updateURL": "http://config.example/opts.json"
            }"#,
        )
        .unwrap();

        assert_eq!(opts.sample_rate, 0.25);
        assert_eq!(opts.period, Duration::from_secs(7200));
        assert_eq!(opts.proxies.len(), 2);
        assert_eq!(opts.proxies[1].protocols(), vec![Protocol::Https, Protocol::Kcp]);
        assert_eq!(opts.update_url, "http://config.example/opts.json");
        assert_eq!(opts.trials_per_round(), 2);
    }

    #[test]
    fn test_decode_lenient_period() {
        let opts: RunOptions = serde_json::from_str(r#"{"period": "soon"}"#).unwrap();
        assert_eq!(opts.period, Duration::ZERO);

        let opts: RunOptions = serde_json::from_str(r#"{"period": 60000000000}"#).unwrap();
        assert_eq!(opts.period, Duration::from_secs(60));

        let opts: RunOptions = serde_json::from_str(r#"{"period": null}"#).unwrap();
        assert_eq!(opts.period, Duration::ZERO);
    }
}
