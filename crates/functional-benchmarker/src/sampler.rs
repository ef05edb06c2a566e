//! Periodic sampling of the collector's resource usage.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BenchmarkError, Result};

/// One observation of the collector container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time_unix_seconds: i64,
    /// CPU usage as a Kubernetes quantity, e.g. `250m`.
    pub cpu_cores: String,
    /// Memory usage as a Kubernetes quantity, e.g. `128Mi`.
    pub memory_bytes: String,
}

impl Sample {
    pub fn cpu(&self) -> Result<f64> {
        Ok(self.cpu_cores.parse::<Quantity>()?.value())
    }

    pub fn memory(&self) -> Result<f64> {
        Ok(self.memory_bytes.parse::<Quantity>()?.value())
    }
}

/// Something that can report the collector's current usage.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Current usage; `None` when no metrics are available yet.
    async fn sample(&self) -> Result<Option<Sample>>;
}

/// Sample `source` every `period` until `stop` fires.
///
/// Failed samples are logged and skipped.
pub async fn run(source: &dyn SampleSource, period: Duration, stop: CancellationToken) -> Vec<Sample> {
    let mut series = Vec::new();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => match source.sample().await {
                Ok(Some(sample)) => series.push(sample),
                Ok(None) => debug!("No collector metrics yet"),
                Err(e) => warn!(error = %e, "Failed to sample collector metrics"),
            },
        }
    }
    debug!(samples = series.len(), "Sampler stopped");
    series
}

/// Current time, in the shape samples record it.
pub fn observed_now() -> i64 {
    Utc::now().timestamp()
}

/// Suffix of a Kubernetes quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    None,
    Nano,
    Micro,
    Milli,
    Kilo,
    Kibi,
    Mega,
    Mebi,
    Giga,
    Gibi,
}

impl Suffix {
    const ALL: [Suffix; 10] = [
        Suffix::None,
        Suffix::Nano,
        Suffix::Micro,
        Suffix::Milli,
        Suffix::Kilo,
        Suffix::Kibi,
        Suffix::Mega,
        Suffix::Mebi,
        Suffix::Giga,
        Suffix::Gibi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Suffix::None => "",
            Suffix::Nano => "n",
            Suffix::Micro => "u",
            Suffix::Milli => "m",
            Suffix::Kilo => "K",
            Suffix::Kibi => "Ki",
            Suffix::Mega => "M",
            Suffix::Mebi => "Mi",
            Suffix::Giga => "G",
            Suffix::Gibi => "Gi",
        }
    }

    /// Apply the suffix to `amount`.
    pub fn scale(&self, amount: f64) -> f64 {
        match self {
            Suffix::Nano => amount / 1e9,
            Suffix::Micro => amount / 1e6,
            Suffix::Milli => amount / 1e3,
            other => amount * other.multiplier(),
        }
    }

    fn multiplier(&self) -> f64 {
        match self {
            Suffix::None | Suffix::Nano | Suffix::Micro | Suffix::Milli => 1.0,
            Suffix::Kilo => 1e3,
            Suffix::Kibi => 1024.0,
            Suffix::Mega => 1e6,
            Suffix::Mebi => 1024.0 * 1024.0,
            Suffix::Giga => 1e9,
            Suffix::Gibi => 1024.0 * 1024.0 * 1024.0,
        }
    }

    /// Exact match only, so `M` and `Mi` never shadow each other.
    fn parse(s: &str) -> Option<Self> {
        if s == "k" {
            return Some(Suffix::Kilo);
        }
        Self::ALL.into_iter().find(|suffix| suffix.as_str() == s)
    }
}

/// A Kubernetes resource quantity such as `500m` or `256Mi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub amount: f64,
    pub suffix: Suffix,
}

impl Quantity {
    pub fn new(amount: f64, suffix: Suffix) -> Self {
        Self { amount, suffix }
    }

    /// Value in base units: cores for CPU, bytes for memory.
    pub fn value(&self) -> f64 {
        self.suffix.scale(self.amount)
    }
}

impl FromStr for Quantity {
    type Err = BenchmarkError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |message: &str| BenchmarkError::Quantity {
            value: s.to_string(),
            message: message.to_string(),
        };

        let split = s
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_alphabetic())
            .last()
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        if number.is_empty() {
            return Err(invalid("missing number"));
        }
        let suffix = Suffix::parse(suffix).ok_or_else(|| invalid("unknown suffix"))?;
        let amount = number
            .parse::<f64>()
            .map_err(|e| invalid(&e.to_string()))?;
        if !amount.is_finite() {
            return Err(invalid("not a finite number"));
        }
        Ok(Quantity { amount, suffix })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.suffix.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn q(s: &str) -> f64 {
        s.parse::<Quantity>().unwrap().value()
    }

    #[test]
    fn test_parse_cpu_and_memory() {
        assert_eq!(q("500m"), 0.5);
        assert_eq!(q("2"), 2.0);
        assert_eq!(q("256Mi"), 256.0 * 1024.0 * 1024.0);
        assert_eq!(q("1G"), 1e9);
        assert_eq!(q("1M"), 1e6);
        assert_eq!(q("3Ki"), 3072.0);
        assert_eq!(q("1500000n"), 0.0015);
    }

    #[test]
    fn test_invalid_quantities() {
        for bad in ["", "Mi", "12Qi", "1.2.3", "abc"] {
            assert!(bad.parse::<Quantity>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_format_round_trips() {
        for suffix in Suffix::ALL {
            for amount in [0.0, 1.0, 12.5, 1024.0, 0.001] {
                let quantity = Quantity::new(amount, suffix);
                assert_eq!(quantity.to_string().parse::<Quantity>().unwrap(), quantity);
            }
        }
    }

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SampleSource for Counting {
        async fn sample(&self) -> Result<Option<Sample>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Ok(None);
            }
            if n == 1 {
                return Err(BenchmarkError::Config("metrics unavailable".into()));
            }
            Ok(Some(Sample {
                time_unix_seconds: i64::from(n),
                cpu_cores: format!("{n}00m"),
                memory_bytes: "64Mi".into(),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let source = Counting {
            calls: AtomicU32::new(0),
        };
        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4500)).await;
            stopper.cancel();
        });

        let series = run(&source, Duration::from_secs(1), stop).await;
        // Ticks at 0..=4s; the first two yield nothing.
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].cpu().unwrap(), 0.2);
        assert_eq!(series[2].memory().unwrap(), 64.0 * 1024.0 * 1024.0);
    }
}
