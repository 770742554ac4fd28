//! Fuel autonomy estimation from a device's recent telemetry.
//!
//! The analyzer works on a window of samples ordered most-recent-first. It
//! derives consumption intervals between consecutive readings, drops the
//! ones that cannot be real consumption (refuels, sensor resets, stale
//! duplicates, multi-day gaps) and turns the remaining rates into an
//! autonomy estimate. It never fails on thin data: "not enough signal" is a
//! normal `no alert` result.

use crate::errors::Result;
use crate::metrics::ANALYZER_EVALUATIONS_TOTAL;
use crate::model::{DeviceId, TelemetrySample};
use crate::store::TelemetryStore;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerModel {
    /// Median / recent-weighted rate with spike override
    Trend,
    /// Single average rate over every valid interval
    Average,
}

impl FromStr for AnalyzerModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trend" => Ok(AnalyzerModel::Trend),
            "average" | "avg" => Ok(AnalyzerModel::Average),
            other => Err(format!("unknown fuel model '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub model: AnalyzerModel,
    /// Number of samples fetched per evaluation
    pub lookback: usize,
    pub min_samples: usize,
    pub tank_capacity_liters: f64,
    pub alert_threshold_hours: f64,
    /// Intervals spanning this many hours or more are ignored
    pub max_gap_hours: f64,
    /// Exclusive bounds on an interval's rate, in L/min
    pub min_rate: f64,
    pub max_rate: f64,
    /// Newest valid intervals used for the recent rate
    pub recent_window: usize,
    pub spike_factor: f64,
    /// At or below this many liters the tank counts as empty
    pub empty_tank_liters: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self::for_model(AnalyzerModel::Trend)
    }
}

impl AnalyzerConfig {
    pub fn for_model(model: AnalyzerModel) -> Self {
        match model {
            AnalyzerModel::Trend => Self {
                model,
                lookback: 100,
                min_samples: 3,
                tank_capacity_liters: 200.0,
                alert_threshold_hours: 1.0,
                max_gap_hours: 24.0,
                min_rate: 0.001,
                max_rate: 10.0,
                recent_window: 10,
                spike_factor: 1.5,
                empty_tank_liters: 1.0,
            },
            AnalyzerModel::Average => Self {
                model,
                lookback: 10,
                min_samples: 2,
                tank_capacity_liters: 200.0,
                alert_threshold_hours: 1.0,
                max_gap_hours: 24.0,
                min_rate: 0.0,
                max_rate: f64::INFINITY,
                recent_window: 10,
                spike_factor: 1.5,
                empty_tank_liters: 0.0,
            },
        }
    }
}

/// Outcome of one analysis pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FuelAssessment {
    pub should_alert: bool,
    pub autonomy_minutes: f64,
}

impl FuelAssessment {
    pub const NO_SIGNAL: FuelAssessment = FuelAssessment {
        should_alert: false,
        autonomy_minutes: 0.0,
    };

    pub const EMPTY_TANK: FuelAssessment = FuelAssessment {
        should_alert: true,
        autonomy_minutes: 0.0,
    };
}

/// Consumption between two consecutive readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub consumption_percent: f64,
    pub elapsed_minutes: f64,
    pub rate_liters_per_minute: f64,
}

impl Interval {
    /// Builds the interval between `newer` and `older`, or `None` when it
    /// cannot be real consumption.
    fn between(newer: &TelemetrySample, older: &TelemetrySample, cfg: &AnalyzerConfig) -> Option<Self> {
        let consumption_percent = older.fuel_level - newer.fuel_level;
        let elapsed_minutes =
            (newer.timestamp - older.timestamp).num_milliseconds() as f64 / 60_000.0;

        if consumption_percent <= 0.0
            || elapsed_minutes <= 0.0
            || elapsed_minutes / 60.0 >= cfg.max_gap_hours
        {
            return None;
        }

        let rate = (consumption_percent / 100.0) * cfg.tank_capacity_liters / elapsed_minutes;
        if rate <= cfg.min_rate || rate >= cfg.max_rate {
            return None;
        }

        Some(Self {
            consumption_percent,
            elapsed_minutes,
            rate_liters_per_minute: rate,
        })
    }
}

/// Drops samples that repeat the previous sample's timestamp
pub fn dedup_by_timestamp(samples: &[TelemetrySample]) -> Vec<&TelemetrySample> {
    let mut filtered: Vec<&TelemetrySample> = Vec::with_capacity(samples.len());
    for sample in samples {
        match filtered.last() {
            Some(last) if last.timestamp == sample.timestamp => {}
            _ => filtered.push(sample),
        }
    }
    filtered
}

/// Valid consumption intervals, newest first
pub fn valid_intervals(samples: &[&TelemetrySample], cfg: &AnalyzerConfig) -> Vec<Interval> {
    samples
        .windows(2)
        .filter_map(|pair| Interval::between(pair[0], pair[1], cfg))
        .collect()
}

fn aggregate_rate(intervals: &[Interval], tank_capacity_liters: f64) -> f64 {
    let (percent, minutes) = intervals.iter().fold((0.0, 0.0), |(p, m), i| {
        (p + i.consumption_percent, m + i.elapsed_minutes)
    });
    (percent / 100.0 * tank_capacity_liters) / minutes
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn trend_rate(device_id: DeviceId, intervals: &[Interval], cfg: &AnalyzerConfig) -> f64 {
    let global = aggregate_rate(intervals, cfg.tank_capacity_liters);

    let mut rates: Vec<f64> = intervals.iter().map(|i| i.rate_liters_per_minute).collect();
    let median_rate = median(&mut rates);

    let recent_count = cfg.recent_window.max(1).min(intervals.len());
    let recent = aggregate_rate(&intervals[..recent_count], cfg.tank_capacity_liters);

    let mut chosen = recent.max(median_rate);
    if recent > global * cfg.spike_factor {
        chosen = recent;
        warn!(
            "Device {}: elevated recent consumption {:.4} L/min (historical average {:.4} L/min)",
            device_id, recent, global
        );
    }

    debug!(
        "Device {}: rates average={:.4} median={:.4} recent={:.4} using={:.4} L/min",
        device_id, global, median_rate, recent, chosen
    );
    chosen
}

/// Estimates autonomy from a most-recent-first window of samples.
pub fn assess(device_id: DeviceId, samples: &[TelemetrySample], cfg: &AnalyzerConfig) -> FuelAssessment {
    if samples.len() < cfg.min_samples {
        return FuelAssessment::NO_SIGNAL;
    }

    let filtered = dedup_by_timestamp(samples);
    if filtered.len() < cfg.min_samples {
        return FuelAssessment::NO_SIGNAL;
    }

    let latest = filtered[0];
    let current_liters = (latest.fuel_level / 100.0) * cfg.tank_capacity_liters;
    if current_liters <= cfg.empty_tank_liters {
        warn!("Device {}: tank nearly empty ({:.2} L)", device_id, current_liters);
        return FuelAssessment::EMPTY_TANK;
    }

    let intervals = valid_intervals(&filtered, cfg);
    if intervals.is_empty() {
        debug!("Device {}: no valid consumption intervals", device_id);
        return FuelAssessment::NO_SIGNAL;
    }

    let rate = match cfg.model {
        AnalyzerModel::Trend => trend_rate(device_id, &intervals, cfg),
        AnalyzerModel::Average => aggregate_rate(&intervals, cfg.tank_capacity_liters),
    };

    let autonomy_minutes = current_liters / rate;
    let should_alert = autonomy_minutes / 60.0 < cfg.alert_threshold_hours;

    debug!(
        "Device {}: level {:.2}% ({:.1} L), {} intervals, autonomy {:.0} min ({:.1} h), threshold {:.1} h, alert={}",
        device_id,
        latest.fuel_level,
        current_liters,
        intervals.len(),
        autonomy_minutes,
        autonomy_minutes / 60.0,
        cfg.alert_threshold_hours,
        should_alert
    );
    for (i, interval) in intervals.iter().take(5).enumerate() {
        debug!(
            "  [{}] {:.2}% in {:.1} min -> {:.4} L/min",
            i, interval.consumption_percent, interval.elapsed_minutes, interval.rate_liters_per_minute
        );
    }

    FuelAssessment {
        should_alert,
        autonomy_minutes,
    }
}

/// Loads the device's recent window from the store and assesses it.
pub async fn predict(
    store: &dyn TelemetryStore,
    device_id: DeviceId,
    cfg: &AnalyzerConfig,
) -> Result<FuelAssessment> {
    ANALYZER_EVALUATIONS_TOTAL.inc();
    let recent = store.recent_by_device(device_id, cfg.lookback).await?;
    Ok(assess(device_id, &recent, cfg))
}
