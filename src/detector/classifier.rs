//! Fuses per-sample detector triggers into severity-tagged events.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::ClassifierThresholds;

/// Events retained in the log.
pub const EVENT_LOG_LEN: usize = 500;

/// Event timestamps retained for rate displays.
pub const TIMESTAMP_LOG_LEN: usize = 200;

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Any trigger below the light-vibration magnitude
    MicroVibration,
    /// Any trigger above the light-vibration magnitude
    LightVibration,
    /// STA/LTA or CUSUM above the vibration magnitude
    Vibration,
    /// Peak detector above the micro-shock magnitude
    MicroShock,
    /// Three or more detectors above the shock magnitude
    Shock,
    /// All four detectors above the major-shock magnitude
    MajorShock,
}

impl Severity {
    /// Single-character marker for console output.
    pub fn symbol(self) -> &'static str {
        match self {
            Severity::MajorShock => "★",
            Severity::Shock => "▲",
            Severity::MicroShock => "△",
            Severity::Vibration => "●",
            Severity::LightVibration => "○",
            Severity::MicroVibration => "·",
        }
    }

    /// Short human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Severity::MajorShock => "MAJOR",
            Severity::Shock => "shock",
            Severity::MicroShock => "micro-shock",
            Severity::Vibration => "vibration",
            Severity::LightVibration => "light-vib",
            Severity::MicroVibration => "micro-vib",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Detector that contributed to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DetectorSource {
    /// Any of the three STA/LTA timescales
    #[serde(rename = "STA/LTA")]
    StaLta,
    /// Bilateral CUSUM
    #[serde(rename = "CUSUM")]
    Cusum,
    /// Rolling kurtosis
    #[serde(rename = "KURTOSIS")]
    Kurtosis,
    /// Median/MAD peak detector, any tier
    #[serde(rename = "PEAK")]
    Peak,
}

impl DetectorSource {
    /// Name used in event sources and logs.
    pub fn name(self) -> &'static str {
        match self {
            DetectorSource::StaLta => "STA/LTA",
            DetectorSource::Cusum => "CUSUM",
            DetectorSource::Kurtosis => "KURTOSIS",
            DetectorSource::Peak => "PEAK",
        }
    }
}

impl std::fmt::Display for DetectorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One classified event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Local wall-clock time, `HH:MM:SS.mmm`
    pub time: String,
    /// Classified severity
    pub severity: Severity,
    /// See [`Severity::symbol`]
    pub symbol: &'static str,
    /// See [`Severity::label`]
    pub label: &'static str,
    /// Gravity-removed magnitude in g
    pub magnitude: f64,
    /// Detectors that fired on this sample
    pub sources: BTreeSet<DetectorSource>,
    /// Spectral bands active at the time of the event
    pub bands: Vec<String>,
}

/// Severity for a set of contributing detectors at a given magnitude.
pub fn classify(
    sources: &BTreeSet<DetectorSource>,
    magnitude: f64,
    thresholds: &ClassifierThresholds,
) -> Severity {
    let count = sources.len();
    if count >= 4 && magnitude > thresholds.major_shock {
        Severity::MajorShock
    } else if count >= 3 && magnitude > thresholds.shock {
        Severity::Shock
    } else if sources.contains(&DetectorSource::Peak) && magnitude > thresholds.micro_shock {
        Severity::MicroShock
    } else if (sources.contains(&DetectorSource::StaLta) || sources.contains(&DetectorSource::Cusum))
        && magnitude > thresholds.vibration
    {
        Severity::Vibration
    } else if magnitude > thresholds.light_vibration {
        Severity::LightVibration
    } else {
        Severity::MicroVibration
    }
}

fn format_time(timestamp: f64) -> String {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
        .map(|utc| utc.with_timezone(&Local).format("%H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}

/// Rate-limited event classifier with bounded history.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    thresholds: ClassifierThresholds,
    rearm_s: f64,
    last_event: Option<f64>,
    events: VecDeque<DetectionEvent>,
    timestamps: VecDeque<f64>,
    counts: BTreeMap<Severity, u64>,
}

impl EventClassifier {
    /// Classifier with the given magnitude thresholds and re-arm interval in seconds.
    pub fn new(thresholds: ClassifierThresholds, rearm_s: f64) -> Self {
        Self {
            thresholds,
            rearm_s,
            last_event: None,
            events: VecDeque::with_capacity(EVENT_LOG_LEN),
            timestamps: VecDeque::with_capacity(TIMESTAMP_LOG_LEN),
            counts: BTreeMap::new(),
        }
    }

    /// Whether an event at `t` would pass the re-arm interval.
    pub fn is_armed(&self, t: f64) -> bool {
        self.last_event
            .map_or(true, |last| t - last >= self.rearm_s - 1e-9)
    }

    /// Classify and record the triggers of one sample.
    ///
    /// `bands` is only evaluated when an event is emitted. Returns `None` when
    /// nothing fired or the classifier is still within the re-arm interval.
    pub fn submit(
        &mut self,
        t: f64,
        magnitude: f64,
        sources: BTreeSet<DetectorSource>,
        bands: impl FnOnce() -> Vec<String>,
    ) -> Option<DetectionEvent> {
        if sources.is_empty() || !self.is_armed(t) {
            return None;
        }
        self.last_event = Some(t);

        let severity = classify(&sources, magnitude, &self.thresholds);
        let event = DetectionEvent {
            timestamp: t,
            time: format_time(t),
            severity,
            symbol: severity.symbol(),
            label: severity.label(),
            magnitude,
            sources,
            bands: bands(),
        };

        if self.timestamps.len() == TIMESTAMP_LOG_LEN {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(t);
        if self.events.len() == EVENT_LOG_LEN {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        *self.counts.entry(severity).or_default() += 1;
        Some(event)
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> &VecDeque<DetectionEvent> {
        &self.events
    }

    /// Timestamps of the most recent events, oldest first.
    pub fn timestamps(&self) -> &VecDeque<f64> {
        &self.timestamps
    }

    /// Events emitted per severity since start, including evicted ones.
    pub fn counts(&self) -> &BTreeMap<Severity, u64> {
        &self.counts
    }

    /// Events emitted since start.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(sources: &[DetectorSource]) -> BTreeSet<DetectorSource> {
        sources.iter().copied().collect()
    }

    #[test]
    fn precedence_follows_source_count_then_magnitude() {
        use DetectorSource::*;
        let t = ClassifierThresholds::default();
        let all = set(&[StaLta, Cusum, Kurtosis, Peak]);

        assert_eq!(classify(&all, 0.06, &t), Severity::MajorShock);
        assert_eq!(classify(&all, 0.03, &t), Severity::Shock);
        assert_eq!(classify(&set(&[StaLta, Cusum, Peak]), 0.06, &t), Severity::Shock);
        assert_eq!(classify(&set(&[Peak]), 0.01, &t), Severity::MicroShock);
        assert_eq!(classify(&set(&[Cusum]), 0.004, &t), Severity::Vibration);
        assert_eq!(classify(&set(&[Kurtosis]), 0.004, &t), Severity::LightVibration);
        assert_eq!(classify(&set(&[StaLta]), 0.0005, &t), Severity::MicroVibration);
    }

    #[test]
    fn rearm_interval_is_measured_from_last_event() {
        let mut classifier = EventClassifier::new(ClassifierThresholds::default(), 0.01);
        let peak = || set(&[DetectorSource::Peak]);

        assert!(classifier.submit(100.0, 0.01, peak(), Vec::new).is_some());
        assert!(classifier.submit(100.005, 0.01, peak(), Vec::new).is_none());
        assert!(classifier.submit(100.01, 0.01, peak(), Vec::new).is_some());
        assert_eq!(classifier.total(), 2);
    }

    #[test]
    fn empty_trigger_set_is_ignored() {
        let mut classifier = EventClassifier::new(ClassifierThresholds::default(), 0.01);
        assert!(classifier.submit(1.0, 1.0, BTreeSet::new(), Vec::new).is_none());
        assert!(classifier.is_armed(1.0));
    }

    #[test]
    fn logs_are_bounded() {
        let mut classifier = EventClassifier::new(ClassifierThresholds::default(), 0.01);
        for i in 0..600 {
            classifier.submit(i as f64, 0.002, set(&[DetectorSource::Cusum]), Vec::new);
        }
        assert_eq!(classifier.events().len(), EVENT_LOG_LEN);
        assert_eq!(classifier.timestamps().len(), TIMESTAMP_LOG_LEN);
        assert_eq!(classifier.events().front().map(|e| e.timestamp), Some(100.0));
        assert_eq!(classifier.counts()[&Severity::LightVibration], 600);
    }

    #[test]
    fn event_serializes_with_wire_names() {
        let mut classifier = EventClassifier::new(ClassifierThresholds::default(), 0.01);
        let event = classifier
            .submit(
                1_700_000_000.25,
                0.03,
                set(&[DetectorSource::StaLta, DetectorSource::Cusum, DetectorSource::Peak]),
                || vec!["50Hz".to_string()],
            )
            .expect("event");
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["severity"], "SHOCK");
        assert_eq!(json["symbol"], "▲");
        assert_eq!(json["sources"], serde_json::json!(["STA/LTA", "CUSUM", "PEAK"]));
        assert_eq!(json["bands"][0], "50Hz");
        assert_eq!(event.time.len(), 12);
        assert!(event.time.ends_with(".250"));
    }
}
