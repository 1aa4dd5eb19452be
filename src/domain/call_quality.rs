//! Call quality monitoring
//!
//! Scores transport statistics sampled from the peer connection with a
//! simplified E-model and reduces them to the coarse rating the call UI shows.

use crate::domain::media::TransportStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Quality of Service metrics for a call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosMetrics {
    /// Packet loss percentage (0.0 - 100.0)
    pub packet_loss_percent: f64,
    /// Jitter in milliseconds
    pub jitter_ms: f64,
    /// Round-trip time in milliseconds
    pub rtt_ms: f64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Mean Opinion Score (1.0 - 5.0)
    pub mos: f64,
    pub codec: String,
}

impl Default for QosMetrics {
    fn default() -> Self {
        Self {
            packet_loss_percent: 0.0,
            jitter_ms: 0.0,
            rtt_ms: 0.0,
            packets_received: 0,
            packets_lost: 0,
            bytes_sent: 0,
            bytes_received: 0,
            mos: 4.5,
            codec: "opus".to_string(),
        }
    }
}

impl QosMetrics {
    pub fn from_stats(stats: &TransportStats) -> Self {
        let mut metrics = Self {
            jitter_ms: stats.jitter_ms,
            rtt_ms: stats.rtt_ms,
            packets_received: stats.packets_received,
            packets_lost: stats.packets_lost,
            bytes_sent: stats.bytes_sent,
            bytes_received: stats.bytes_received,
            codec: stats.codec.clone().unwrap_or_else(|| "opus".to_string()),
            ..Default::default()
        };
        metrics.calculate_packet_loss();
        metrics.calculate_mos();
        metrics
    }

    /// Loss relative to what should have arrived
    pub fn calculate_packet_loss(&mut self) {
        let expected = self.packets_received + self.packets_lost;
        self.packet_loss_percent = if expected > 0 {
            (self.packets_lost as f64 / expected as f64) * 100.0
        } else {
            0.0
        };
    }

    /// E-model: R = 93.2 - Id - Ie, mapped onto MOS 1.0 - 4.5
    pub fn calculate_mos(&mut self) {
        // Delay impairment from one-way delay
        let delay_ms = self.rtt_ms / 2.0;
        let id = if delay_ms < 177.3 {
            delay_ms / 177.3 * 25.0
        } else {
            25.0 + (delay_ms - 177.3) * 0.1
        };

        let codec_ie = match self.codec.to_ascii_lowercase().as_str() {
            "pcmu" | "pcma" => 0.0,
            "opus" => 5.0,
            "g722" => 7.0,
            "vp8" | "vp9" | "h264" => 5.0,
            _ => 10.0,
        };
        let loss_ie = self.packet_loss_percent * 2.5;
        let jitter_ie = if self.jitter_ms > 20.0 {
            (self.jitter_ms - 20.0) * 0.5
        } else {
            0.0
        };

        let r = (93.2 - id - codec_ie - loss_ie - jitter_ie).clamp(0.0, 100.0);
        let mos = 1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7.0 * 1e-6;
        self.mos = mos.clamp(1.0, 4.5);
    }

    pub fn rating(&self) -> ConnectionQuality {
        if self.mos >= 4.0 {
            ConnectionQuality::Excellent
        } else if self.mos >= 3.6 {
            ConnectionQuality::Good
        } else {
            ConnectionQuality::Poor
        }
    }
}

/// Rating surfaced to the call UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Unknown,
}

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Poor => "poor",
            ConnectionQuality::Unknown => "unknown",
        }
    }
}

/// Quality alert types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QualityAlert {
    HighPacketLoss { loss_percent: f64, threshold: f64 },
    HighJitter { jitter_ms: f64, threshold: f64 },
    HighLatency { rtt_ms: f64, threshold: f64 },
    LowMos { mos: f64, threshold: f64 },
    QualityDegradation { previous_mos: f64, current_mos: f64 },
}

/// Quality alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub packet_loss_percent: f64,
    pub jitter_ms: f64,
    pub rtt_ms: f64,
    pub min_mos: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            packet_loss_percent: 5.0,
            jitter_ms: 30.0,
            rtt_ms: 300.0,
            min_mos: 3.6,
        }
    }
}

/// Rolling quality state for one call session
pub struct QualityMonitor {
    started_at: DateTime<Utc>,
    thresholds: QualityThresholds,
    current: Option<QosMetrics>,
    history: VecDeque<QosMetrics>,
    max_history_size: usize,
    rating: ConnectionQuality,
    alerts_raised: usize,
}

impl QualityMonitor {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            started_at: Utc::now(),
            thresholds,
            current: None,
            history: VecDeque::new(),
            max_history_size: 60,
            rating: ConnectionQuality::Unknown,
            alerts_raised: 0,
        }
    }

    /// Record a sample; returns the new rating when it changed
    pub fn record(&mut self, stats: &TransportStats) -> Option<ConnectionQuality> {
        let metrics = QosMetrics::from_stats(stats);
        let rating = metrics.rating();

        self.history.push_back(metrics.clone());
        if self.history.len() > self.max_history_size {
            self.history.pop_front();
        }
        self.current = Some(metrics);

        if rating != self.rating {
            self.rating = rating;
            Some(rating)
        } else {
            None
        }
    }

    /// Alerts for the latest sample
    pub fn check_alerts(&mut self) -> Vec<QualityAlert> {
        let Some(metrics) = self.current.as_ref() else {
            return Vec::new();
        };
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        if metrics.packet_loss_percent > t.packet_loss_percent {
            alerts.push(QualityAlert::HighPacketLoss {
                loss_percent: metrics.packet_loss_percent,
                threshold: t.packet_loss_percent,
            });
        }
        if metrics.jitter_ms > t.jitter_ms {
            alerts.push(QualityAlert::HighJitter {
                jitter_ms: metrics.jitter_ms,
                threshold: t.jitter_ms,
            });
        }
        if metrics.rtt_ms > t.rtt_ms {
            alerts.push(QualityAlert::HighLatency {
                rtt_ms: metrics.rtt_ms,
                threshold: t.rtt_ms,
            });
        }
        if metrics.mos < t.min_mos {
            alerts.push(QualityAlert::LowMos {
                mos: metrics.mos,
                threshold: t.min_mos,
            });
        }
        if let Some(previous) = self.history.get(self.history.len().saturating_sub(5)) {
            if previous.mos - metrics.mos > 0.5 {
                alerts.push(QualityAlert::QualityDegradation {
                    previous_mos: previous.mos,
                    current_mos: metrics.mos,
                });
            }
        }

        self.alerts_raised += alerts.len();
        alerts
    }

    pub fn rating(&self) -> ConnectionQuality {
        self.rating
    }

    pub fn current(&self) -> Option<&QosMetrics> {
        self.current.as_ref()
    }

    /// Summary over everything recorded so far
    pub fn report(&self) -> QualityReport {
        let count = self.history.len();
        let average_mos = if count > 0 {
            self.history.iter().map(|m| m.mos).sum::<f64>() / count as f64
        } else {
            0.0
        };

        QualityReport {
            started_at: self.started_at,
            samples: count,
            average_mos,
            final_rating: self.rating,
            alerts_raised: self.alerts_raised,
        }
    }
}

/// Quality summary for a finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub started_at: DateTime<Utc>,
    pub samples: usize,
    pub average_mos: f64,
    pub final_rating: ConnectionQuality,
    pub alerts_raised: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(received: u64, lost: u64, jitter_ms: f64, rtt_ms: f64) -> TransportStats {
        TransportStats {
            packets_sent: received,
            packets_received: received,
            packets_lost: lost,
            bytes_sent: received * 160,
            bytes_received: received * 160,
            jitter_ms,
            rtt_ms,
            codec: Some("opus".to_string()),
        }
    }

    #[test]
    fn test_packet_loss_calculation() {
        let metrics = QosMetrics::from_stats(&stats(95, 5, 0.0, 0.0));
        assert!((metrics.packet_loss_percent - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_clean_link_is_excellent() {
        let metrics = QosMetrics::from_stats(&stats(1000, 0, 5.0, 40.0));
        assert!(metrics.mos >= 4.0 && metrics.mos <= 4.5);
        assert_eq!(metrics.rating(), ConnectionQuality::Excellent);
    }

    #[test]
    fn test_lossy_link_is_poor() {
        let metrics = QosMetrics::from_stats(&stats(700, 300, 80.0, 600.0));
        assert_eq!(metrics.rating(), ConnectionQuality::Poor);
    }

    #[test]
    fn test_monitor_reports_only_changes() {
        let mut monitor = QualityMonitor::new(QualityThresholds::default());
        assert_eq!(monitor.rating(), ConnectionQuality::Unknown);

        assert_eq!(
            monitor.record(&stats(1000, 0, 5.0, 40.0)),
            Some(ConnectionQuality::Excellent)
        );
        assert_eq!(monitor.record(&stats(2000, 0, 5.0, 40.0)), None);
        assert_eq!(
            monitor.record(&stats(700, 300, 80.0, 600.0)),
            Some(ConnectionQuality::Poor)
        );
    }

    #[test]
    fn test_alerts() {
        let mut monitor = QualityMonitor::new(QualityThresholds::default());
        assert!(monitor.check_alerts().is_empty());

        monitor.record(&stats(80, 20, 50.0, 400.0));
        let alerts = monitor.check_alerts();
        assert!(alerts.iter().any(|a| matches!(a, QualityAlert::HighPacketLoss { .. })));
        assert!(alerts.iter().any(|a| matches!(a, QualityAlert::HighJitter { .. })));
        assert!(alerts.iter().any(|a| matches!(a, QualityAlert::HighLatency { .. })));
        assert_eq!(monitor.report().alerts_raised, alerts.len());
    }

    #[test]
    fn test_report_average() {
        let mut monitor = QualityMonitor::new(QualityThresholds::default());
        for _ in 0..3 {
            monitor.record(&stats(1000, 0, 5.0, 40.0));
        }
        let report = monitor.report();
        assert_eq!(report.samples, 3);
        assert!(report.average_mos > 4.0);
    }
}
