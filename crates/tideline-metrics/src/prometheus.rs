//! Prometheus text exposition format.
//!
//! Renders the current metric values for scraping by a Prometheus server
//! or compatible agent.

use crate::sink::TidelineMetrics;

/// Render metrics into Prometheus text format.
pub fn render_prometheus(metrics: &TidelineMetrics) -> String {
    let mut out = String::new();

    out.push_str("# HELP poll_trigger_tracked_images How many images are tracked by poll trigger\n");
    out.push_str("# TYPE poll_trigger_tracked_images gauge\n");
    out.push_str(&format!(
        "poll_trigger_tracked_images {}\n",
        metrics.tracked_images()
    ));

    out.push_str("# HELP tideline_release_upgrades_total Release upgrades attempted, by result.\n");
    out.push_str("# TYPE tideline_release_upgrades_total counter\n");
    out.push_str(&format!(
        "tideline_release_upgrades_total{{result=\"success\"}} {}\n",
        metrics.upgrades_succeeded()
    ));
    out.push_str(&format!(
        "tideline_release_upgrades_total{{result=\"failure\"}} {}\n",
        metrics.upgrades_failed()
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MetricsSink, UpgradeOutcome};

    #[test]
    fn render_fresh_metrics() {
        let output = render_prometheus(&TidelineMetrics::new());
        assert!(output.contains("# TYPE poll_trigger_tracked_images gauge"));
        assert!(output.contains("poll_trigger_tracked_images 0\n"));
        assert!(output.contains("tideline_release_upgrades_total{result=\"success\"} 0"));
    }

    #[test]
    fn render_after_updates() {
        let metrics = TidelineMetrics::new();
        metrics.set_tracked_images(3);
        metrics.record_upgrade(UpgradeOutcome::Succeeded);
        metrics.record_upgrade(UpgradeOutcome::Failed);
        metrics.record_upgrade(UpgradeOutcome::Failed);

        let output = render_prometheus(&metrics);
        assert!(output.contains("poll_trigger_tracked_images 3\n"));
        assert!(output.contains("tideline_release_upgrades_total{result=\"success\"} 1"));
        assert!(output.contains("tideline_release_upgrades_total{result=\"failure\"} 2"));
    }

    #[test]
    fn every_sample_line_has_a_value() {
        let output = render_prometheus(&TidelineMetrics::new());
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value = line.rsplit(' ').next().unwrap();
            assert!(value.parse::<f64>().is_ok(), "bad sample line: {line}");
        }
    }
}
