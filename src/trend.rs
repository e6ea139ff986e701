//! Day-over-day anomaly alerts.
//!
//! Each detector is independent and returns nothing when its series holds
//! fewer than two entries. `detect` concatenates them and orders the result
//! by severity, which downstream renderers rely on.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::{Config, TrendThresholds};
use crate::history::Series;
use crate::matcher::EntityMatcher;
use crate::models::{Alert, AlertKind, Category, Severity, SignalRecord};
use crate::scoring::rank_map;

/// Everything the detectors look at for one run.
#[derive(Debug, Clone, Copy)]
pub struct TrendInputs<'a> {
    /// Run date. Count series without an entry for it are not compared.
    pub date: NaiveDate,
    pub as_of: DateTime<Utc>,
    pub momentum: &'a Series,
    pub hiring: &'a Series,
    pub installs: &'a Series,
    pub records: &'a [SignalRecord],
}

pub struct TrendDetector {
    thresholds: TrendThresholds,
    funding_keywords: Vec<String>,
    matcher: EntityMatcher,
}

impl TrendDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            thresholds: config.trend.clone(),
            funding_keywords: config
                .keywords
                .funding_alert
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            matcher: EntityMatcher::from_config(config),
        }
    }

    pub fn detect(&self, inputs: &TrendInputs<'_>) -> Vec<Alert> {
        let observed_today = |series: &Series| {
            series.latest().is_some_and(|latest| latest.date == inputs.date)
        };
        let mut alerts = Vec::new();
        if observed_today(inputs.hiring) {
            alerts.extend(self.hiring_alerts(inputs.hiring));
        }
        if observed_today(inputs.installs) {
            alerts.extend(self.install_alerts(inputs.installs));
        }
        alerts.extend(self.momentum_alerts(inputs.momentum));
        alerts.extend(self.pricing_alerts(inputs.records, inputs.as_of));
        alerts.extend(self.funding_alerts(inputs.records));
        sort_by_severity(&mut alerts);
        alerts
    }

    pub fn hiring_alerts(&self, series: &Series) -> Vec<Alert> {
        let Some((previous, latest)) = series.last_two() else {
            return Vec::new();
        };
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        for (slug, &current) in &latest.scores {
            let before = previous.scores.get(slug).copied().unwrap_or(0);
            let delta = current - before;
            let percent = if before > 0 {
                delta as f64 / before as f64 * 100.0
            } else if current > 0 {
                100.0
            } else {
                0.0
            };

            let surge = delta >= t.hiring_surge_delta
                || (percent >= t.hiring_surge_percent && current > t.hiring_surge_min_count);
            let drop = delta <= -t.hiring_drop_delta
                || (percent <= -t.hiring_drop_percent && before > t.hiring_drop_min_previous);

            let (kind, severity, verb) = if surge {
                let severity = if delta >= t.hiring_high_delta {
                    Severity::High
                } else {
                    Severity::Medium
                };
                (AlertKind::HiringSurge, severity, "up")
            } else if drop {
                let severity = if delta <= -t.hiring_high_delta {
                    Severity::High
                } else {
                    Severity::Medium
                };
                (AlertKind::HiringDrop, severity, "down")
            } else {
                continue;
            };

            alerts.push(Alert {
                kind,
                entity: Some(slug.clone()),
                severity,
                message: format!(
                    "{slug} open roles {verb} {} ({before} -> {current}, {percent:+.0}%)",
                    delta.abs()
                ),
                delta: Some(delta),
                percent: Some(round1(percent)),
            });
        }

        alerts
    }

    /// Compares against the last available snapshot, which is not
    /// necessarily yesterday; growth is normalised per elapsed day.
    pub fn install_alerts(&self, series: &Series) -> Vec<Alert> {
        let Some((previous, latest)) = series.last_two() else {
            return Vec::new();
        };
        let t = &self.thresholds;
        let days = (latest.date - previous.date).num_days().max(1);
        let mut alerts = Vec::new();

        for (slug, &current) in &latest.scores {
            let Some(&before) = previous.scores.get(slug) else {
                continue;
            };
            let per_day = (current - before) / days;
            let threshold = if before > t.install_large_base {
                t.install_large_daily
            } else {
                t.install_small_daily
            };
            if per_day <= threshold {
                continue;
            }
            let severity = if per_day > threshold * 2 {
                Severity::High
            } else {
                Severity::Medium
            };
            let percent = (before > 0).then(|| round1((current - before) as f64 / before as f64 * 100.0));
            alerts.push(Alert {
                kind: AlertKind::InstallSpike,
                entity: Some(slug.clone()),
                severity,
                message: format!(
                    "{slug} gained {per_day} installs/day since {} ({before} -> {current})",
                    previous.date
                ),
                delta: Some(per_day),
                percent,
            });
        }

        alerts
    }

    pub fn momentum_alerts(&self, series: &Series) -> Vec<Alert> {
        let Some((previous, latest)) = series.last_two() else {
            return Vec::new();
        };
        let t = &self.thresholds;
        let before = rank_map(&previous.scores);
        let now = rank_map(&latest.scores);
        let mut alerts = Vec::new();

        for (slug, &rank) in &now {
            let Some(&old_rank) = before.get(slug) else {
                continue;
            };
            // Overtaken without losing points is not a momentum change.
            if previous.scores.get(slug) == latest.scores.get(slug) {
                continue;
            }
            let moved = old_rank as i64 - rank as i64;
            if moved.unsigned_abs() < t.rank_shift as u64 {
                continue;
            }
            let severity = if moved.unsigned_abs() >= t.rank_shift_high as u64 {
                Severity::High
            } else {
                Severity::Medium
            };
            let (kind, verb) = if moved > 0 {
                (AlertKind::MomentumSurge, "climbed")
            } else {
                (AlertKind::MomentumDrop, "fell")
            };
            alerts.push(Alert {
                kind,
                entity: Some(slug.clone()),
                severity,
                message: format!(
                    "{slug} {verb} {} places in momentum (#{old_rank} -> #{rank})",
                    moved.abs()
                ),
                delta: Some(moved),
                percent: None,
            });
        }

        alerts
    }

    /// Every pricing-page change inside the window is high severity.
    pub fn pricing_alerts(&self, records: &[SignalRecord], as_of: DateTime<Utc>) -> Vec<Alert> {
        let window = Duration::hours(self.thresholds.pricing_window_hours);
        records
            .iter()
            .filter(|r| r.category == Category::Pricing)
            .filter(|r| {
                r.timestamp
                    .map(|ts| ts <= as_of && as_of - ts <= window)
                    .unwrap_or(false)
            })
            .map(|r| {
                let entity = self
                    .matcher
                    .resolve(r.entity.as_deref(), &r.raw_text)
                    .map(str::to_string);
                Alert {
                    kind: AlertKind::PricingChange,
                    entity,
                    severity: Severity::High,
                    message: format!("Pricing change: {}", r.raw_text),
                    delta: None,
                    percent: None,
                }
            })
            .collect()
    }

    /// One alert per distinct headline mentioning a funding keyword.
    pub fn funding_alerts(&self, records: &[SignalRecord]) -> Vec<Alert> {
        let mut seen = HashSet::new();
        let mut alerts = Vec::new();

        for record in records
            .iter()
            .filter(|r| matches!(r.category, Category::Funding | Category::News))
        {
            let title = record.raw_text.trim();
            let lower = title.to_lowercase();
            if !self.funding_keywords.iter().any(|k| lower.contains(k.as_str())) {
                continue;
            }
            if !seen.insert(title.to_string()) {
                continue;
            }
            alerts.push(Alert {
                kind: AlertKind::FundingNews,
                entity: self
                    .matcher
                    .resolve(record.entity.as_deref(), title)
                    .map(str::to_string),
                severity: Severity::High,
                message: format!("Funding news: {title}"),
                delta: None,
                percent: None,
            });
        }

        alerts
    }
}

/// Stable sort, `High` first.
pub fn sort_by_severity(alerts: &mut [Alert]) {
    alerts.sort_by_key(|a| a.severity);
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, Snapshot};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn detector() -> TrendDetector {
        let config = Config {
            entities: vec![
                Entity::new("acme", "Acme", &["acme"]),
                Entity::new("globex", "Globex", &["globex"]),
            ],
            ..Config::default()
        };
        TrendDetector::new(&config)
    }

    fn series(days: &[(u32, &[(&str, i64)])]) -> Series {
        let entries: Vec<Snapshot> = days
            .iter()
            .map(|(d, values)| {
                let scores: BTreeMap<String, i64> =
                    values.iter().map(|(s, v)| (s.to_string(), *v)).collect();
                Snapshot::new(NaiveDate::from_ymd_opt(2025, 4, *d).unwrap(), scores)
            })
            .collect();
        Series::from(entries)
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 18, 0, 0).unwrap()
    }

    #[test]
    fn fewer_than_two_entries_yield_nothing() {
        let d = detector();
        let empty = Series::default();
        let single = series(&[(1, &[("acme", 50)])]);
        for s in [&empty, &single] {
            assert!(d.hiring_alerts(s).is_empty());
            assert!(d.install_alerts(s).is_empty());
            assert!(d.momentum_alerts(s).is_empty());
        }
        let inputs = TrendInputs {
            date: as_of().date_naive(),
            as_of: as_of(),
            momentum: &single,
            hiring: &empty,
            installs: &single,
            records: &[],
        };
        assert!(d.detect(&inputs).is_empty());
    }

    #[test]
    fn hiring_delta_of_ten_is_a_medium_surge() {
        let alerts = detector().hiring_alerts(&series(&[(1, &[("acme", 2)]), (2, &[("acme", 12)])]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HiringSurge);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].delta, Some(10));
        assert_eq!(alerts[0].percent, Some(500.0));
    }

    #[test]
    fn hiring_surge_high_and_percent_rule() {
        let alerts = detector().hiring_alerts(&series(&[
            (1, &[("acme", 10), ("globex", 4)]),
            (2, &[("acme", 35), ("globex", 7)]),
        ]));
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].entity.as_deref(), Some("acme"));
        assert_eq!(alerts[0].severity, Severity::High);
        // globex: +3 is 75% with more than five open roles
        assert_eq!(alerts[1].kind, AlertKind::HiringSurge);
        assert_eq!(alerts[1].severity, Severity::Medium);
    }

    #[test]
    fn hiring_drops() {
        let alerts = detector().hiring_alerts(&series(&[
            (1, &[("acme", 40), ("globex", 12)]),
            (2, &[("acme", 15), ("globex", 8)]),
        ]));
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.kind == AlertKind::HiringDrop));
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[1].severity, Severity::Medium);
        assert_eq!(alerts[1].delta, Some(-4));
    }

    #[test]
    fn small_hiring_moves_are_quiet() {
        let alerts = detector().hiring_alerts(&series(&[
            (1, &[("acme", 3), ("globex", 9)]),
            (2, &[("acme", 5), ("globex", 7)]),
        ]));
        assert!(alerts.is_empty());
    }

    #[test]
    fn install_threshold_depends_on_base() {
        let alerts = detector().install_alerts(&series(&[
            (1, &[("acme", 2_000_000), ("globex", 100_000)]),
            (2, &[("acme", 2_050_000), ("globex", 125_000)]),
        ]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entity.as_deref(), Some("globex"));
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].delta, Some(25_000));
    }

    #[test]
    fn install_growth_is_per_day_across_gaps() {
        let alerts = detector().install_alerts(&series(&[
            (1, &[("acme", 100_000)]),
            (4, &[("acme", 136_000)]),
        ]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].delta, Some(12_000));
        assert_eq!(alerts[0].severity, Severity::Medium);
    }

    #[test]
    fn momentum_rank_shifts() {
        let before: Vec<(&str, i64)> = vec![
            ("a", 100), ("b", 90), ("c", 80), ("d", 70), ("e", 60), ("f", 50),
        ];
        let after: Vec<(&str, i64)> = vec![
            ("a", 10), ("b", 90), ("c", 80), ("d", 70), ("e", 60), ("f", 200),
        ];
        let alerts = detector().momentum_alerts(&series(&[(1, &before), (2, &after)]));
        assert_eq!(alerts.len(), 2);
        let a = alerts.iter().find(|x| x.entity.as_deref() == Some("a")).unwrap();
        assert_eq!(a.kind, AlertKind::MomentumDrop);
        assert_eq!(a.severity, Severity::High);
        let f = alerts.iter().find(|x| x.entity.as_deref() == Some("f")).unwrap();
        assert_eq!(f.kind, AlertKind::MomentumSurge);
        assert_eq!(f.delta, Some(5));
    }

    #[test]
    fn overtaken_entities_with_unchanged_scores_stay_quiet() {
        let alerts = detector().momentum_alerts(&series(&[
            (1, &[("a", 0), ("b", 0), ("c", 0), ("x", 0), ("y", 0), ("z", 0)]),
            (2, &[("a", 0), ("b", 0), ("c", 0), ("x", 5), ("y", 5), ("z", 5)]),
        ]));
        assert!(alerts.is_empty());
    }

    #[test]
    fn count_series_without_todays_entry_are_not_compared() {
        let d = detector();
        let hiring = series(&[(1, &[("acme", 2)]), (2, &[("acme", 12)])]);
        let installs = series(&[(1, &[("acme", 100_000)]), (2, &[("acme", 200_000)])]);
        let empty = Series::default();
        let on = |day: u32| TrendInputs {
            date: NaiveDate::from_ymd_opt(2025, 4, day).unwrap(),
            as_of: as_of(),
            momentum: &empty,
            hiring: &hiring,
            installs: &installs,
            records: &[],
        };

        let fresh = d.detect(&on(2));
        assert_eq!(fresh.len(), 2);
        assert!(d.detect(&on(3)).is_empty());
        assert!(d.detect(&on(4)).is_empty());
    }

    #[test]
    fn pricing_changes_inside_window_are_high() {
        let records = vec![
            SignalRecord::new(Category::Pricing, "Acme: Pro plan now $30")
                .with_entity("Acme")
                .at(as_of() - Duration::hours(3)),
            SignalRecord::new(Category::Pricing, "Globex: team tier added")
                .with_entity("Globex")
                .at(as_of() - Duration::hours(30)),
            SignalRecord::new(Category::Pricing, "Acme: undated"),
        ];
        let alerts = detector().pricing_alerts(&records, as_of());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entity.as_deref(), Some("acme"));
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[test]
    fn funding_alerts_dedupe_exact_titles() {
        let records = vec![
            SignalRecord::new(Category::Funding, "Acme raises $50M Series B"),
            SignalRecord::new(Category::News, "Acme raises $50M Series B"),
            SignalRecord::new(Category::News, "Globex valuation doubles"),
            SignalRecord::new(Category::News, "Globex ships dark mode"),
        ];
        let alerts = detector().funding_alerts(&records);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].entity.as_deref(), Some("acme"));
        assert_eq!(alerts[1].entity.as_deref(), Some("globex"));
    }

    #[test]
    fn detect_orders_by_severity() {
        let d = detector();
        let hiring = series(&[(1, &[("acme", 2)]), (2, &[("acme", 12)])]);
        let records = vec![SignalRecord::new(Category::Funding, "Globex raised a seed round")];
        let empty = Series::default();
        let alerts = d.detect(&TrendInputs {
            date: NaiveDate::from_ymd_opt(2025, 4, 2).unwrap(),
            as_of: as_of(),
            momentum: &empty,
            hiring: &hiring,
            installs: &empty,
            records: &records,
        });
        assert_eq!(alerts.len(), 2);
        assert!(alerts.windows(2).all(|w| w[0].severity <= w[1].severity));
        assert_eq!(alerts[0].kind, AlertKind::FundingNews);
    }

    #[test]
    fn severity_sort_is_stable() {
        let alert = |msg: &str, severity| Alert {
            kind: AlertKind::FundingNews,
            entity: None,
            severity,
            message: msg.to_string(),
            delta: None,
            percent: None,
        };
        let mut alerts = vec![
            alert("1", Severity::Low),
            alert("2", Severity::High),
            alert("3", Severity::Medium),
            alert("4", Severity::High),
        ];
        sort_by_severity(&mut alerts);
        let order: Vec<&str> = alerts.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(order, vec!["2", "4", "3", "1"]);
    }
}
