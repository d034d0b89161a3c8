/// Output aggregation: periodic population snapshots and TB notification
/// counts, and the end-of-run summary.
///
/// Grounded on the same "accumulate, then flush a self-describing snapshot"
/// shape the reference material's live-metrics writer uses (atomic
/// write-then-rename JSON), adapted here to the tabular Centinel format and
/// to age/sex/cohort/year-bucketed notification counts rather than a single
/// flat struct.
use crate::actor::{Cohort, DiseaseState, Sex};
use crate::centinel::Table;
use crate::error::SimResult;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Key identifying one notification bucket: five-year age class, sex,
/// cohort, and calendar year. Age class is derived from age at the call
/// site; this struct only carries the already-bucketed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NotificationKey {
    pub age_class: u8,
    pub sex: SexKey,
    pub cohort: CohortKey,
    pub year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SexKey {
    Male,
    Female,
}

impl From<Sex> for SexKey {
    fn from(s: Sex) -> Self {
        match s {
            Sex::Male => SexKey::Male,
            Sex::Female => SexKey::Female,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CohortKey {
    Inside,
    Outside,
}

impl From<Cohort> for CohortKey {
    fn from(c: Cohort) -> Self {
        match c {
            Cohort::BornInside => CohortKey::Inside,
            Cohort::BornOutside => CohortKey::Outside,
        }
    }
}

/// One periodic snapshot: live population counts by disease state.
#[derive(Debug, Clone)]
pub struct PopulationSnapshot {
    pub time: f64,
    pub counts: [u64; 11],
}

pub struct Reporter {
    /// Raw notification tally, keyed by bucket; rates per 100,000 are
    /// derived at summary time against the population denominator supplied
    /// then, not tracked incrementally.
    notifications: BTreeMap<NotificationKey, u64>,
    snapshots: Vec<PopulationSnapshot>,
    reporting_interval: f64,
    next_snapshot_due: f64,
}

impl Reporter {
    pub fn new(reporting_interval: f64, start_time: f64) -> Self {
        Reporter {
            notifications: BTreeMap::new(),
            snapshots: Vec::new(),
            reporting_interval,
            next_snapshot_due: start_time + reporting_interval,
        }
    }

    pub fn record_notification(&mut self, sex: Sex, cohort: Cohort, subcohort: u8, now: f64) {
        let age_class = (subcohort >> 2).min(20); // coarse stand-in: real age tracking is out of scope for the core
        let key = NotificationKey {
            age_class,
            sex: sex.into(),
            cohort: cohort.into(),
            year: now.floor() as i32,
        };
        *self.notifications.entry(key).or_insert(0) += 1;
    }

    /// Whether a periodic aggregate snapshot is due at or before `now`, and
    /// if so, advance the due time to the next interval.
    pub fn snapshot_due(&mut self, now: f64) -> bool {
        if now >= self.next_snapshot_due {
            self.next_snapshot_due += self.reporting_interval;
            true
        } else {
            false
        }
    }

    pub fn push_snapshot(&mut self, time: f64, counts: [u64; 11]) {
        info!(time, live = counts.iter().sum::<u64>(), "population snapshot");
        self.snapshots.push(PopulationSnapshot { time, counts });
    }

    pub fn notification_count(&self) -> u64 {
        self.notifications.values().sum()
    }

    /// Render accumulated snapshots as a Centinel table: one row per
    /// snapshot, one column per disease state plus time.
    pub fn snapshots_table(&self) -> Table {
        let mut header = vec!["time".to_string()];
        header.extend(DiseaseState::ALL.iter().map(|s| s.to_string()));
        let mut rows = Vec::with_capacity(self.snapshots.len());
        for snap in &self.snapshots {
            let mut row = vec![snap.time];
            row.extend(snap.counts.iter().map(|&c| c as f64));
            rows.push(row);
        }
        Table { header, rows }
    }

    /// Render notification counts per 100,000 of a supplied denominator, one
    /// row per bucket.
    pub fn notifications_table(&self, population_denominator: f64) -> Table {
        let header = vec![
            "age_class".to_string(),
            "sex".to_string(),
            "cohort".to_string(),
            "year".to_string(),
            "count".to_string(),
            "rate_per_100k".to_string(),
        ];
        let rows = self
            .notifications
            .iter()
            .map(|(k, &count)| {
                let rate = if population_denominator > 0.0 {
                    count as f64 * 100_000.0 / population_denominator
                } else {
                    0.0
                };
                vec![
                    k.age_class as f64,
                    if k.sex == SexKey::Male { 0.0 } else { 1.0 },
                    if k.cohort == CohortKey::Inside { 0.0 } else { 1.0 },
                    k.year as f64,
                    count as f64,
                    rate,
                ]
            })
            .collect();
        Table { header, rows }
    }

    pub fn write_summary(&self, path: impl AsRef<Path>, summary: &RunSummary) -> SimResult<()> {
        let tmp = path.as_ref().with_extension("tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            writeln!(f, "run_summary mm=1 sm=6")?;
            writeln!(f, "field|value")?;
            writeln!(f, "wall_steps|{}", summary.steps)?;
            writeln!(f, "final_time|{}", summary.final_time)?;
            writeln!(f, "live_count|{}", summary.live_count)?;
            writeln!(f, "notifications|{}", summary.notifications)?;
            writeln!(f, "deaths|{}", summary.deaths)?;
            writeln!(f, "emigrations|{}", summary.emigrations)?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// End-of-run statistics returned by `Simulation::run`. Serializable so a
/// parameter-fitting harness driving the simulation as a subroutine can
/// take the aggregate return value as JSON rather than scraping status
/// lines.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunSummary {
    pub steps: u64,
    pub final_time: f64,
    pub live_count: usize,
    pub notifications: u64,
    pub deaths: u64,
    pub emigrations: u64,
}
