/// Actor record: the per-individual state an actor carries between events.
///
/// Each actor remembers several *candidate* future instants — the event
/// kind the rest of its state says should happen next if nothing changes —
/// but contributes at most one entry to the scheduler at a time (`pending`
/// names which). A handler recomputes the subset of candidates it cares
/// about, then picks the new earliest without touching the others; see
/// `transitions.rs`.
use std::fmt;

/// Disease/compartment state. Eleven states: the five "pulmonary" TB
/// progression states plus three non-pulmonary duals that mirror Primary,
/// Reactivation, and Reinf-disease for extrapulmonary presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiseaseState {
    Uninfected,
    Immune,
    RecentInf,
    RemoteInf,
    Reinf,
    Primary,
    Reactivation,
    ReinfDisease,
    PrimaryNonPulmonary,
    ReactivationNonPulmonary,
    ReinfDiseaseNonPulmonary,
}

impl DiseaseState {
    /// All eleven states, in a fixed order used to size/index the global
    /// counters map.
    pub const ALL: [DiseaseState; 11] = [
        DiseaseState::Uninfected,
        DiseaseState::Immune,
        DiseaseState::RecentInf,
        DiseaseState::RemoteInf,
        DiseaseState::Reinf,
        DiseaseState::Primary,
        DiseaseState::Reactivation,
        DiseaseState::ReinfDisease,
        DiseaseState::PrimaryNonPulmonary,
        DiseaseState::ReactivationNonPulmonary,
        DiseaseState::ReinfDiseaseNonPulmonary,
    ];

    /// Whether this state represents active disease (as opposed to latent
    /// infection or the uninfected/immune states).
    pub fn is_disease(&self) -> bool {
        matches!(
            self,
            DiseaseState::Primary
                | DiseaseState::Reactivation
                | DiseaseState::ReinfDisease
                | DiseaseState::PrimaryNonPulmonary
                | DiseaseState::ReactivationNonPulmonary
                | DiseaseState::ReinfDiseaseNonPulmonary
        )
    }
}

impl fmt::Display for DiseaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiseaseState::Uninfected => "Uninfected",
            DiseaseState::Immune => "Immune",
            DiseaseState::RecentInf => "RecentInf",
            DiseaseState::RemoteInf => "RemoteInf",
            DiseaseState::Reinf => "Reinf",
            DiseaseState::Primary => "Primary",
            DiseaseState::Reactivation => "Reactivation",
            DiseaseState::ReinfDisease => "ReinfDisease",
            DiseaseState::PrimaryNonPulmonary => "PrimaryNonPulmonary",
            DiseaseState::ReactivationNonPulmonary => "ReactivationNonPulmonary",
            DiseaseState::ReinfDiseaseNonPulmonary => "ReinfDiseaseNonPulmonary",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

/// Birth cohort: whether the actor was born outside the simulated
/// population (immigrated in) or born inside it. Also the partition used
/// for same-cohort transmission selection and for compact-on-removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    BornOutside,
    BornInside,
}

/// Which candidate instant is the one currently sitting in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    Birth,
    StateExit,
    Death,
    DiseaseOnset,
    Transmission,
    Mutation,
    Emigration,
    Report,
}

impl CandidateKind {
    pub const ALL: [CandidateKind; 8] = [
        CandidateKind::Birth,
        CandidateKind::StateExit,
        CandidateKind::Death,
        CandidateKind::DiseaseOnset,
        CandidateKind::Transmission,
        CandidateKind::Mutation,
        CandidateKind::Emigration,
        CandidateKind::Report,
    ];
}

/// The fixed-width record of named candidate instants. Exactly one of these
/// — the one named by the owning actor's `pending` — is the actor's live
/// scheduler entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateTimes {
    pub birth: Option<f64>,
    pub state_exit: Option<f64>,
    pub death: Option<f64>,
    pub disease_onset: Option<f64>,
    pub transmission: Option<f64>,
    pub mutation: Option<f64>,
    pub emigration: Option<f64>,
    pub report: Option<f64>,
}

impl CandidateTimes {
    fn get(&self, kind: CandidateKind) -> Option<f64> {
        match kind {
            CandidateKind::Birth => self.birth,
            CandidateKind::StateExit => self.state_exit,
            CandidateKind::Death => self.death,
            CandidateKind::DiseaseOnset => self.disease_onset,
            CandidateKind::Transmission => self.transmission,
            CandidateKind::Mutation => self.mutation,
            CandidateKind::Emigration => self.emigration,
            CandidateKind::Report => self.report,
        }
    }

    pub fn set(&mut self, kind: CandidateKind, value: Option<f64>) {
        match kind {
            CandidateKind::Birth => self.birth = value,
            CandidateKind::StateExit => self.state_exit = value,
            CandidateKind::Death => self.death = value,
            CandidateKind::DiseaseOnset => self.disease_onset = value,
            CandidateKind::Transmission => self.transmission = value,
            CandidateKind::Mutation => self.mutation = value,
            CandidateKind::Emigration => self.emigration = value,
            CandidateKind::Report => self.report = value,
        }
    }

    /// Select the earliest set candidate, breaking ties by the given
    /// priority order (earlier in `priority` wins). Each handler documents
    /// its own ordering; see `transitions.rs`.
    pub fn earliest(&self, priority: &[CandidateKind]) -> Option<(CandidateKind, f64)> {
        priority
            .iter()
            .filter_map(|&k| self.get(k).map(|t| (k, t)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    }
}

/// One individual's complete record in the population register.
#[derive(Debug, Clone)]
pub struct Actor {
    pub candidates: CandidateTimes,
    pub pending: CandidateKind,
    pub state: DiseaseState,
    pub sex: Sex,
    pub cohort: Cohort,
    /// E.g. an HIV co-infection marker; domain-specific, opaque to the core.
    pub subcohort: u8,
    /// The background natural-lifespan instant, sampled once at creation
    /// and never touched again. `candidates.death` is the instant actually
    /// competing in the queue right now — during active disease it may be
    /// pulled forward to an accelerated disease-death guard; recovering
    /// restores `candidates.death` from this field rather than losing the
    /// original draw.
    pub natural_death: Option<f64>,
}

impl Actor {
    pub fn new(sex: Sex, cohort: Cohort) -> Self {
        Actor {
            candidates: CandidateTimes::default(),
            pending: CandidateKind::Death,
            state: DiseaseState::Uninfected,
            sex,
            cohort,
            natural_death: None,
            subcohort: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_picks_minimum_time() {
        let mut c = CandidateTimes::default();
        c.set(CandidateKind::Death, Some(10.0));
        c.set(CandidateKind::Report, Some(3.0));
        c.set(CandidateKind::Emigration, Some(7.0));
        let order = [
            CandidateKind::Report,
            CandidateKind::Death,
            CandidateKind::Emigration,
        ];
        assert_eq!(c.earliest(&order), Some((CandidateKind::Report, 3.0)));
    }

    #[test]
    fn earliest_breaks_ties_by_priority_order() {
        let mut c = CandidateTimes::default();
        c.set(CandidateKind::Death, Some(5.0));
        c.set(CandidateKind::Emigration, Some(5.0));
        let order = [CandidateKind::Emigration, CandidateKind::Death];
        assert_eq!(c.earliest(&order), Some((CandidateKind::Emigration, 5.0)));
    }

    #[test]
    fn earliest_none_when_all_candidates_unset() {
        let c = CandidateTimes::default();
        assert_eq!(c.earliest(&CandidateKind::ALL), None);
    }
}
