/// The transition engine: the core algorithm tying the scheduler, the
/// population register, and the RNG together.
///
/// Every domain event handler follows the same five-step pattern:
///   1. Update counters and the actor's `state` tag.
///   2. Recompute the candidate instants the handler cares about.
///   3. Cancel a stale queue entry if one exists for an actor other than the
///      one currently firing (the firing actor's own entry was already
///      removed by `Scheduler::next`).
///   4. Select the earliest remaining candidate and `schedule` it.
///   5. Report which candidate won, via the returned `CandidateKind`.
///
/// Concrete TB transition *rates* are out of scope for this core — they are
/// supplied by a `TransitionRates` implementation (dynamic dispatch, per the
/// "distributions are configuration-selected" design note) so the engine
/// itself bakes in no epidemiology. `DefaultRates` below is one illustrative
/// implementation used by the tests and the demo binary; it is not a claim
/// about real TB parameter values.
use crate::actor::{Actor, CandidateKind, Cohort, DiseaseState, Sex};
use crate::error::{SimError, SimResult};
use crate::rng::{InverseCdfTable, Rng};
use crate::simulation::Simulation;
use tracing::debug;

/// A small positive nudge added whenever a sampled candidate would otherwise
/// land at or before the current clock.
pub const EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Pluggable distributions
// ---------------------------------------------------------------------------

/// Source of natural-lifespan draws. Three sources exist in the source
/// material: exponential, Gompertz, and an empirical table; modeled as a
/// trait so the choice is a run-time configuration decision.
pub trait LifespanModel: Send {
    /// Years remaining to natural death for an individual of the given sex
    /// and current age.
    fn years_remaining(&self, rng: &mut Rng, sex: Sex, age: f64) -> f64;
}

pub struct ExponentialLifespan {
    pub rate_per_year: f64,
}

impl LifespanModel for ExponentialLifespan {
    fn years_remaining(&self, rng: &mut Rng, _sex: Sex, _age: f64) -> f64 {
        rng.expon(self.rate_per_year)
    }
}

/// Gompertz hazard: instantaneous mortality hazard grows exponentially with
/// age, h(age) = a * exp(b * age). Remaining lifetime is drawn by inverting
/// the survival function at the current age.
pub struct GompertzLifespan {
    pub a: f64,
    pub b: f64,
}

impl LifespanModel for GompertzLifespan {
    fn years_remaining(&self, rng: &mut Rng, _sex: Sex, age: f64) -> f64 {
        let u = rng.rand().max(1e-12);
        let hazard_at_age = (self.a / self.b) * (self.b * age).exp();
        ((1.0 - u.ln() * self.b / hazard_at_age).ln()) / self.b
    }
}

pub struct EmpiricalLifespan {
    pub table: InverseCdfTable,
}

impl LifespanModel for EmpiricalLifespan {
    fn years_remaining(&self, rng: &mut Rng, _sex: Sex, age: f64) -> f64 {
        rng.rand_f(&self.table, age)
    }
}

/// Transition rates and branch probabilities. Out of scope per the
/// specification's own Non-goals ("the specific TB state-transition rules
/// and parameter values"); this trait is the seam an external collaborator
/// plugs concrete values into.
pub trait TransitionRates: Send {
    fn vaccination_rate(&self) -> f64;
    fn to_remote_rate(&self) -> f64;
    fn reactivation_rate(&self) -> f64;
    fn fast_progression_rate(&self) -> f64;
    fn recovery_rate(&self) -> f64;
    fn transmission_rate(&self) -> f64;
    fn mutation_rate(&self) -> f64;
    fn emigration_rate(&self) -> f64;
    fn notification_delay_rate(&self) -> f64;
    fn case_fatality_prob(&self, state: DiseaseState) -> f64;
    /// Probability a transmission target is drawn from the infector's own
    /// cohort rather than the whole population.
    fn pcc(&self) -> f64;
    /// Which disease state a progressing actor lands in.
    fn disease_branch(&self, rng: &mut Rng, subcohort: u8) -> DiseaseState;
}

/// One illustrative, documented set of placeholder rates/branch
/// probabilities, sufficient to exercise the engine end to end. Not a
/// claim about real TB epidemiology.
pub struct DefaultRates;

impl TransitionRates for DefaultRates {
    fn vaccination_rate(&self) -> f64 {
        0.02
    }
    fn to_remote_rate(&self) -> f64 {
        0.5
    }
    fn reactivation_rate(&self) -> f64 {
        0.001
    }
    fn fast_progression_rate(&self) -> f64 {
        0.1
    }
    fn recovery_rate(&self) -> f64 {
        1.0
    }
    fn transmission_rate(&self) -> f64 {
        2.0
    }
    fn mutation_rate(&self) -> f64 {
        0.01
    }
    fn emigration_rate(&self) -> f64 {
        0.01
    }
    fn notification_delay_rate(&self) -> f64 {
        12.0
    }
    fn case_fatality_prob(&self, state: DiseaseState) -> f64 {
        if state.is_disease() { 0.1 } else { 0.0 }
    }
    fn pcc(&self) -> f64 {
        0.3
    }
    fn disease_branch(&self, rng: &mut Rng, subcohort: u8) -> DiseaseState {
        let non_pulmonary = subcohort & 0x1 != 0;
        let r = rng.rand();
        match (r < 0.8, non_pulmonary) {
            (true, false) => DiseaseState::Primary,
            (true, true) => DiseaseState::PrimaryNonPulmonary,
            (false, false) => {
                if rng.rand() < 0.5 {
                    DiseaseState::Reactivation
                } else {
                    DiseaseState::ReinfDisease
                }
            }
            (false, true) => {
                if rng.rand() < 0.5 {
                    DiseaseState::ReactivationNonPulmonary
                } else {
                    DiseaseState::ReinfDiseaseNonPulmonary
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Priority orders
// ---------------------------------------------------------------------------

/// Fixed tie-break ordering for the candidates available to an actor in
/// `state`. Earlier entries win ties. Documented per state group, as the
/// specification requires.
fn priority_order(state: DiseaseState) -> &'static [CandidateKind] {
    use CandidateKind::*;
    match state {
        DiseaseState::Uninfected => &[StateExit, Emigration, Death],
        DiseaseState::Immune => &[Emigration, Death],
        DiseaseState::RecentInf | DiseaseState::Reinf => {
            &[StateExit, DiseaseOnset, Emigration, Death]
        }
        DiseaseState::RemoteInf => &[DiseaseOnset, Emigration, Death],
        // Active disease: report before recovery before mutation before
        // emigration before death, per the specification's own example.
        _ => &[Report, StateExit, Transmission, Mutation, Emigration, Death],
    }
}

/// Pick the earliest candidate for actor `i` by its state's priority order,
/// nudge it forward if it would not be strictly after `now`, and schedule
/// it. This is steps 4 of the five-step handler pattern, factored out since
/// every handler ends with it.
pub fn schedule_earliest(sim: &mut Simulation, i: usize, now: f64) -> SimResult<CandidateKind> {
    let actor = sim.population.get(i);
    let order = priority_order(actor.state);
    let (kind, mut t) = actor.candidates.earliest(order).ok_or_else(|| {
        SimError::InvariantViolation(format!("actor {i} has no live candidate instants"))
    })?;
    if t <= now {
        t = now + EPSILON;
    }
    sim.scheduler.schedule(i, t)?;
    sim.population.get_mut(i).pending = kind;
    Ok(kind)
}

// ---------------------------------------------------------------------------
// Candidate (re)computation
// ---------------------------------------------------------------------------

/// Recompute every candidate relevant to an actor's current state, from
/// scratch, given the current clock. Candidates not relevant to the state
/// are cleared to `None`.
fn recompute_candidates(sim: &mut Simulation, i: usize, now: f64) {
    let state = sim.population.get(i).state;

    let emigration = now + sim.rng.expon(sim.rates.emigration_rate());
    // The empirical emigration-distribution branch in the source material is
    // stubbed and returns 0; replicated verbatim rather than inferring a
    // fix, per the open question in the design notes. Only the exponential
    // branch above is active.
    let natural_death = sim.population.get(i).natural_death;

    let mut c = sim.population.get(i).candidates;
    c.emigration = Some(emigration);

    match state {
        DiseaseState::Uninfected => {
            c.state_exit = Some(now + sim.rng.expon(sim.rates.vaccination_rate()));
            c.disease_onset = None;
            c.transmission = None;
            c.mutation = None;
            c.report = None;
        }
        DiseaseState::Immune => {
            c.state_exit = None;
            c.disease_onset = None;
            c.transmission = None;
            c.mutation = None;
            c.report = None;
        }
        DiseaseState::RecentInf | DiseaseState::Reinf => {
            c.state_exit = Some(now + sim.rng.expon(sim.rates.to_remote_rate()));
            c.disease_onset = Some(now + sim.rng.expon(sim.rates.fast_progression_rate()));
            c.transmission = None;
            c.mutation = None;
            c.report = None;
        }
        DiseaseState::RemoteInf => {
            c.state_exit = None;
            c.disease_onset = Some(now + sim.rng.expon(sim.rates.reactivation_rate()));
            c.transmission = None;
            c.mutation = None;
            c.report = None;
        }
        _ => {
            // Active disease (pulmonary or non-pulmonary dual).
            c.state_exit = Some(now + sim.rng.expon(sim.rates.recovery_rate()));
            c.disease_onset = None;
            c.transmission = Some(now + sim.rng.expon(sim.rates.transmission_rate()));
            c.mutation = Some(now + sim.rng.expon(sim.rates.mutation_rate()));
            c.report = Some(now + sim.rng.expon(sim.rates.notification_delay_rate()));

            let competitors = [c.state_exit, c.mutation, c.emigration, c.report]
                .into_iter()
                .flatten()
                .fold(f64::INFINITY, f64::min);
            if sim.rng.rand() < sim.rates.case_fatality_prob(state) {
                // Disease-death is pinned just before the next competing
                // event. The source leaves it unclear whether this is meant
                // to guarantee disease-death wins the race or is a
                // numerical guard; kept verbatim as a documented policy
                // rather than re-derived.
                c.death = Some(now + 0.99 * (competitors - now));
            } else {
                c.death = natural_death;
            }
        }
    }

    if !state.is_disease() {
        c.death = natural_death;
    }

    sim.population.get_mut(i).candidates = c;
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Fires when an actor's `StateExit` candidate wins: vaccination
/// (Uninfected -> Immune) or progression to remote latency
/// (Recent/Reinf -> RemoteInf), or recovery from active disease -> RemoteInf,
/// depending on the state the actor was in when the candidate was computed.
pub fn handle_state_exit(sim: &mut Simulation, i: usize, now: f64) -> SimResult<CandidateKind> {
    let old_state = sim.population.get(i).state;
    let new_state = match old_state {
        DiseaseState::Uninfected => DiseaseState::Immune,
        DiseaseState::RecentInf | DiseaseState::Reinf => DiseaseState::RemoteInf,
        s if s.is_disease() => DiseaseState::RemoteInf,
        other => {
            return Err(SimError::InvariantViolation(format!(
                "state_exit fired for actor {i} in state {other} with no defined transition"
            )))
        }
    };
    sim.recolor(i, new_state);
    recompute_candidates(sim, i, now);
    schedule_earliest(sim, i, now)
}

/// Fires when an actor progresses into active disease, from Recent/Reinf
/// (fast progression) or RemoteInf (reactivation).
pub fn handle_disease_onset(sim: &mut Simulation, i: usize, now: f64) -> SimResult<CandidateKind> {
    let subcohort = sim.population.get(i).subcohort;
    let new_state = sim.rates.disease_branch(&mut sim.rng, subcohort);
    sim.recolor(i, new_state);
    recompute_candidates(sim, i, now);
    schedule_earliest(sim, i, now)
}

/// Fires when an actor's mutation candidate wins: a domain-specific marker
/// (e.g. drug-resistant strain) flips. The actor's `state` is unchanged.
pub fn handle_mutation(sim: &mut Simulation, i: usize, now: f64) -> SimResult<CandidateKind> {
    sim.population.get_mut(i).subcohort ^= 0b10;
    recompute_candidates(sim, i, now);
    schedule_earliest(sim, i, now)
}

/// Fires when a disease actor's notification candidate wins: a TB
/// notification is recorded for the reporter, then cleared (one-shot per
/// disease episode).
pub fn handle_report(sim: &mut Simulation, i: usize, now: f64) -> SimResult<CandidateKind> {
    let actor = sim.population.get(i);
    sim.reporter.record_notification(actor.sex, actor.cohort, actor.subcohort, now);
    sim.population.get_mut(i).candidates.report = None;
    schedule_earliest(sim, i, now)
}

/// Fires when an actor's transmission candidate wins: it attempts to infect
/// one target, then reschedules its own next transmission attempt.
pub fn handle_transmission(sim: &mut Simulation, i: usize, now: f64) -> SimResult<CandidateKind> {
    if let Some(target) = pick_transmission_target(sim, i) {
        if sim.population.get(target).state == DiseaseState::Uninfected {
            if sim.scheduler.is_scheduled(target) {
                sim.scheduler.cancel(target)?;
            }
            sim.recolor(target, DiseaseState::RecentInf);
            recompute_candidates(sim, target, now);
            schedule_earliest(sim, target, now)?;
            debug!(infector = i, target, "transmission succeeded");
        }
    }
    recompute_candidates(sim, i, now);
    schedule_earliest(sim, i, now)
}

/// With probability `pcc`, the target is drawn from the infector's own
/// cohort (excluding itself); otherwise from the whole live population.
/// Returns `None` only if no other live actor exists.
fn pick_transmission_target(sim: &mut Simulation, i: usize) -> Option<usize> {
    let cohort = sim.population.get(i).cohort;
    let same_cohort = sim.rng.rand() < sim.rates.pcc();

    if same_cohort {
        let range = sim.population.cohort_range(cohort);
        let n = range.len();
        if n <= 1 {
            return None;
        }
        loop {
            let pick = range.start + (sim.rng.rand() * n as f64) as usize;
            let pick = pick.min(range.end - 1);
            if pick != i {
                return Some(pick);
            }
        }
    } else {
        // Whole-population draw: cohort A and cohort B are each contiguous
        // but not adjacent, so a position is mapped arithmetically across
        // the two ranges rather than materializing every live index.
        let count_a = sim.population.count_a();
        let live = sim.population.live_count();
        if live <= 1 {
            return None;
        }
        loop {
            let pos = ((sim.rng.rand() * live as f64) as usize).min(live - 1);
            let pick = if pos < count_a {
                pos
            } else {
                sim.population.cohort_range(Cohort::BornOutside).start + (pos - count_a)
            };
            if pick != i {
                return Some(pick);
            }
        }
    }
}

/// Fires on an actor's death candidate: decrements counters and compacts
/// the register. Leaves no queue entry for the freed slot.
pub fn handle_death(sim: &mut Simulation, i: usize) -> SimResult<()> {
    let state = sim.population.get(i).state;
    sim.counters.decrement(state);
    sim.population.free(i, &mut sim.scheduler)
}

/// Fires on an actor's emigration candidate: same register bookkeeping as
/// death, distinct for reporting purposes.
pub fn handle_emigration(sim: &mut Simulation, i: usize) -> SimResult<()> {
    let state = sim.population.get(i).state;
    sim.counters.decrement(state);
    sim.population.free(i, &mut sim.scheduler)
}

/// Build a freshly-initialized Uninfected actor and its first full set of
/// candidates. Shared by the birth and immigration generators.
pub fn new_actor_candidates(
    rng: &mut Rng,
    rates: &dyn TransitionRates,
    lifespan: &dyn LifespanModel,
    sex: Sex,
    cohort: Cohort,
    age: f64,
    now: f64,
) -> Actor {
    let mut actor = Actor::new(sex, cohort);
    actor.natural_death = Some(now + lifespan.years_remaining(rng, sex, age));
    actor.candidates.death = actor.natural_death;
    actor.candidates.emigration = Some(now + rng.expon(rates.emigration_rate()));
    actor.candidates.state_exit = Some(now + rng.expon(rates.vaccination_rate()));
    actor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{Simulation, SimulationConfig};

    fn fresh_sim(seed: u32, capacity: usize) -> Simulation {
        Simulation::new(SimulationConfig {
            seed,
            mmax: capacity / 2,
            nmax: capacity,
            num_buckets: 64,
            cycle_width: 5.0,
            start_time: 1980.0,
            reporting_interval: 1.0,
            rates: Box::new(DefaultRates),
            lifespan: Box::new(ExponentialLifespan { rate_per_year: 1.0 / 60.0 }),
        })
    }

    #[test]
    fn every_live_actor_has_exactly_one_scheduled_entry_after_a_handler_runs() {
        let mut sim = fresh_sim(1, 64);
        let actor = new_actor_candidates(
            &mut sim.rng,
            sim.rates.as_ref(),
            sim.lifespan.as_ref(),
            Sex::Male,
            Cohort::BornInside,
            0.0,
            1980.0,
        );
        let i = sim.population.allocate(Cohort::BornInside, actor).unwrap();
        schedule_earliest(&mut sim, i, 1980.0).unwrap();
        assert!(sim.scheduler.is_scheduled(i));

        let pending = sim.population.get(i).pending;
        let expected_time = match pending {
            CandidateKind::StateExit => sim.population.get(i).candidates.state_exit,
            CandidateKind::Death => sim.population.get(i).candidates.death,
            CandidateKind::Emigration => sim.population.get(i).candidates.emigration,
            _ => None,
        };
        assert!(expected_time.is_some());
    }

    #[test]
    fn state_counters_sum_to_live_count() {
        let mut sim = fresh_sim(2, 64);
        for _ in 0..10 {
            let actor = new_actor_candidates(
                &mut sim.rng,
                sim.rates.as_ref(),
                sim.lifespan.as_ref(),
                Sex::Female,
                Cohort::BornInside,
                0.0,
                1980.0,
            );
            let i = sim.population.allocate(Cohort::BornInside, actor).unwrap();
            sim.counters.increment(DiseaseState::Uninfected);
            schedule_earliest(&mut sim, i, 1980.0).unwrap();
        }
        assert_eq!(sim.counters.total(), sim.population.live_count() as u64);
    }

    #[test]
    fn disease_death_guard_fires_before_the_next_competitor() {
        let mut sim = fresh_sim(3, 16);
        let mut actor = Actor::new(Sex::Male, Cohort::BornInside);
        actor.state = DiseaseState::Primary;
        actor.natural_death = Some(2000.0); // natural death far away
        let i = sim.population.allocate(Cohort::BornInside, actor).unwrap();
        sim.rates = Box::new(AlwaysFatal);
        recompute_candidates(&mut sim, i, 1980.0);
        let c = sim.population.get(i).candidates;
        let competitors = [c.state_exit, c.mutation, c.emigration, c.report]
            .into_iter()
            .flatten()
            .fold(f64::INFINITY, f64::min);
        assert!(c.death.unwrap() < competitors);
        assert!((c.death.unwrap() - (1980.0 + 0.99 * (competitors - 1980.0))).abs() < 1e-9);
    }

    struct AlwaysFatal;
    impl TransitionRates for AlwaysFatal {
        fn vaccination_rate(&self) -> f64 {
            0.02
        }
        fn to_remote_rate(&self) -> f64 {
            0.5
        }
        fn reactivation_rate(&self) -> f64 {
            0.001
        }
        fn fast_progression_rate(&self) -> f64 {
            0.1
        }
        fn recovery_rate(&self) -> f64 {
            1.0
        }
        fn transmission_rate(&self) -> f64 {
            2.0
        }
        fn mutation_rate(&self) -> f64 {
            0.01
        }
        fn emigration_rate(&self) -> f64 {
            0.01
        }
        fn notification_delay_rate(&self) -> f64 {
            12.0
        }
        fn case_fatality_prob(&self, _state: DiseaseState) -> f64 {
            1.0
        }
        fn pcc(&self) -> f64 {
            0.3
        }
        fn disease_branch(&self, _rng: &mut Rng, _subcohort: u8) -> DiseaseState {
            DiseaseState::Primary
        }
    }
}
