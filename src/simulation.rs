/// The top-level simulation context: owns the RNG, scheduler, population
/// register, counters, parameter registry, and reporter as plain fields
/// (per the design note on replacing process-wide singletons with an
/// explicit context), and drives the event loop.
use crate::actor::{CandidateKind, DiseaseState};
use crate::error::SimResult;
use crate::generators::{
    handle_birth_generator, handle_immigration_generator, update_annual_rates, AnnualRate,
};
use crate::population::{Population, PseudoActor};
use crate::reporter::{Reporter, RunSummary};
use crate::rng::Rng;
use crate::scheduler::Scheduler;
use crate::transitions::{
    handle_death, handle_disease_onset, handle_emigration, handle_mutation, handle_report,
    handle_state_exit, handle_transmission, LifespanModel, TransitionRates,
};
use std::time::Instant;
use tracing::info;

/// Tallies live actors per disease state; kept in lockstep with every
/// state-changing transition so it never needs a full population scan.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    counts: [u64; 11],
}

impl Counters {
    fn index(state: DiseaseState) -> usize {
        DiseaseState::ALL.iter().position(|&s| s == state).expect("state is one of the 11")
    }

    pub fn increment(&mut self, state: DiseaseState) {
        self.counts[Self::index(state)] += 1;
    }

    pub fn decrement(&mut self, state: DiseaseState) {
        let i = Self::index(state);
        self.counts[i] = self.counts[i].saturating_sub(1);
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn snapshot(&self) -> [u64; 11] {
        self.counts
    }
}

pub struct SimulationConfig {
    pub seed: u32,
    /// Cohort A (born-inside) slot count.
    pub mmax: usize,
    /// Total register capacity, including the two trailing pseudo-actor
    /// slots (`nmax >= mmax + 2`).
    pub nmax: usize,
    pub num_buckets: usize,
    pub cycle_width: f64,
    pub start_time: f64,
    /// Interval in simulated years between population snapshots and status
    /// lines.
    pub reporting_interval: f64,
    pub rates: Box<dyn TransitionRates>,
    pub lifespan: Box<dyn LifespanModel>,
}

pub struct Simulation {
    pub rng: Rng,
    pub scheduler: Scheduler,
    pub population: Population,
    pub counters: Counters,
    pub rates: Box<dyn TransitionRates>,
    pub lifespan: Box<dyn LifespanModel>,
    pub reporter: Reporter,
    pub birth_rate: AnnualRate,
    pub immigration_rate: AnnualRate,
    start_time: f64,
    current_year: i32,
    deaths: u64,
    emigrations: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Simulation::with_capacity(config)
    }

    /// Construct a simulation context with all register and scheduler
    /// arrays sized once up front for `config.nmax`, as the resource model
    /// requires (no per-event heap allocation on the hot path).
    pub fn with_capacity(config: SimulationConfig) -> Self {
        let mut scheduler = Scheduler::new(config.nmax, config.num_buckets, config.cycle_width);
        scheduler.start_time(config.start_time).expect("fresh scheduler accepts start_time");

        let population =
            Population::new(config.mmax, config.nmax, || crate::actor::Actor::new(
                crate::actor::Sex::Male,
                crate::actor::Cohort::BornInside,
            ));

        Simulation {
            rng: Rng::with_seed(config.seed),
            scheduler,
            population,
            counters: Counters::default(),
            rates: config.rates,
            lifespan: config.lifespan,
            reporter: Reporter::new(config.reporting_interval, config.start_time),
            birth_rate: AnnualRate { per_year: 0.0 },
            immigration_rate: AnnualRate { per_year: 0.0 },
            start_time: config.start_time,
            current_year: config.start_time.floor() as i32,
            deaths: 0,
            emigrations: 0,
        }
    }

    /// Seed the two external generators' first firing and enter the given
    /// initial annual rates.
    pub fn start_generators(
        &mut self,
        birth_per_year: f64,
        immigration_per_year: f64,
    ) -> SimResult<()> {
        update_annual_rates(self, birth_per_year, immigration_per_year);
        let now = self.start_time;
        let birth_idx = self.population.pseudo_actor_index(PseudoActor::BirthGenerator);
        let imm_idx = self.population.pseudo_actor_index(PseudoActor::ImmigrationGenerator);
        self.scheduler.schedule(birth_idx, now + self.rng.expon(birth_per_year.max(1e-9)))?;
        self.scheduler.schedule(imm_idx, now + self.rng.expon(immigration_per_year.max(1e-9)))?;
        Ok(())
    }

    /// Apply a state change and keep the global counters in lockstep.
    pub(crate) fn recolor(&mut self, i: usize, new_state: DiseaseState) {
        let old_state = self.population.get(i).state;
        self.counters.decrement(old_state);
        self.population.get_mut(i).state = new_state;
        self.counters.increment(new_state);
    }

    fn maybe_roll_year(&mut self, now: f64, birth_rate: f64, immigration_rate: f64) {
        let year = now.floor() as i32;
        if year != self.current_year {
            self.current_year = year;
            update_annual_rates(self, birth_rate, immigration_rate);
        }
    }

    /// Run the driver loop until the scheduler's horizon is reached or the
    /// queue empties, dispatching every fired event to its handler.
    pub fn run(&mut self, horizon: f64) -> SimResult<RunSummary> {
        self.scheduler.set_horizon(horizon);
        let wall_start = Instant::now();
        let mut steps = 0u64;
        let birth_rate = self.birth_rate.per_year;
        let immigration_rate = self.immigration_rate.per_year;

        let birth_idx = self.population.pseudo_actor_index(PseudoActor::BirthGenerator);
        let imm_idx = self.population.pseudo_actor_index(PseudoActor::ImmigrationGenerator);

        while let Some((i, now)) = self.scheduler.next() {
            steps += 1;
            self.maybe_roll_year(now, birth_rate, immigration_rate);

            if i == birth_idx {
                handle_birth_generator(self, now)?;
            } else if i == imm_idx {
                handle_immigration_generator(self, now)?;
            } else {
                let pending = self.population.get(i).pending;
                match pending {
                    CandidateKind::StateExit => {
                        handle_state_exit(self, i, now)?;
                    }
                    CandidateKind::DiseaseOnset => {
                        handle_disease_onset(self, i, now)?;
                    }
                    CandidateKind::Transmission => {
                        handle_transmission(self, i, now)?;
                    }
                    CandidateKind::Mutation => {
                        handle_mutation(self, i, now)?;
                    }
                    CandidateKind::Report => {
                        handle_report(self, i, now)?;
                    }
                    CandidateKind::Emigration => {
                        self.emigrations += 1;
                        handle_emigration(self, i)?;
                    }
                    CandidateKind::Death => {
                        self.deaths += 1;
                        handle_death(self, i)?;
                    }
                    CandidateKind::Birth => {
                        // Only pseudo-actors carry a live Birth candidate;
                        // an ordinary actor reaching this arm indicates a
                        // bookkeeping error upstream.
                        return Err(crate::error::SimError::InvariantViolation(format!(
                            "actor {i} fired with pending=Birth but is not a generator"
                        )));
                    }
                }
            }

            if self.reporter.snapshot_due(now) {
                let counts = self.counters.snapshot();
                self.reporter.push_snapshot(now, counts);
                info!(
                    time = now,
                    live = self.population.live_count(),
                    deaths = self.deaths,
                    emigrations = self.emigrations,
                    elapsed_ms = wall_start.elapsed().as_millis() as u64,
                    "status"
                );
            }
        }

        Ok(RunSummary {
            steps,
            final_time: self.scheduler.clock(),
            live_count: self.population.live_count(),
            notifications: self.reporter.notification_count(),
            deaths: self.deaths,
            emigrations: self.emigrations,
        })
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::transitions::{DefaultRates, ExponentialLifespan};
    use proptest::prelude::*;

    proptest! {
        /// After a run to any horizon, every surviving live actor still has
        /// exactly one live queue entry, and the state counters sum to the
        /// live population count (scan-based audit, per the transition
        /// engine's testable invariants).
        #[test]
        fn every_live_actor_has_one_entry_and_counters_match(
            seed: u32,
            horizon_years in 1.0f64..15.0,
            birth_rate in 1.0f64..200.0,
            immigration_rate in 1.0f64..50.0,
        ) {
            let mut sim = Simulation::new(SimulationConfig {
                seed,
                mmax: 256,
                nmax: 512,
                num_buckets: 64,
                cycle_width: 5.0,
                start_time: 1980.0,
                reporting_interval: 1.0,
                rates: Box::new(DefaultRates),
                lifespan: Box::new(ExponentialLifespan { rate_per_year: 1.0 / 60.0 }),
            });
            sim.start_generators(birth_rate, immigration_rate).unwrap();
            sim.run(1980.0 + horizon_years).unwrap();

            for i in sim.population.live_indices() {
                prop_assert!(sim.scheduler.is_scheduled(i));
            }
            prop_assert_eq!(sim.counters.total(), sim.population.live_count() as u64);
        }
    }
}
