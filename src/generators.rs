/// External generators: the two reserved pseudo-actors that drive
/// inter-arrival of births and immigrations into the population.
///
/// Each pseudo-actor behaves like any other scheduled entity — it carries
/// one candidate instant (`birth`, reused as the generic "fire" slot) and
/// reschedules itself every time it fires — except firing it never touches
/// its own `state`; it allocates a brand new actor into the register
/// instead.
use crate::actor::{Cohort, Sex};
use crate::error::SimResult;
use crate::population::PseudoActor;
use crate::simulation::Simulation;
use crate::transitions::new_actor_candidates;
use tracing::debug;

/// Annual rate of an external arrival stream. Updated once per simulated
/// year by the driver; held constant between updates.
#[derive(Debug, Clone, Copy)]
pub struct AnnualRate {
    pub per_year: f64,
}

impl AnnualRate {
    fn interarrival(&self, rng: &mut crate::rng::Rng) -> f64 {
        rng.expon(self.per_year)
    }
}

/// Fire the birth generator: allocate a new Uninfected actor into cohort A,
/// then reschedule the generator's own next birth.
pub fn handle_birth_generator(sim: &mut Simulation, now: f64) -> SimResult<()> {
    let sex = if sim.rng.rand() < 0.5 { Sex::Male } else { Sex::Female };
    let actor = new_actor_candidates(
        &mut sim.rng,
        sim.rates.as_ref(),
        sim.lifespan.as_ref(),
        sex,
        Cohort::BornInside,
        0.0,
        now,
    );
    let i = sim.population.allocate(Cohort::BornInside, actor)?;
    sim.counters.increment(crate::actor::DiseaseState::Uninfected);
    crate::transitions::schedule_earliest(sim, i, now)?;
    debug!(new_actor = i, "birth");

    let gen_idx = sim.population.pseudo_actor_index(PseudoActor::BirthGenerator);
    let next = now + sim.birth_rate.interarrival(&mut sim.rng);
    sim.scheduler.schedule(gen_idx, next)?;
    Ok(())
}

/// Fire the immigration generator: allocate a new actor into cohort B, then
/// reschedule. Immigrants arrive Uninfected under the default profile; a
/// richer age/infection-state distribution is a Centinel-sourced input, out
/// of scope for the core.
pub fn handle_immigration_generator(sim: &mut Simulation, now: f64) -> SimResult<()> {
    let sex = if sim.rng.rand() < 0.5 { Sex::Male } else { Sex::Female };
    let actor = new_actor_candidates(
        &mut sim.rng,
        sim.rates.as_ref(),
        sim.lifespan.as_ref(),
        sex,
        Cohort::BornOutside,
        0.0,
        now,
    );
    let i = sim.population.allocate(Cohort::BornOutside, actor)?;
    sim.counters.increment(crate::actor::DiseaseState::Uninfected);
    crate::transitions::schedule_earliest(sim, i, now)?;
    debug!(new_actor = i, "immigration");

    let gen_idx = sim.population.pseudo_actor_index(PseudoActor::ImmigrationGenerator);
    let next = now + sim.immigration_rate.interarrival(&mut sim.rng);
    sim.scheduler.schedule(gen_idx, next)?;
    Ok(())
}

/// Called once per simulated calendar year by the driver: swap in a new
/// annual rate for both generator streams. The current candidate already
/// scheduled is left to fire at its sampled time; only the *next* draw uses
/// the updated rate.
pub fn update_annual_rates(sim: &mut Simulation, birth_per_year: f64, immigration_per_year: f64) {
    sim.birth_rate = AnnualRate { per_year: birth_per_year };
    sim.immigration_rate = AnnualRate { per_year: immigration_per_year };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{Simulation, SimulationConfig};
    use crate::transitions::{DefaultRates, ExponentialLifespan};

    fn fresh_sim() -> Simulation {
        Simulation::new(SimulationConfig {
            seed: 11,
            mmax: 32,
            nmax: 64,
            num_buckets: 64,
            cycle_width: 5.0,
            start_time: 1980.0,
            reporting_interval: 1.0,
            rates: Box::new(DefaultRates),
            lifespan: Box::new(ExponentialLifespan { rate_per_year: 1.0 / 60.0 }),
        })
    }

    #[test]
    fn birth_generator_adds_one_live_actor_and_reschedules_itself() {
        let mut sim = fresh_sim();
        let gen_idx = sim.population.pseudo_actor_index(PseudoActor::BirthGenerator);
        sim.scheduler.schedule(gen_idx, 1980.5).unwrap();
        let before = sim.population.live_count();

        sim.scheduler.next().unwrap();
        handle_birth_generator(&mut sim, 1980.5).unwrap();

        assert_eq!(sim.population.live_count(), before + 1);
        assert!(sim.scheduler.is_scheduled(gen_idx));
    }

    #[test]
    fn immigration_generator_adds_to_cohort_b() {
        let mut sim = fresh_sim();
        let gen_idx = sim.population.pseudo_actor_index(PseudoActor::ImmigrationGenerator);
        sim.scheduler.schedule(gen_idx, 1980.5).unwrap();
        sim.scheduler.next().unwrap();
        handle_immigration_generator(&mut sim, 1980.5).unwrap();
        assert_eq!(sim.population.count_b(), 1);
    }
}
