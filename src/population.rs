/// Compact-array population register.
///
/// Slots `0..mmax` are reserved for cohort A (born-inside, say), slots
/// `mmax..nmax-2` for cohort B, and the last two slots `nmax-2`, `nmax-1`
/// for the two reserved pseudo-actors (birth and immigration generators),
/// which persist for the whole run and are never compacted.
///
/// `next_a`/`next_b` are the first free slot in each cohort; every slot
/// strictly below a cursor holds a live actor. Removing an actor never
/// shifts the array: the highest-index occupant of the same cohort is
/// copied down into the freed slot and the cursor decrements by one, so the
/// cohort stays gap-free from its base upward. The scheduler is told about
/// the renumber so its queue entry follows the moved record.
use crate::actor::{Actor, Cohort};
use crate::error::{SimError, SimResult};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoActor {
    BirthGenerator,
    ImmigrationGenerator,
}

pub struct Population {
    actors: Vec<Actor>,
    mmax: usize,
    nmax: usize,
    next_a: usize,
    next_b: usize,
}

impl Population {
    /// `mmax` is the size of cohort A's slot range; `nmax` is the total
    /// capacity including the two trailing pseudo-actor slots
    /// (`nmax >= mmax + 2`).
    pub fn new(mmax: usize, nmax: usize, placeholder: impl Fn() -> Actor) -> Self {
        assert!(nmax >= mmax + 2, "nmax must leave room for both pseudo-actors");
        let actors = (0..nmax).map(|_| placeholder()).collect();
        Population { actors, mmax, nmax, next_a: 0, next_b: mmax }
    }

    pub fn get(&self, i: usize) -> &Actor {
        &self.actors[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut Actor {
        &mut self.actors[i]
    }

    pub fn pseudo_actor_index(&self, which: PseudoActor) -> usize {
        match which {
            PseudoActor::BirthGenerator => self.nmax - 2,
            PseudoActor::ImmigrationGenerator => self.nmax - 1,
        }
    }

    /// Number of live actors in cohort A.
    pub fn count_a(&self) -> usize {
        self.next_a
    }

    /// Number of live actors in cohort B.
    pub fn count_b(&self) -> usize {
        self.next_b - self.mmax
    }

    pub fn live_count(&self) -> usize {
        self.count_a() + self.count_b()
    }

    /// Iterate over the indices of all currently-live actors (excluding the
    /// two pseudo-actors), cohort A then cohort B.
    pub fn live_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.next_a).chain(self.mmax..self.next_b)
    }

    /// The `[start, end)` index range occupied by a cohort right now —
    /// used by the transmission handler's same-cohort selection.
    pub fn cohort_range(&self, cohort: Cohort) -> std::ops::Range<usize> {
        match cohort {
            Cohort::BornInside => 0..self.next_a,
            Cohort::BornOutside => self.mmax..self.next_b,
        }
    }

    /// Allocate the next free slot in `cohort`, initialize it with `actor`,
    /// and return its index.
    pub fn allocate(&mut self, cohort: Cohort, actor: Actor) -> SimResult<usize> {
        let idx = match cohort {
            Cohort::BornInside => {
                if self.next_a >= self.mmax {
                    return Err(SimError::InvariantViolation(
                        "cohort A (born-inside) register is full".into(),
                    ));
                }
                let i = self.next_a;
                self.next_a += 1;
                i
            }
            Cohort::BornOutside => {
                if self.next_b >= self.nmax - 2 {
                    return Err(SimError::InvariantViolation(
                        "cohort B (born-outside) register is full".into(),
                    ));
                }
                let i = self.next_b;
                self.next_b += 1;
                i
            }
        };
        self.actors[idx] = actor;
        Ok(idx)
    }

    /// Free slot `i`: copy the cohort's highest-occupied slot down into it
    /// and decrement that cohort's cursor. Tells `scheduler` that the moved
    /// record's queue entry now belongs to `i` (a no-op if `i` was already
    /// the highest slot).
    pub fn free(&mut self, i: usize, scheduler: &mut Scheduler) -> SimResult<()> {
        let cohort = self.cohort_of(i)?;
        let last = match cohort {
            Cohort::BornInside => self.next_a - 1,
            Cohort::BornOutside => self.next_b - 1,
        };

        if i != last {
            self.actors[i] = self.actors[last].clone();
            if scheduler.is_scheduled(last) {
                scheduler.renumber(i, last)?;
            }
        }

        match cohort {
            Cohort::BornInside => self.next_a -= 1,
            Cohort::BornOutside => self.next_b -= 1,
        }
        Ok(())
    }

    fn cohort_of(&self, i: usize) -> SimResult<Cohort> {
        if i < self.next_a {
            Ok(Cohort::BornInside)
        } else if i >= self.mmax && i < self.next_b {
            Ok(Cohort::BornOutside)
        } else {
            Err(SimError::InvariantViolation(format!(
                "index {i} does not belong to a live cohort slot"
            )))
        }
    }
}
