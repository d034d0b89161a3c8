/// Calendar-queue event scheduler.
///
/// A fixed ring of `num_buckets` buckets covers one cycle window `[Qt0, Qt1)`
/// of width `Qw`. An actor scheduled for instant `te` lives in bucket
/// `floor(frac((te - Qt0) / Qw) * num_buckets)` — a residue that is stable
/// across cycle rollovers, since shifting `Qt0` by whole multiples of `Qw`
/// leaves the fractional part unchanged. Dispatch walks the ring bucket by
/// bucket, lazily sorting a bucket's linked list the first time it is
/// touched in a cycle, and peeling off entries due this cycle; entries for
/// later cycles are left in place until the ring comes back around.
///
/// Amortized O(1) insert/cancel/renumber/dispatch falls out of two things:
/// buckets hold ~1-3 entries under realistic load (see `profile`), and the
/// merge sort in `sort.rs` is linear when a bucket is already sorted.
use crate::error::{SimError, SimResult};
use crate::sort::{merge_sort_links, EMPTY};
use tracing::warn;

pub struct Scheduler {
    /// `buckets[b]` is the head index of bucket `b`'s linked list, or EMPTY.
    buckets: Vec<usize>,
    /// Set whenever a bucket gains an entry since it was last sorted;
    /// cleared by `next()` right after sorting. This is the per-bucket
    /// realization of the single `Qo` flag in the reference design — each
    /// bucket remembers its own sortedness rather than only the one
    /// currently under the dispatch cursor.
    dirty: Vec<bool>,
    /// `next[i]`: in-bucket forward link for actor `i`, or EMPTY if `i` is
    /// not currently scheduled.
    next: Vec<usize>,
    /// `time[i]`: the instant actor `i` is scheduled for (valid only while
    /// `scheduled[i]` is true).
    time: Vec<f64>,
    scheduled: Vec<bool>,

    num_buckets: usize,
    /// Full cycle width in simulated time units.
    qw: f64,
    qt0: f64,
    qt1: f64,
    /// Index of the bucket the dispatch cursor currently sits on.
    qi: usize,
    /// Total live scheduled events across all buckets.
    event_count: usize,
    /// Current simulated clock — the instant of the most recently
    /// dispatched event, or the window anchor before the first dispatch.
    clock: f64,
    /// Optional external cutoff: `next()` returns `None` once the earliest
    /// pending instant would be at or beyond this horizon.
    horizon: Option<f64>,
}

impl Scheduler {
    /// Create a scheduler sized for actor indices `0..capacity` with
    /// `num_buckets` buckets spanning a cycle of width `cycle_width`.
    pub fn new(capacity: usize, num_buckets: usize, cycle_width: f64) -> Self {
        assert!(num_buckets > 0, "scheduler needs at least one bucket");
        assert!(cycle_width > 0.0, "cycle width must be positive");
        Scheduler {
            buckets: vec![EMPTY; num_buckets],
            dirty: vec![false; num_buckets],
            next: vec![EMPTY; capacity],
            time: vec![0.0; capacity],
            scheduled: vec![false; capacity],
            num_buckets,
            qw: cycle_width,
            qt0: 0.0,
            qt1: cycle_width,
            qi: 0,
            event_count: 0,
            clock: 0.0,
            horizon: None,
        }
    }

    pub fn set_horizon(&mut self, horizon: f64) {
        self.horizon = Some(horizon);
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn is_scheduled(&self, i: usize) -> bool {
        self.scheduled[i]
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Position the cycle window so that `t0` falls safely inside bucket 0
    /// rather than at the tail edge of the last bucket, where floating-point
    /// rounding could misfile it. Requires the scheduler to be empty.
    pub fn start_time(&mut self, t0: f64) -> SimResult<()> {
        if self.event_count != 0 {
            return Err(SimError::InvariantViolation(
                "start_time called on a non-empty scheduler".into(),
            ));
        }
        let half_bucket = (self.qw / self.num_buckets as f64) / 2.0;
        self.qt0 = t0 - half_bucket;
        self.qt1 = self.qt0 + self.qw;
        self.qi = 0;
        self.clock = t0;
        Ok(())
    }

    fn bucket_index(&self, te: f64) -> usize {
        let rel = (te - self.qt0) / self.qw;
        let frac = rel - rel.floor();
        let idx = (frac * self.num_buckets as f64).floor() as usize;
        idx.min(self.num_buckets - 1)
    }

    /// Schedule actor `i` for instant `te`. `i` must not already be
    /// scheduled and `te` must not precede the current clock.
    pub fn schedule(&mut self, i: usize, te: f64) -> SimResult<()> {
        if self.scheduled[i] {
            return Err(SimError::InvariantViolation(format!(
                "schedule: actor {i} is already scheduled"
            )));
        }
        if te < self.clock {
            return Err(SimError::InvariantViolation(format!(
                "schedule: instant {te} precedes current clock {}",
                self.clock
            )));
        }

        let b = self.bucket_index(te);
        self.next[i] = self.buckets[b];
        self.buckets[b] = i;
        self.time[i] = te;
        self.scheduled[i] = true;
        self.dirty[b] = true;
        self.event_count += 1;
        Ok(())
    }

    /// Cancel actor `i`'s pending entry. Scans the bucket its current time
    /// maps to, then the two neighboring buckets (mod `num_buckets`) in case
    /// floating-point rounding originally misfiled it across a bucket edge.
    pub fn cancel(&mut self, i: usize) -> SimResult<()> {
        if !self.scheduled[i] {
            return Err(SimError::InvariantViolation(format!(
                "cancel: actor {i} is not scheduled"
            )));
        }
        let expected = self.bucket_index(self.time[i]);
        let b = self.num_buckets;
        for delta in [0usize, 1, b - 1] {
            let bucket = (expected + delta) % b;
            if self.unlink(bucket, i) {
                self.scheduled[i] = false;
                self.next[i] = EMPTY;
                self.event_count -= 1;
                return Ok(());
            }
        }
        Err(SimError::InvariantViolation(format!(
            "cancel: actor {i} not found in its bucket or either neighbor"
        )))
    }

    /// Remove `target` from `bucket`'s list if present, relinking around it.
    fn unlink(&mut self, bucket: usize, target: usize) -> bool {
        let mut cur = self.buckets[bucket];
        let mut prev: usize = EMPTY;
        while cur != EMPTY {
            if cur == target {
                if prev == EMPTY {
                    self.buckets[bucket] = self.next[cur];
                } else {
                    self.next[prev] = self.next[cur];
                }
                return true;
            }
            prev = cur;
            cur = self.next[cur];
        }
        false
    }

    /// Renumber: the entry currently belonging to `m` becomes an entry for
    /// `n` at the same instant. `m` must be scheduled and `n` must not be.
    /// Used when the population register compacts a freed slot by moving
    /// the cohort's highest-index occupant into it.
    pub fn renumber(&mut self, n: usize, m: usize) -> SimResult<()> {
        if !self.scheduled[m] {
            return Err(SimError::InvariantViolation(format!(
                "renumber: source {m} is not scheduled"
            )));
        }
        if self.scheduled[n] {
            return Err(SimError::InvariantViolation(format!(
                "renumber: target {n} is already scheduled"
            )));
        }
        if n == m {
            return Ok(());
        }

        let bucket = self.bucket_index(self.time[m]);
        let mut cur = self.buckets[bucket];
        let mut prev: usize = EMPTY;
        while cur != EMPTY {
            if cur == m {
                if prev == EMPTY {
                    self.buckets[bucket] = n;
                } else {
                    self.next[prev] = n;
                }
                self.next[n] = self.next[m];
                self.time[n] = self.time[m];
                self.scheduled[n] = true;
                self.scheduled[m] = false;
                self.next[m] = EMPTY;
                return Ok(());
            }
            prev = cur;
            cur = self.next[cur];
        }
        Err(SimError::InvariantViolation(format!(
            "renumber: source {m} not found in its own bucket (link corruption)"
        )))
    }

    /// Advance the dispatch cursor by one bucket, rolling the cycle window
    /// forward by `qw` whenever the cursor wraps back to bucket 0. Returns
    /// whether a roll happened.
    fn advance_bucket(&mut self) -> bool {
        self.qi += 1;
        if self.qi == self.num_buckets {
            self.qi = 0;
            self.qt0 += self.qw;
            self.qt1 += self.qw;
            true
        } else {
            false
        }
    }

    /// Remove and return the `(actor, instant)` pair with the smallest
    /// pending instant, breaking ties FIFO within a bucket. Advances the
    /// clock to that instant. Returns `None` if the queue is empty or the
    /// earliest pending instant is at or beyond the configured horizon.
    ///
    /// An entry more than one cycle window ahead of `[Qt0, Qt1)` is left in
    /// place every time its bucket is visited until enough full rolls have
    /// passed to bring its residue current — there is no limit on how many
    /// cycles that takes. The only hard cap is on buckets found *empty*
    /// while `event_count > 0`, which cannot happen without corruption and
    /// is always detectable within one ring.
    pub fn next(&mut self) -> Option<(usize, f64)> {
        if self.event_count == 0 {
            return None;
        }

        let mut empty_scanned = 0usize;
        let mut rolls_done = 0usize;
        let mut roll_budget: Option<usize> = None;

        loop {
            if self.buckets[self.qi] == EMPTY {
                empty_scanned += 1;
                if empty_scanned > self.num_buckets {
                    // Every bucket empty despite event_count > 0: corrupt state.
                    warn!("scheduler: event_count > 0 but no bucket holds an entry");
                    return None;
                }
                if self.advance_bucket() {
                    rolls_done += 1;
                }
                continue;
            }
            empty_scanned = 0;

            if self.dirty[self.qi] {
                let time = &self.time;
                self.buckets[self.qi] =
                    merge_sort_links(self.buckets[self.qi], &mut self.next, &|i| time[i]);
                self.dirty[self.qi] = false;
            }

            let head = self.buckets[self.qi];
            let te = self.time[head];

            if te >= self.qt1 {
                // Due on a later pass through this bucket. The residue is
                // stable across rolls, so the number of rolls still needed
                // before `te` falls inside the window is known directly
                // from `te` itself; widen the budget to cover it rather
                // than capping at one ring.
                let rolls_needed = ((te - self.qt1) / self.qw).ceil().max(0.0) as usize + 1;
                let candidate = rolls_done + rolls_needed;
                roll_budget = Some(roll_budget.map_or(candidate, |b| b.max(candidate)));

                if self.advance_bucket() {
                    rolls_done += 1;
                    if rolls_done > roll_budget.unwrap() {
                        warn!("scheduler: exceeded computed roll budget without dispatching");
                        return None;
                    }
                }
                continue;
            }

            if let Some(h) = self.horizon {
                if te >= h {
                    return None;
                }
            }

            self.buckets[self.qi] = self.next[head];
            self.next[head] = EMPTY;
            self.scheduled[head] = false;
            self.event_count -= 1;
            self.clock = te;
            return Some((head, te));
        }
    }

    /// Observed bucket-occupancy histogram alongside the Poisson(lambda =
    /// event_count / num_buckets) probability mass for `0..=max_k`, as a
    /// sizing diagnostic.
    pub fn profile(&self, max_k: usize) -> BucketProfile {
        let mut histogram = vec![0usize; self.num_buckets];
        for (b, h) in histogram.iter_mut().enumerate() {
            let mut cur = self.buckets[b];
            let mut count = 0;
            while cur != EMPTY {
                count += 1;
                cur = self.next[cur];
            }
            *h = count;
        }

        let lambda = self.event_count as f64 / self.num_buckets as f64;
        let mut expected = Vec::with_capacity(max_k + 1);
        let mut factorial = 1.0f64;
        for k in 0..=max_k {
            if k > 0 {
                factorial *= k as f64;
            }
            let pmf = (-lambda).exp() * lambda.powi(k as i32) / factorial;
            expected.push(pmf);
        }

        BucketProfile { histogram, expected_poisson_pmf: expected, lambda }
    }
}

#[derive(Debug, Clone)]
pub struct BucketProfile {
    pub histogram: Vec<usize>,
    pub expected_poisson_pmf: Vec<f64>,
    pub lambda: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_dispatch_returns_none() {
        let mut s = Scheduler::new(8, 16, 1.0);
        s.start_time(1981.0).unwrap();
        assert_eq!(s.next(), None);
    }

    #[test]
    fn three_entry_dispatch_in_time_order() {
        let mut s = Scheduler::new(8, 16, 1.0);
        s.start_time(1981.0).unwrap();
        s.schedule(1, 1981.5).unwrap();
        s.schedule(2, 1981.3).unwrap();
        s.schedule(3, 1981.7).unwrap();

        assert_eq!(s.next(), Some((2, 1981.3)));
        assert_eq!(s.next(), Some((1, 1981.5)));
        assert_eq!(s.next(), Some((3, 1981.7)));
        assert_eq!(s.clock(), 1981.7);
        assert_eq!(s.next(), None);
    }

    #[test]
    fn cancel_then_reschedule() {
        let mut s = Scheduler::new(8, 16, 10.0);
        s.start_time(1980.0).unwrap();
        s.schedule(1, 1990.0).unwrap();
        s.cancel(1).unwrap();
        s.schedule(1, 2000.0).unwrap();
        assert_eq!(s.next(), Some((1, 2000.0)));
    }

    #[test]
    fn renumber_moves_entry_to_new_index() {
        let mut s = Scheduler::new(16, 16, 10.0);
        s.start_time(1980.0).unwrap();
        s.schedule(5, 1995.0).unwrap();
        s.renumber(9, 5).unwrap();
        assert!(!s.is_scheduled(5));
        assert!(s.is_scheduled(9));
        assert_eq!(s.next(), Some((9, 1995.0)));
    }

    #[test]
    fn schedule_twice_is_an_error() {
        let mut s = Scheduler::new(8, 4, 1.0);
        s.start_time(0.0).unwrap();
        s.schedule(1, 0.5).unwrap();
        assert!(s.schedule(1, 0.6).is_err());
    }

    #[test]
    fn cancel_unscheduled_is_an_error() {
        let mut s = Scheduler::new(8, 4, 1.0);
        s.start_time(0.0).unwrap();
        assert!(s.cancel(1).is_err());
    }

    #[test]
    fn schedule_in_the_past_is_an_error() {
        let mut s = Scheduler::new(8, 4, 1.0);
        s.start_time(0.0).unwrap();
        s.schedule(1, 0.5).unwrap();
        s.next().unwrap(); // clock now 0.5
        assert!(s.schedule(2, 0.1).is_err());
    }

    #[test]
    fn horizon_withholds_events_beyond_it() {
        let mut s = Scheduler::new(8, 4, 1.0);
        s.start_time(0.0).unwrap();
        s.set_horizon(5.0);
        s.schedule(1, 4.0).unwrap();
        s.schedule(2, 6.0).unwrap();
        assert_eq!(s.next(), Some((1, 4.0)));
        assert_eq!(s.next(), None);
    }

    #[test]
    fn conservation_over_many_cycles() {
        let mut s = Scheduler::new(2000, 32, 5.0);
        s.start_time(0.0).unwrap();
        let mut seed = 12345u64;
        let mut next_rand = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((seed >> 33) as f64) / (u32::MAX as f64)
        };
        for i in 0..1500 {
            let te = next_rand() * 400.0;
            s.schedule(i, te).unwrap();
        }
        let mut dispatched = 0;
        let mut last = -1.0;
        while let Some((_, te)) = s.next() {
            assert!(te >= last);
            last = te;
            dispatched += 1;
        }
        assert_eq!(dispatched, 1500);
    }

    #[test]
    fn bucket_profile_reports_histogram_matching_event_count() {
        let mut s = Scheduler::new(200, 20, 10.0);
        s.start_time(0.0).unwrap();
        for i in 0..100 {
            s.schedule(i, (i as f64 % 200) / 20.0).unwrap();
        }
        let profile = s.profile(10);
        assert_eq!(profile.histogram.iter().sum::<usize>(), 100);
        assert!((profile.lambda - 5.0).abs() < 1e-9);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const CAPACITY: usize = 64;

    fn arb_times() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(0.0f64..200.0, 0..CAPACITY)
    }

    proptest! {
        /// `next()` returns entries in non-decreasing instant order and the
        /// total dispatched equals the total scheduled (conservation).
        #[test]
        fn next_is_monotone_and_conserves_count(times in arb_times()) {
            let mut s = Scheduler::new(CAPACITY, 16, 10.0);
            s.start_time(0.0).unwrap();
            for (i, &t) in times.iter().enumerate() {
                s.schedule(i, t).unwrap();
            }
            let mut last = f64::NEG_INFINITY;
            let mut dispatched = 0;
            while let Some((_, te)) = s.next() {
                prop_assert!(te >= last);
                last = te;
                dispatched += 1;
            }
            prop_assert_eq!(dispatched, times.len());
        }

        /// After `next()` returns `(i, te)`, the clock equals `te`.
        #[test]
        fn clock_tracks_last_dispatched_instant(times in arb_times()) {
            let mut s = Scheduler::new(CAPACITY, 16, 10.0);
            s.start_time(0.0).unwrap();
            for (i, &t) in times.iter().enumerate() {
                s.schedule(i, t).unwrap();
            }
            while let Some((_, te)) = s.next() {
                prop_assert_eq!(s.clock(), te);
            }
        }

        /// `schedule(i, te); cancel(i)` is a no-op: the resulting dispatch
        /// sequence is identical to never having scheduled `i` at all.
        #[test]
        fn schedule_then_cancel_is_a_no_op(
            times in prop::collection::vec(0.0f64..200.0, 1..CAPACITY - 1),
            te in 0.0f64..200.0,
        ) {
            let cancel_idx = times.len();
            let mut with_cancel = Scheduler::new(CAPACITY, 16, 10.0);
            with_cancel.start_time(0.0).unwrap();
            for (i, &t) in times.iter().enumerate() {
                with_cancel.schedule(i, t).unwrap();
            }
            with_cancel.schedule(cancel_idx, te).unwrap();
            with_cancel.cancel(cancel_idx).unwrap();

            let mut without = Scheduler::new(CAPACITY, 16, 10.0);
            without.start_time(0.0).unwrap();
            for (i, &t) in times.iter().enumerate() {
                without.schedule(i, t).unwrap();
            }

            let mut seq_a = Vec::new();
            while let Some((i, t)) = with_cancel.next() {
                seq_a.push((i, t));
            }
            let mut seq_b = Vec::new();
            while let Some((i, t)) = without.next() {
                seq_b.push((i, t));
            }
            prop_assert_eq!(seq_a, seq_b);
        }

        /// `schedule(i, te); renumber(j, i)` is equivalent to `schedule(j,
        /// te)` directly: same dispatch instant, now under index `j`.
        #[test]
        fn schedule_then_renumber_matches_direct_schedule(te in 0.0f64..200.0) {
            let mut renumbered = Scheduler::new(CAPACITY, 16, 10.0);
            renumbered.start_time(0.0).unwrap();
            renumbered.schedule(3, te).unwrap();
            renumbered.renumber(9, 3).unwrap();

            let mut direct = Scheduler::new(CAPACITY, 16, 10.0);
            direct.start_time(0.0).unwrap();
            direct.schedule(9, te).unwrap();

            prop_assert_eq!(renumbered.next(), direct.next());
        }
    }
}
