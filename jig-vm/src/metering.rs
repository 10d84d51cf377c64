use crate::config::ExecOpts;
use crate::error::ExecError;

// ─── Hydro Counter ──────────────────────────────────────────────────────────

/// Buckets raw work units into hydros.
///
/// With a hydro size of 1000: 0 units bill 0 hydros, 100 bill 1, 3000 bill
/// 3 and 4500 bill 5. A counter fails as soon as its billable hydros exceed
/// the ceiling, so `hydro_size * max_hydros` units are fine and one more
/// unit is not.
#[derive(Debug, Clone)]
pub struct HydroCounter {
    tag: &'static str,
    hydro_size: u64,
    max_hydros: u64,
    /// Raw units added since the last clear.
    total: u64,
    /// Units in the current, partially filled bucket.
    count: u64,
    /// Completely filled buckets.
    hydros: u64,
}

impl HydroCounter {
    pub fn new(tag: &'static str, hydro_size: u64, max_hydros: u64) -> Self {
        Self {
            tag,
            hydro_size: hydro_size.max(1),
            max_hydros,
            total: 0,
            count: 0,
            hydros: 0,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Add `amount` raw units.
    pub fn add(&mut self, amount: u64) -> Result<(), ExecError> {
        self.total = self.total.saturating_add(amount);
        let count = self.count.saturating_add(amount);
        self.hydros = self.hydros.saturating_add(count / self.hydro_size);
        self.count = count % self.hydro_size;

        let billable = self.billable();
        if billable > self.max_hydros {
            return Err(ExecError::ResourceExhausted {
                counter: self.tag.to_string(),
                max: self.max_hydros,
            });
        }
        Ok(())
    }

    pub fn inc(&mut self) -> Result<(), ExecError> {
        self.add(1)
    }

    /// Hydros billed so far, counting a partial bucket as a full one.
    pub fn hydros(&self) -> u64 {
        self.billable()
    }

    /// Raw units added since the last clear.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Reset the counter, returning the hydros it billed.
    pub fn clear(&mut self) -> u64 {
        let billed = self.billable();
        self.total = 0;
        self.count = 0;
        self.hydros = 0;
        billed
    }

    fn billable(&self) -> u64 {
        self.hydros.saturating_add(u64::from(self.count > 0))
    }
}

// ─── Measurements ───────────────────────────────────────────────────────────

/// The independent counters of one transaction.
#[derive(Debug, Clone)]
pub struct Measurements {
    pub moved_data: HydroCounter,
    pub wasm_executed: HydroCounter,
    pub num_containers: HydroCounter,
    pub num_sigs: HydroCounter,
    pub origin_checks: HydroCounter,
    pub new_jigs: HydroCounter,
    pub deploys: HydroCounter,
}

impl Measurements {
    pub fn new(opts: &ExecOpts) -> Self {
        Self {
            moved_data: HydroCounter::new(
                "moved data",
                opts.move_data_hydro_size,
                opts.move_data_max_hydros,
            ),
            wasm_executed: HydroCounter::new(
                "wasm execution",
                opts.wasm_execution_hydro_size,
                opts.wasm_execution_max_hydros,
            ),
            num_containers: HydroCounter::new(
                "containers",
                opts.num_cont_hydro_size,
                opts.num_cont_max_hydros,
            ),
            num_sigs: HydroCounter::new(
                "signatures",
                opts.num_sigs_hydro_size,
                opts.num_sigs_max_hydros,
            ),
            origin_checks: HydroCounter::new(
                "origin look-ups",
                opts.origin_check_hydro_size,
                opts.origin_check_max_hydros,
            ),
            new_jigs: HydroCounter::new(
                "new jigs",
                opts.new_jig_hydro_size,
                opts.new_jig_max_hydros,
            ),
            deploys: HydroCounter::new("deploys", 1, opts.deploy_max_hydros),
        }
    }

    /// Reset every counter, returning the total billable hydros.
    pub fn clear(&mut self) -> u64 {
        [
            &mut self.moved_data,
            &mut self.wasm_executed,
            &mut self.num_containers,
            &mut self.num_sigs,
            &mut self.origin_checks,
            &mut self.new_jigs,
            &mut self.deploys,
        ]
        .into_iter()
        .map(HydroCounter::clear)
        .fold(0u64, u64::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bucketing() {
        let mut counter = HydroCounter::new("test", 1000, 100);
        assert_eq!(counter.hydros(), 0);
        counter.add(100).unwrap();
        assert_eq!(counter.hydros(), 1);
        counter.add(2900).unwrap();
        assert_eq!(counter.hydros(), 3);
        counter.add(1500).unwrap();
        assert_eq!(counter.hydros(), 5);
        assert_eq!(counter.total(), 4500);
    }

    #[test]
    fn test_exact_ceiling_then_one_more() {
        let mut counter = HydroCounter::new("moved data", 10, 3);
        counter.add(30).unwrap();
        assert_eq!(counter.hydros(), 3);
        match counter.inc().unwrap_err() {
            ExecError::ResourceExhausted { counter, max } => {
                assert_eq!(counter, "moved data");
                assert_eq!(max, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_partial_bucket_counts_against_ceiling() {
        let mut counter = HydroCounter::new("test", 10, 1);
        counter.add(10).unwrap();
        assert!(counter.add(1).is_err());
    }

    #[test]
    fn test_clear_resets() {
        let mut counter = HydroCounter::new("test", 1000, 100);
        counter.add(4500).unwrap();
        assert_eq!(counter.clear(), 5);
        assert_eq!(counter.hydros(), 0);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_measurements_clear_sums_counters() {
        let opts = ExecOpts::default();
        let mut m = Measurements::new(&opts);
        m.num_sigs.add(2).unwrap();
        m.new_jigs.inc().unwrap();
        m.moved_data.add(1).unwrap();
        m.deploys.add(opts.deploy_hydro_cost).unwrap();
        assert_eq!(m.clear(), 2 + 1 + 1 + opts.deploy_hydro_cost);
        assert_eq!(m.clear(), 0);
    }

    proptest! {
        #[test]
        fn prop_hydros_is_ceiling_division(
            size in 1u64..10_000,
            amounts in proptest::collection::vec(0u64..50_000, 0..20),
        ) {
            let mut counter = HydroCounter::new("prop", size, u64::MAX);
            for amount in &amounts {
                counter.add(*amount).unwrap();
            }
            let total: u64 = amounts.iter().sum();
            prop_assert_eq!(counter.hydros(), total.div_ceil(size));
        }
    }
}
