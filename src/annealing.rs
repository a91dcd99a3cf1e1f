//! Simulated annealing over sensor configurations.
//!
//! The driver keeps three independent configurations: `current`, the
//! proposed `new`, and `best`. Each iteration decides whether `new` replaces
//! `current`, updates `best` on strict improvement, cools the temperature
//! geometrically, and then derives the next `new` from `current` (or from
//! `best` after a stagnation rebase) with one mutation.
//!
//! Comparisons use a normalized value: a configuration that detected no
//! scenario, or whose value is not finite, compares as `f64::MAX`.
//!
//! Acceptance:
//! - `new < current`: accept without a draw.
//! - `new > current`: accept with `p = exp(-(new - current) / T)`.
//! - `new == current`: accept with `p = exp(-C / T)`, where `C` makes
//!   `p = 0.5` after 99 cooling steps from the initial temperature. This
//!   keeps the search moving across plateaus.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::configuration::Configuration;
use crate::inference::InferenceStrategy;
use crate::monitor::IterationReport;
use crate::mutation::MutationStrategy;
use crate::objective::{Evaluator, ObjectiveStrategy};
use crate::prng::Pcg32;
use crate::provider::ScenarioDataProvider;

/// Cooling steps after which a tie is accepted half of the time.
const TIE_HALF_LIFE: i32 = 99;

#[derive(Debug, Clone, PartialEq)]
pub struct AnnealingParams {
    pub seed: u64,
    pub iterations: u32,
    pub initial_temperature: f64,
    pub cooling_rate: f64,
    /// Fraction of `iterations` without a new best after which the next
    /// candidate is derived from `best` instead of `current`.
    pub stagnation_rebase: Option<f64>,
}

impl Default for AnnealingParams {
    fn default() -> Self {
        Self {
            seed: 0,
            iterations: 100,
            initial_temperature: 1.0,
            cooling_rate: 0.99,
            stagnation_rebase: None,
        }
    }
}

/// Best configuration found by one annealing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run: u32,
    pub best: Configuration,
    pub best_value: f64,
    pub iterations_completed: u32,
    pub cancelled: bool,
}

/// Constant `C` for tie acceptance: `exp(-C / (T0 * r^99)) = 0.5`.
pub fn tie_constant(initial_temperature: f64, cooling_rate: f64) -> f64 {
    std::f64::consts::LN_2 * initial_temperature * cooling_rate.powi(TIE_HALF_LIFE)
}

/// Value used for every comparison in the driver.
pub fn normalized_value(value: f64, scenarios_detected: usize) -> f64 {
    if scenarios_detected == 0 || !value.is_finite() {
        f64::MAX
    } else {
        value
    }
}

/// Acceptance rule. Draws from `rng` only when `new` is not an improvement.
pub fn accept(
    current: f64,
    new: f64,
    temperature: f64,
    tie_constant: f64,
    rng: &mut Pcg32,
) -> bool {
    if new < current {
        return true;
    }
    if temperature <= 0.0 {
        return false;
    }
    let p = if new > current {
        (-(new - current) / temperature).exp()
    } else {
        (-tie_constant / temperature).exp()
    };
    rng.next_float() < p
}

/// Inference, objective and mutation strategies wired to one evaluator.
pub struct SearchDriver<'a, I, O, P: ?Sized, M> {
    evaluator: Evaluator<'a, I, O, P>,
    mutation: M,
}

impl<'a, I, O, P, M> SearchDriver<'a, I, O, P, M>
where
    I: InferenceStrategy,
    O: ObjectiveStrategy,
    P: ScenarioDataProvider + ?Sized,
    M: MutationStrategy,
{
    pub fn new(evaluator: Evaluator<'a, I, O, P>, mutation: M) -> Self {
        Self {
            evaluator,
            mutation,
        }
    }

    pub fn evaluator(&self) -> &Evaluator<'a, I, O, P> {
        &self.evaluator
    }

    pub fn evaluate(&self, config: &mut Configuration) -> f64 {
        self.evaluator.evaluate(config)
    }

    pub fn mutate(&self, config: &mut Configuration, rng: &mut Pcg32) -> bool {
        self.mutation.mutate(config, self.evaluator.set(), rng)
    }

    /// One annealing run. Run `run` draws from PCG stream `(seed, run)`.
    pub fn anneal(&self, initial: &Configuration, params: &AnnealingParams, run: u32) -> RunResult {
        let monitor = self.evaluator.monitor();
        let mut rng = Pcg32::new(params.seed, run as u64);
        let tie_c = tie_constant(params.initial_temperature, params.cooling_rate);
        let rebase_after = params
            .stagnation_rebase
            .map(|f| ((f * params.iterations as f64).ceil() as u32).max(1));

        let mut current = initial.clone();
        let mut current_value = self.evaluate(&mut current);
        let mut current_norm = normalized_value(current_value, current.scenarios_detected());
        let mut best = current.clone();
        let mut best_value = current_value;
        let mut best_norm = current_norm;

        let mut new = current.clone();
        if !self.mutate(&mut new, &mut rng) {
            warn!(run, "initial mutation found no legal change");
        }
        let mut new_value = self.evaluate(&mut new);

        info!(
            run,
            iterations = params.iterations,
            initial_value = current_value,
            "annealing run started"
        );

        let mut temperature = params.initial_temperature;
        let mut since_best = 0u32;
        let mut completed = 0u32;
        let mut cancelled = false;

        for iteration in 0..params.iterations {
            if monitor.is_cancelled() {
                cancelled = true;
                break;
            }
            let new_norm = normalized_value(new_value, new.scenarios_detected());
            if accept(current_norm, new_norm, temperature, tie_c, &mut rng) {
                new.copy_into(&mut current);
                current_value = new_value;
                current_norm = new_norm;
                debug!(run, iteration, value = current_value, "candidate accepted");
            }
            if current_norm < best_norm {
                current.copy_into(&mut best);
                best_value = current_value;
                best_norm = current_norm;
                since_best = 0;
            } else {
                since_best += 1;
            }

            debug!(
                run,
                iteration,
                current = current_value,
                new = new_value,
                best = best_value,
                temperature,
                detected = new.scenarios_detected(),
                "iteration"
            );
            monitor.iteration(&IterationReport {
                run,
                iteration,
                current_value,
                new_value,
                best_value,
                temperature,
                scenarios_detected: new.scenarios_detected(),
            });
            temperature *= params.cooling_rate;
            completed += 1;

            if iteration + 1 == params.iterations {
                break;
            }
            match rebase_after {
                Some(limit) if since_best >= limit => {
                    debug!(run, iteration, since_best, "rebasing on best");
                    best.copy_into(&mut new);
                    since_best = 0;
                }
                _ => current.copy_into(&mut new),
            }
            if !self.mutate(&mut new, &mut rng) {
                warn!(run, iteration, "no legal mutation; candidate unchanged");
            }
            new_value = self.evaluate(&mut new);
        }

        info!(
            run,
            completed,
            cancelled,
            best_value,
            detected = best.scenarios_detected(),
            "annealing run finished"
        );
        RunResult {
            run,
            best,
            best_value,
            iterations_completed: completed,
            cancelled,
        }
    }

    /// Single run with the default schedule; returns only the best placement.
    pub fn run_search(&self, initial: &Configuration, iterations: u32) -> Configuration {
        let params = AnnealingParams {
            iterations,
            ..AnnealingParams::default()
        };
        self.anneal(initial, &params, 0).best
    }

    /// `runs` independent runs from the same start; stops early on cancel.
    pub fn anneal_runs(
        &self,
        initial: &Configuration,
        params: &AnnealingParams,
        runs: u32,
    ) -> Vec<RunResult> {
        let mut results = Vec::with_capacity(runs as usize);
        for run in 0..runs {
            let result = self.anneal(initial, params, run);
            let cancelled = result.cancelled;
            results.push(result);
            if cancelled {
                break;
            }
        }
        results
    }
}

/// Index of the run with the lowest normalized best value.
pub fn best_run(results: &[RunResult]) -> Option<usize> {
    results
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let va = normalized_value(a.best_value, a.best.scenarios_detected());
            let vb = normalized_value(b.best_value, b.best.scenarios_detected());
            va.total_cmp(&vb)
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{CountingInference, InferenceTest};
    use crate::monitor::{NoopMonitor, SearchMonitor};
    use crate::mutation::SensorMutation;
    use crate::objective::tests::plume_fixture;
    use crate::objective::{build_pool, TimeToDetection};
    use crate::scenario::ScenarioSet;
    use crate::sensor::Sensor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        best: Mutex<Vec<f64>>,
        cancel_after: Option<u32>,
        seen: AtomicU32,
    }

    impl SearchMonitor for Recorder {
        fn is_cancelled(&self) -> bool {
            self.cancel_after
                .is_some_and(|n| self.seen.load(Ordering::Relaxed) >= n)
        }

        fn iteration(&self, report: &IterationReport) {
            self.seen.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut best) = self.best.lock() {
                best.push(report.best_value);
            }
        }
    }

    fn params(iterations: u32) -> AnnealingParams {
        AnnealingParams {
            seed: 42,
            iterations,
            initial_temperature: 1.0,
            cooling_rate: 0.99,
            stagnation_rebase: None,
        }
    }

    #[test]
    fn improvements_accepted_without_draw() {
        let mut rng = Pcg32::new(1, 0);
        let before = rng.clone().next_u32();
        assert!(accept(10.0, 5.0, 1.0, 0.1, &mut rng));
        assert_eq!(rng.next_u32(), before);
    }

    #[test]
    fn tie_acceptance_is_half_after_99_steps() {
        let t0 = 2.0;
        let c = tie_constant(t0, 0.99);
        let t = t0 * 0.99f64.powi(99);
        assert!(((-c / t).exp() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn much_worse_rarely_accepted_when_cold() {
        let mut rng = Pcg32::new(8, 0);
        let accepted = (0..1000)
            .filter(|_| accept(1.0, 1000.0, 0.01, 0.0, &mut rng))
            .count();
        assert_eq!(accepted, 0);
    }

    #[test]
    fn undetected_compares_worst() {
        assert_eq!(normalized_value(-5.0, 0), f64::MAX);
        assert_eq!(normalized_value(f64::NAN, 3), f64::MAX);
        assert_eq!(normalized_value(12.0, 1), 12.0);
    }

    #[test]
    fn best_never_gets_worse() {
        let (set, data) = plume_fixture();
        let pool = build_pool(Some(2)).unwrap();
        let recorder = Recorder::default();
        let inference = CountingInference::new(InferenceTest::from_set(&set));
        let eval = Evaluator::new(&set, &data, None, &pool, &recorder, inference, TimeToDetection);
        let driver = SearchDriver::new(eval, SensorMutation::default());
        let initial = Configuration::from_sensors([Sensor::new("c", 1)]);
        let result = driver.anneal(&initial, &params(60), 0);
        assert_eq!(result.iterations_completed, 60);
        let history = recorder.best.lock().unwrap().clone();
        assert_eq!(history.len(), 60);
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert!(set.is_affordable(result.best.sensors()));
        assert_eq!(result.best_value, *history.last().unwrap());
    }

    #[test]
    fn cancellation_returns_best_so_far() {
        let (set, data) = plume_fixture();
        let pool = build_pool(Some(1)).unwrap();
        let recorder = Recorder {
            cancel_after: Some(5),
            ..Recorder::default()
        };
        let inference = CountingInference::new(InferenceTest::from_set(&set));
        let eval = Evaluator::new(&set, &data, None, &pool, &recorder, inference, TimeToDetection);
        let driver = SearchDriver::new(eval, SensorMutation::default());
        let initial = Configuration::from_sensors([Sensor::new("c", 1)]);
        let runs = driver.anneal_runs(&initial, &params(1000), 3);
        assert_eq!(runs.len(), 1);
        assert!(runs[0].cancelled);
        assert_eq!(runs[0].iterations_completed, 5);
        assert!(!runs[0].best.is_empty());
    }

    #[test]
    fn same_seed_same_result() {
        let (set, data) = plume_fixture();
        let pool = build_pool(Some(2)).unwrap();
        let run = || {
            let inference = CountingInference::new(InferenceTest::from_set(&set));
            let eval =
                Evaluator::new(&set, &data, None, &pool, &NoopMonitor, inference, TimeToDetection);
            let driver = SearchDriver::new(eval, SensorMutation::default());
            let initial = Configuration::from_sensors([Sensor::new("c", 1)]);
            driver.anneal(&initial, &params(40), 1)
        };
        let a = run();
        let b = run();
        assert_eq!(a.best_value, b.best_value);
        assert!(a.best.same_placement(&b.best));
    }

    #[test]
    fn run_search_stays_within_budget() {
        let (set, data) = plume_fixture();
        let pool = build_pool(Some(1)).unwrap();
        let inference = CountingInference::new(InferenceTest::from_set(&set));
        let eval =
            Evaluator::new(&set, &data, None, &pool, &NoopMonitor, inference, TimeToDetection);
        let driver = SearchDriver::new(eval, SensorMutation::default());
        let best = driver.run_search(&Configuration::new(), 30);
        assert!(set.is_affordable(best.sensors()));
        assert!(best.scenarios_detected() > 0);
    }

    /// Puts the centre sensor down first, then only ever moves to a row
    /// node, recording what it was handed each time.
    struct CentreThenRow<'a> {
        inputs: &'a Mutex<Vec<Vec<Sensor>>>,
        calls: AtomicU32,
    }

    impl MutationStrategy for CentreThenRow<'_> {
        fn mutate(&self, config: &mut Configuration, _: &ScenarioSet, _: &mut Pcg32) -> bool {
            if let Ok(mut inputs) = self.inputs.lock() {
                inputs.push(config.sensors().to_vec());
            }
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            let node = if call == 0 { 13 } else { 1 + call % 5 };
            *config = Configuration::from_sensors([Sensor::new("c", node)]);
            true
        }
    }

    fn mutation_inputs(stagnation_rebase: Option<f64>) -> Vec<Vec<Sensor>> {
        let (set, data) = plume_fixture();
        let pool = build_pool(Some(1)).unwrap();
        let inference = CountingInference::new(InferenceTest::from_set(&set));
        let eval =
            Evaluator::new(&set, &data, None, &pool, &NoopMonitor, inference, TimeToDetection);
        let inputs = Mutex::new(Vec::new());
        let mutation = CentreThenRow {
            inputs: &inputs,
            calls: AtomicU32::new(0),
        };
        let driver = SearchDriver::new(eval, mutation);
        let hot = AnnealingParams {
            initial_temperature: 1e300,
            cooling_rate: 1.0,
            stagnation_rebase,
            ..params(40)
        };
        let result = driver.anneal(&Configuration::new(), &hot, 0);
        assert_eq!(result.best.sensors(), [Sensor::new("c", 13)]);
        drop(driver);
        inputs.into_inner().unwrap()
    }

    #[test]
    fn stagnation_rebases_on_best() {
        let centre = vec![Sensor::new("c", 13)];
        let with = mutation_inputs(Some(0.1));
        assert_eq!(with.len(), 40);
        assert!(with[2..].contains(&centre));

        // Every worse move is taken, so without rebasing the walk never
        // returns to the centre.
        let without = mutation_inputs(None);
        assert!(!without[2..].contains(&centre));
    }

    #[test]
    fn annealing_improves_on_a_corner_sensor() {
        let (set, data) = plume_fixture();
        let pool = build_pool(Some(2)).unwrap();
        let inference = CountingInference::new(InferenceTest::from_set(&set));
        let eval =
            Evaluator::new(&set, &data, None, &pool, &NoopMonitor, inference, TimeToDetection);
        let driver = SearchDriver::new(eval, SensorMutation::default());
        let mut initial = Configuration::from_sensors([Sensor::new("c", 1)]);
        let start = driver.evaluate(&mut initial);
        let runs = driver.anneal_runs(&initial, &params(200), 2);
        let best = best_run(&runs).unwrap();
        assert!(runs[best].best_value < start);
    }
}
