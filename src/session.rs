//! Search session: validates a request, prepares the detection cache and
//! candidate clouds, then runs annealing or enumeration with the strategy
//! combination named in `SearchParams`.

use rayon::ThreadPool;
use tracing::{info, warn};

use crate::annealing::{best_run, SearchDriver};
use crate::configuration::Configuration;
use crate::detection::{CacheBuild, DetectionCache};
use crate::error::{EngineError, Result};
use crate::inference::{CountingInference, CoverageInference, InferenceStrategy, InferenceTest};
use crate::monitor::{NoopMonitor, SearchMonitor};
use crate::mutation::{MutationStrategy, SensorMutation, WellMutation};
use crate::objective::{build_pool, Coverage, Evaluator, ObjectiveStrategy, TimeToDetection};
use crate::provider::ScenarioDataProvider;
use crate::scenario::ScenarioSet;
use crate::sensor::Sensor;
use crate::types::{
    MutationKind, ObjectiveKind, RunSummary, SearchMode, SearchParams, SearchRequest,
    SearchResponse,
};

/// Owns the scenario set and detection cache for one search.
pub struct SearchSession<'p, P: ?Sized> {
    set: ScenarioSet,
    provider: &'p P,
    params: SearchParams,
    pool: ThreadPool,
    cache: Option<DetectionCache>,
    prepared: bool,
}

impl<'p, P> SearchSession<'p, P>
where
    P: ScenarioDataProvider + ?Sized,
{
    pub fn new(set: ScenarioSet, provider: &'p P, params: SearchParams) -> Result<Self> {
        params.validate()?;
        set.validate()?;
        let pool = build_pool(params.max_threads)?;
        Ok(Self {
            set,
            provider,
            params,
            pool,
            cache: None,
            prepared: false,
        })
    }

    pub fn set(&self) -> &ScenarioSet {
        &self.set
    }

    pub fn cache(&self) -> Option<&DetectionCache> {
        self.cache.as_ref()
    }

    /// Build the detection cache (when enabled) and fill in missing clouds.
    /// Returns false if the monitor cancelled the build.
    pub fn prepare(&mut self, monitor: &dyn SearchMonitor) -> bool {
        if self.prepared {
            return true;
        }
        if self.params.use_detection_cache {
            let mut cache = self.cache.take().unwrap_or_default();
            let set = &self.set;
            let provider = self.provider;
            for setting in set.sensor_settings.values() {
                let outcome = self
                    .pool
                    .install(|| cache.build(set, setting, provider, monitor));
                if outcome == CacheBuild::Cancelled {
                    self.cache = Some(cache);
                    return false;
                }
            }
            let clouds = cache.clouds(&self.set, self.params.pareto_filter);
            self.set.resolve_clouds(&clouds);
            self.cache = Some(cache);
        } else if self.params.pareto_filter {
            warn!("pareto_filter needs the detection cache; ignoring it");
        }
        self.prepared = true;
        true
    }

    /// Turn requested starting sensors into a configuration, rejecting
    /// unknown types and nodes outside the grid.
    pub fn initial_configuration(&self, sensors: &[Sensor]) -> Result<Configuration> {
        let grid = &self.set.node_structure;
        for sensor in sensors {
            if !self.set.sensor_settings.contains_key(&sensor.sensor_type) {
                return Err(EngineError::UnknownSensorType(sensor.sensor_type.clone()));
            }
            if !(1..=grid.total_nodes()).contains(&sensor.node) {
                return Err(EngineError::InvalidParams(format!(
                    "initial sensor node {} is outside the grid",
                    sensor.node
                )));
            }
        }
        Ok(Configuration::from_sensors(sensors.iter().cloned()))
    }

    pub fn run(
        &mut self,
        initial_sensors: &[Sensor],
        monitor: &dyn SearchMonitor,
    ) -> Result<SearchResponse> {
        let initial = self.initial_configuration(initial_sensors)?;
        info!(
            mode = ?self.params.mode,
            mutation = ?self.params.mutation,
            objective = ?self.params.objective,
            scenarios = self.set.active_scenarios().count(),
            "search session started"
        );
        if !self.prepare(monitor) {
            info!("search cancelled while preparing");
            return Ok(self.response(initial, f64::MAX, Vec::new(), 0, true));
        }

        let test = InferenceTest::from_set(&self.set);
        let response = match self.params.objective {
            ObjectiveKind::TimeToDetection => {
                self.with_mutation(&initial, monitor, CountingInference::new(test), TimeToDetection)
            }
            ObjectiveKind::Coverage => {
                let inference = CoverageInference::new(test, &self.set);
                self.with_mutation(&initial, monitor, inference, Coverage)
            }
        };
        info!(
            best_value = response.best_value,
            cancelled = response.cancelled,
            "search session finished"
        );
        Ok(response)
    }

    fn with_mutation<I, O>(
        &self,
        initial: &Configuration,
        monitor: &dyn SearchMonitor,
        inference: I,
        objective: O,
    ) -> SearchResponse
    where
        I: InferenceStrategy,
        O: ObjectiveStrategy,
    {
        let evaluator = Evaluator::new(
            &self.set,
            self.provider,
            self.cache.as_ref(),
            &self.pool,
            monitor,
            inference,
            objective,
        );
        match self.params.mutation {
            MutationKind::Sensor => {
                let mutation = SensorMutation::new(self.params.placement_policy);
                self.drive(SearchDriver::new(evaluator, mutation), initial)
            }
            MutationKind::Well => self.drive(SearchDriver::new(evaluator, WellMutation), initial),
        }
    }

    fn drive<I, O, M>(
        &self,
        driver: SearchDriver<'_, I, O, P, M>,
        initial: &Configuration,
    ) -> SearchResponse
    where
        I: InferenceStrategy,
        O: ObjectiveStrategy,
        M: MutationStrategy,
    {
        match self.params.mode {
            SearchMode::Annealing => {
                let results =
                    driver.anneal_runs(initial, &self.params.annealing(), self.params.runs);
                let cancelled = results.iter().any(|r| r.cancelled);
                let runs: Vec<RunSummary> = results
                    .iter()
                    .map(|r| RunSummary {
                        run: r.run,
                        best_value: r.best_value,
                        iterations_completed: r.iterations_completed,
                        cancelled: r.cancelled,
                        summary: r.best.summary(&self.set),
                    })
                    .collect();
                match best_run(&results).and_then(|i| results.into_iter().nth(i)) {
                    Some(best) => self.response(best.best, best.best_value, runs, 0, cancelled),
                    None => self.response(initial.clone(), f64::MAX, runs, 0, cancelled),
                }
            }
            SearchMode::Enumeration => {
                let result = driver.enumerate(&self.params.enumeration(), |_, _| {});
                let best = result.best.unwrap_or_default();
                self.response(
                    best,
                    result.best_value,
                    Vec::new(),
                    result.evaluated,
                    result.cancelled,
                )
            }
        }
    }

    fn response(
        &self,
        best: Configuration,
        best_value: f64,
        runs: Vec<RunSummary>,
        evaluated: u64,
        cancelled: bool,
    ) -> SearchResponse {
        SearchResponse {
            stats: best.stats(&self.set),
            summary: best.summary(&self.set),
            best,
            best_value,
            runs,
            evaluated,
            cancelled,
        }
    }
}

/// Run a parsed request against its in-memory data.
pub fn run_request(request: &SearchRequest, monitor: &dyn SearchMonitor) -> Result<SearchResponse> {
    let mut session = SearchSession::new(
        request.scenario_set.clone(),
        &request.data,
        request.params.clone(),
    )?;
    session.run(&request.initial_sensors, monitor)
}

/// JSON in, JSON out.
pub fn run_json(request_json: &str) -> Result<String> {
    let request: SearchRequest = serde_json::from_str(request_json)?;
    let response = run_request(&request, &NoopMonitor)?;
    Ok(serde_json::to_string(&response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Ijk;
    use crate::monitor::CancelFlag;
    use crate::objective::tests::plume_fixture;

    fn plume_request(params: SearchParams) -> SearchRequest {
        let (scenario_set, data) = plume_fixture();
        SearchRequest {
            params,
            scenario_set,
            data,
            initial_sensors: Vec::new(),
        }
    }

    fn quick() -> SearchParams {
        SearchParams {
            seed: 11,
            iterations: 80,
            max_threads: Some(2),
            ..SearchParams::default()
        }
    }

    #[test]
    fn json_round_trip_finds_a_detecting_placement() {
        let json = serde_json::to_string(&plume_request(quick())).unwrap();
        let out = run_json(&json).unwrap();
        let response: SearchResponse = serde_json::from_str(&out).unwrap();
        assert!(response.best.scenarios_detected() > 0);
        assert!(response.stats.cost <= 2.0);
        assert_eq!(response.runs.len(), 1);
        assert!(!response.cancelled);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(run_json("{"), Err(EngineError::Json(_))));
    }

    #[test]
    fn unknown_initial_type_is_rejected() {
        let mut request = plume_request(quick());
        request.initial_sensors = vec![Sensor::new("nope", 1)];
        let err = run_request(&request, &NoopMonitor).unwrap_err();
        assert!(matches!(err, EngineError::UnknownSensorType(t) if t == "nope"));
    }

    #[test]
    fn empty_scenario_set_is_rejected() {
        let mut request = plume_request(quick());
        request.scenario_set.scenarios.clear();
        assert!(matches!(
            run_request(&request, &NoopMonitor),
            Err(EngineError::EmptyScenarioSet)
        ));
    }

    #[test]
    fn bad_params_are_rejected() {
        let request = plume_request(SearchParams {
            cooling_rate: 2.0,
            ..quick()
        });
        assert!(matches!(
            run_request(&request, &NoopMonitor),
            Err(EngineError::InvalidParams(_))
        ));
    }

    #[test]
    fn cancelled_before_start_returns_initial() {
        let mut request = plume_request(quick());
        let centre = request.scenario_set.node_structure.node_number(Ijk::new(3, 3, 1));
        request.initial_sensors = vec![Sensor::new("c", centre)];
        let flag = CancelFlag::new();
        flag.cancel();
        let response = run_request(&request, &flag).unwrap();
        assert!(response.cancelled);
        assert_eq!(response.best.sensors(), &[Sensor::new("c", centre)]);
    }

    #[test]
    fn best_of_several_runs_is_reported() {
        let request = plume_request(SearchParams { runs: 3, ..quick() });
        let response = run_request(&request, &NoopMonitor).unwrap();
        assert_eq!(response.runs.len(), 3);
        let lowest = response
            .runs
            .iter()
            .map(|r| r.best_value)
            .fold(f64::MAX, f64::min);
        assert_eq!(response.best_value, lowest);
    }

    #[test]
    fn enumeration_agrees_with_and_without_cache() {
        let params = SearchParams {
            mode: SearchMode::Enumeration,
            ..quick()
        };
        let cached = run_request(&plume_request(params.clone()), &NoopMonitor).unwrap();
        let direct = run_request(
            &plume_request(SearchParams {
                use_detection_cache: false,
                ..params
            }),
            &NoopMonitor,
        )
        .unwrap();
        assert!(cached.evaluated > 0);
        assert_eq!(cached.evaluated, direct.evaluated);
        assert_eq!(cached.best_value, direct.best_value);
        assert_eq!(cached.summary, direct.summary);
    }

    #[test]
    fn coverage_run_rewards_covered_area() {
        let mut request = plume_request(SearchParams {
            mutation: MutationKind::Well,
            objective: ObjectiveKind::Coverage,
            ..quick()
        });
        request.scenario_set.cost_constraint = 3.0;
        let grid = &request.scenario_set.node_structure;
        // A small triangle next to the centre: inferred for the centre and
        // far-corner plumes.
        request.initial_sensors = [(3, 3), (4, 3), (3, 4)]
            .into_iter()
            .map(|(i, j)| Sensor::new("c", grid.node_number(Ijk::new(i, j, 1))))
            .collect();
        let response = run_request(&request, &NoopMonitor).unwrap();
        assert!(response.stats.cost <= 3.0);
        assert!(response.best_value < 0.0);
        assert!(response
            .best
            .inference_results
            .values()
            .any(|r| r.inferred && r.goodness.is_some_and(|g| g > 0.0)));
    }

    #[test]
    fn pareto_filter_narrows_clouds() {
        let (set, data) = plume_fixture();
        let params = SearchParams {
            pareto_filter: true,
            ..quick()
        };
        let mut session = SearchSession::new(set, &data, params).unwrap();
        assert!(session.prepare(&NoopMonitor));
        let specific = session.set().sensor_settings["c"].specific_type();
        let expected = session
            .cache()
            .map(|c| c.pareto_optimal_nodes(&specific))
            .unwrap();
        let cloud = session.set().sensor_settings["c"].valid_nodes.clone().unwrap();
        assert_eq!(cloud, expected);
        assert!(!cloud.is_empty());
        assert!(cloud.len() < 25);
    }

    #[test]
    fn cloud_node_outside_grid_is_rejected() {
        let mut request = plume_request(quick());
        if let Some(s) = request.scenario_set.sensor_settings.get_mut("c") {
            s.valid_nodes = Some([0, 7].into_iter().collect());
        }
        assert!(matches!(
            run_request(&request, &NoopMonitor),
            Err(EngineError::InvalidParams(_))
        ));
    }

    #[test]
    fn prepare_fills_clouds_from_cache() {
        let (set, data) = plume_fixture();
        let mut session = SearchSession::new(set, &data, quick()).unwrap();
        assert!(session.set().sensor_settings["c"].valid_nodes.is_none());
        assert!(session.prepare(&NoopMonitor));
        let specific = session.set().sensor_settings["c"].specific_type();
        assert!(session.cache().is_some_and(|c| c.contains_type(&specific)));
        let cloud = session.set().sensor_settings["c"].valid_nodes.clone().unwrap();
        assert!(!cloud.is_empty());
    }
}
