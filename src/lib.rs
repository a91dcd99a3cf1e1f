//! DREAM sensor placement engine.
//!
//! Searches for sensor placements that detect simulated leak scenarios as
//! early as possible (or cover as much of the plume as possible) within a
//! cost and well budget. The entry point is [`session::run_request`], or
//! [`session::run_json`] for a JSON `SearchRequest` in and `SearchResponse`
//! out. With the `python` feature the same call is exposed as
//! `search_json`.

pub mod annealing;
pub mod configuration;
pub mod detection;
pub mod enumeration;
pub mod error;
pub mod grid;
pub mod inference;
pub mod monitor;
pub mod mutation;
pub mod objective;
pub mod prng;
pub mod provider;
pub mod scenario;
pub mod sensor;
pub mod session;
pub mod types;

pub use error::{EngineError, Result};

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;

    use crate::monitor::NoopMonitor;
    use crate::session::run_request;
    use crate::types::SearchRequest;

    /// Run a sensor placement search.
    ///
    /// Takes a JSON string matching `SearchRequest` and returns a JSON
    /// string matching `SearchResponse`.
    #[pyfunction]
    fn search_json(request_json: &str) -> PyResult<String> {
        let request: SearchRequest = serde_json::from_str(request_json).map_err(|e| {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                "Invalid search request JSON: {e}"
            ))
        })?;

        let response = run_request(&request, &NoopMonitor)
            .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))?;

        serde_json::to_string(&response).map_err(|e| {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                "Failed to serialize search response: {e}"
            ))
        })
    }

    #[pymodule]
    fn dream_engine(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(search_json, m)?)?;
        Ok(())
    }
}
