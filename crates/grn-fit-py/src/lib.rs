use grn_fit_core::genes::GeneGroups;
use grn_fit_core::network::GrnTopology;
use grn_fit_core::rng::create_rng;
use grn_fit_core::{GrnSimulator, ParamsBlob, RunConfig, SimulationOptions};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::sync::Arc;

/// Thin PyO3 module exposing grn-fit-core to Python through JSON strings.
#[pyfunction]
fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[pyfunction]
fn default_run_config_json() -> PyResult<String> {
    serde_json::to_string(&RunConfig::default())
        .map_err(|e| PyValueError::new_err(format!("failed to serialize default config: {e}")))
}

#[pyfunction]
fn validate_run_config_json(config_json: &str) -> PyResult<bool> {
    check_run_config(config_json).map_err(PyValueError::new_err)
}

#[pyfunction]
#[pyo3(signature = (params_json, angle=0.0, max_time=48.0, noise_level=0.0, seed=42))]
fn simulate_params_json(
    params_json: &str,
    angle: f64,
    max_time: f64,
    noise_level: f64,
    seed: u64,
) -> PyResult<String> {
    simulate_blob(params_json, angle, max_time, noise_level, seed).map_err(PyValueError::new_err)
}

#[pyfunction]
fn params_to_compact(params_json: &str) -> PyResult<String> {
    ParamsBlob::from_json(params_json)
        .and_then(|blob| blob.to_compact())
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pyfunction]
fn params_from_compact(compact: &str) -> PyResult<String> {
    ParamsBlob::from_compact(compact)
        .and_then(|blob| blob.to_json_pretty())
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

fn check_run_config(config_json: &str) -> Result<bool, String> {
    let config: RunConfig =
        serde_json::from_str(config_json).map_err(|e| format!("invalid config json: {e}"))?;
    config
        .validate()
        .map(|_| true)
        .map_err(|e| format!("invalid run configuration: {e}"))
}

fn simulate_blob(
    params_json: &str,
    angle: f64,
    max_time: f64,
    noise_level: f64,
    seed: u64,
) -> Result<String, String> {
    if !(max_time.is_finite() && max_time > 0.0) {
        return Err(format!("max_time must be positive and finite, got {max_time}"));
    }
    if !(noise_level.is_finite() && noise_level >= 0.0) {
        return Err(format!("noise_level must be finite and non-negative, got {noise_level}"));
    }
    let groups = GeneGroups::standard();
    let params = ParamsBlob::from_json(params_json)
        .and_then(|blob| blob.into_params(groups.gene_count()))
        .map_err(|e| e.to_string())?;
    let topology = GrnTopology::build(groups, &mut create_rng(0));
    let mut simulator = GrnSimulator::new(Arc::new(topology), create_rng(seed));
    let options = SimulationOptions {
        spatial_angle: angle,
        max_time,
        noise_level,
        ..SimulationOptions::default()
    };
    let state = simulator.run(&params, &options);
    serde_json::to_string(&state).map_err(|e| format!("failed to serialize cell state: {e}"))
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(version, m)?)?;
    m.add_function(wrap_pyfunction!(default_run_config_json, m)?)?;
    m.add_function(wrap_pyfunction!(validate_run_config_json, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_params_json, m)?)?;
    m.add_function(wrap_pyfunction!(params_to_compact, m)?)?;
    m.add_function(wrap_pyfunction!(params_from_compact, m)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grn_fit_core::SimulationParams;

    fn default_blob_json() -> String {
        ParamsBlob::from(&SimulationParams::default())
            .to_json_pretty()
            .expect("default blob serializes")
    }

    #[test]
    fn default_config_validates() {
        let json = serde_json::to_string(&RunConfig::default()).expect("serialize default");
        assert_eq!(check_run_config(&json), Ok(true));
    }

    #[test]
    fn bad_config_reports_field() {
        let err = check_run_config(r#"{"population_size": 1}"#).unwrap_err();
        assert!(err.contains("population_size"));
        assert!(check_run_config("not json").is_err());
    }

    #[test]
    fn simulate_returns_cell_state_json() {
        let json = simulate_blob(&default_blob_json(), 0.0, 2.0, 0.0, 1).expect("simulate");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["expression"].as_array().map(Vec::len), Some(200));
        assert!(value["lineage"].is_u64());
    }

    #[test]
    fn simulate_rejects_bad_horizon_and_blob() {
        assert!(simulate_blob(&default_blob_json(), 0.0, 0.0, 0.0, 1).is_err());
        assert!(simulate_blob("{}", 0.0, 1.0, 0.0, 1).is_err());
    }
}
