use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use tetrapack::packing::{PackState, Packing};
use tetrapack::proposer::RotationMode;
use tetrapack::settings::Settings;

/// Packs `num_bodies` regular tetrahedra and returns the final placements,
/// one list of `[x, y, z]` vertices per body, plus whether the run converged.
#[pyfunction]
#[pyo3(signature = (
    num_bodies = 4,
    init_step_scale = 0.9,
    step_decay = 0.999,
    step_threshold = 1e-6,
    init_rotation_range = 360.0,
    rotation_decay = 0.999,
    rotation_threshold = 0.1,
    edge_length = 1.0,
    max_iterations = 5000,
    neighbour_bias = false,
    single_plane = false,
    seed = None,
))]
#[allow(clippy::too_many_arguments)]
fn pack(
    num_bodies: usize,
    init_step_scale: f64,
    step_decay: f64,
    step_threshold: f64,
    init_rotation_range: f64,
    rotation_decay: f64,
    rotation_threshold: f64,
    edge_length: f64,
    max_iterations: usize,
    neighbour_bias: bool,
    single_plane: bool,
    seed: Option<u64>,
) -> PyResult<(Vec<Vec<Vec<f64>>>, bool)> {
    let settings = Settings {
        num_bodies,
        init_step_scale,
        step_decay,
        step_threshold,
        init_rotation_range,
        rotation_decay,
        rotation_threshold,
        edge_length,
        max_iterations,
        neighbour_bias,
        rotation_mode: if single_plane {
            RotationMode::SinglePlane
        } else {
            RotationMode::AllPlanes
        },
        seed,
        ..Settings::default()
    };

    let mut packing = Packing::new(settings).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let state = packing
        .solve()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let bodies: Vec<Vec<Vec<f64>>> = packing
        .result()
        .iter()
        .map(|body| {
            body.vertices()
                .iter()
                .map(|v| v.iter().copied().collect::<Vec<f64>>())
                .collect()
        })
        .collect();
    Ok((bodies, state == PackState::Converged))
}

/// A Python module implemented in Rust.
#[pymodule]
fn _tetrapack_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(pack, m)?)?;
    Ok(())
}
