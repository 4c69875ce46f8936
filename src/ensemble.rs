//! The ensemble of bodies being packed and its shared attraction target.

use nalgebra::DVector;
use rand::Rng;

use crate::error::{PackError, Result};
use crate::geom::{axis_pairs, RigidBody};

/// Lattice spacing in multiples of the body circumradius.
pub const LATTICE_SPACING: f64 = 3.0;


/// Placement and adaptive move parameters of one body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyState {
    pub body: RigidBody,
    pub step_scale: f64,     // translation magnitude as a fraction of the distance to the centre
    pub rotation_range: f64, // upper bound on proposed angles, in degrees
    pub converged: bool,     // set once, never cleared
}

impl BodyState {
    pub fn new(body: RigidBody, step_scale: f64, rotation_range: f64) -> Self {
        Self {
            body,
            step_scale,
            rotation_range,
            converged: false,
        }
    }

    /// True once both adaptive parameters are under their thresholds.
    pub fn is_settled(&self, step_threshold: f64, rotation_threshold: f64) -> bool {
        self.step_scale < step_threshold && self.rotation_range < rotation_threshold
    }
}

/// All bodies of a run, indexed by identity, plus the mean of their centroids.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    states: Vec<BodyState>,
    center: DVector<f64>,
}

impl Ensemble {
    /// Builds an ensemble where every body starts with the same parameters.
    pub fn new(bodies: Vec<RigidBody>, step_scale: f64, rotation_range: f64) -> Result<Self> {
        let Some(first) = bodies.first() else {
            return Err(PackError::InvalidConfig(
                "an ensemble needs at least one body".to_string(),
            ));
        };
        let dim = first.dim();
        if let Some(bad) = bodies.iter().find(|b| b.dim() != dim) {
            return Err(PackError::DimensionMismatch {
                expected: dim,
                found: bad.dim(),
            });
        }

        let states: Vec<BodyState> = bodies
            .into_iter()
            .map(|body| BodyState::new(body, step_scale, rotation_range))
            .collect();
        let center = mean_centroid(&states);
        Ok(Self { states, center })
    }

    /// Procedural initial layout: `num` regular tetrahedra on a cubic lattice
    /// with spacing [`LATTICE_SPACING`] circumradii, each in a random orientation.
    ///
    /// The spacing exceeds the `2r` needed for bounding spheres to be disjoint,
    /// so the layout is collision free whatever the orientations.
    pub fn lattice<R: Rng>(
        num: usize,
        edge_length: f64,
        step_scale: f64,
        rotation_range: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if num == 0 {
            return Err(PackError::InvalidConfig(
                "an ensemble needs at least one body".to_string(),
            ));
        }
        let template = RigidBody::regular_tetrahedron(edge_length);
        let spacing = LATTICE_SPACING * template.radius();
        let side = lattice_side(num);
        let planes = axis_pairs(template.dim());

        let states = (0..num)
            .map(|index| {
                let cell = [index % side, (index / side) % side, index / (side * side)];
                let offset = DVector::from_iterator(3, cell.iter().map(|&c| c as f64 * spacing));

                let mut body = template.clone();
                for &plane in &planes {
                    body = body.rotate_deg(rng.random_range(0.0..360.0), plane)?;
                }
                let body = body.translate(&offset)?;
                Ok(BodyState::new(body, step_scale, rotation_range))
            })
            .collect::<Result<Vec<BodyState>>>()?;

        let center = mean_centroid(&states);
        Ok(Self { states, center })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.center.len()
    }

    pub fn states(&self) -> &[BodyState] {
        &self.states
    }

    pub fn state(&self, index: usize) -> &BodyState {
        &self.states[index]
    }

    pub fn state_mut(&mut self, index: usize) -> &mut BodyState {
        &mut self.states[index]
    }

    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> {
        self.states.iter().map(|s| &s.body)
    }

    /// The aggregate centre of mass: the mean of all current centroids.
    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    /// Mean of the centroids computed from scratch.
    pub fn recompute_center(&self) -> DVector<f64> {
        mean_centroid(&self.states)
    }

    /// Replaces the placement of body `index` and shifts the centre by the
    /// change in that body's centroid.
    pub fn commit(&mut self, index: usize, body: RigidBody) -> Result<()> {
        if body.dim() != self.dim() {
            return Err(PackError::DimensionMismatch {
                expected: self.dim(),
                found: body.dim(),
            });
        }
        let shift = (body.centroid() - self.states[index].body.centroid()) / self.len() as f64;
        self.center += shift;
        self.states[index].body = body;
        Ok(())
    }

    /// Index of the body whose centroid is closest to that of `index`.
    /// Ties go to the lowest index. `None` for a lone body.
    pub fn nearest_neighbour(&self, index: usize) -> Option<usize> {
        let here = self.states[index].body.centroid();
        let mut best: Option<(usize, f64)> = None;
        for (other, state) in self.states.iter().enumerate() {
            if other == index {
                continue;
            }
            let dist = (state.body.centroid() - here).norm();
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((other, dist));
            }
        }
        best.map(|(other, _)| other)
    }

    pub fn all_converged(&self) -> bool {
        self.states.iter().all(|s| s.converged)
    }

    pub fn num_converged(&self) -> usize {
        self.states.iter().filter(|s| s.converged).count()
    }

    /// Consumes the ensemble, returning the placements in index order.
    pub fn into_bodies(self) -> Vec<RigidBody> {
        self.states.into_iter().map(|s| s.body).collect()
    }
}

fn mean_centroid(states: &[BodyState]) -> DVector<f64> {
    let dim = states.first().map_or(0, |s| s.body.dim());
    let sum = states
        .iter()
        .fold(DVector::zeros(dim), |acc: DVector<f64>, s| acc + s.body.centroid());
    sum / states.len().max(1) as f64
}

/// Smallest cube side length holding `num` lattice cells.
fn lattice_side(num: usize) -> usize {
    let mut side = 1;
    while side * side * side < num {
        side += 1;
    }
    side
}
