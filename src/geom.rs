//! Rigid convex bodies and their placement transforms.
//!
//! A [`RigidBody`] is a fixed set of vertices plus the centroid derived from
//! them. Every transform returns a new body, so a candidate placement can be
//! thrown away without touching the committed one.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};

use crate::error::{PackError, Result};

/// Trigonometric values with a magnitude below this are snapped to zero.
pub const TRIG_EPSILON: f64 = 1e-14;


/// A single planar rotation, in degrees, within the plane spanned by two
/// coordinate axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationStep {
    pub degrees: f64,
    pub plane: (usize, usize),
}

impl RotationStep {
    pub fn new(degrees: f64, plane: (usize, usize)) -> Self {
        Self { degrees, plane }
    }

    pub fn radians(&self) -> f64 {
        self.degrees.to_radians()
    }
}

/// Every unordered pair of coordinate axes in `dim` dimensions, in the fixed
/// order (0,1), (0,2), ..., (1,2), ...
pub fn axis_pairs(dim: usize) -> Vec<(usize, usize)> {
    (0..dim).tuple_combinations().collect()
}

/// A rigid body: an immutable vertex set and its centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    vertices: Vec<DVector<f64>>,
    centroid: DVector<f64>,
}

impl RigidBody {
    /// Builds a body from its vertices. All vertices must share one dimension.
    pub fn new(vertices: Vec<DVector<f64>>) -> Result<Self> {
        let Some(first) = vertices.first() else {
            return Err(PackError::InvalidConfig(
                "a body needs at least one vertex".to_string(),
            ));
        };
        let dim = first.len();
        if let Some(bad) = vertices.iter().find(|v| v.len() != dim) {
            return Err(PackError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }
        let centroid = compute_centroid(&vertices);
        Ok(Self { vertices, centroid })
    }

    /// A regular tetrahedron with the given edge length, centred on the origin.
    pub fn regular_tetrahedron(edge: f64) -> Self {
        // alternate corners of a cube with half-side edge / (2 sqrt 2)
        let s = edge / (2.0 * 2.0f64.sqrt());
        let vertices = [
            [1.0, 1.0, 1.0],
            [1.0, -1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
        ]
        .iter()
        .map(|corner| DVector::from_iterator(3, corner.iter().map(|c| c * s)))
        .collect();

        Self {
            vertices,
            centroid: DVector::zeros(3),
        }
    }

    pub fn dim(&self) -> usize {
        self.centroid.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[DVector<f64>] {
        &self.vertices
    }

    pub fn centroid(&self) -> &DVector<f64> {
        &self.centroid
    }

    /// Largest vertex-to-centroid distance. For a regular shape this is the
    /// distance from any vertex, vertex 0 included.
    pub fn radius(&self) -> f64 {
        self.vertices
            .iter()
            .map(|v| (v - &self.centroid).norm())
            .fold(0.0, f64::max)
    }

    /// Volume of the simplex spanned by the vertices. Zero unless the body
    /// has exactly `dim + 1` vertices.
    pub fn volume(&self) -> f64 {
        let dim = self.dim();
        if self.vertices.len() != dim + 1 {
            return 0.0;
        }
        let origin = &self.vertices[0];
        let edges = DMatrix::from_columns(
            &self.vertices[1..]
                .iter()
                .map(|v| v - origin)
                .collect::<Vec<_>>(),
        );
        let factorial: f64 = (1..=dim).map(|k| k as f64).product();
        edges.determinant().abs() / factorial
    }

    /// Mean of the current vertices, computed afresh.
    pub fn mean_of_vertices(&self) -> DVector<f64> {
        compute_centroid(&self.vertices)
    }

    /// Returns the body shifted by `vector`.
    pub fn translate(&self, vector: &DVector<f64>) -> Result<RigidBody> {
        if vector.len() != self.dim() {
            return Err(PackError::DimensionMismatch {
                expected: self.dim(),
                found: vector.len(),
            });
        }
        Ok(Self {
            vertices: self.vertices.iter().map(|v| v + vector).collect(),
            centroid: &self.centroid + vector,
        })
    }

    /// Returns the body rotated by `angle` radians about its centroid, within
    /// the plane spanned by the axes in `plane`.
    pub fn rotate(&self, angle: f64, plane: (usize, usize)) -> Result<RigidBody> {
        let matrix = rotation_matrix(self.dim(), angle, plane)?;
        let vertices = self
            .vertices
            .iter()
            .map(|v| &matrix * (v - &self.centroid) + &self.centroid)
            .collect();

        Ok(Self {
            vertices,
            centroid: self.centroid.clone(),
        })
    }

    /// As [`RigidBody::rotate`], with the angle in degrees.
    pub fn rotate_deg(&self, degrees: f64, plane: (usize, usize)) -> Result<RigidBody> {
        self.rotate(degrees.to_radians(), plane)
    }

    /// Applies the steps in order, each about the (invariant) centroid.
    pub fn rotate_all(&self, steps: &[RotationStep]) -> Result<RigidBody> {
        steps
            .iter()
            .try_fold(self.clone(), |body, step| body.rotate(step.radians(), step.plane))
    }

    /// Sum of the distances from every vertex to `point`.
    pub fn total_distance_to(&self, point: &DVector<f64>) -> f64 {
        self.vertices.iter().map(|v| (v - point).norm()).sum()
    }

    /// Vertex coordinates flattened in vertex order.
    pub fn flatten(&self) -> Vec<f64> {
        self.vertices
            .iter()
            .flat_map(|v| v.iter().copied())
            .collect()
    }

    /// True if both bodies have the same shape and every vertex matches within `tol`.
    pub fn approx_eq(&self, other: &RigidBody, tol: f64) -> bool {
        self.vertices.len() == other.vertices.len()
            && self.dim() == other.dim()
            && self
                .vertices
                .iter()
                .zip(&other.vertices)
                .all(|(a, b)| (a - b).amax() <= tol)
    }
}

fn compute_centroid(vertices: &[DVector<f64>]) -> DVector<f64> {
    let dim = vertices.first().map_or(0, |v| v.len());
    let sum = vertices
        .iter()
        .fold(DVector::zeros(dim), |acc: DVector<f64>, v| acc + v);
    sum / vertices.len().max(1) as f64
}

/// The planar rotation matrix for `plane`, embedded in `dim` dimensions.
fn rotation_matrix(dim: usize, angle: f64, plane: (usize, usize)) -> Result<DMatrix<f64>> {
    let (p, q) = plane;
    if p == q || p >= dim || q >= dim {
        return Err(PackError::InvalidPlane(p, q, dim));
    }

    let snap = |x: f64| if x.abs() < TRIG_EPSILON { 0.0 } else { x };
    let cos = snap(angle.cos());
    let sin = snap(angle.sin());

    let mut matrix = DMatrix::identity(dim, dim);
    matrix[(p, p)] = cos;
    matrix[(q, q)] = cos;
    matrix[(p, q)] = -sin;
    matrix[(q, p)] = sin;
    Ok(matrix)
}
