//! Overlap tests between placed bodies.
//!
//! The packing loop only needs a yes/no answer for a pair of placements, so
//! every strategy sits behind [`CollisionOracle`]:
//!
//! - [`SeparatingAxis`]: exact in-process test for convex hulls in 2-D and 3-D
//! - [`Prefiltered`]: centroid-distance short circuit in front of another oracle
//! - [`ProcessOracle`]: delegates to a long-lived child process over a line protocol

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use itertools::Itertools;
use nalgebra::{DVector, Vector3};
use serde::Serialize;

use crate::error::{PackError, Result};
use crate::geom::RigidBody;

/// Projection gap below which two hulls count as touching rather than overlapping.
pub const CONTACT_TOLERANCE: f64 = 1e-9;
/// Candidate axes shorter than this are degenerate and skipped.
const AXIS_EPSILON: f64 = 1e-12;

#[cfg(test)]
mod tests {

    use super::*;

    fn tet_at(x: f64, y: f64, z: f64) -> RigidBody {
        RigidBody::regular_tetrahedron(1.0)
            .translate(&DVector::from_vec(vec![x, y, z]))
            .unwrap()
    }

    /// Counts exact calls and answers with a fixed verdict.
    struct Fixed {
        verdict: bool,
        calls: usize,
    }

    impl CollisionOracle for Fixed {
        fn intersects(&mut self, _: &RigidBody, _: &RigidBody) -> Result<bool> {
            self.calls += 1;
            Ok(self.verdict)
        }
    }

    #[test]
    fn coincident_tetrahedra_overlap() {
        let mut sat = SeparatingAxis;
        assert!(sat.intersects(&tet_at(0.0, 0.0, 0.0), &tet_at(0.0, 0.0, 0.0)).unwrap());
        assert!(sat.intersects(&tet_at(0.0, 0.0, 0.0), &tet_at(0.1, 0.05, 0.0)).unwrap());
    }

    #[test]
    fn distant_tetrahedra_do_not_overlap() {
        let mut sat = SeparatingAxis;
        assert!(!sat.intersects(&tet_at(0.0, 0.0, 0.0), &tet_at(3.0, 0.0, 0.0)).unwrap());
    }

    #[test]
    fn face_to_face_contact_is_not_overlap() {
        // reflect the tetrahedron through the plane of one face
        let a = RigidBody::regular_tetrahedron(1.0);
        let face: Vec<_> = a.vertices()[1..].to_vec();
        let apex = &a.vertices()[0];
        let face_centre = (&face[0] + &face[1] + &face[2]) / 3.0;
        let mirrored = &face_centre * 2.0 - apex;
        let mut vertices = vec![mirrored];
        vertices.extend(face);
        let b = RigidBody::new(vertices).unwrap();

        let mut sat = SeparatingAxis;
        assert!(!sat.intersects(&a, &b).unwrap());

        // nudging b into a makes them overlap
        let inward = (apex - &face_centre).normalize() * 1e-3;
        let pushed = b.translate(&inward).unwrap();
        assert!(sat.intersects(&a, &pushed).unwrap());
    }

    #[test]
    fn edge_edge_separation_is_found() {
        // two tetrahedra with crossed edges close together but apart
        let a = RigidBody::regular_tetrahedron(1.0);
        let b = a
            .rotate_deg(90.0, (0, 1))
            .unwrap()
            .translate(&DVector::from_vec(vec![0.0, 0.0, 0.72]))
            .unwrap();
        let mut sat = SeparatingAxis;
        assert!(!sat.intersects(&a, &b).unwrap());
        let closer = b.translate(&DVector::from_vec(vec![0.0, 0.0, -0.05])).unwrap();
        assert!(sat.intersects(&a, &closer).unwrap());
    }

    #[test]
    fn triangles_in_the_plane() {
        let tri = |dx: f64| {
            RigidBody::new(vec![
                DVector::from_vec(vec![0.0 + dx, 0.0]),
                DVector::from_vec(vec![1.0 + dx, 0.0]),
                DVector::from_vec(vec![0.0 + dx, 1.0]),
            ])
            .unwrap()
        };
        let mut sat = SeparatingAxis;
        assert!(sat.intersects(&tri(0.0), &tri(0.4)).unwrap());
        assert!(!sat.intersects(&tri(0.0), &tri(1.5)).unwrap());
    }

    #[test]
    fn unsupported_dimension_is_an_error() {
        let point4 = |x: f64| {
            RigidBody::new(vec![DVector::from_vec(vec![x, 0.0, 0.0, 0.0])]).unwrap()
        };
        let mut sat = SeparatingAxis;
        assert!(sat.intersects(&point4(0.0), &point4(1.0)).is_err());
        assert!(sat.intersects(&tet_at(0.0, 0.0, 0.0), &point4(1.0)).is_err());
    }

    #[test]
    fn bodies_without_axes_are_an_error() {
        let point3 = |x: f64| RigidBody::new(vec![DVector::from_vec(vec![x, 0.0, 0.0])]).unwrap();
        let mut sat = SeparatingAxis;
        assert!(matches!(
            sat.intersects(&point3(0.0), &point3(5.0)),
            Err(PackError::Oracle(_))
        ));
        // parallel segments give no face normals and no edge crosses
        let segment = |y: f64| {
            RigidBody::new(vec![
                DVector::from_vec(vec![0.0, y, 0.0]),
                DVector::from_vec(vec![1.0, y, 0.0]),
            ])
            .unwrap()
        };
        assert!(matches!(
            sat.intersects(&segment(0.0), &segment(3.0)),
            Err(PackError::Oracle(_))
        ));
        // one full-dimensional hull is enough to decide
        assert!(!sat.intersects(&tet_at(0.0, 0.0, 0.0), &point3(5.0)).unwrap());
    }

    #[test]
    fn prefilter_skips_far_pairs() {
        let shape = RigidBody::regular_tetrahedron(1.0);
        let r = shape.radius();
        let mut oracle = Prefiltered::for_shape(Fixed { verdict: true, calls: 0 }, &shape);

        let far = tet_at(2.0 * r + 1e-6, 0.0, 0.0);
        assert!(!oracle.intersects(&shape, &far).unwrap());
        assert_eq!(oracle.inner().calls, 0);

        let near = tet_at(2.0 * r, 0.0, 0.0);
        assert!(oracle.intersects(&shape, &near).unwrap());
        assert_eq!(oracle.inner().calls, 1);

        let stats = oracle.stats();
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.prefiltered, 1);
        assert_eq!(stats.exact, 1);
    }

    #[cfg(unix)]
    #[test]
    fn process_oracle_reads_framed_booleans() {
        let script = "while read line; do echo; echo true; echo false; done";
        let mut oracle =
            ProcessOracle::spawn(&["sh".to_string(), "-c".to_string(), script.to_string()])
                .unwrap();
        let a = tet_at(0.0, 0.0, 0.0);
        // blank framing line skipped, then "true"
        assert!(oracle.intersects(&a, &a).unwrap());
        // the trailing "false" answers the next request
        assert!(!oracle.intersects(&a, &a).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn process_oracle_rejects_garbage() {
        let script = "while read line; do echo maybe; done";
        let mut oracle =
            ProcessOracle::spawn(&["sh".to_string(), "-c".to_string(), script.to_string()])
                .unwrap();
        let a = tet_at(0.0, 0.0, 0.0);
        assert!(matches!(oracle.intersects(&a, &a), Err(PackError::Oracle(_))));
    }

    #[test]
    fn process_oracle_needs_a_command() {
        assert!(ProcessOracle::spawn(&[]).is_err());
    }
}

/// Counters describing how an oracle has been queried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OracleStats {
    pub queries: usize,     // total intersection queries
    pub prefiltered: usize, // answered by the centroid-distance filter
    pub exact: usize,       // forwarded to the exact test
}

/// Answers whether two placed bodies overlap.
///
/// An error means the oracle could not answer. Callers must not read it as
/// "no collision".
pub trait CollisionOracle {
    fn intersects(&mut self, a: &RigidBody, b: &RigidBody) -> Result<bool>;

    fn stats(&self) -> OracleStats {
        OracleStats::default()
    }
}

impl CollisionOracle for Box<dyn CollisionOracle> {
    fn intersects(&mut self, a: &RigidBody, b: &RigidBody) -> Result<bool> {
        (**self).intersects(a, b)
    }

    fn stats(&self) -> OracleStats {
        (**self).stats()
    }
}

/// Exact separating-axis test on the convex hulls of two vertex sets.
///
/// The candidate axes are the normals of every vertex triple (3-D) or vertex
/// pair (2-D) of both bodies, plus in 3-D the cross products of every edge of
/// one body with every edge of the other. This covers the true face normals
/// and edge directions of both hulls, so the test is exact. Bodies too
/// degenerate to yield any axis (single points, or collinear points with
/// parallel edges) are a [`PackError::Oracle`] error rather than a verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeparatingAxis;

impl CollisionOracle for SeparatingAxis {
    fn intersects(&mut self, a: &RigidBody, b: &RigidBody) -> Result<bool> {
        if a.dim() != b.dim() {
            return Err(PackError::DimensionMismatch {
                expected: a.dim(),
                found: b.dim(),
            });
        }
        let axes: Vec<DVector<f64>> = match a.dim() {
            2 => planar_axes(a).chain(planar_axes(b)).collect(),
            3 => {
                let faces: Vec<Vector3<f64>> = face_normals(a).chain(face_normals(b)).collect();
                let edges_b: Vec<Vector3<f64>> = edges(b).collect();
                faces
                    .into_iter()
                    .chain(edges(a).flat_map(|ea| {
                        edges_b.iter().map(move |eb| ea.cross(eb)).collect::<Vec<_>>()
                    }))
                    .filter(|axis| axis.norm() > AXIS_EPSILON)
                    .map(|axis| to_dynamic(&axis))
                    .collect()
            }
            dim => {
                return Err(PackError::Oracle(format!(
                    "separating-axis test supports 2 or 3 dimensions, got {}",
                    dim
                )))
            }
        };
        if axes.is_empty() {
            return Err(PackError::Oracle(
                "no candidate separating axes: both bodies are degenerate".to_string(),
            ));
        }
        let separated = axes.iter().any(|axis| separates(axis, a, b));
        Ok(!separated)
    }
}

fn to_point3(v: &DVector<f64>) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

fn to_dynamic(v: &Vector3<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}

/// Normals of every vertex triple of a 3-D body.
fn face_normals(body: &RigidBody) -> impl Iterator<Item = Vector3<f64>> + '_ {
    body.vertices()
        .iter()
        .map(to_point3)
        .tuple_combinations()
        .map(|(p, q, r)| (q - p).cross(&(r - p)))
        .filter(|n| n.norm() > AXIS_EPSILON)
}

/// Direction of every vertex pair of a 3-D body.
fn edges(body: &RigidBody) -> impl Iterator<Item = Vector3<f64>> + '_ {
    body.vertices()
        .iter()
        .map(to_point3)
        .tuple_combinations()
        .map(|(p, q)| q - p)
}

/// In-plane normals of every vertex pair of a 2-D body.
fn planar_axes(body: &RigidBody) -> impl Iterator<Item = DVector<f64>> + '_ {
    body.vertices()
        .iter()
        .tuple_combinations()
        .map(|(p, q)| {
            let d = q - p;
            DVector::from_vec(vec![-d[1], d[0]])
        })
        .filter(|n| n.norm() > AXIS_EPSILON)
}

fn projection(axis: &DVector<f64>, body: &RigidBody) -> (f64, f64) {
    body.vertices()
        .iter()
        .map(|v| v.dot(axis))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
            (lo.min(x), hi.max(x))
        })
}

fn separates(axis: &DVector<f64>, a: &RigidBody, b: &RigidBody) -> bool {
    let axis = axis.normalize();
    let (a_min, a_max) = projection(&axis, a);
    let (b_min, b_max) = projection(&axis, b);
    a_max <= b_min + CONTACT_TOLERANCE || b_max <= a_min + CONTACT_TOLERANCE
}

/// Skips the inner oracle when the bodies' bounding spheres are disjoint.
///
/// Bodies of one shape family share a circumradius `r`. Two bodies whose
/// centroids are more than `2r` apart cannot overlap, so the filter never
/// produces a false negative.
#[derive(Debug)]
pub struct Prefiltered<O> {
    inner: O,
    radius: f64,
    stats: OracleStats,
}

impl<O: CollisionOracle> Prefiltered<O> {
    /// Wraps `inner`, taking the filter radius from a representative body.
    pub fn for_shape(inner: O, shape: &RigidBody) -> Self {
        Self::with_radius(inner, shape.radius())
    }

    pub fn with_radius(inner: O, radius: f64) -> Self {
        Self {
            inner,
            radius,
            stats: OracleStats::default(),
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<O: CollisionOracle> CollisionOracle for Prefiltered<O> {
    fn intersects(&mut self, a: &RigidBody, b: &RigidBody) -> Result<bool> {
        self.stats.queries += 1;
        if a.dim() != b.dim() {
            return Err(PackError::DimensionMismatch {
                expected: a.dim(),
                found: b.dim(),
            });
        }
        if (a.centroid() - b.centroid()).norm() > 2.0 * self.radius {
            self.stats.prefiltered += 1;
            return Ok(false);
        }
        self.stats.exact += 1;
        self.inner.intersects(a, b)
    }

    fn stats(&self) -> OracleStats {
        self.stats
    }
}

/// Exact test delegated to a persistent child process.
///
/// Each query writes one line holding both bodies' flattened vertex
/// coordinates (body A first) and reads lines back until a non-blank one.
/// `true` and `false` are the only accepted answers.
pub struct ProcessOracle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ProcessOracle {
    /// Starts `command[0]` with the remaining elements as arguments.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PackError::Oracle("no oracle command given".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| PackError::Oracle(format!("failed to start '{}': {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PackError::Oracle("oracle stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PackError::Oracle("oracle stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn read_answer(&mut self) -> Result<bool> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| PackError::Oracle(format!("failed to read answer: {}", e)))?;
            if read == 0 {
                return Err(PackError::Oracle("oracle process closed its output".to_string()));
            }
            match line.trim() {
                "" => continue,
                "true" => return Ok(true),
                "false" => return Ok(false),
                other => {
                    return Err(PackError::Oracle(format!(
                        "expected 'true' or 'false', got '{}'",
                        other
                    )))
                }
            }
        }
    }
}

impl CollisionOracle for ProcessOracle {
    fn intersects(&mut self, a: &RigidBody, b: &RigidBody) -> Result<bool> {
        let request = a.flatten().iter().chain(b.flatten().iter()).join(" ");
        writeln!(self.stdin, "{}", request)
            .and_then(|_| self.stdin.flush())
            .map_err(|e| PackError::Oracle(format!("failed to send request: {}", e)))?;
        self.read_answer()
    }
}

impl Drop for ProcessOracle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
