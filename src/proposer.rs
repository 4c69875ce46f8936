//! Candidate moves for a single body.
//!
//! The proposer only reads the ensemble. It draws a translation towards the
//! aggregate centre and a set of rotation angles, and leaves applying them to
//! the driver.

use clap::ValueEnum;
use nalgebra::DVector;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ensemble::Ensemble;
use crate::error::Result;
use crate::geom::{axis_pairs, RigidBody, RotationStep};

#[cfg(test)]
mod tests {

    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn tet_at(x: f64, y: f64, z: f64) -> RigidBody {
        RigidBody::regular_tetrahedron(1.0)
            .translate(&DVector::from_vec(vec![x, y, z]))
            .unwrap()
    }

    fn pair() -> Ensemble {
        Ensemble::new(vec![tet_at(0.0, 0.0, 0.0), tet_at(4.0, 0.0, 0.0)], 0.5, 30.0).unwrap()
    }

    #[test]
    fn translation_is_only_flipped_when_the_draw_moves_away() {
        let ensemble = pair();
        let proposer = Proposer::new(RotationMode::AllPlanes, false);
        let mut rng = StdRng::seed_from_u64(11);
        let centroid = ensemble.state(0).body.centroid().clone();
        let before = (ensemble.center() - &centroid).norm();
        for _ in 0..200 {
            let t = proposer.translation(&ensemble, 0, None, &mut rng);
            let after = (ensemble.center() - (&centroid + &t)).norm();
            if after > before {
                // a negated draw, so the raw draw moved away as well
                let drawn = (ensemble.center() - (&centroid - &t)).norm();
                assert!(drawn > before);
            }
            // each component bounded by step scale * distance
            assert!(t.amax() <= 0.5 * before + 1e-12);
        }
    }

    #[test]
    fn translation_is_zero_at_the_center() {
        let ensemble = Ensemble::new(vec![tet_at(1.0, 2.0, 3.0)], 0.9, 30.0).unwrap();
        let proposer = Proposer::new(RotationMode::AllPlanes, true);
        let mut rng = StdRng::seed_from_u64(1);
        let t = proposer.translation(&ensemble, 0, None, &mut rng);
        assert_eq!(t.norm(), 0.0);
    }

    #[test]
    fn neighbour_bias_stays_within_the_offset() {
        let ensemble = pair();
        let proposer = Proposer::new(RotationMode::AllPlanes, true);
        let mut rng = StdRng::seed_from_u64(5);
        let mut with_bias = ensemble.clone();
        // zero step scale isolates the bias term
        with_bias.state_mut(0).step_scale = 0.0;
        for _ in 0..100 {
            let t = proposer.translation(&with_bias, 0, Some(1), &mut rng);
            assert!(t[0] >= 0.0 && t[0] <= 4.0);
            assert_eq!(t[1], 0.0);
            assert_eq!(t[2], 0.0);
        }
    }

    #[test]
    fn rotations_cover_every_plane_in_order() {
        let ensemble = pair();
        let proposer = Proposer::new(RotationMode::AllPlanes, false);
        let mut rng = StdRng::seed_from_u64(3);
        let body = ensemble.state(0).body.clone();
        let steps = proposer.rotations(&body, &ensemble, 0, None, &mut rng).unwrap();
        let planes: Vec<_> = steps.iter().map(|s| s.plane).collect();
        assert_eq!(planes, vec![(0, 1), (0, 2), (1, 2)]);
        for step in &steps {
            assert!(step.degrees.abs() < 30.0);
        }
    }

    #[test]
    fn rotation_angles_are_only_flipped_when_worse() {
        let ensemble = pair();
        let proposer = Proposer::new(RotationMode::AllPlanes, false);
        let mut rng = StdRng::seed_from_u64(9);
        let body = ensemble.state(0).body.clone();
        let before = body.total_distance_to(ensemble.center());
        for _ in 0..50 {
            for step in proposer.rotations(&body, &ensemble, 0, None, &mut rng).unwrap() {
                let turned = body.rotate_deg(step.degrees, step.plane).unwrap();
                if turned.total_distance_to(ensemble.center()) > before {
                    // only a flipped angle may end up worse, and then the draw was worse too
                    let drawn = body.rotate_deg(-step.degrees, step.plane).unwrap();
                    assert!(drawn.total_distance_to(ensemble.center()) > before);
                }
            }
        }
    }

    #[test]
    fn neighbour_bias_flips_only_when_both_distances_grow() {
        let proposer = Proposer::new(RotationMode::AllPlanes, true);
        let mut rng = StdRng::seed_from_u64(17);
        let (mut flipped, mut kept_for_neighbour) = (0, 0);
        for tilt in [50.0, 65.0, 80.0] {
            let tilted = RigidBody::regular_tetrahedron(1.0)
                .rotate_deg(tilt, (0, 1))
                .unwrap()
                .rotate_deg(tilt * 1.7, (1, 2))
                .unwrap();
            let ensemble = Ensemble::new(
                vec![tilted, tet_at(4.0, 0.0, 0.0), tet_at(0.0, 4.0, 0.0)],
                0.5,
                30.0,
            )
            .unwrap();
            let body = ensemble.state(0).body.clone();
            let center = ensemble.center();
            let anchor = ensemble.state(1).body.centroid();

            for _ in 0..100 {
                for step in proposer.rotations(&body, &ensemble, 0, Some(1), &mut rng).unwrap() {
                    let drawn = body.rotate_deg(step.degrees.abs(), step.plane).unwrap();
                    let worse_center =
                        drawn.total_distance_to(center) > body.total_distance_to(center);
                    let worse_anchor =
                        drawn.total_distance_to(anchor) > body.total_distance_to(anchor);
                    assert_eq!(step.degrees < 0.0, worse_center && worse_anchor, "{:?}", step);
                    if worse_center && worse_anchor {
                        flipped += 1;
                    } else if worse_center {
                        kept_for_neighbour += 1;
                    }
                }
            }
        }
        assert!(flipped > 0);
        // draws that only move away from the centre keep their sign under bias
        assert!(kept_for_neighbour > 0);
    }

    #[test]
    fn single_plane_mode_draws_one_step() {
        let ensemble = pair();
        let proposer = Proposer::new(RotationMode::SinglePlane, false);
        let mut rng = StdRng::seed_from_u64(2);
        let body = ensemble.state(1).body.clone();
        let steps = proposer.rotations(&body, &ensemble, 1, None, &mut rng).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn zero_rotation_range_gives_zero_angles() {
        let ensemble =
            Ensemble::new(vec![tet_at(0.0, 0.0, 0.0), tet_at(4.0, 0.0, 0.0)], 0.5, 0.0).unwrap();
        let proposer = Proposer::new(RotationMode::AllPlanes, false);
        let mut rng = StdRng::seed_from_u64(2);
        let body = ensemble.state(0).body.clone();
        let steps = proposer.rotations(&body, &ensemble, 0, None, &mut rng).unwrap();
        assert!(steps.iter().all(|s| s.degrees == 0.0));
    }
}

/// Which coordinate planes a rotation proposal covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RotationMode {
    /// One angle for every axis pair, applied in axis-pair order.
    #[serde(alias = "all")]
    #[value(alias = "all")]
    AllPlanes,
    /// One angle in a single, randomly chosen axis pair.
    #[serde(alias = "single")]
    #[value(alias = "single")]
    SinglePlane,
}

/// A proposed move for one body. Holds no reference to the body it is for.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveCandidate {
    pub translation: DVector<f64>,
    pub rotations: Vec<RotationStep>,
}

impl MoveCandidate {
    pub fn new(translation: DVector<f64>) -> Self {
        Self {
            translation,
            rotations: Vec::new(),
        }
    }
}

/// Draws candidate moves. The flags select between the proposal variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposer {
    pub rotation_mode: RotationMode,
    pub neighbour_bias: bool,
}

impl Proposer {
    pub fn new(rotation_mode: RotationMode, neighbour_bias: bool) -> Self {
        Self {
            rotation_mode,
            neighbour_bias,
        }
    }

    /// Random translation for body `index`.
    ///
    /// Components are uniform in `[-s, s]` with `s = step_scale * |centre - centroid|`.
    /// The vector is negated if it would carry the body away from the centre.
    /// With a `neighbour`, each component gains a uniform draw between zero
    /// and the matching component of the offset to that neighbour's centroid.
    pub fn translation<R: Rng>(
        &self,
        ensemble: &Ensemble,
        index: usize,
        neighbour: Option<usize>,
        rng: &mut R,
    ) -> DVector<f64> {
        let state = ensemble.state(index);
        let centroid = state.body.centroid();
        let center = ensemble.center();

        let dist = (center - centroid).norm();
        let step = state.step_scale * dist;
        let mut vector = DVector::from_fn(centroid.len(), |_, _| rng.random_range(-step..=step));

        if (center - (centroid + &vector)).norm() > dist {
            vector.neg_mut();
        }

        if let Some(other) = neighbour.filter(|_| self.neighbour_bias) {
            let offset = ensemble.state(other).body.centroid() - centroid;
            for (component, bias) in vector.iter_mut().zip(offset.iter()) {
                *component += rng.random_range(bias.min(0.0)..=bias.max(0.0));
            }
        }

        vector
    }

    /// Rotation steps for `body`, the current placement of body `index`.
    ///
    /// Each angle is uniform in `[0, rotation_range)` degrees and is negated
    /// when rotating by it alone would raise the summed vertex distance to the
    /// centre. With neighbour bias the angle is only negated if it also raises
    /// the summed distance to the neighbour's centroid.
    pub fn rotations<R: Rng>(
        &self,
        body: &RigidBody,
        ensemble: &Ensemble,
        index: usize,
        neighbour: Option<usize>,
        rng: &mut R,
    ) -> Result<Vec<RotationStep>> {
        let range = ensemble.state(index).rotation_range;
        let center = ensemble.center();
        let anchor = neighbour
            .filter(|_| self.neighbour_bias)
            .map(|other| ensemble.state(other).body.centroid());

        let all = axis_pairs(body.dim());
        let planes = match self.rotation_mode {
            RotationMode::AllPlanes => all,
            RotationMode::SinglePlane if all.is_empty() => all,
            RotationMode::SinglePlane => vec![all[rng.random_range(0..all.len())]],
        };

        let center_before = body.total_distance_to(center);
        let anchor_before = anchor.map(|a| body.total_distance_to(a));

        planes
            .into_iter()
            .map(|plane| {
                let degrees = if range > 0.0 {
                    rng.random_range(0.0..range)
                } else {
                    0.0
                };
                let turned = body.rotate_deg(degrees, plane)?;
                let worse_center = turned.total_distance_to(center) > center_before;
                let flip = match (anchor, anchor_before) {
                    (Some(a), Some(before)) => {
                        worse_center && turned.total_distance_to(a) > before
                    }
                    _ => worse_center,
                };
                Ok(RotationStep::new(if flip { -degrees } else { degrees }, plane))
            })
            .collect()
    }
}
