//! Collision-gated acceptance of candidate moves.
//!
//! A candidate placement for body `i` is tested against the current placement
//! of every other body. Any collision rejects the move and shrinks the
//! matching adaptive parameter of body `i`; otherwise the placement is
//! committed to the ensemble.

use nalgebra::DVector;
use serde::Serialize;

use crate::collision::CollisionOracle;
use crate::ensemble::Ensemble;
use crate::error::Result;
use crate::geom::{RigidBody, RotationStep};


/// Outcome of gating one move component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    /// Collided with body `against`, the first one found.
    Rejected { against: usize },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Decay factors applied on rejection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceGate {
    pub step_decay: f64,
    pub rotation_decay: f64,
}

impl AcceptanceGate {
    pub fn new(step_decay: f64, rotation_decay: f64) -> Self {
        Self {
            step_decay,
            rotation_decay,
        }
    }

    /// Index of the first other body that `candidate` collides with, scanning
    /// in ascending order.
    pub fn first_collision<O: CollisionOracle + ?Sized>(
        &self,
        oracle: &mut O,
        ensemble: &Ensemble,
        index: usize,
        candidate: &RigidBody,
    ) -> Result<Option<usize>> {
        for (other, state) in ensemble.states().iter().enumerate() {
            if other == index {
                continue;
            }
            if oracle.intersects(candidate, &state.body)? {
                return Ok(Some(other));
            }
        }
        Ok(None)
    }

    /// Gates the translation of body `index` by `translation`.
    pub fn translate<O: CollisionOracle + ?Sized>(
        &self,
        oracle: &mut O,
        ensemble: &mut Ensemble,
        index: usize,
        translation: &DVector<f64>,
    ) -> Result<Verdict> {
        let candidate = ensemble.state(index).body.translate(translation)?;
        match self.first_collision(oracle, ensemble, index, &candidate)? {
            Some(against) => {
                ensemble.state_mut(index).step_scale *= self.step_decay;
                Ok(Verdict::Rejected { against })
            }
            None => {
                ensemble.commit(index, candidate)?;
                Ok(Verdict::Accepted)
            }
        }
    }

    /// Gates the composite rotation of body `index`, applied to its current
    /// placement in the order given.
    pub fn rotate<O: CollisionOracle + ?Sized>(
        &self,
        oracle: &mut O,
        ensemble: &mut Ensemble,
        index: usize,
        steps: &[RotationStep],
    ) -> Result<Verdict> {
        let candidate = ensemble.state(index).body.rotate_all(steps)?;
        match self.first_collision(oracle, ensemble, index, &candidate)? {
            Some(against) => {
                ensemble.state_mut(index).rotation_range *= self.rotation_decay;
                Ok(Verdict::Rejected { against })
            }
            None => {
                ensemble.commit(index, candidate)?;
                Ok(Verdict::Accepted)
            }
        }
    }
}
