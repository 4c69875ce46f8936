//! The packing driver.
//!
//! Each iteration visits the bodies in ascending index order. Body `i` sees
//! the placements committed earlier in the same pass for bodies `0..i` and the
//! previous placements for the rest. For every unconverged body the driver
//! proposes a translation and gates it, then proposes a rotation of the body as
//! it stands after that decision and gates that too. Committed moves update the
//! aggregate centre straight away.
//!
//! The run ends when every body has converged or the iteration budget is spent.

use std::f64::consts::PI;
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

use crate::collision::{CollisionOracle, OracleStats, Prefiltered, ProcessOracle, SeparatingAxis};
use crate::ensemble::Ensemble;
use crate::gate::{AcceptanceGate, Verdict};
use crate::geom::RigidBody;
use crate::proposer::{MoveCandidate, Proposer};
use crate::settings::{validate_config, OracleKind, Settings};


/// Driver state. Both terminal states carry the final placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackState {
    Running,
    Converged,
    Exhausted,
}

/// Move counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PackStats {
    pub translations_accepted: usize,
    pub translations_rejected: usize,
    pub rotations_accepted: usize,
    pub rotations_rejected: usize,
}

impl PackStats {
    fn record(&mut self, translation: Verdict, rotation: Verdict) {
        if translation.is_accepted() {
            self.translations_accepted += 1;
        } else {
            self.translations_rejected += 1;
        }
        if rotation.is_accepted() {
            self.rotations_accepted += 1;
        } else {
            self.rotations_rejected += 1;
        }
    }
}

/// What happened to one body during an iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyOutcome {
    /// Converged in an earlier iteration, left untouched.
    Settled,
    /// Converged at the start of its turn in this iteration.
    Converged,
    /// Moves were proposed and gated.
    Moved {
        candidate: MoveCandidate,
        translation: Verdict,
        rotation: Verdict,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyReport {
    pub index: usize,
    pub outcome: BodyOutcome,
}

/// Per-body results of one pass over the ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    pub bodies: Vec<BodyReport>,
    pub num_converged: usize,
}

/// End-of-run diagnostics, written as `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct PackSummary {
    pub state: PackState,
    pub iterations: usize,
    pub num_bodies: usize,
    pub num_converged: usize,
    pub moves: PackStats,
    pub oracle: OracleStats,
    pub enclosing_radius: f64,  // max vertex distance from the centre of mass
    pub packing_fraction: f64,  // body volume over enclosing-sphere volume
    pub elapsed_seconds: f64,
    pub finished_at: String,
}

/// A packing run: the ensemble, its move machinery and the driver state.
pub struct Packing {
    pub settings: Settings,
    ensemble: Ensemble,
    proposer: Proposer,
    gate: AcceptanceGate,
    oracle: Box<dyn CollisionOracle>,
    rng: StdRng,
    iteration: usize,
    state: PackState,
    stats: PackStats,
    elapsed_seconds: f64,
}

impl Packing {
    /// Builds the lattice layout and the oracle described by `settings`.
    ///
    /// The exact oracle is always wrapped in the centroid-distance pre-filter.
    pub fn new(settings: Settings) -> Result<Self> {
        validate_config(&settings)?;
        let mut rng = seeded_rng(settings.seed);

        let ensemble = Ensemble::lattice(
            settings.num_bodies,
            settings.edge_length,
            settings.init_step_scale,
            settings.init_rotation_range,
            &mut rng,
        )?;

        let exact: Box<dyn CollisionOracle> = match settings.oracle {
            OracleKind::SeparatingAxis => Box::new(SeparatingAxis),
            OracleKind::Process => Box::new(
                ProcessOracle::spawn(&settings.oracle_command)
                    .context("Failed to start the collision oracle")?,
            ),
        };
        let shape = RigidBody::regular_tetrahedron(settings.edge_length);
        let oracle = Box::new(Prefiltered::for_shape(exact, &shape));

        Ok(Self::assemble(settings, ensemble, oracle, rng))
    }

    /// Runs a caller-built ensemble with a caller-built oracle. Decays,
    /// thresholds, budget and proposal flags still come from `settings`.
    pub fn from_parts(
        settings: Settings,
        ensemble: Ensemble,
        oracle: Box<dyn CollisionOracle>,
    ) -> Result<Self> {
        validate_config(&settings)?;
        let rng = seeded_rng(settings.seed);
        Ok(Self::assemble(settings, ensemble, oracle, rng))
    }

    fn assemble(
        settings: Settings,
        ensemble: Ensemble,
        oracle: Box<dyn CollisionOracle>,
        rng: StdRng,
    ) -> Self {
        let proposer = Proposer::new(settings.rotation_mode, settings.neighbour_bias);
        let gate = AcceptanceGate::new(settings.step_decay, settings.rotation_decay);
        Self {
            settings,
            ensemble,
            proposer,
            gate,
            oracle,
            rng,
            iteration: 0,
            state: PackState::Running,
            stats: PackStats::default(),
            elapsed_seconds: 0.0,
        }
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn state(&self) -> PackState {
        self.state
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn stats(&self) -> PackStats {
        self.stats
    }

    pub fn oracle_stats(&self) -> OracleStats {
        self.oracle.stats()
    }

    /// Final (or current) placements in index order.
    pub fn result(&self) -> Vec<RigidBody> {
        self.ensemble.bodies().cloned().collect()
    }

    /// Runs one pass over every body. Does nothing once the run has finished.
    pub fn step(&mut self) -> Result<(PackState, IterationReport)> {
        if self.state != PackState::Running {
            let report = IterationReport {
                iteration: self.iteration,
                bodies: Vec::new(),
                num_converged: self.ensemble.num_converged(),
            };
            return Ok((self.state, report));
        }

        let n = self.ensemble.len();
        let mut bodies = Vec::with_capacity(n);
        for index in 0..n {
            let outcome = self.visit(index)?;
            bodies.push(BodyReport { index, outcome });
        }
        self.iteration += 1;

        self.state = if self.ensemble.all_converged() {
            PackState::Converged
        } else if self.iteration >= self.settings.max_iterations {
            PackState::Exhausted
        } else {
            PackState::Running
        };

        let report = IterationReport {
            iteration: self.iteration,
            bodies,
            num_converged: self.ensemble.num_converged(),
        };
        debug!(
            "iteration {}: {}/{} converged, moves {:?}",
            self.iteration, report.num_converged, n, self.stats
        );
        Ok((self.state, report))
    }

    fn visit(&mut self, index: usize) -> Result<BodyOutcome> {
        let state = self.ensemble.state(index);
        if state.converged {
            return Ok(BodyOutcome::Settled);
        }
        // a lone body has nothing to pack against
        if self.ensemble.len() == 1
            || state.is_settled(self.settings.step_threshold, self.settings.rotation_threshold)
        {
            self.ensemble.state_mut(index).converged = true;
            debug!("body {} converged at iteration {}", index, self.iteration + 1);
            return Ok(BodyOutcome::Converged);
        }

        let neighbour = if self.proposer.neighbour_bias {
            self.ensemble.nearest_neighbour(index)
        } else {
            None
        };

        let translation =
            self.proposer
                .translation(&self.ensemble, index, neighbour, &mut self.rng);
        let translated = self.gate.translate(
            self.oracle.as_mut(),
            &mut self.ensemble,
            index,
            &translation,
        )?;

        let rotations = self.proposer.rotations(
            &self.ensemble.state(index).body,
            &self.ensemble,
            index,
            neighbour,
            &mut self.rng,
        )?;
        let rotated = self
            .gate
            .rotate(self.oracle.as_mut(), &mut self.ensemble, index, &rotations)?;

        self.stats.record(translated, rotated);
        Ok(BodyOutcome::Moved {
            candidate: MoveCandidate {
                translation,
                rotations,
            },
            translation: translated,
            rotation: rotated,
        })
    }

    /// Steps until the run converges or exhausts its budget.
    pub fn solve(&mut self) -> Result<PackState> {
        let start = Instant::now();
        let n = self.ensemble.len();
        info!(
            "Packing {} bodies, at most {} iterations",
            n, self.settings.max_iterations
        );

        let pb = ProgressBar::new(self.settings.max_iterations as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▇▆▅▄▃▂▁"),
        );
        pb.set_position(self.iteration as u64);

        while self.state == PackState::Running {
            let (_, report) = self.step()?;
            pb.inc(1);
            pb.set_message(format!("{}/{} converged", report.num_converged, n));
        }
        pb.finish_and_clear();

        self.elapsed_seconds += start.elapsed().as_secs_f64();
        match self.state {
            PackState::Converged => info!(
                "Converged after {} iterations in {:.2?}",
                self.iteration,
                start.elapsed()
            ),
            _ => warn!(
                "Iteration budget of {} exhausted with {}/{} bodies converged",
                self.settings.max_iterations,
                self.ensemble.num_converged(),
                n
            ),
        }
        Ok(self.state)
    }

    /// Largest vertex distance from the aggregate centre.
    pub fn enclosing_radius(&self) -> f64 {
        let center = self.ensemble.center();
        self.ensemble
            .bodies()
            .flat_map(|body| body.vertices().iter())
            .map(|v| (v - center).norm())
            .fold(0.0, f64::max)
    }

    /// Total body volume over the volume of the enclosing sphere.
    pub fn packing_fraction(&self) -> f64 {
        let radius = self.enclosing_radius();
        if radius <= 0.0 {
            return 0.0;
        }
        let occupied: f64 = self.ensemble.bodies().map(RigidBody::volume).sum();
        occupied / (4.0 / 3.0 * PI * radius.powi(3))
    }

    pub fn summary(&self) -> PackSummary {
        PackSummary {
            state: self.state,
            iterations: self.iteration,
            num_bodies: self.ensemble.len(),
            num_converged: self.ensemble.num_converged(),
            moves: self.stats,
            oracle: self.oracle_stats(),
            enclosing_radius: self.enclosing_radius(),
            packing_fraction: self.packing_fraction(),
            elapsed_seconds: self.elapsed_seconds,
            finished_at: chrono::Local::now().to_rfc3339(),
        }
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}
