use itertools::Itertools;
use nalgebra::DVector;
use tetrapack::{
    collision::{CollisionOracle, Prefiltered, SeparatingAxis},
    ensemble::Ensemble,
    error::{PackError, Result},
    geom::RigidBody,
    packing::{PackState, Packing},
    proposer::RotationMode,
    settings,
};

// Tolerance for comparing the incremental centre with a fresh mean
const TOL: f64 = 1e-9;

struct AlwaysCollides;

impl CollisionOracle for AlwaysCollides {
    fn intersects(&mut self, _: &RigidBody, _: &RigidBody) -> Result<bool> {
        Ok(true)
    }
}

/// Fails the run if the exact test is ever reached.
struct Forbidden;

impl CollisionOracle for Forbidden {
    fn intersects(&mut self, _: &RigidBody, _: &RigidBody) -> Result<bool> {
        Err(PackError::Oracle("exact test invoked".to_string()))
    }
}

fn tet_at(x: f64) -> RigidBody {
    RigidBody::regular_tetrahedron(1.0)
        .translate(&DVector::from_vec(vec![x, 0.0, 0.0]))
        .unwrap()
}

fn assert_no_overlaps(packing: &Packing) {
    let mut sat = SeparatingAxis;
    let bodies = packing.result();
    for ((i, a), (j, b)) in bodies.iter().enumerate().tuple_combinations() {
        assert!(
            !sat.intersects(a, b).unwrap(),
            "bodies {} and {} overlap",
            i,
            j
        );
    }
}

#[test]
fn single_body_converges_immediately() {
    let mut settings = settings::load_default_config().unwrap();
    settings.num_bodies = 1;
    settings.seed = Some(4);

    let mut packing = Packing::new(settings).unwrap();
    let before = packing.result();

    assert_eq!(packing.solve().unwrap(), PackState::Converged);
    assert_eq!(packing.iteration(), 1);
    assert!(packing.result()[0].approx_eq(&before[0], 0.0));
    assert_eq!(packing.oracle_stats().queries, 0);
}

#[test]
fn distant_pair_never_reaches_the_exact_test() {
    let mut settings = settings::load_default_config().unwrap();
    settings.init_step_scale = 0.01;
    settings.max_iterations = 5;
    settings.seed = Some(8);

    let shape = RigidBody::regular_tetrahedron(1.0);
    let ensemble = Ensemble::new(vec![tet_at(-50.0), tet_at(50.0)], 0.01, 0.0).unwrap();
    let oracle = Box::new(Prefiltered::for_shape(Forbidden, &shape));
    let mut packing = Packing::from_parts(settings, ensemble, oracle).unwrap();

    assert_eq!(packing.solve().unwrap(), PackState::Exhausted);

    let stats = packing.stats();
    assert_eq!(stats.translations_accepted, 10);
    assert_eq!(stats.rotations_accepted, 10);
    let oracle = packing.oracle_stats();
    assert_eq!(oracle.exact, 0);
    assert_eq!(oracle.prefiltered, oracle.queries);
    let gap = (packing.result()[0].centroid() - packing.result()[1].centroid()).norm();
    assert!(gap > 2.0 * shape.radius());
}

#[test]
fn colliding_pair_decays_by_the_factor_each_iteration() {
    let mut settings = settings::load_default_config().unwrap();
    settings.init_step_scale = 0.9;
    settings.step_decay = 0.5;
    settings.step_threshold = 0.1;
    settings.init_rotation_range = 10.0;
    settings.rotation_decay = 0.5;
    settings.rotation_threshold = 1.0;
    settings.max_iterations = 100;
    settings.seed = Some(2);

    let ensemble = Ensemble::new(vec![tet_at(0.0), tet_at(3.0)], 0.9, 10.0).unwrap();
    let mut packing = Packing::from_parts(settings, ensemble, Box::new(AlwaysCollides)).unwrap();

    // ceil(ln(0.1 / 0.9) / ln(0.5))
    let needed = ((0.1f64 / 0.9).ln() / 0.5f64.ln()).ceil() as usize;
    assert_eq!(needed, 4);

    for k in 1..=needed {
        let (state, _) = packing.step().unwrap();
        assert_eq!(state, PackState::Running);
        for body in packing.ensemble().states() {
            assert_eq!(body.step_scale, 0.9 * 0.5f64.powi(k as i32));
            assert_eq!(body.rotation_range, 10.0 * 0.5f64.powi(k as i32));
        }
    }
    assert!(packing.ensemble().states().iter().all(|s| s.step_scale < 0.1));

    let (state, _) = packing.step().unwrap();
    assert_eq!(state, PackState::Converged);
    assert_eq!(packing.iteration(), needed + 1);
    assert_eq!(packing.ensemble().num_converged(), 2);
}

#[test]
fn run_keeps_its_invariants() {
    let mut settings = settings::load_default_config().unwrap();
    settings.num_bodies = 6;
    settings.step_decay = 0.7;
    settings.rotation_decay = 0.7;
    settings.step_threshold = 0.05;
    settings.rotation_threshold = 5.0;
    settings.max_iterations = 60;
    settings.seed = Some(5);

    let mut packing = Packing::new(settings).unwrap();
    let mut previous = packing.ensemble().clone();

    while packing.state() == PackState::Running {
        packing.step().unwrap();
        let current = packing.ensemble();

        let fresh = current.recompute_center();
        assert!((current.center() - &fresh).norm() < TOL);

        for (before, after) in previous.states().iter().zip(current.states()) {
            assert!(after.step_scale <= before.step_scale);
            assert!(after.rotation_range <= before.rotation_range);
            if before.converged {
                assert!(after.converged);
                assert_eq!(after.body, before.body);
            }
        }
        previous = current.clone();
    }

    assert_no_overlaps(&packing);
    for body in packing.result() {
        assert!((body.mean_of_vertices() - body.centroid()).norm() < TOL);
    }
}

#[test]
fn biased_single_plane_run_stays_overlap_free() {
    let mut settings = settings::load_default_config().unwrap();
    settings.num_bodies = 5;
    settings.neighbour_bias = true;
    settings.rotation_mode = RotationMode::SinglePlane;
    settings.max_iterations = 40;
    settings.seed = Some(13);

    let mut packing = Packing::new(settings).unwrap();
    let state = packing.solve().unwrap();
    assert_ne!(state, PackState::Running);
    assert_no_overlaps(&packing);

    let summary = packing.summary();
    assert_eq!(summary.iterations, packing.iteration());
    assert_eq!(
        summary.moves.translations_accepted + summary.moves.translations_rejected,
        summary.moves.rotations_accepted + summary.moves.rotations_rejected
    );
}

#[test]
fn seeded_runs_are_reproducible() {
    let mut settings = settings::load_default_config().unwrap();
    settings.num_bodies = 4;
    settings.max_iterations = 25;
    settings.seed = Some(21);

    let mut first = Packing::new(settings.clone()).unwrap();
    let mut second = Packing::new(settings).unwrap();
    first.solve().unwrap();
    second.solve().unwrap();

    for (a, b) in first.result().iter().zip(second.result().iter()) {
        assert!(a.approx_eq(b, 0.0));
    }
    assert_eq!(first.stats(), second.stats());
}

#[test]
fn invalid_settings_are_rejected_before_the_run() {
    let mut settings = settings::load_default_config().unwrap();
    settings.step_decay = 1.5;
    let err = Packing::new(settings).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<PackError>(),
        Some(PackError::InvalidConfig(_))
    ));
}
