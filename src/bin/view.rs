//! Orbiting 3-D view of a packing file.
//!
//! Usage: `tetrapack-view [PATH]` (defaults to `packing_output/packing_output.txt`).
//! Left/right arrows orbit, up/down change the elevation, the mouse wheel zooms.

use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;
use macroquad::prelude::*;
use tetrapack::geom::RigidBody;
use tetrapack::output::{read_packing, PACKING_FILE};

const PALETTE: [Color; 6] = [ORANGE, SKYBLUE, LIME, PINK, GOLD, VIOLET];
const ORBIT_SPEED: f32 = 1.2; // radians per second
const ZOOM_STEP: f32 = 0.1;

#[derive(Parser, Debug)]
#[command(version, about = "Draw the edges of a tetrapack packing file")]
struct ViewArgs {
    /// Packing file to display.
    path: Option<PathBuf>,
}

/// Edges of every body in world coordinates, relative to the packing centre.
fn edges(bodies: &[RigidBody]) -> Vec<Vec<(Vec3, Vec3)>> {
    let to_vec3 = |v: &nalgebra::DVector<f64>| vec3(v[0] as f32, v[1] as f32, v[2] as f32);
    let count = bodies.len().max(1) as f32;
    let centre = bodies
        .iter()
        .map(|b| to_vec3(b.centroid()))
        .fold(Vec3::ZERO, |acc, c| acc + c)
        / count;

    bodies
        .iter()
        .map(|body| {
            body.vertices()
                .iter()
                .map(|v| to_vec3(v) - centre)
                .tuple_combinations()
                .collect::<Vec<_>>()
        })
        .collect()
}

#[macroquad::main("tetrapack")]
async fn main() {
    let args = ViewArgs::parse();
    let path = args
        .path
        .unwrap_or_else(|| PathBuf::from("packing_output").join(PACKING_FILE));

    let bodies = match read_packing(&path) {
        Ok(bodies) if bodies.iter().all(|b| b.dim() == 3) => bodies,
        Ok(_) => {
            eprintln!("{:?} is not a 3-dimensional packing", path);
            return;
        }
        Err(err) => {
            eprintln!("Failed to read {:?}: {}", path, err);
            return;
        }
    };
    let lines = edges(&bodies);
    let extent = lines
        .iter()
        .flatten()
        .flat_map(|(a, b)| [a.length(), b.length()])
        .fold(1.0f32, f32::max);

    let mut azimuth = 0.6f32;
    let mut elevation = 0.4f32;
    let mut distance = 3.0 * extent;

    loop {
        let dt = get_frame_time();
        if is_key_down(KeyCode::Left) {
            azimuth -= ORBIT_SPEED * dt;
        }
        if is_key_down(KeyCode::Right) {
            azimuth += ORBIT_SPEED * dt;
        }
        if is_key_down(KeyCode::Up) {
            elevation = (elevation + ORBIT_SPEED * dt).min(1.5);
        }
        if is_key_down(KeyCode::Down) {
            elevation = (elevation - ORBIT_SPEED * dt).max(-1.5);
        }
        let (_, wheel) = mouse_wheel();
        if wheel != 0.0 {
            distance = (distance * (1.0 - ZOOM_STEP * wheel.signum())).max(extent);
        }

        clear_background(BLACK);
        set_camera(&Camera3D {
            position: vec3(
                distance * elevation.cos() * azimuth.cos(),
                distance * elevation.sin(),
                distance * elevation.cos() * azimuth.sin(),
            ),
            up: vec3(0.0, 1.0, 0.0),
            target: Vec3::ZERO,
            ..Default::default()
        });

        for (index, body) in lines.iter().enumerate() {
            let color = PALETTE[index % PALETTE.len()];
            for &(a, b) in body {
                draw_line_3d(a, b, color);
            }
        }

        set_default_camera();
        draw_text(
            &format!("{} bodies from {}", bodies.len(), path.display()),
            10.0,
            20.0,
            20.0,
            WHITE,
        );

        next_frame().await
    }
}
