use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;
use nalgebra::DVector;

use crate::error::PackError;
use crate::geom::RigidBody;
use crate::packing::PackSummary;
use crate::settings::Settings;

pub const PACKING_FILE: &str = "packing_output.txt";
pub const SUMMARY_FILE: &str = "summary.json";
pub const SETTINGS_FILE: &str = "settings.toml";


/// Renders the packing: the rows of a `d x d` identity basis, then one line
/// per body with every vertex coordinate in vertex order.
pub fn format_packing(bodies: &[RigidBody]) -> String {
    let dim = bodies.first().map_or(0, RigidBody::dim);
    let basis = (0..dim).map(|row| {
        (0..dim)
            .map(|col| if row == col { "1" } else { "0" })
            .join(" ")
    });
    let placements = bodies.iter().map(|body| body.flatten().iter().join(" "));
    basis
        .chain(placements)
        .map(|line| line + "\n")
        .collect()
}

/// Parses text written by [`format_packing`]. The basis width fixes the
/// dimension; every body line must hold a whole number of vertices.
pub fn parse_packing(text: &str) -> crate::error::Result<Vec<RigidBody>> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let first = lines
        .next()
        .ok_or_else(|| PackError::Parse("empty packing file".to_string()))?;
    let dim = first.split_whitespace().count();
    for row in 1..dim {
        lines
            .next()
            .ok_or_else(|| PackError::Parse(format!("basis ends after {} rows", row)))?;
    }

    let mut bodies = Vec::new();
    for (index, line) in lines.enumerate() {
        let coords = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    PackError::Parse(format!("body {}: bad coordinate '{}'", index, token))
                })
            })
            .collect::<crate::error::Result<Vec<f64>>>()?;
        if coords.is_empty() || coords.len() % dim != 0 {
            return Err(PackError::Parse(format!(
                "body {}: {} coordinates do not form {}-dimensional vertices",
                index,
                coords.len(),
                dim
            )));
        }
        let vertices = coords.chunks(dim).map(DVector::from_column_slice).collect();
        bodies.push(RigidBody::new(vertices)?);
    }
    if bodies.is_empty() {
        return Err(PackError::Parse("no bodies after the basis".to_string()));
    }
    Ok(bodies)
}

/// Writes the packing to `packing_output.txt` in `directory`, returning the path.
pub fn write_packing(bodies: &[RigidBody], directory: &Path) -> Result<PathBuf> {
    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create output directory {:?}", directory))?;
    let path = directory.join(PACKING_FILE);
    let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);

    writer.write_all(format_packing(bodies).as_bytes())?;
    writer.flush()?;

    Ok(path)
}

/// Reads a packing file back into bodies.
pub fn read_packing(path: &Path) -> crate::error::Result<Vec<RigidBody>> {
    let text = fs::read_to_string(path)?;
    parse_packing(&text)
}

/// Writes the run summary as pretty-printed JSON.
pub fn write_summary(summary: &PackSummary, directory: &Path) -> Result<PathBuf> {
    fs::create_dir_all(directory)?;
    let path = directory.join(SUMMARY_FILE);
    let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, summary)?;
    writeln!(writer)?;
    writer.flush()?;

    Ok(path)
}

/// Writes the effective settings so the run can be reproduced.
pub fn write_settings(settings: &Settings, directory: &Path) -> Result<PathBuf> {
    fs::create_dir_all(directory)?;
    let path = directory.join(SETTINGS_FILE);
    let text = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
    fs::write(&path, text).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}
