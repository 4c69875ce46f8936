use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::error::PackError;
use crate::proposer::RotationMode;

/// Prefix of environment variables that override file configuration.
pub const ENV_PREFIX: &str = "TETRAPACK";


/// Which collision oracle performs the exact test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OracleKind {
    /// In-process separating-axis test.
    SeparatingAxis,
    /// External program speaking the line protocol.
    Process,
}

/// Runtime configuration for a packing run.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    pub num_bodies: usize,
    pub init_step_scale: f64,
    pub step_decay: f64,
    pub step_threshold: f64,
    pub init_rotation_range: f64, // degrees
    pub rotation_decay: f64,
    pub rotation_threshold: f64, // degrees
    pub edge_length: f64,
    pub max_iterations: usize,
    pub neighbour_bias: bool,
    pub rotation_mode: RotationMode,
    pub seed: Option<u64>,
    #[serde(default)]
    pub verbose: bool,
    pub directory: PathBuf,
    pub oracle: OracleKind,
    #[serde(default)]
    pub oracle_command: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_bodies: 4,
            init_step_scale: 0.9,
            step_decay: 0.999,
            step_threshold: 1e-6,
            init_rotation_range: 360.0,
            rotation_decay: 0.999,
            rotation_threshold: 0.1,
            edge_length: 1.0,
            max_iterations: 5000,
            neighbour_bias: false,
            rotation_mode: RotationMode::AllPlanes,
            seed: None,
            verbose: false,
            directory: PathBuf::from("packing_output"),
            oracle: OracleKind::SeparatingAxis,
            oracle_command: Vec::new(),
        }
    }
}

/// Loads `config/default.toml` only, ignoring local files, environment and
/// command line.
pub fn load_default_config() -> Result<Settings> {
    let root = retrieve_project_root()?;
    let default_config_file = root.join("config/default.toml");

    let settings: Config = Config::builder()
        .add_source(File::from(default_config_file).required(true))
        .build()
        .context("Error loading configuration")?;

    let config: Settings = settings
        .try_deserialize()
        .context("Error deserializing configuration")?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the project configuration file, layers `TETRAPACK_*` environment
/// variables on top and applies command-line overrides.
pub fn load_config() -> Result<Settings> {
    let root = retrieve_project_root()?;

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    // Check if local config exists, if not use default
    let config_file = if local_config.exists() {
        log::info!("Using local configuration: {:?}", local_config);
        local_config
    } else {
        log::info!("Using default configuration: {:?}", default_config_file);
        default_config_file
    };

    let settings: Config = Config::builder()
        .add_source(File::from(config_file).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("oracle_command"),
        )
        .build()
        .context("Error loading configuration")?;

    let mut config: Settings = settings
        .try_deserialize()
        .context("Error deserializing configuration")?;

    apply_cli_args(&mut config, CliArgs::parse());

    validate_config(&config)?;

    log::debug!("{:#?}", config);

    Ok(config)
}

/// Overrides `config` with every flag present in `args`.
pub fn apply_cli_args(config: &mut Settings, args: CliArgs) {
    if let Some(num) = args.num {
        config.num_bodies = num;
    }
    if let Some(scale) = args.step_scale {
        config.init_step_scale = scale;
    }
    if let Some(decay) = args.step_decay {
        config.step_decay = decay;
    }
    if let Some(threshold) = args.step_threshold {
        config.step_threshold = threshold;
    }
    if let Some(range) = args.rotation_range {
        config.init_rotation_range = range;
    }
    if let Some(decay) = args.rotation_decay {
        config.rotation_decay = decay;
    }
    if let Some(threshold) = args.rotation_threshold {
        config.rotation_threshold = threshold;
    }
    if let Some(edge) = args.length {
        config.edge_length = edge;
    }
    if let Some(iterations) = args.iterations {
        config.max_iterations = iterations;
    }
    if args.bias {
        config.neighbour_bias = true;
    }
    if let Some(mode) = args.rotation_mode {
        config.rotation_mode = mode;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if args.verbose {
        config.verbose = true;
    }
    if let Some(dir) = args.dir {
        config.directory = dir;
    }
    if let Some(oracle) = args.oracle {
        config.oracle = oracle;
    }
    if let Some(command) = args.oracle_command {
        config.oracle_command = command;
    }
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the TETRAPACK_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
pub fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        // When running through cargo (e.g. cargo run, cargo test)
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("TETRAPACK_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    // Walk upward from the executable directory
    let exe_path = env::current_exe().context("Failed to get current executable path")?;
    exe_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("config").is_dir())
        .map(|dir| dir.to_path_buf())
        .ok_or_else(|| anyhow!("Could not find project root directory"))
}

/// Checks every value against its domain.
pub fn validate_config(config: &Settings) -> std::result::Result<(), PackError> {
    fn check(ok: bool, message: &str) -> std::result::Result<(), PackError> {
        if ok {
            Ok(())
        } else {
            Err(PackError::InvalidConfig(message.to_string()))
        }
    }

    let unit_open = |x: f64| x > 0.0 && x < 1.0;

    check(config.num_bodies >= 1, "number of bodies must be at least 1")?;
    check(
        config.init_step_scale > 0.0 && config.init_step_scale <= 1.0,
        "initial step scale must be in (0, 1]",
    )?;
    check(unit_open(config.step_decay), "step decay must be in (0, 1)")?;
    check(config.step_threshold > 0.0, "step threshold must be greater than 0")?;
    check(
        config.init_rotation_range > 0.0,
        "initial rotation range must be greater than 0",
    )?;
    check(unit_open(config.rotation_decay), "rotation decay must be in (0, 1)")?;
    check(
        config.rotation_threshold > 0.0,
        "rotation threshold must be greater than 0",
    )?;
    check(config.edge_length > 0.0, "edge length must be greater than 0")?;
    check(config.max_iterations >= 1, "max iterations must be at least 1")?;
    check(
        config.oracle != OracleKind::Process || !config.oracle_command.is_empty(),
        "the process oracle needs an oracle command",
    )?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about = "tetrapack - stochastic relaxation of tetrahedron packings")]
pub struct CliArgs {
    /// Number of tetrahedra to pack.
    #[arg(short, long)]
    num: Option<usize>,

    /// Edge length of every tetrahedron.
    #[arg(short, long)]
    length: Option<f64>,

    /// Maximum number of iterations before the run is declared exhausted.
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Initial step scale, as a fraction of the distance to the centre of mass.
    #[arg(long)]
    step_scale: Option<f64>,

    /// Factor applied to a body's step scale each time a translation is rejected.
    #[arg(long)]
    step_decay: Option<f64>,

    /// A body can converge once its step scale drops below this value.
    #[arg(long)]
    step_threshold: Option<f64>,

    /// Initial rotation range in degrees.
    #[arg(long)]
    rotation_range: Option<f64>,

    /// Factor applied to a body's rotation range each time a rotation is rejected.
    #[arg(long)]
    rotation_decay: Option<f64>,

    /// A body can converge once its rotation range drops below this value, in degrees.
    #[arg(long)]
    rotation_threshold: Option<f64>,

    /// Rotate in every axis pair, or in one random axis pair, per move.
    #[arg(long, value_enum)]
    rotation_mode: Option<RotationMode>,

    /// Bias moves towards the nearest neighbouring body.
    #[arg(short, long)]
    bias: bool,

    /// Random seed for the run.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Print per-iteration diagnostics.
    #[arg(short, long)]
    verbose: bool,

    /// Output directory for the packing and run summary.
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Collision oracle performing the exact overlap test.
    #[arg(long, value_enum)]
    oracle: Option<OracleKind>,

    /// Program and arguments of the external oracle, separated by spaces.
    #[arg(long, num_args = 1.., value_delimiter = ' ')]
    oracle_command: Option<Vec<String>>,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - Bodies: {}
  - Edge Length: {:.6}
  - Step Scale: {:.6} (decay {:.6}, threshold {:e})
  - Rotation Range: {:.3} deg (decay {:.6}, threshold {:.6})
  - Max Iterations: {}
  - Rotation Mode: {:?}
  - Neighbour Bias: {}
  - Seed: {}
  - Oracle: {:?}
  ",
            self.num_bodies,
            self.edge_length,
            self.init_step_scale,
            self.step_decay,
            self.step_threshold,
            self.init_rotation_range,
            self.rotation_decay,
            self.rotation_threshold,
            self.max_iterations,
            self.rotation_mode,
            self.neighbour_bias,
            self.seed.map_or("none".to_string(), |s| s.to_string()),
            self.oracle,
        )
    }
}
