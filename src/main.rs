use anyhow::Result;
use log::info;
use tetrapack::output;
use tetrapack::packing::Packing;
use tetrapack::settings;

fn main() -> Result<()> {
    let settings = settings::load_config()?;

    let level = if settings.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    info!("{}", settings);

    let mut packing = Packing::new(settings)?;
    packing.solve()?;

    let directory = packing.settings.directory.clone();
    let bodies = packing.result();
    let path = output::write_packing(&bodies, &directory)?;
    output::write_summary(&packing.summary(), &directory)?;
    output::write_settings(&packing.settings, &directory)?;
    info!("Wrote packing to {:?}", path);

    print!("{}", output::format_packing(&bodies));
    Ok(())
}
