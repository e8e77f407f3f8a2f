use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusty_tsh::dynamics::StepReport;
use rusty_tsh::initialization::velocities::{initialize_momenta, sample_gaussian};
use rusty_tsh::initialization::{
    ControlParameters, DynamicConfiguration, EnsembleState, ModelConfiguration, Simulation,
};
use rusty_tsh::interface::model::{ModelHamiltonian, ModelKind};
use rusty_tsh::output::*;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "trajectory surface hopping dynamics on analytic model Hamiltonians")]
struct Args {
    /// Configuration file, the defaults are written to tsh.toml if it is not given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase the verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// File that receives the full snapshot of every step
    #[arg(long, default_value = "dynamics.out")]
    output: PathBuf,

    /// File that receives the ensemble averaged populations
    #[arg(long, default_value = "populations.dat")]
    populations: PathBuf,
}

/// Positions and momenta of the ensemble. Positions are sampled from the ground state
/// Wigner distribution of the harmonic well around the initial position.
fn initial_conditions(
    model: &ModelConfiguration,
    temperature: f64,
    rng: &mut StdRng,
) -> Result<EnsembleState> {
    if model.initial_state >= 2 {
        anyhow::bail!("initial_state {} does not exist, the model has two states", model.initial_state);
    }
    let mut state: EnsembleState = EnsembleState::new(1, 2, 2, model.ntraj);
    state.inv_m = array![1.0 / model.mass];
    let omega: f64 = (2.0 * model.k.abs() / model.mass).sqrt();
    let sigma_q: f64 = if omega > 0.0 {
        (1.0 / (2.0 * model.mass * omega)).sqrt()
    } else {
        0.0
    };
    state.q = sample_gaussian(
        array![model.initial_position].view(),
        array![sigma_q].view(),
        model.ntraj,
        rng,
    );
    state.p = if model.use_boltzmann_momenta {
        initialize_momenta(state.inv_m.view(), model.ntraj, temperature, rng)
    } else {
        let sigma_p: f64 = if sigma_q > 0.0 { 0.5 / sigma_q } else { 0.0 };
        sample_gaussian(
            array![model.initial_momentum].view(),
            array![sigma_p].view(),
            model.ntraj,
            rng,
        )
    };
    state.set_initial_state(model.initial_state);
    Ok(state)
}

fn main() -> Result<()> {
    let args: Args = Args::parse();

    let log_level: LevelFilter = match (args.quiet, args.verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter(None, log_level)
        .init();

    // read the configuration file, if none is given the default settings are written to the
    // working directory so that the user can see all the used options
    let config: DynamicConfiguration = match args.config.as_deref() {
        Some(path) => DynamicConfiguration::from_file(path)?,
        None => DynamicConfiguration::new()?,
    };
    let prms: ControlParameters =
        ControlParameters::try_from(&config).context("Invalid dynamics settings")?;

    print_header();
    print_settings(&prms, config.model.ntraj, config.nstep);

    let kind: ModelKind = ModelKind::from_config(&config.model)?;
    let mut ham: ModelHamiltonian = ModelHamiltonian::new(kind, 1, config.model.ntraj);
    // initial conditions use their own stream so that the dynamics is reproducible on its own
    let mut rng: StdRng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let state: EnsembleState = initial_conditions(&config.model, config.temperature, &mut rng)?;

    let nstep: usize = config.nstep;
    let mut simulation: Simulation = Simulation::new(config, state)?;
    simulation
        .initialize(&mut ham)
        .context("Unable to initialize the electronic structure")?;

    for path in [args.output.as_path(), args.populations.as_path()] {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Unable to remove the old {}", path.display()))?;
        }
    }

    let mut hops: usize = 0;
    let mut frustrated: usize = 0;
    for _ in 0..nstep {
        let report: StepReport = simulation.compute_dynamics(&mut ham)?;
        hops += report.number_of_hops();
        frustrated += report.number_of_frustrated_hops();

        let standard: StandardOutput = StandardOutput::new(&simulation, &ham, &report);
        print_step_summary(&standard);
        write_full(&standard, &args.output)?;
        write_populations(&standard, &args.populations)?;
    }
    print_footer(&simulation, hops, frustrated);
    info!("trajectory data written to {}", args.output.display());
    Ok(())
}
