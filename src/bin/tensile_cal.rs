use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use tensile_cal::acquisition::{ChannelRawSource, CsvCapture};
use tensile_cal::config::{CalibrationPlan, ReferenceKind};
use tensile_cal::export::{write_force_displacement, write_time_series};
use tensile_cal::reference::{
    BufferedRawSource, ConsoleReferenceSource, ReferencePoint, ScriptedReferenceSource,
};
use tensile_cal::sensor::SensorId;
use tensile_cal::session::Session;
use tensile_cal::{Error, Result};

#[derive(Parser)]
#[command(about = "Calibrate the tensile tester sensors and convert captured tests")]
struct Args {
    /// Settings and calibration document
    #[arg(long, default_value = "tensile.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Calibrate one sensor and store the result
    Calibrate {
        /// `load_cell` or `ultrasonic`
        sensor: SensorId,
        /// CSV of `known_value,raw_value` pairs, in N or m
        #[arg(long, conflicts_with = "captures")]
        pairs: Option<PathBuf>,
        /// One capture per planned reference, prompting before each is read
        #[arg(long, num_args = 1..)]
        captures: Vec<PathBuf>,
        /// Override the plan's polynomial degree
        #[arg(long)]
        degree: Option<usize>,
    },
    /// Convert a captured test with the stored calibrations
    Test {
        capture: PathBuf,
        /// Write converted channels over time to this CSV
        #[arg(long)]
        series: Option<PathBuf>,
        /// Write force against displacement to this CSV
        #[arg(long)]
        pairs: Option<PathBuf>,
    },
    /// Print the stored calibrations
    Show,
}

fn read_pairs(path: &Path) -> Result<Vec<ReferencePoint>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut points = vec![];
    for result in rdr.deserialize() {
        let point: ReferencePoint = result?;
        points.push(point);
    }
    Ok(points)
}

fn calibrate(
    session: &Session,
    sensor: SensorId,
    pairs: Option<PathBuf>,
    captures: Vec<PathBuf>,
    degree: Option<usize>,
) -> Result<()> {
    let mut plan = session.config().plan(sensor).clone();
    if let Some(degree) = degree {
        plan.degree = degree;
    }

    let model = if let Some(pairs) = pairs {
        let points = read_pairs(&pairs)?;
        let plan = CalibrationPlan {
            reference_values: points.iter().map(|p| p.known_value).collect(),
            reference_kind: match sensor {
                SensorId::LoadCell => ReferenceKind::ForceN,
                SensorId::Ultrasonic => ReferenceKind::DistanceM,
            },
            samples_per_point: 1,
            ..plan
        };
        session.calibrate_with_plan(
            sensor,
            &plan,
            ScriptedReferenceSource::new(points.iter().map(|p| p.known_value)),
            BufferedRawSource::from_readings(points.iter().map(|p| p.raw_value)),
        )?
    } else {
        if captures.len() != plan.reference_values.len() {
            return Err(Error::Config(format!(
                "the {sensor} plan has {} reference points but {} captures were given",
                plan.reference_values.len(),
                captures.len()
            )));
        }
        let stdin = io::stdin();
        let raw = ChannelRawSource::new(
            captures.into_iter().map(CsvCapture::new),
            session.config().channels.clone(),
            session.config().test.sampling_rate_hz,
        );
        session.calibrate_with_plan(
            sensor,
            &plan,
            ConsoleReferenceSource::new(stdin.lock(), io::stdout()),
            raw,
        )?
    };

    let quality = model.quality();
    println!("{sensor} calibrated, degree {}", model.degree());
    println!("  coefficients: {:?}", model.coefficients());
    if let Some(quality) = quality {
        println!("  residual sum of squares: {:.6e}", quality.residual_sum_of_squares);
        println!(
            "  max |residual|: {:.6e} {}",
            quality.max_abs_residual,
            sensor.unit()
        );
    }
    Ok(())
}

fn test(
    session: &Session,
    capture: PathBuf,
    series: Option<PathBuf>,
    pairs: Option<PathBuf>,
) -> Result<()> {
    let run = session.run_test(&mut CsvCapture::new(capture))?;

    println!("\nTest Complete.\n");
    if let Some(summary) = run.summary {
        println!("Max Force = {} N", summary.max_force);
        println!("Max Displacement = {} m", summary.displacement_at_max_force);
    }
    if let Some(path) = series {
        write_time_series(File::create(path)?, &run.window, &run.converted)?;
    }
    if let Some(path) = pairs {
        write_force_displacement(File::create(path)?, &run.window, &run.pairs)?;
    }
    Ok(())
}

fn show(session: &Session) -> Result<()> {
    let models = session.store().load_all()?;
    for sensor in SensorId::ALL {
        match models.get(&sensor) {
            Some(model) => {
                let domain = model.domain();
                println!(
                    "{sensor}: last calibrated {}",
                    model
                        .created_at()
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M:%S")
                );
                println!("  degree {}, coefficients {:?}", model.degree(), model.coefficients());
                println!("  raw domain {} .. {} V", domain.min_raw, domain.max_raw);
            }
            None => println!("{sensor}: not calibrated"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let session = Session::open(&args.config)?;

    match args.command {
        Command::Calibrate {
            sensor,
            pairs,
            captures,
            degree,
        } => calibrate(&session, sensor, pairs, captures, degree),
        Command::Test {
            capture,
            series,
            pairs,
        } => test(&session, capture, series, pairs),
        Command::Show => show(&session),
    }
}
