//! Lumen - GPU compute dispatch probe
//!
//! # Usage
//!
//! ```bash
//! # Show the selected device and its limits
//! lumen probe
//!
//! # Run the add-one fixture kernel over 4096 floats in groups of 128
//! lumen add-one --len 4096 --group 128
//!
//! # Force a backend (also: LUMEN_BACKEND=software)
//! lumen --backend software add-one --len 4
//! ```

use clap::{Parser, Subcommand};
use std::process;

use lumen_gpu::{
    logging, BackendPreference, ComputeDevice, ComputeSession, Extent3, FixtureKernel,
    NativeContext, SessionConfig,
};
use lumen_gpu::kernels::{COUNT_SLOT, DATA_SLOT};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(version = "0.1.0")]
#[command(about = "Lumen - run a single compute kernel on the best available device", long_about = None)]
struct Cli {
    /// Backend to open: auto, metal, wgpu or software (defaults to $LUMEN_BACKEND, then auto)
    #[arg(long, global = true)]
    backend: Option<BackendPreference>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the selected device and its limits
    Probe,

    /// Add one to every element of a float buffer on the device
    AddOne {
        /// Number of elements
        #[arg(long, default_value = "1024")]
        len: usize,

        /// Threads per thread-group
        #[arg(long, default_value = "64")]
        group: usize,

        /// How many leading results to print
        #[arg(long, default_value = "8")]
        show: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_with_level(log::LevelFilter::Debug);
    } else {
        logging::init_from_env();
    }

    let result = open_device(cli.backend).and_then(|device| match cli.command {
        Commands::Probe => {
            probe(&device);
            Ok(())
        }
        Commands::AddOne { len, group, show } => add_one(&device, len, group, show),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn open_device(backend: Option<BackendPreference>) -> Result<NativeContext, String> {
    let preference = match backend {
        Some(preference) => preference,
        None => BackendPreference::from_env()?,
    };
    NativeContext::with_preference(preference).map_err(|e| e.to_string())
}

fn probe(device: &NativeContext) {
    let limits = device.limits();
    println!("backend:                 {}", device.kind());
    println!("device:                  {}", device.name());
    println!("max threads per group:   {}", limits.max_threads_per_group);
    println!(
        "max group extent:        {} x {} x {}",
        limits.max_group_extent.width, limits.max_group_extent.height, limits.max_group_extent.depth
    );
    println!("max groups per dimension: {}", limits.max_groups_per_dimension);
    println!("max buffer length:       {} bytes", limits.max_buffer_length);
    println!("gpu available:           {}", NativeContext::is_available());
}

fn add_one(device: &NativeContext, len: usize, group: usize, show: usize) -> Result<(), String> {
    let count = u32::try_from(len).map_err(|_| format!("--len {} does not fit in u32", len))?;
    let config =
        SessionConfig::fixture(FixtureKernel::AddOne, device.kind(), len, Extent3::linear(group));
    let mut session = ComputeSession::new(device, config).map_err(|e| e.to_string())?;

    let input: Vec<f32> = (0..len).map(|i| i as f32).collect();
    session.prepare_data(DATA_SLOT, &input).map_err(|e| e.to_string())?;
    session.prepare_data(COUNT_SLOT, &[count]).map_err(|e| e.to_string())?;

    session
        .send_compute_command()
        .and_then(|status| status.into_result())
        .map_err(|e| e.to_string())?;

    let output = session.result::<f32>(DATA_SLOT).map_err(|e| e.to_string())?;
    let wrong = output
        .iter()
        .enumerate()
        .filter(|&(i, &v)| v != FixtureKernel::AddOne.apply(i as f32))
        .count();

    println!(
        "{}: {} elements in groups of {} -> {:?}",
        device.name(),
        len,
        group,
        &output[..show.min(output.len())]
    );
    if wrong > 0 {
        return Err(format!("{} of {} elements are wrong", wrong, len));
    }
    println!("all {} elements incremented", len);
    Ok(())
}
