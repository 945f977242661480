use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;

use rustsa::data::dataset::StellarAssemblyDataset;
use rustsa::data::synthetics::generate_demo_dataset;

#[derive(Parser)]
#[command(name = "rustsa", about = "Birth-place provenance tagging for stellar-assembly datasets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the star particles of one galaxy
    Classify {
        /// Path to the dataset directory
        #[arg(long)]
        data: String,
        /// Subhalo identifier at the reference snapshot
        #[arg(long)]
        subfind_id: i64,
        /// Pull the binary files fully into memory
        #[arg(long)]
        in_memory: bool,
        /// Write the JSON result here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Classify many galaxies in parallel
    Batch {
        /// Path to the dataset directory
        #[arg(long)]
        data: String,
        /// Comma-separated subhalo identifiers
        #[arg(long, value_delimiter = ',')]
        subfind_ids: Vec<i64>,
        /// Worker threads, one galaxy per worker
        #[arg(long, default_value_t = 4)]
        num_threads: usize,
        /// Write the JSON results here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a small synthetic demo dataset
    Synthesize {
        /// Directory to create
        #[arg(long)]
        output: String,
        /// Number of star particles in the demo galaxy
        #[arg(long, default_value_t = 500)]
        n_particles: usize,
        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn emit(json: String, output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match output {
        Some(path) => fs::write(path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            data,
            subfind_id,
            in_memory,
            output,
        } => {
            let dataset = match in_memory {
                true => StellarAssemblyDataset::new_in_memory(&data)?,
                false => StellarAssemblyDataset::new(&data)?,
            };
            let result = dataset.classify(subfind_id)?;
            emit(serde_json::to_string_pretty(&result)?, output)?;
        }

        Commands::Batch {
            data,
            subfind_ids,
            num_threads,
            output,
        } => {
            let dataset = StellarAssemblyDataset::new(&data)?;
            let results = dataset.classify_batch(subfind_ids, num_threads);

            let (tagged, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
            for err in failed.iter().filter_map(|r| r.as_ref().err()) {
                eprintln!("classification failed: {}", err);
            }
            let tagged: Vec<_> = tagged.into_iter().filter_map(Result::ok).collect();
            info!("classified {} galaxies, {} failed", tagged.len(), failed.len());

            emit(serde_json::to_string_pretty(&tagged)?, output)?;
        }

        Commands::Synthesize {
            output,
            n_particles,
            seed,
        } => {
            let subfind_id = generate_demo_dataset(&PathBuf::from(&output), n_particles, seed)?;
            info!("wrote demo dataset to {} (galaxy subfind id {})", output, subfind_id);
        }
    }

    Ok(())
}
