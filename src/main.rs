//! This file defines the leadgrid binary entry point.

use leadgrid::archive::FileArchive;
use leadgrid::cli;
use leadgrid::error::{ArchiveError, ErrorReport, GridError, PipelineError};
use leadgrid::grid_cache::GridCache;
use leadgrid::metrics;
use leadgrid::pipeline::{self, Extractor};
use leadgrid::tracing;

use expanduser::expanduser;
use std::process::ExitCode;

/// Application entry point
fn main() -> ExitCode {
    let args = cli::parse();
    tracing::init_tracing();
    metrics::register_metrics();
    let result = run(&args);
    if args.print_metrics {
        print!("{}", metrics::gather());
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error.log();
            if let Ok(report) = serde_json::to_string(&ErrorReport::from(&error)) {
                eprintln!("{}", report);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &cli::CommandLineArgs) -> Result<(), GridError> {
    let root = expanduser(&args.archive_root).map_err(|source| {
        PipelineError::from(ArchiveError::Io {
            path: args.archive_root.clone().into(),
            source,
        })
    })?;
    let archive = FileArchive::new(root, &args.archive_template);
    let cache = match args.cache_config() {
        Ok(Some(config)) => Some(GridCache::new(&config)?),
        Ok(None) => None,
        Err(source) => {
            return Err(PipelineError::CacheWriteFailure {
                path: args.cache_dir.clone().into(),
                source,
            }
            .into())
        }
    };
    if args.prune_cache {
        if let Some(cache) = &cache {
            cache.prune()?;
        }
    }
    let extractor = Extractor::new(archive, cache, args.extraction_config())?;
    let grid = extractor.get_grid(&args.variant, args.ini, args.fin)?;
    match &args.output {
        Some(path) => pipeline::write_grid(&grid, &args.grid_key(), path)?,
        None => {
            let first = grid.reference_times().first();
            let last = grid.reference_times().last();
            println!(
                "{} {}: {} reference times ({:?} to {:?}) x {} lead times, {} missing, units {}",
                grid.variant(),
                grid.reduction(),
                grid.reference_times().len(),
                first,
                last,
                grid.lead_times().len(),
                grid.missing_count(),
                grid.units()
            );
        }
    }
    Ok(())
}
