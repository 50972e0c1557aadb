use lazy_static::lazy_static;
use prometheus::{self, Encoder, IntCounter, Opts, Registry};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Grids served from the cache
    pub static ref CACHE_HITS: IntCounter = IntCounter::with_opts(
        Opts::new("cache_hits", "The number of grids served from the cache")
    ).unwrap();
    // Grids computed by the pipeline
    pub static ref CACHE_MISSES: IntCounter = IntCounter::with_opts(
        Opts::new("cache_misses", "The number of grids computed because no cached grid was found")
    ).unwrap();
    // Cached grids discarded as unusable
    pub static ref CACHE_CORRUPT: IntCounter = IntCounter::with_opts(
        Opts::new("cache_corrupt", "The number of cached grids discarded as corrupt")
    ).unwrap();
    pub static ref ARCHIVE_QUERIES: IntCounter = IntCounter::with_opts(
        Opts::new("archive_queries", "The number of archive queries issued")
    ).unwrap();
    pub static ref WINDOWS_REDUCED: IntCounter = IntCounter::with_opts(
        Opts::new("windows_reduced", "The number of windows reduced to a sample")
    ).unwrap();
    pub static ref MISSING_CELLS: IntCounter = IntCounter::with_opts(
        Opts::new("missing_cells", "The number of grid cells marked missing")
    ).unwrap();
}

/// Register every counter with [REGISTRY].
///
/// Counters are updated whether or not they are registered; registration only makes them
/// visible to [gather].
pub fn register_metrics() {
    let counters: [&IntCounter; 6] = [
        &CACHE_HITS,
        &CACHE_MISSES,
        &CACHE_CORRUPT,
        &ARCHIVE_QUERIES,
        &WINDOWS_REDUCED,
        &MISSING_CELLS,
    ];
    for counter in counters {
        REGISTRY.register(Box::new(counter.clone())).unwrap();
    }
}

/// Render the registered metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    encoder.encode(&REGISTRY.gather(), &mut buffer).unwrap();

    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather() {
        let registry = Registry::new();
        registry.register(Box::new(WINDOWS_REDUCED.clone())).unwrap();
        WINDOWS_REDUCED.inc();
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer).unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("# TYPE windows_reduced counter"));
    }
}
