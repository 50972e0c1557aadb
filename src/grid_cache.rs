//! Read-through persistence of assembled grids.
//!
//! Each grid is written to `<dir>/<key>.json.gz`, where the key is derived from the variant, the
//! span and a digest of the extraction configuration. A sled-backed [DiskCache] index records the
//! span and size of every stored grid, which allows a request to be served from a stored grid
//! whose reference time axis covers it, and supports expiry and pruning to a size limit.

use crate::error::{ErrorReport, PipelineError};
use crate::format::{self, GridDocument};
use crate::grid::Grid;
use crate::metrics::{CACHE_CORRUPT, CACHE_HITS, CACHE_MISSES};
use crate::models::{Compression, ExtractionConfig};
use crate::window::WindowGenerator;

use byte_unit::Byte;
use cached::stores::{DiskCache, DiskCacheBuilder};
use cached::IOCached;
use chrono::{DateTime, Utc};
use expanduser::expanduser;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Name of the index database within the cache directory.
const INDEX_NAME: &str = "grid_index";

/// Format of the span bounds within a cache key.
const KEY_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Parse a human readable size such as `"512 MiB"` or `"2GB"` into bytes.
pub fn parse_size_limit(size_limit: &str) -> Result<usize, String> {
    let bytes = Byte::parse_str(size_limit, /* ignore case */ true)
        .map_err(|error| format!("invalid size limit {}: {}", size_limit, error))?
        .as_u64();
    usize::try_from(bytes).map_err(|error| error.to_string())
}

/// Grid cache configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Directory holding cached grids and the index
    pub dir: PathBuf,
    /// Lifespan of index entries in seconds
    pub lifespan: Option<u64>,
    /// Total size of cached grids to prune down to, in bytes
    pub size_limit: Option<usize>,
}

impl CacheConfig {
    /// Return a new CacheConfig, expanding `~` in the directory.
    pub fn new(
        dir: &str,
        lifespan: Option<u64>,
        size_limit: Option<usize>,
    ) -> Result<Self, std::io::Error> {
        Ok(CacheConfig {
            dir: expanduser(dir)?,
            lifespan,
            size_limit,
        })
    }
}

/// The identity of one cached grid.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheRequest {
    /// Canonical key
    pub key: String,
    pub variant: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Reference times the pipeline would produce for the span
    pub reference_times: Vec<DateTime<Utc>>,
    /// MD5 digest of the extraction configuration
    pub digest: String,
}

impl CacheRequest {
    /// Derive the cache identity of an extraction.
    pub fn new(
        variant: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        config: &ExtractionConfig,
    ) -> Result<Self, PipelineError> {
        let generator = WindowGenerator::new(config, start, end)?;
        let encoded = serde_json::to_vec(config).map_err(|error| PipelineError::CacheIndex {
            error: error.to_string(),
        })?;
        let digest = format!("{:x}", md5::compute(encoded));
        let key = format!(
            "{}_{}_{}_{}_{}",
            variant,
            config.reduction,
            start.format(KEY_TIME_FORMAT),
            end.format(KEY_TIME_FORMAT),
            &digest[..8]
        );
        Ok(CacheRequest {
            key,
            variant: variant.to_string(),
            start,
            end,
            reference_times: generator.reference_times().collect(),
            digest,
        })
    }

    pub fn file_name(&self) -> String {
        file_name(&self.key)
    }
}

fn file_name(key: &str) -> String {
    format!("{}.json.gz", key)
}

/// Index entry of a stored grid.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GridMetadata {
    /// Full path to the grid on disk
    pub path: PathBuf,
    pub variant: String,
    /// Extraction configuration digest
    pub digest: String,
    /// First reference time of the stored grid
    pub first: DateTime<Utc>,
    /// Last reference time of the stored grid
    pub last: DateTime<Utc>,
    /// Size of the file in bytes
    pub size: usize,
}

/// Outcome of [GridCache::prune].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PruneSummary {
    /// Entries removed because their lifespan expired
    pub expired: usize,
    /// Entries removed because their file no longer exists
    pub vanished: usize,
    /// Entries removed to get under the size limit
    pub evicted: usize,
    /// Size of the grids left in the cache, in bytes
    pub remaining_bytes: usize,
}

/// Cache of assembled grids.
pub struct GridCache {
    index: DiskCache<String, GridMetadata>,
    dir: PathBuf,
    size_limit: Option<usize>,
}

impl GridCache {
    /// Open (creating if necessary) the cache in `config.dir`.
    ///
    /// The index holds an exclusive lock on the directory for the lifetime of the cache.
    pub fn new(config: &CacheConfig) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&config.dir).map_err(|source| {
            PipelineError::CacheWriteFailure {
                path: config.dir.clone(),
                source,
            }
        })?;
        let mut builder = DiskCacheBuilder::new(INDEX_NAME).set_disk_directory(&config.dir);
        if let Some(lifespan) = config.lifespan {
            builder = builder.set_lifespan(lifespan);
        }
        let index = builder.build().map_err(|error| PipelineError::CacheIndex {
            error: error.to_string(),
        })?;
        Ok(GridCache {
            index,
            dir: config.dir.clone(),
            size_limit: config.size_limit,
        })
    }

    /// Return the cached grid for `request`, or compute, store and return it.
    #[instrument(skip(self, request, compute), fields(key = %request.key))]
    pub fn fetch<F>(&self, request: &CacheRequest, compute: F) -> Result<Grid, PipelineError>
    where
        F: FnOnce() -> Result<Grid, PipelineError>,
    {
        if let Some(grid) = self.lookup(request)? {
            CACHE_HITS.inc();
            return Ok(grid);
        }
        CACHE_MISSES.inc();
        info!("cache miss, running pipeline");
        let grid = compute()?;
        self.store(request, &grid)?;
        Ok(grid)
    }

    /// Find a stored grid for `request`: the file at its own path, or a stored grid of the same
    /// variant and configuration whose reference time axis covers the request.
    pub fn lookup(&self, request: &CacheRequest) -> Result<Option<Grid>, PipelineError> {
        let path = self.dir.join(request.file_name());
        if let Some(grid) =
            self.load_or_discard(&request.key, &path, Some(request.reference_times.as_slice()))?
        {
            debug!(path = %path.display(), "exact cache hit");
            return Ok(Some(grid));
        }
        // A covering grid must itself be a valid grid after subsetting.
        if request.reference_times.len() < 2 {
            return Ok(None);
        }
        let (Some(first), Some(last)) = (
            request.reference_times.first(),
            request.reference_times.last(),
        ) else {
            return Ok(None);
        };
        for (key, metadata) in self.entries()? {
            if key == request.key
                || metadata.variant != request.variant
                || metadata.digest != request.digest
                || metadata.first > *first
                || metadata.last < *last
            {
                continue;
            }
            if let Some(grid) = self.load_or_discard(&key, &metadata.path, None)? {
                if let Some(subset) = grid.subset(&request.reference_times) {
                    debug!(covering = %key, "covering cache hit");
                    return Ok(Some(subset));
                }
            }
        }
        Ok(None)
    }

    /// Load a stored grid, discarding it if it cannot be used.
    fn load_or_discard(
        &self,
        key: &str,
        path: &Path,
        reference_times: Option<&[DateTime<Utc>]>,
    ) -> Result<Option<Grid>, PipelineError> {
        match load(key, path, reference_times) {
            Ok(grid) => Ok(grid),
            Err(error @ PipelineError::CacheCorrupt { .. }) => {
                warn!("{}", error);
                CACHE_CORRUPT.inc();
                if let Err(error) = std::fs::remove_file(path) {
                    debug!("failed to remove corrupt grid: {}", error);
                }
                self.remove_entry(key);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Persist a grid for `request`.
    ///
    /// The grid is written to a temporary file in the cache directory and renamed into place, so
    /// no file is left at the target path on failure.
    #[instrument(skip(self, request, grid), fields(key = %request.key))]
    pub fn store(&self, request: &CacheRequest, grid: &Grid) -> Result<PathBuf, PipelineError> {
        let path = self.dir.join(request.file_name());
        let write_failure = |source: std::io::Error| PipelineError::CacheWriteFailure {
            path: path.clone(),
            source,
        };
        let document: GridDocument = grid.to_document(&request.key);
        let data = format::encode_document(&document, Some(Compression::Gzip)).map_err(|error| {
            write_failure(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                ErrorReport::new(&error).summary(),
            ))
        })?;
        let mut file = NamedTempFile::new_in(&self.dir).map_err(write_failure)?;
        file.write_all(&data).map_err(write_failure)?;
        file.as_file().sync_all().map_err(write_failure)?;
        file.persist(&path)
            .map_err(|error| write_failure(error.error))?;
        info!(path = %path.display(), bytes = data.len(), "stored grid");

        if let (Some(first), Some(last)) =
            (grid.reference_times().first(), grid.reference_times().last())
        {
            let metadata = GridMetadata {
                path: path.clone(),
                variant: request.variant.clone(),
                digest: request.digest.clone(),
                first: *first,
                last: *last,
                size: data.len(),
            };
            // The grid file is usable without its index entry.
            if let Err(error) = self.index.cache_set(request.key.clone(), metadata) {
                warn!("failed to index cached grid: {}", error);
            } else if let Err(error) = self.index.connection().flush() {
                warn!("failed to flush cache index: {}", error);
            }
        }
        Ok(path)
    }

    /// Live index entries as (key, metadata) pairs.
    pub fn entries(&self) -> Result<Vec<(String, GridMetadata)>, PipelineError> {
        let mut entries = vec![];
        for key in self.keys() {
            match self.index.cache_get(&key) {
                Ok(Some(metadata)) => entries.push((key, metadata)),
                Ok(None) => (),
                Err(error) => {
                    return Err(PipelineError::CacheIndex {
                        error: error.to_string(),
                    })
                }
            }
        }
        Ok(entries)
    }

    /// Every key in the index, including expired ones.
    fn keys(&self) -> Vec<String> {
        self.index
            .connection()
            .iter()
            .keys()
            .filter_map(|key| key.ok())
            .filter_map(|key| std::str::from_utf8(key.as_ref()).ok().map(String::from))
            .collect()
    }

    fn remove_entry(&self, key: &str) {
        if let Err(error) = self.index.cache_remove(&key.to_string()) {
            warn!("failed to remove cache index entry {}: {}", key, error);
        }
    }

    /// Remove expired entries and entries whose file has vanished, then the largest grids until
    /// the total size is within the size limit.
    #[instrument(skip(self))]
    pub fn prune(&self) -> Result<PruneSummary, PipelineError> {
        info!("Start pruning the cache");
        let mut summary = PruneSummary::default();
        let mut live = vec![];
        for key in self.keys() {
            let metadata = self
                .index
                .cache_get(&key)
                .map_err(|error| PipelineError::CacheIndex {
                    error: error.to_string(),
                })?;
            match metadata {
                Some(metadata) if metadata.path.exists() => live.push((key, metadata)),
                Some(_) => {
                    self.remove_entry(&key);
                    summary.vanished += 1;
                }
                None => {
                    // Expired: the file name is derived from the key.
                    let path = self.dir.join(file_name(&key));
                    if path.exists() {
                        if let Err(error) = std::fs::remove_file(&path) {
                            warn!("failed to remove expired grid {}: {}", path.display(), error);
                        }
                    }
                    self.remove_entry(&key);
                    summary.expired += 1;
                }
            }
        }
        self.index
            .remove_expired_entries()
            .map_err(|error| PipelineError::CacheIndex {
                error: error.to_string(),
            })?;

        // Largest first.
        live.sort_by(|a, b| b.1.size.cmp(&a.1.size));
        let mut total: usize = live.iter().map(|(_, metadata)| metadata.size).sum();
        if let Some(size_limit) = self.size_limit {
            for (key, metadata) in live.iter() {
                if total <= size_limit {
                    break;
                }
                if let Err(error) = std::fs::remove_file(&metadata.path) {
                    warn!("failed to remove grid {}: {}", metadata.path.display(), error);
                }
                self.remove_entry(key);
                total -= metadata.size;
                summary.evicted += 1;
            }
        }
        summary.remaining_bytes = total;
        if let Err(error) = self.index.connection().flush() {
            warn!("failed to flush cache index: {}", error);
        }
        info!(?summary, "Finished pruning the cache");
        Ok(summary)
    }
}

/// Read and check a stored grid, including its reference time axis when one is given.
///
/// Returns `Ok(None)` when there is no file at `path`.
fn load(
    key: &str,
    path: &Path,
    reference_times: Option<&[DateTime<Utc>]>,
) -> Result<Option<Grid>, PipelineError> {
    let corrupt = |reason: String| PipelineError::CacheCorrupt {
        path: path.to_path_buf(),
        reason,
    };
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(corrupt(error.to_string())),
    };
    let document: GridDocument = format::decode_document(&data)
        .map_err(|error| corrupt(ErrorReport::new(&error).summary()))?;
    if document.key != key {
        return Err(corrupt(format!("stored key {} does not match", document.key)));
    }
    let grid = Grid::from_document(document)
        .map_err(|error| corrupt(ErrorReport::new(&error).summary()))?;
    if let Some(reference_times) = reference_times {
        if grid.reference_times() != reference_times {
            return Err(corrupt("stored reference times do not match".to_string()));
        }
    }
    Ok(Some(grid))
}
