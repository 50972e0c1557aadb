//! Access to archives of forecast records.
//!
//! An archive returns the [Record]s of a variant matching a reference time selector and a lead
//! time selector. Two accessors are provided: [FileArchive] reads one JSON document per variant
//! and reference date from a directory tree, and [MemoryArchive] holds records in memory for
//! embedding and tests.

use crate::error::{ArchiveError, FormatError};
use crate::format::{self, ArchiveDocument};
use crate::models::Record;
use crate::types::Missing;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use hashbrown::HashMap;
use ndarray::ArrayD;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, instrument};

/// Predicate on record reference times.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeSelector {
    /// A single reference time
    Exact(DateTime<Utc>),
    /// Every reference time in a closed range
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl TimeSelector {
    pub fn matches(&self, time: DateTime<Utc>) -> bool {
        match self {
            TimeSelector::Exact(exact) => time == *exact,
            TimeSelector::Between(first, last) => time >= *first && time <= *last,
        }
    }

    /// Latest reference time the selector can match.
    pub fn latest(&self) -> DateTime<Utc> {
        match self {
            TimeSelector::Exact(exact) => *exact,
            TimeSelector::Between(_, last) => *last,
        }
    }

    /// Calendar dates (UTC) the selector touches, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let (first, last) = match self {
            TimeSelector::Exact(exact) => (exact.date_naive(), exact.date_naive()),
            TimeSelector::Between(first, last) => (first.date_naive(), last.date_naive()),
        };
        first.iter_days().take_while(|date| *date <= last).collect()
    }
}

/// Predicate on record lead times.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LeadSelector {
    Any,
    /// Every lead time in a closed range
    Between(Duration, Duration),
}

impl LeadSelector {
    pub fn matches(&self, lead_time: Duration) -> bool {
        match self {
            LeadSelector::Any => true,
            LeadSelector::Between(first, last) => lead_time >= *first && lead_time <= *last,
        }
    }
}

/// Records returned by an archive query, with the metadata needed to reduce them.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// Units of the field values
    pub units: String,
    /// How missing elements are encoded, if at all
    pub missing: Option<Missing>,
    /// Matching records in archive order
    pub records: Vec<Record>,
}

/// Trait for read-only archive access.
pub trait ArchiveAccessor {
    /// Return the records of `variant` matching both selectors.
    ///
    /// Fails with [ArchiveError::Unavailable] when the product covering the selection has not
    /// been produced yet. An available product without matching records is not an error.
    fn query(
        &self,
        variant: &str,
        reference: &TimeSelector,
        lead: &LeadSelector,
    ) -> Result<Selection, ArchiveError>;
}

impl<T: ArchiveAccessor + ?Sized> ArchiveAccessor for &T {
    fn query(
        &self,
        variant: &str,
        reference: &TimeSelector,
        lead: &LeadSelector,
    ) -> Result<Selection, ArchiveError> {
        (**self).query(variant, reference, lead)
    }
}

#[derive(Clone, Debug)]
struct MemoryVariant {
    units: String,
    missing: Option<Missing>,
    records: Vec<Record>,
}

/// In-memory archive.
///
/// Counts queries so that callers can check whether the archive was consulted at all.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    variants: HashMap<String, MemoryVariant>,
    horizon: Option<DateTime<Utc>>,
    queries: Cell<usize>,
}

impl MemoryArchive {
    /// Return a new, empty MemoryArchive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the records of a variant, replacing any previous ones.
    pub fn with_variant(mut self, variant: &str, units: &str, records: Vec<Record>) -> Self {
        self.variants.insert(
            variant.to_string(),
            MemoryVariant {
                units: units.to_string(),
                missing: None,
                records,
            },
        );
        self
    }

    /// Declare the missing data encoding of a variant added with [MemoryArchive::with_variant].
    pub fn with_missing(mut self, variant: &str, missing: Missing) -> Self {
        if let Some(entry) = self.variants.get_mut(variant) {
            entry.missing = Some(missing);
        }
        self
    }

    /// Treat reference times after `horizon` as not produced yet.
    pub fn with_horizon(mut self, horizon: DateTime<Utc>) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Number of queries answered or refused so far.
    pub fn query_count(&self) -> usize {
        self.queries.get()
    }
}

impl ArchiveAccessor for MemoryArchive {
    fn query(
        &self,
        variant: &str,
        reference: &TimeSelector,
        lead: &LeadSelector,
    ) -> Result<Selection, ArchiveError> {
        self.queries.set(self.queries.get() + 1);
        let entry = self
            .variants
            .get(variant)
            .ok_or_else(|| ArchiveError::Unavailable {
                variant: variant.to_string(),
                location: "memory".to_string(),
            })?;
        if let Some(horizon) = self.horizon {
            if reference.latest() > horizon {
                return Err(ArchiveError::Unavailable {
                    variant: variant.to_string(),
                    location: reference.latest().to_rfc3339(),
                });
            }
        }
        let records = entry
            .records
            .iter()
            .filter(|record| {
                reference.matches(record.reference_time) && lead.matches(record.lead_time)
            })
            .cloned()
            .collect();
        Ok(Selection {
            units: entry.units.clone(),
            missing: entry.missing.clone(),
            records,
        })
    }
}

/// Archive of JSON documents on disk.
///
/// Paths are derived from a template relative to the archive root, in which `{variant}`,
/// `{year}` and `{date}` (`YYYYmmdd`) are substituted, e.g. `{variant}/{year}/{variant}_{date}.json.gz`.
/// Each file is decoded at most once per accessor.
#[derive(Debug)]
pub struct FileArchive {
    root: PathBuf,
    template: String,
    documents: RefCell<HashMap<PathBuf, Rc<ArchiveDocument>>>,
}

impl FileArchive {
    /// Return a new FileArchive.
    ///
    /// # Arguments
    ///
    /// * `root`: Archive root directory
    /// * `template`: Path template relative to `root`
    pub fn new(root: impl Into<PathBuf>, template: &str) -> Self {
        FileArchive {
            root: root.into(),
            template: template.to_string(),
            documents: RefCell::new(HashMap::new()),
        }
    }

    /// Path of the archive file holding `variant` records for `date`.
    pub fn path(&self, variant: &str, date: NaiveDate) -> PathBuf {
        let relative = self
            .template
            .replace("{variant}", variant)
            .replace("{year}", &format!("{:04}", date.year()))
            .replace("{date}", &date.format("%Y%m%d").to_string());
        self.root.join(relative)
    }

    #[instrument(skip(self))]
    fn load(&self, variant: &str, path: &Path) -> Result<Rc<ArchiveDocument>, ArchiveError> {
        if let Some(document) = self.documents.borrow().get(path) {
            return Ok(document.clone());
        }
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::Unavailable {
                    variant: variant.to_string(),
                    location: path.display().to_string(),
                })
            }
            Err(source) => {
                return Err(ArchiveError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let decode_error = |source: FormatError| ArchiveError::Decode {
            path: path.to_path_buf(),
            source,
        };
        let document: ArchiveDocument = format::decode_document(&data).map_err(decode_error)?;
        if document.variant != variant {
            return Err(decode_error(FormatError::UnexpectedFormat {
                found: format!("variant {}", document.variant),
            }));
        }
        if let Some(missing) = &document.missing {
            missing.validate().map_err(|error| {
                decode_error(FormatError::UnexpectedFormat {
                    found: format!("missing data descriptor ({})", error),
                })
            })?;
        }
        debug!(records = document.records.len(), "decoded archive file");
        let document = Rc::new(document);
        self.documents
            .borrow_mut()
            .insert(path.to_path_buf(), document.clone());
        Ok(document)
    }
}

impl ArchiveAccessor for FileArchive {
    fn query(
        &self,
        variant: &str,
        reference: &TimeSelector,
        lead: &LeadSelector,
    ) -> Result<Selection, ArchiveError> {
        let mut units: Option<String> = None;
        let mut missing = None;
        let mut records = vec![];
        for date in reference.dates() {
            let path = self.path(variant, date);
            let document = self.load(variant, &path)?;
            match &units {
                None => {
                    units = Some(document.units.clone());
                    missing = document.missing.clone();
                }
                Some(first) if *first != document.units => {
                    return Err(ArchiveError::InconsistentUnits {
                        variant: variant.to_string(),
                        first: first.clone(),
                        second: document.units.clone(),
                    })
                }
                Some(_) => (),
            }
            for stored in document.records.iter() {
                if !reference.matches(stored.reference_time) || !lead.matches(stored.lead_time) {
                    continue;
                }
                let value = ArrayD::try_from(stored.value.clone()).map_err(|source| {
                    ArchiveError::Decode {
                        path: path.clone(),
                        source,
                    }
                })?;
                records.push(Record::new(stored.reference_time, stored.lead_time, value));
            }
        }
        Ok(Selection {
            units: units.unwrap_or_default(),
            missing,
            records,
        })
    }
}
