//! Offset calibration: find the physical page that carries printed "1".
//!
//! Three probe pages at 20 %, 50 % and 80 % of the document are rendered at
//! a low resolution and a vision model reads the printed number off each.
//! Every readable number gives an offset `physical - printed`; when at least
//! two probes agree, the page printed "1" is `1 + offset`.
//!
//! The probes stay clear of the first and last tenth of the book, where
//! roman-numbered front matter and unnumbered appendices would give
//! misleading reads.
//!
//! A probe the model cannot read (error, timeout, `NONE`) is simply a
//! missing vote. Too few agreeing votes yields
//! [`CalibrationResult::Ambiguous`]; the caller falls back to manual entry.

use crate::error::WikiscanError;
use crate::pipeline::llm::PageNumberReader;
use crate::pipeline::render::SourceDocument;
use crate::pipeline::with_timeout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fractions of the page range that are probed.
pub const PROBE_FRACTIONS: [f64; 3] = [0.2, 0.5, 0.8];

/// Agreeing probes required for a reliable offset.
pub const MIN_AGREEING_PROBES: usize = 2;

/// One probe read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// 1-based physical page index.
    pub page: usize,
    /// The printed number, if one was read.
    pub printed: Option<u32>,
}

impl CalibrationSample {
    /// `page - printed`, when a number was read.
    pub fn offset(&self) -> Option<i64> {
        self.printed.map(|n| self.page as i64 - i64::from(n))
    }
}

/// Outcome of calibrating one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationResult {
    /// At least two probes agreed.
    Agreed {
        offset: i64,
        /// Physical index of the page printed "1"; never below 1.
        first_numbered_page: usize,
        votes: usize,
        samples: Vec<CalibrationSample>,
    },
    /// No offset had enough votes.
    Ambiguous { samples: Vec<CalibrationSample> },
}

impl CalibrationResult {
    /// Build a result from probe reads.
    pub fn from_samples(samples: Vec<CalibrationSample>) -> Self {
        let offsets: Vec<i64> = samples.iter().filter_map(CalibrationSample::offset).collect();
        match consensus(&offsets) {
            Some((offset, votes)) => CalibrationResult::Agreed {
                offset,
                first_numbered_page: first_numbered_page(offset),
                votes,
                samples,
            },
            None => CalibrationResult::Ambiguous { samples },
        }
    }

    pub fn is_agreed(&self) -> bool {
        matches!(self, CalibrationResult::Agreed { .. })
    }

    pub fn offset(&self) -> Option<i64> {
        match self {
            CalibrationResult::Agreed { offset, .. } => Some(*offset),
            CalibrationResult::Ambiguous { .. } => None,
        }
    }

    /// Physical index of printed page "1", when calibration agreed.
    pub fn first_numbered_page(&self) -> Option<usize> {
        match self {
            CalibrationResult::Agreed {
                first_numbered_page, ..
            } => Some(*first_numbered_page),
            CalibrationResult::Ambiguous { .. } => None,
        }
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        match self {
            CalibrationResult::Agreed { samples, .. } | CalibrationResult::Ambiguous { samples } => samples,
        }
    }
}

/// Probe pages for a document of `total_pages`: `floor(total × f)` for each
/// fraction, dropping zeros and duplicates.
pub fn probe_pages(total_pages: usize) -> Vec<usize> {
    let mut pages = Vec::with_capacity(PROBE_FRACTIONS.len());
    for f in PROBE_FRACTIONS {
        let page = (total_pages as f64 * f).floor() as usize;
        if page >= 1 && !pages.contains(&page) {
            pages.push(page);
        }
    }
    pages
}

/// Most frequent offset and its count, when the count reaches
/// [`MIN_AGREEING_PROBES`]. Ties go to the offset seen first.
pub fn consensus(offsets: &[i64]) -> Option<(i64, usize)> {
    let mut counts: Vec<(i64, usize)> = Vec::new();
    for &o in offsets {
        match counts.iter_mut().find(|(v, _)| *v == o) {
            Some((_, n)) => *n += 1,
            None => counts.push((o, 1)),
        }
    }
    let mut best: Option<(i64, usize)> = None;
    for (o, n) in counts {
        if best.is_none_or(|(_, b)| n > b) {
            best = Some((o, n));
        }
    }
    best.filter(|(_, n)| *n >= MIN_AGREEING_PROBES)
}

/// `1 + offset`, clamped to the first physical page.
pub fn first_numbered_page(offset: i64) -> usize {
    usize::try_from(1 + offset).unwrap_or(1).max(1)
}

/// Runs the probes against a document.
pub struct Calibrator {
    reader: Arc<dyn PageNumberReader>,
    dpi: u32,
    timeout: Duration,
}

impl Calibrator {
    pub fn new(reader: Arc<dyn PageNumberReader>, dpi: u32, timeout: Duration) -> Self {
        Self { reader, dpi, timeout }
    }

    /// Probe `document` and compute the offset.
    ///
    /// Each probe image is dropped as soon as its number is read, success or
    /// not.
    ///
    /// # Errors
    ///
    /// Only a render failure is an error; it means the PDF itself is broken.
    pub async fn calibrate(&self, document: &SourceDocument) -> Result<CalibrationResult, WikiscanError> {
        let pages = probe_pages(document.page_count());
        debug!("Calibrating '{}': probing pages {:?}", document.file_name(), pages);

        let mut samples = Vec::with_capacity(pages.len());
        for page in pages {
            let image = document.render(page, self.dpi).await?;
            let printed = match with_timeout(self.timeout, self.reader.read_page_number(&image)).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("Calibration probe on page {} failed: {}", page, e);
                    None
                }
            };
            drop(image);
            debug!("Probe page {}: printed {:?}", page, printed);
            samples.push(CalibrationSample { page, printed });
        }

        let result = CalibrationResult::from_samples(samples);
        match &result {
            CalibrationResult::Agreed {
                offset,
                first_numbered_page,
                votes,
                ..
            } => info!(
                "Calibrated '{}': offset {} ({} votes), printed page 1 is physical page {}",
                document.file_name(),
                offset,
                votes,
                first_numbered_page
            ),
            CalibrationResult::Ambiguous { samples } => warn!(
                "Calibration of '{}' is ambiguous: {:?}",
                document.file_name(),
                samples.iter().map(CalibrationSample::offset).collect::<Vec<_>>()
            ),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(page: usize, printed: Option<u32>) -> CalibrationSample {
        CalibrationSample { page, printed }
    }

    #[test]
    fn probes_at_fifths() {
        assert_eq!(probe_pages(100), vec![20, 50, 80]);
        assert_eq!(probe_pages(11), vec![2, 5, 8]);
    }

    #[test]
    fn tiny_documents_dedupe_and_skip_zero() {
        assert_eq!(probe_pages(1), Vec::<usize>::new());
        assert_eq!(probe_pages(2), vec![1]);
        assert_eq!(probe_pages(3), vec![1, 2]);
    }

    #[test]
    fn two_agreeing_probes_give_offset() {
        let r = CalibrationResult::from_samples(vec![
            sample(20, Some(8)),
            sample(50, Some(38)),
            sample(80, None),
        ]);
        assert_eq!(r.offset(), Some(12));
        assert_eq!(r.first_numbered_page(), Some(13));
    }

    #[test]
    fn three_distinct_offsets_are_ambiguous() {
        let r = CalibrationResult::from_samples(vec![
            sample(20, Some(1)),
            sample(50, Some(2)),
            sample(80, Some(3)),
        ]);
        assert!(!r.is_agreed());
        assert_eq!(r.samples().len(), 3);
    }

    #[test]
    fn single_read_is_ambiguous() {
        let r = CalibrationResult::from_samples(vec![sample(20, Some(10)), sample(50, None)]);
        assert_eq!(r.first_numbered_page(), None);
    }

    #[test]
    fn negative_offset_clamps_to_first_page() {
        assert_eq!(first_numbered_page(-4), 1);
        assert_eq!(first_numbered_page(0), 1);
        assert_eq!(first_numbered_page(9), 10);
    }

    #[test]
    fn consensus_counts_votes() {
        assert_eq!(consensus(&[4, 4, 4]), Some((4, 3)));
        assert_eq!(consensus(&[4, 7, 7]), Some((7, 2)));
        assert_eq!(consensus(&[]), None);
    }
}
