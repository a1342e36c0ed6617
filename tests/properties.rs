//! Property tests for the pure parts of the pipeline.
//!
//! Run with:
//!   cargo test --test properties

use proptest::prelude::*;
use wikiscan::calibrate::consensus;
use wikiscan::pipeline::postprocess::repair_hyphenation;
use wikiscan::{assign_labels, CalibrationResult, CalibrationSample, IllustrationRange, LabelingConfig, PageLabel};

fn layout(cover: bool, first: usize, ranges: &[IllustrationRange]) -> LabelingConfig {
    LabelingConfig::builder()
        .has_cover_image(cover)
        .first_numbered_page_index(first)
        .illustration_ranges(ranges.iter().copied())
        .build()
        .unwrap()
}

fn range() -> impl Strategy<Value = IllustrationRange> {
    (1usize..60, 0usize..5).prop_map(|(start, len)| IllustrationRange::new(start, start + len))
}

proptest! {
    #[test]
    fn hyphenation_repair_is_idempotent(text in "[a-zA-Z0-9 \t\n-]{0,80}") {
        let once = repair_hyphenation(&text);
        prop_assert_eq!(repair_hyphenation(&once), once);
    }

    #[test]
    fn hyphenation_repair_never_grows_text(text in "[a-zA-Z \n-]{0,80}") {
        prop_assert!(repair_hyphenation(&text).len() <= text.len());
    }

    #[test]
    fn consensus_needs_two_matching_offsets(offsets in prop::collection::vec(-3i64..3, 0..=3)) {
        let max_count = offsets
            .iter()
            .map(|o| offsets.iter().filter(|x| *x == o).count())
            .max()
            .unwrap_or(0);
        let result = consensus(&offsets);
        prop_assert_eq!(result.is_some(), max_count >= 2);
        if let Some((_, votes)) = result {
            prop_assert_eq!(votes, max_count);
        }
    }

    #[test]
    fn calibration_is_deterministic(
        reads in prop::collection::vec((1usize..400, prop::option::of(1u32..300)), 0..=3)
    ) {
        let samples: Vec<CalibrationSample> = reads
            .into_iter()
            .map(|(page, printed)| CalibrationSample { page, printed })
            .collect();
        let a = CalibrationResult::from_samples(samples.clone());
        let b = CalibrationResult::from_samples(samples);
        prop_assert_eq!(&a, &b);
        if let Some(first) = a.first_numbered_page() {
            prop_assert!(first >= 1);
        }
    }

    #[test]
    fn labels_ignore_range_order(
        cover in any::<bool>(),
        first in 1usize..20,
        ranges in prop::collection::vec(range(), 0..4),
        last in 1usize..80,
    ) {
        let mut reversed = ranges.clone();
        reversed.reverse();
        prop_assert_eq!(
            assign_labels(last, &layout(cover, first, &ranges)),
            assign_labels(last, &layout(cover, first, &reversed))
        );
    }

    #[test]
    fn numbered_labels_count_up_from_one(
        cover in any::<bool>(),
        first in 1usize..20,
        ranges in prop::collection::vec(range(), 0..4),
        last in 1usize..80,
    ) {
        let labels = assign_labels(last, &layout(cover, first, &ranges));
        prop_assert_eq!(labels.len(), last - usize::from(cover));

        let numbered: Vec<u32> = labels
            .values()
            .filter_map(|l| match l {
                PageLabel::Numbered(n) => Some(*n),
                _ => None,
            })
            .collect();
        let expected: Vec<u32> = (1..=numbered.len() as u32).collect();
        prop_assert_eq!(numbered, expected);
    }
}
