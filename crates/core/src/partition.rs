//! Page ranges and their split across rasterizer processes.

use serde::{Deserialize, Serialize};

/// Inclusive 1-based page range. `last: None` runs to the end of the document.
///
/// `first` is never below 1, however the range is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPageRange")]
pub struct PageRange {
    first: u32,
    last: Option<u32>,
}

#[derive(Deserialize)]
struct RawPageRange {
    first: u32,
    last: Option<u32>,
}

impl From<RawPageRange> for PageRange {
    fn from(raw: RawPageRange) -> Self {
        Self::new(raw.first, raw.last)
    }
}

impl PageRange {
    pub fn new(first: u32, last: Option<u32>) -> Self {
        Self {
            first: first.max(1),
            last,
        }
    }

    /// `first..=last`.
    pub fn pages(first: u32, last: u32) -> Self {
        Self::new(first, Some(last))
    }

    /// `first..` through the end of the document.
    pub fn from_page(first: u32) -> Self {
        Self::new(first, None)
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }

    /// True when `last` is set and before `first`.
    pub fn is_empty(&self) -> bool {
        matches!(self.last, Some(last) if self.first > last)
    }

    /// Number of pages, when known up front.
    pub fn page_count(&self) -> Option<u32> {
        match self.last {
            Some(last) if last >= self.first => Some(last - self.first + 1),
            Some(_) => Some(0),
            None => None,
        }
    }
}

/// A contiguous run of pages handed to one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start_page: u32,
    pub end_page: u32,
}

impl Chunk {
    pub fn page_count(&self) -> u32 {
        self.end_page - self.start_page + 1
    }
}

/// Split `page_count` pages starting at `first` into `workers` chunks.
///
/// Chunks are contiguous and cover every page exactly once. Sizes differ by
/// at most one, with the larger chunks first. The worker count is clamped
/// to `1..=page_count`, so no chunk is ever empty.
///
/// Pages past `u32::MAX` do not exist, so `page_count` is cut to the pages
/// that fit after `first`.
pub fn partition(first: u32, page_count: u32, workers: usize) -> Vec<Chunk> {
    let fits = u64::from(u32::MAX) - u64::from(first) + 1;
    let page_count = u64::from(page_count).min(fits) as u32;
    if page_count == 0 {
        return Vec::new();
    }
    let workers = (workers.max(1) as u64).min(page_count as u64) as u32;
    let base = page_count / workers;
    let mut remainder = page_count % workers;

    let mut chunks = Vec::with_capacity(workers as usize);
    let mut start = u64::from(first);
    for _ in 0..workers {
        let size = u64::from(base + u32::from(remainder > 0));
        remainder = remainder.saturating_sub(1);
        let end = start + size - 1;
        chunks.push(Chunk {
            start_page: start as u32,
            end_page: end as u32,
        });
        start = end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========== PageRange tests ==========

    #[test]
    fn test_page_range_counts() {
        assert_eq!(PageRange::pages(1, 10).page_count(), Some(10));
        assert_eq!(PageRange::pages(4, 4).page_count(), Some(1));
        assert_eq!(PageRange::from_page(3).page_count(), None);
    }

    #[test]
    fn test_page_range_empty() {
        assert!(PageRange::pages(5, 3).is_empty());
        assert_eq!(PageRange::pages(5, 3).page_count(), Some(0));
        assert!(!PageRange::from_page(5).is_empty());
    }

    #[test]
    fn test_page_range_first_is_at_least_one() {
        assert_eq!(PageRange::from_page(0).first(), 1);
        assert_eq!(PageRange::pages(0, 3).first(), 1);
    }

    #[test]
    fn test_page_range_deserialize_clamps_first() {
        let range: PageRange = serde_json::from_str(r#"{"first":0,"last":4}"#).unwrap();
        assert_eq!(range.first(), 1);
        assert_eq!(range.last(), Some(4));
        assert_eq!(range.page_count(), Some(4));
    }

    // ========== partition tests ==========

    #[test]
    fn test_partition_ten_pages_three_workers() {
        let chunks = partition(1, 10, 3);
        let sizes: Vec<u32> = chunks.iter().map(Chunk::page_count).collect();
        let starts: Vec<u32> = chunks.iter().map(|c| c.start_page).collect();
        let ends: Vec<u32> = chunks.iter().map(|c| c.end_page).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(starts, vec![1, 5, 8]);
        assert_eq!(ends, vec![4, 7, 10]);
    }

    #[test]
    fn test_partition_offset_start() {
        let chunks = partition(20, 5, 2);
        assert_eq!(
            chunks,
            vec![
                Chunk { start_page: 20, end_page: 22 },
                Chunk { start_page: 23, end_page: 24 },
            ]
        );
    }

    #[test]
    fn test_partition_more_workers_than_pages() {
        let chunks = partition(1, 2, 8);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.page_count() == 1));
    }

    #[test]
    fn test_partition_zero_workers_is_one_chunk() {
        assert_eq!(partition(1, 7, 0), vec![Chunk { start_page: 1, end_page: 7 }]);
    }

    #[test]
    fn test_partition_at_end_of_page_space() {
        assert_eq!(
            partition(u32::MAX - 1, 2, 2),
            vec![
                Chunk { start_page: u32::MAX - 1, end_page: u32::MAX - 1 },
                Chunk { start_page: u32::MAX, end_page: u32::MAX },
            ]
        );
        assert_eq!(
            partition(u32::MAX, 1, 3),
            vec![Chunk { start_page: u32::MAX, end_page: u32::MAX }]
        );
    }

    #[test]
    fn test_partition_count_past_page_space_is_cut() {
        let chunks = partition(u32::MAX - 2, 10, 2);
        assert_eq!(chunks.first().unwrap().start_page, u32::MAX - 2);
        assert_eq!(chunks.last().unwrap().end_page, u32::MAX);
        let total: u32 = chunks.iter().map(Chunk::page_count).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_partition_no_pages() {
        assert!(partition(1, 0, 4).is_empty());
    }

    proptest! {
        #[test]
        fn prop_partition_covers_range_exactly(
            first in 1u32..500,
            page_count in 1u32..2000,
            workers in 1usize..64,
        ) {
            let chunks = partition(first, page_count, workers);

            prop_assert_eq!(chunks.len(), workers.min(page_count as usize));
            prop_assert_eq!(chunks[0].start_page, first);
            prop_assert_eq!(chunks.last().unwrap().end_page, first + page_count - 1);
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end_page + 1, pair[1].start_page);
            }

            let total: u32 = chunks.iter().map(Chunk::page_count).sum();
            prop_assert_eq!(total, page_count);

            let ideal = page_count / chunks.len() as u32;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert!(chunk.page_count() == ideal || chunk.page_count() == ideal + 1);
                if i > 0 {
                    prop_assert!(chunk.page_count() <= chunks[i - 1].page_count());
                }
            }
        }
    }
}
