//! Chunk Planner
//!
//! Partitions a file into ordered, fixed-size byte ranges. Pure, no I/O.

use std::ops::Range;

use crate::upload::DEFAULT_CHUNK_SIZE;

/// One planned chunk: `[start, end)` of the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Ordered partition of a file of `file_size` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: usize,
    ranges: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// Plan `ceil(file_size / chunk_size)` ranges.
    ///
    /// A `chunk_size` of 0 selects [`DEFAULT_CHUNK_SIZE`].
    pub fn new(file_size: u64, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        let step = chunk_size as u64;
        let count = file_size.div_ceil(step) as usize;

        let ranges = (0..count)
            .map(|index| {
                let start = index as u64 * step;
                ChunkRange {
                    index,
                    start,
                    end: (start + step).min(file_size),
                }
            })
            .collect();

        Self {
            file_size,
            chunk_size,
            ranges,
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    pub fn get(&self, index: usize) -> Option<&ChunkRange> {
        self.ranges.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitions_with_short_tail() {
        let plan = ChunkPlan::new(10, 4);

        assert_eq!(plan.len(), 3);
        let bounds: Vec<_> = plan.ranges().iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(bounds, vec![(0, 4), (4, 8), (8, 10)]);
        assert_eq!(plan.get(2).unwrap().len(), 2);
    }

    #[test]
    fn test_exact_multiple() {
        let plan = ChunkPlan::new(8, 4);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get(1).unwrap().as_range(), 4..8);
    }

    #[test]
    fn test_empty_file() {
        let plan = ChunkPlan::new(0, 4);
        assert!(plan.is_empty());
        assert!(plan.get(0).is_none());
    }

    #[test]
    fn test_zero_chunk_size_uses_default() {
        let plan = ChunkPlan::new(5 * 1024 * 1024, 0);
        assert_eq!(plan.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_ranges_cover_file_contiguously() {
        let plan = ChunkPlan::new(1_000_003, 65_536);
        let mut expected_start = 0;
        for (i, range) in plan.ranges().iter().enumerate() {
            assert_eq!(range.index, i);
            assert_eq!(range.start, expected_start);
            assert!(!range.is_empty());
            expected_start = range.end;
        }
        assert_eq!(expected_start, 1_000_003);
    }
}
