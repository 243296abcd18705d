//! Splitting an upload into multipart parts

use crate::config::{MAX_PARTS, MAX_PART_SIZE};
use crate::error::{StoreError, StoreResult};

/// One part of a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// 1-based part number
    pub number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Ordered part layout for one upload
///
/// Every part is `part_size` long except the last. When the total size is
/// unknown the plan has no end and parts are produced until the source runs
/// dry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    part_size: u64,
    total: Option<u64>,
}

impl ChunkPlan {
    /// Plan for `total` bytes. The part size is raised when `total` would
    /// otherwise need more than 10 000 parts.
    pub fn new(total: u64, part_size: u64) -> StoreResult<Self> {
        if part_size == 0 {
            return Err(StoreError::InvalidArgument(
                "part size must be greater than zero".to_string(),
            ));
        }

        let max_total = MAX_PART_SIZE * u64::from(MAX_PARTS);
        if total > max_total {
            return Err(StoreError::InvalidArgument(format!(
                "object of {} bytes exceeds the multipart limit of {} bytes",
                total, max_total
            )));
        }

        let minimum = total.div_ceil(u64::from(MAX_PARTS));
        Ok(Self {
            part_size: part_size.max(minimum),
            total: Some(total),
        })
    }

    /// Plan for a source of unknown length
    pub fn unbounded(part_size: u64) -> Self {
        Self {
            part_size: part_size.max(1),
            total: None,
        }
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Number of parts, when the total is known
    pub fn part_count(&self) -> Option<u32> {
        self.total
            .map(|total| total.div_ceil(self.part_size) as u32)
    }

    /// Part `number` (1-based), or `None` past the end of a bounded plan.
    ///
    /// Parts of an unbounded plan are always full-sized; the reader decides
    /// where the data ends.
    pub fn part(&self, number: u32) -> Option<PartSpec> {
        if number == 0 {
            return None;
        }
        let offset = u64::from(number - 1) * self.part_size;
        match self.total {
            Some(total) if offset >= total => None,
            Some(total) => Some(PartSpec {
                number,
                offset,
                length: self.part_size.min(total - offset),
            }),
            None if number > MAX_PARTS => None,
            None => Some(PartSpec {
                number,
                offset,
                length: self.part_size,
            }),
        }
    }

    /// All parts of a bounded plan in order
    pub fn parts(&self) -> impl Iterator<Item = PartSpec> + '_ {
        let count = self.part_count().unwrap_or(0);
        (1..=count).filter_map(move |number| self.part(number))
    }

    /// Inclusive byte spans for a server-side copy of a bounded plan
    pub fn spans(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.parts()
            .map(|part| (part.offset, part.offset + part.length - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_fifty_mib_in_five_mib_parts() {
        let plan = ChunkPlan::new(50 * MIB, 5 * MIB).unwrap();
        assert_eq!(plan.part_count(), Some(10));

        let parts: Vec<_> = plan.parts().collect();
        assert_eq!(parts.len(), 10);
        assert_eq!(
            parts.iter().map(|p| p.number).collect::<Vec<_>>(),
            (1..=10).collect::<Vec<_>>()
        );
        assert!(parts.iter().all(|p| p.length == 5 * MIB));
        assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), 50 * MIB);
    }

    #[test]
    fn test_last_part_is_remainder() {
        let plan = ChunkPlan::new(12 * MIB + 7, 5 * MIB).unwrap();
        let parts: Vec<_> = plan.parts().collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].offset, 10 * MIB);
        assert_eq!(parts[2].length, 2 * MIB + 7);
        assert!(plan.part(4).is_none());
    }

    #[test]
    fn test_part_size_grows_past_part_limit() {
        let total = 100_000 * MIB;
        let plan = ChunkPlan::new(total, 5 * MIB).unwrap();
        assert_eq!(plan.part_size(), 10 * MIB);
        assert_eq!(plan.part_count(), Some(10_000));
    }

    #[test]
    fn test_unbounded_plan() {
        let plan = ChunkPlan::unbounded(5 * MIB);
        assert_eq!(plan.part_count(), None);
        let part = plan.part(3).unwrap();
        assert_eq!(part.offset, 10 * MIB);
        assert_eq!(part.length, 5 * MIB);
        assert!(plan.part(MAX_PARTS + 1).is_none());
    }

    #[test]
    fn test_copy_spans() {
        let plan = ChunkPlan::new(10, 4).unwrap();
        let spans: Vec<_> = plan.spans().collect();
        assert_eq!(spans, vec![(0, 3), (4, 7), (8, 9)]);
    }

    #[test]
    fn test_rejects_oversized_total() {
        let too_big = MAX_PART_SIZE * u64::from(MAX_PARTS) + 1;
        assert!(ChunkPlan::new(too_big, MAX_PART_SIZE).is_err());
        assert!(ChunkPlan::new(10, 0).is_err());
    }
}
