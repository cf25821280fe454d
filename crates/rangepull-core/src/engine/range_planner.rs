//! Range planner - splits a resource into fixed-size byte ranges

use rangepull_types::ByteRange;
use std::num::NonZeroU64;

/// Default size of one ranged request (512 KiB)
pub const DEFAULT_CHUNK_SIZE: NonZeroU64 = match NonZeroU64::new(512 * 1024) {
    Some(size) => size,
    None => unreachable!(),
};

/// Number of ranges needed to cover `total_size` bytes
pub fn chunk_count(total_size: u64, chunk_size: NonZeroU64) -> u64 {
    total_size.div_ceil(chunk_size.get())
}

/// Split `[0, total_size)` into contiguous ranges of at most `chunk_size` bytes.
///
/// An empty resource yields no ranges.
pub fn plan(total_size: u64, chunk_size: NonZeroU64) -> Vec<ByteRange> {
    let size = chunk_size.get();
    (0..chunk_count(total_size, chunk_size))
        .map(|i| {
            let start = i * size;
            let end = start.saturating_add(size - 1).min(total_size - 1);
            ByteRange::new(i as u32, start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    fn assert_covers(ranges: &[ByteRange], total_size: u64) {
        let mut next = 0;
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.index as usize, i);
            assert_eq!(range.start, next, "range {} leaves a gap or overlaps", i);
            assert!(range.end >= range.start);
            next = range.end + 1;
        }
        assert_eq!(next, total_size);
    }

    #[test]
    fn empty_resource_has_no_ranges() {
        assert!(plan(0, nz(1024)).is_empty());
        assert_eq!(chunk_count(0, nz(1024)), 0);
    }

    #[test]
    fn small_resource_is_one_range() {
        let ranges = plan(100, nz(1024));
        assert_eq!(ranges, vec![ByteRange::new(0, 0, 99)]);
    }

    #[test]
    fn one_million_bytes_in_half_mebibyte_chunks() {
        let ranges = plan(1_000_000, nz(524_288));
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 0, 524_287),
                ByteRange::new(1, 524_288, 999_999),
            ]
        );
        assert_eq!(ranges[0].len(), 524_288);
        assert_eq!(ranges[1].len(), 475_712);
    }

    #[test]
    fn exact_multiple_has_full_last_range() {
        let ranges = plan(4096, nz(1024));
        assert_eq!(ranges.len(), 4);
        assert!(ranges.iter().all(|r| r.len() == 1024));
        assert_covers(&ranges, 4096);
    }

    #[test]
    fn covers_every_size_without_gaps() {
        for chunk in [1, 2, 3, 7, 64, 1000] {
            for total in 0..300u64 {
                let ranges = plan(total, nz(chunk));
                assert_eq!(ranges.len() as u64, total.div_ceil(chunk));
                assert_covers(&ranges, total);
                if let Some(last) = ranges.last() {
                    assert_eq!(last.end, total - 1);
                }
            }
        }
    }

    #[test]
    fn default_chunk_size_matches_half_mebibyte() {
        assert_eq!(DEFAULT_CHUNK_SIZE.get(), 524_288);
    }
}
