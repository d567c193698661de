//! A sparse memory image: an ordered set of byte regions mapped at virtual
//! addresses, with gaps in between.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
        const WRITE_EXECUTE = Self::WRITE.bits() | Self::EXECUTE.bits();
        const READ_WRITE_EXECUTE =
            Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Display for Protection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(Protection::READ) { 'r' } else { '-' },
            if self.contains(Protection::WRITE) { 'w' } else { '-' },
            if self.contains(Protection::EXECUTE) { 'x' } else { '-' },
        )
    }
}

/// A contiguous run of bytes mapped at `addr`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub addr: u64,
    pub protection: Protection,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub comment: String,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.addr + self.data.len() as u64
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.end()
    }

    pub fn byte_at(&self, addr: u64) -> Option<u8> {
        self.contains(addr)
            .then(|| self.data[(addr - self.addr) as usize])
    }
}

/// An image of a loaded executable.
///
/// Invariant: regions are sorted by address and pairwise disjoint. Addresses
/// not covered by any region have no value (`byte_at` returns `None`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SparseImage {
    regions: Vec<Region>,
}

impl SparseImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `data` at `addr`.
    ///
    /// Panics if the new region overlaps an existing one; the loader is
    /// expected to feed disjoint segments.
    pub fn add_region(&mut self, addr: u64, protection: Protection, data: Vec<u8>, comment: String) {
        let region = Region {
            addr,
            protection,
            data,
            comment,
        };

        let index = self.regions.partition_point(|r| r.addr < region.addr);
        if let Some(prev) = index.checked_sub(1).and_then(|i| self.regions.get(i)) {
            assert!(
                prev.end() <= region.addr,
                "region at {:#x} overlaps the one at {:#x}",
                region.addr,
                prev.addr
            );
        }
        if let Some(next) = self.regions.get(index) {
            assert!(
                region.end() <= next.addr,
                "region at {:#x} overlaps the one at {:#x}",
                region.addr,
                next.addr
            );
        }

        self.regions.insert(index, region);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Lowest mapped address, or 0 for an empty image.
    pub fn min_address(&self) -> u64 {
        self.regions.first().map(|r| r.addr).unwrap_or(0)
    }

    /// One past the highest mapped address, or 0 for an empty image.
    pub fn max_address(&self) -> u64 {
        self.regions.last().map(|r| r.end()).unwrap_or(0)
    }

    pub fn byte_at(&self, addr: u64) -> Option<u8> {
        let index = self.regions.partition_point(|r| r.addr <= addr);
        index
            .checked_sub(1)
            .and_then(|i| self.regions[i].byte_at(addr))
    }

    pub fn is_loaded(&self, addr: u64) -> bool {
        self.byte_at(addr).is_some()
    }

    /// Human-readable memory map, one line per region, with gap rows.
    pub fn map(&self) -> String {
        use std::fmt::Write;

        let mut result = String::new();
        let mut prev_end = None;
        for region in &self.regions {
            if let Some(prev_end) = prev_end {
                let gap = region.addr - prev_end;
                if gap > 0 {
                    writeln!(
                        result,
                        "0x{:08x} - 0x{:08x} (0x{:04x}) gap",
                        prev_end, region.addr, gap
                    )
                    .unwrap();
                }
            }

            writeln!(
                result,
                "0x{:08x} - 0x{:08x} (0x{:04x}) {} {}",
                region.addr,
                region.end(),
                region.len(),
                region.protection,
                region.comment
            )
            .unwrap();
            prev_end = Some(region.end());
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::{Protection, SparseImage};

    fn two_region_image() -> SparseImage {
        let mut image = SparseImage::new();
        image.add_region(
            0x1000,
            Protection::READ_EXECUTE,
            vec![0xaa; 0x10],
            ".text".to_string(),
        );
        image.add_region(
            0x1020,
            Protection::READ_WRITE,
            vec![0xbb; 0x10],
            ".data".to_string(),
        );
        image
    }

    #[test]
    fn test_bounds() {
        let image = SparseImage::new();
        assert_eq!(image.min_address(), 0);
        assert_eq!(image.max_address(), 0);

        let image = two_region_image();
        assert_eq!(image.min_address(), 0x1000);
        assert_eq!(image.max_address(), 0x1030);
    }

    #[test]
    fn test_lookup() {
        let image = two_region_image();

        assert_eq!(image.byte_at(0xfff), None);
        assert_eq!(image.byte_at(0x1000), Some(0xaa));
        assert_eq!(image.byte_at(0x100f), Some(0xaa));
        // the gap between the regions
        assert_eq!(image.byte_at(0x1010), None);
        assert_eq!(image.byte_at(0x101f), None);
        assert_eq!(image.byte_at(0x1020), Some(0xbb));
        assert_eq!(image.byte_at(0x102f), Some(0xbb));
        assert_eq!(image.byte_at(0x1030), None);

        assert!(image.is_loaded(0x1005));
        assert!(!image.is_loaded(0x1015));
    }

    #[test]
    fn test_out_of_order_insert() {
        let mut image = SparseImage::new();
        image.add_region(0x2000, Protection::READ, vec![2; 4], String::new());
        image.add_region(0x1000, Protection::READ, vec![1; 4], String::new());

        let addrs = image.iter().map(|r| r.addr).collect::<Vec<_>>();
        assert_eq!(addrs, vec![0x1000, 0x2000]);
    }

    #[test]
    #[should_panic]
    fn test_overlap_panics() {
        let mut image = SparseImage::new();
        image.add_region(0x1000, Protection::READ, vec![0; 0x10], String::new());
        image.add_region(0x1008, Protection::READ, vec![0; 0x10], String::new());
    }

    #[test]
    fn test_protection_display() {
        assert_eq!(Protection::READ_EXECUTE.to_string(), "r-x");
        assert_eq!(Protection::READ_WRITE.to_string(), "rw-");
        assert_eq!(Protection::READ_WRITE_EXECUTE.to_string(), "rwx");
        assert_eq!(Protection::empty().to_string(), "---");
    }

    #[test]
    fn test_map() {
        let image = two_region_image();
        assert_eq!(
            image.map(),
            "0x00001000 - 0x00001010 (0x0010) r-x .text\n\
             0x00001010 - 0x00001020 (0x0010) gap\n\
             0x00001020 - 0x00001030 (0x0010) rw- .data\n"
        );
    }

    #[test]
    fn test_serde() {
        let image = two_region_image();

        let json = serde_json::to_string(&image).unwrap();
        let image2: SparseImage = serde_json::from_str(&json).unwrap();

        assert_eq!(image, image2);
    }
}
