use crate::export::AddressSpace;
use std::io::{self, Write};

/// Renders the `.bytes` hex dump of `[min_address, max_address)`.
///
/// Each row covers 16 addresses starting at a 16-aligned boundary: an
/// 8-hex-digit lowercase row address, then one ` xx` token per loaded byte
/// and ` ??` per unloaded address. The range is taken as given: a
/// non-aligned `min_address` starts mid-row without a row header, and a
/// final partial row gets no terminating newline. This matches the reference
/// dataset's `.bytes` files byte for byte.
pub fn write_byte_map(
    space: &dyn AddressSpace,
    min_address: u64,
    max_address: u64,
    sink: &mut impl Write,
) -> io::Result<()> {
    for addr in min_address..max_address {
        if addr % 0x10 == 0 {
            write!(sink, "{:08x}", addr)?;
        }
        match space.byte_at(addr) {
            Some(byte) => write!(sink, " {:02x}", byte)?,
            None => write!(sink, " ??")?,
        }
        if (addr + 1) % 0x10 == 0 {
            writeln!(sink)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    struct TestSpace {
        min: u64,
        max: u64,
        bytes: BTreeMap<u64, u8>,
    }

    impl TestSpace {
        /// Every address in range loaded, value = addr mod 256.
        fn filled(min: u64, max: u64) -> Self {
            TestSpace {
                min,
                max,
                bytes: (min..max).map(|a| (a, a as u8)).collect(),
            }
        }

        fn unload(mut self, addr: u64) -> Self {
            self.bytes.remove(&addr);
            self
        }
    }

    impl AddressSpace for TestSpace {
        fn min_address(&self) -> u64 {
            self.min
        }

        fn max_address(&self) -> u64 {
            self.max
        }

        fn byte_at(&self, addr: u64) -> Option<u8> {
            self.bytes.get(&addr).copied()
        }
    }

    fn render(space: &TestSpace) -> String {
        let mut out = Vec::new();
        write_byte_map(space, space.min_address(), space.max_address(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn empty_range() {
        assert_eq!(render(&TestSpace::filled(10, 10)), "");
    }

    #[test]
    fn exact_single_row() {
        assert_eq!(
            render(&TestSpace::filled(0x20, 0x30)),
            "00000020 20 21 22 23 24 25 26 27 28 29 2a 2b 2c 2d 2e 2f\n"
        );
    }

    #[test]
    fn unloaded_byte_renders_as_placeholder() {
        assert_eq!(
            render(&TestSpace::filled(0x20, 0x30).unload(0x21)),
            "00000020 20 ?? 22 23 24 25 26 27 28 29 2a 2b 2c 2d 2e 2f\n"
        );
    }

    #[test]
    fn placeholder_count_matches_unloaded_count() {
        let space = TestSpace::filled(0x100, 0x140)
            .unload(0x105)
            .unload(0x110)
            .unload(0x13f);
        assert_eq!(render(&space).matches("??").count(), 3);
    }

    #[test]
    fn row_structure() {
        // 4 full rows: one header and one newline each, 16 byte tokens per row
        let text = render(&TestSpace::filled(0x40, 0x80));
        assert_eq!(text.matches('\n').count(), 4);
        for (i, line) in text.lines().enumerate() {
            assert!(line.starts_with(&format!("{:08x}", 0x40 + 0x10 * i)));
            assert_eq!(line.len(), 8 + 16 * 3);
        }

        // partial last row: no trailing newline
        let text = render(&TestSpace::filled(0x40, 0x78));
        assert_eq!(text.matches('\n').count(), 3);
        assert!(!text.ends_with('\n'));
        assert_eq!(text.lines().last().unwrap().len(), 8 + 8 * 3);
    }

    #[test]
    fn non_aligned_lower_bound_starts_mid_row() {
        // no row header for the truncated first row
        assert_eq!(
            render(&TestSpace::filled(0x25, 0x30)),
            " 25 26 27 28 29 2a 2b 2c 2d 2e 2f\n"
        );
    }

    #[test]
    fn deterministic() {
        let space = TestSpace::filled(0x1000, 0x1100).unload(0x1042);
        assert_eq!(render(&space), render(&space));
    }

    #[test]
    fn wide_addresses_widen_past_eight_digits() {
        assert_eq!(
            render(&TestSpace::filled(0x1_0000_0000, 0x1_0000_0010)),
            "100000000 00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f\n"
        );
    }
}
