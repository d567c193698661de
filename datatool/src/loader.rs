use anyhow::{bail, Context, Result};
use object::{Object, ObjectSegment, SegmentFlags};
use sparse_memory::{Protection, SparseImage};
use tracing::debug;

/// Maps the loadable segments of a parsed PE/ELF image into a `SparseImage`
/// at their virtual addresses. Anything between segments stays unmapped.
pub fn load_executable(file: &object::File) -> Result<SparseImage> {
    let mut res = SparseImage::new();

    for segment in file.segments() {
        let addr = segment.address();
        let mut data = segment.data().context("Reading segment data")?.to_vec();

        // the in-memory size wins over the file size: trailing file alignment
        // padding is cut off, .bss-style tails are zero-filled
        if data.len() as u64 > segment.size() {
            data.truncate(segment.size() as usize);
        }
        while (data.len() as u64) < segment.size() {
            data.push(0);
        }

        if data.is_empty() {
            continue;
        }

        let prot = segment_protection(segment.flags());
        let name = segment
            .name()
            .context("Reading segment name")?
            .unwrap_or_default()
            .to_string();

        debug!(
            "Mapping segment {:?} at {:#x} ({:#x} bytes, {})",
            name,
            addr,
            data.len(),
            prot
        );
        res.add_region(addr, prot, data, name);
    }

    if res.is_empty() {
        bail!("The executable has no loadable segments");
    }

    Ok(res)
}

fn segment_protection(flags: SegmentFlags) -> Protection {
    match flags {
        SegmentFlags::Elf { p_flags } => elf_protection(p_flags),
        SegmentFlags::Coff { characteristics } => coff_protection(characteristics),
        // MachO and friends are not part of the dataset; map them readable
        _ => Protection::READ,
    }
}

fn elf_protection(p_flags: u32) -> Protection {
    use object::elf::{PF_R, PF_W, PF_X};

    let mut prot = Protection::empty();
    if p_flags & PF_R != 0 {
        prot |= Protection::READ;
    }
    if p_flags & PF_W != 0 {
        prot |= Protection::WRITE;
    }
    if p_flags & PF_X != 0 {
        prot |= Protection::EXECUTE;
    }
    prot
}

fn coff_protection(characteristics: u32) -> Protection {
    use object::pe::{IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE};

    let mut prot = Protection::empty();
    if characteristics & IMAGE_SCN_MEM_READ != 0 {
        prot |= Protection::READ;
    }
    if characteristics & IMAGE_SCN_MEM_WRITE != 0 {
        prot |= Protection::WRITE;
    }
    if characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
        prot |= Protection::EXECUTE;
    }
    prot
}
