mod byte_map;
mod listing;

pub use byte_map::write_byte_map;
pub use listing::{IdaConfig, IdaListing};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sparse_memory::SparseImage;
use std::ffi::OsString;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The view of an analyzed binary that the byte-map exporter renders from.
///
/// `byte_at` returning `None` marks an address with no loaded data behind it
/// (a gap between segments, an out-of-range address).
pub trait AddressSpace {
    fn min_address(&self) -> u64;
    /// Exclusive upper bound.
    fn max_address(&self) -> u64;
    fn byte_at(&self, addr: u64) -> Option<u8>;
}

impl AddressSpace for SparseImage {
    fn min_address(&self) -> u64 {
        SparseImage::min_address(self)
    }

    fn max_address(&self) -> u64 {
        SparseImage::max_address(self)
    }

    fn byte_at(&self, addr: u64) -> Option<u8> {
        SparseImage::byte_at(self, addr)
    }
}

/// Produces the textual disassembly listing for a binary. The listing format
/// is whatever the backing tool emits.
#[async_trait]
pub trait ListingExporter {
    async fn export_listing(&self, binary: &Path) -> Result<String>;
}

/// `a/b.exe` + `.asm` -> `a/b.exe.asm` (unlike `Path::with_extension`, which
/// would replace `.exe`).
pub fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(ext);
    PathBuf::from(s)
}

async fn export_listing_file(
    exporter: &dyn ListingExporter,
    binary: &Path,
    asm_path: &Path,
) -> Result<()> {
    let listing = exporter
        .export_listing(binary)
        .await
        .context("Exporting listing")?;

    std::fs::write(asm_path, listing)
        .with_context(|| format!("Writing listing to {}", asm_path.display()))?;

    info!("Wrote {}", asm_path.display());
    Ok(())
}

/// Generates the dataset file pair for one binary: `<base>.asm` (when a
/// listing exporter is given) and `<base>.bytes`.
///
/// The listing export is best-effort: a failure is logged and leaves no
/// `.asm` file behind, and the byte map is still written. A byte-map failure
/// is an error.
pub async fn generate(
    listing: Option<&dyn ListingExporter>,
    image: &SparseImage,
    binary: &Path,
    output_base: &Path,
) -> Result<()> {
    if let Some(exporter) = listing {
        let asm_path = with_appended_extension(output_base, ".asm");
        if let Err(e) = export_listing_file(exporter, binary, &asm_path).await {
            warn!("Listing export failed, skipping {}: {:?}", asm_path.display(), e);
        }
    }

    let bytes_path = with_appended_extension(output_base, ".bytes");
    let file = std::fs::File::create(&bytes_path)
        .with_context(|| format!("Creating {}", bytes_path.display()))?;
    let mut file = BufWriter::new(file);

    write_byte_map(image, image.min_address(), image.max_address(), &mut file)
        .with_context(|| format!("Writing byte map to {}", bytes_path.display()))?;
    file.flush().context("Flushing byte map")?;

    info!("Wrote {}", bytes_path.display());

    Ok(())
}
