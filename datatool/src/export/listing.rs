use crate::export::ListingExporter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Deserialize, Clone)]
pub struct IdaConfig {
    ida_path: String,
    show_output: bool,
}

/// Batch-mode script handed to IDA via `-S`. Waits for the auto analysis,
/// then dumps an assembler listing of the analyzed address range next to the
/// database and exits.
static LISTING_SCRIPT: &str = r#"
#include <idc.idc>

static main()
{
  msg("Waiting for the end of the auto analysis...\n");
  auto_wait();

  msg("\n\n------ Generating the listing file... --------\n");
  auto file = get_idb_path()[0:-4] + ".lst";

  auto fhandle = fopen(file, "w");
  gen_file(OFILE_LST, fhandle, get_inf_attr(INF_MIN_EA), get_inf_attr(INF_MAX_EA), 0);
  msg("All done, exiting...\n");
  qexit(0); // exit to OS, error code 0 - success
}
"#;

static LST_LINE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+:[0-9A-F]+").unwrap());

/// Produces listings by running IDA in non-interactive mode.
pub struct IdaListing {
    config: IdaConfig,
}

impl IdaListing {
    pub fn new(config: IdaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ListingExporter for IdaListing {
    async fn export_listing(&self, binary: &Path) -> Result<String> {
        run_ida_listing(&self.config, binary).await
    }
}

async fn run_ida_listing(config: &IdaConfig, binary: &Path) -> Result<String> {
    debug!("Running IDA on {}", binary.display());

    let temp_dir = tempfile::tempdir().context("Failed to create temporary directory")?;

    let sample_path = temp_dir.path().join("sample.bin");
    let script_path = temp_dir.path().join("listing.idc");

    std::fs::copy(binary, &sample_path)
        .context("Failed to copy the binary into the temporary directory")?;
    std::fs::write(&script_path, LISTING_SCRIPT).context("Failed to write IDA script")?;

    let mut command = Command::new(&config.ida_path);

    command
        .arg("-A")
        .arg(format!("-S{}", script_path.to_string_lossy()))
        .arg(&sample_path);

    if !config.show_output {
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());
    }

    let exit_status = command
        .spawn()
        .context("Failed to spawn IDA")?
        .wait()
        .await
        .context("Failed to wait for IDA")?;

    if !exit_status.success() {
        anyhow::bail!(
            "IDA exited with non-successful exit code: {:?}",
            exit_status.code()
        );
    }

    // get_idb_path()[0:-4] + ".lst" with a "sample.bin.idb" database
    let lst_path = temp_dir.path().join("sample.bin.lst");
    let lst = std::fs::read_to_string(&lst_path).context("Failed to read the IDA listing")?;

    if !LST_LINE_REGEX.is_match(&lst) {
        warn!(
            "Listing for {} contains no address lines, the analysis likely failed",
            binary.display()
        );
    }

    Ok(lst)
}
