//! Resample worker process.
//!
//! Reads one request frame on stdin, writes one response frame on stdout.
//! Logs go to stderr. Spawned by `pagepipe_core::resample::ResampleWorker`.

use anyhow::{Context, Result};
use std::io::{self, BufReader, BufWriter};

fn main() -> Result<()> {
    pagepipe_core::init_logging();

    let stdin = BufReader::new(io::stdin().lock());
    let stdout = BufWriter::new(io::stdout().lock());
    pagepipe_core::resample::run_worker(stdin, stdout).context("resample worker failed")?;
    Ok(())
}
