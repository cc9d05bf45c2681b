//! CLI command implementations

pub mod accounts;
pub mod backup;
pub mod import;

use std::path::PathBuf;

use anyhow::Result;
use tally_core::TallyContext;

/// Data directory from `TALLY_DIR` or `~/.tally`
pub fn get_data_dir() -> PathBuf {
    tally_core::default_data_dir()
}

/// Open the store and build the service context
pub fn get_context() -> Result<TallyContext> {
    TallyContext::new(&get_data_dir())
}
