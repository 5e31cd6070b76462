//! Effective configuration.

use anyhow::Result;
use chronicle_core::config::Config;

use crate::output::{self, OutputFormat};

pub fn execute(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => output::print_item(config, format),
        _ => output::print_item(config, OutputFormat::Json),
    }
}
