//! Prints the CRD manifests for every resource the operator serves.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/hosts.yaml`

use anyhow::{Context, Result};
use crds::{Host, ResourceRegistry};

fn main() -> Result<()> {
    let registry = ResourceRegistry::new()
        .register::<Host>()
        .context("Failed to build resource registry")?;

    let yaml = registry
        .render_yaml()
        .context("Failed to render CRD manifests")?;
    print!("{yaml}");

    Ok(())
}
