//! Tracing registration

use color_eyre::Report;
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

/// Default filter if `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info,pfoertner=debug,tower_http=debug,sqlx=warn";

/// Sets all tracing subscribers up
///
/// Registers span traces for error reports, the env filter (falling back
/// to [DEFAULT_FILTER]) and hierarchical pretty printing.
pub fn setup() -> Result<(), Report> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    Registry::default()
        .with(filter)
        .with(
            HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(true),
        )
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(())
}
