use axum::Extension;

use crate::SharedState;

#[tracing::instrument(skip_all)]
pub(crate) async fn health_check(_: Extension<SharedState>) {}
