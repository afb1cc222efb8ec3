//! Where the OpenID provider sends the visitor back to

use std::collections::HashMap;

use axum::{extract::Query, response::Response, Extension};
use tracing::{debug, info, instrument, warn};

use crate::{
    error_handling::ApiError,
    openid::{return_to, same_identifier},
    responses::{redirect, redirect_with_notice},
    session::Session,
    SharedState,
};

/// Checks the provider's answer and continues the pending verification
///
/// The answer has to vouch for the identifier the verification was started
/// with. On success the verified URL waits in the session until the success
/// target (usually `update_openid`) saves it.
#[instrument(skip_all)]
pub(crate) async fn complete(
    Extension(app): Extension<SharedState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let Some(pending) = session.update(|state| state.pending_openid.take()).await else {
        debug!("No verification pending");
        return Ok(redirect(
            &app.config.app.discussions_path,
            "OpenID verification failed!",
        ));
    };

    let claimed_id = &pending.provider.claimed_id;
    let verified = app
        .openid
        .complete(&pending.provider, &return_to(&app.config.app.base_url)?, &params)
        .await?;

    match verified {
        Some(openid_url) if same_identifier(&openid_url, claimed_id) => {
            info!(%openid_url, "OpenID URL verified by provider");
            let openid_url = claimed_id.to_string();
            session
                .update(|state| state.authenticated_openid_url = Some(openid_url))
                .await;
            Ok(redirect_with_notice(&pending.success, None))
        }
        Some(openid_url) => {
            warn!(%openid_url, %claimed_id, "Provider vouched for another identifier");
            Ok(redirect(&pending.fail, "OpenID verification failed!"))
        }
        None => {
            debug!(%claimed_id, "Provider did not confirm");
            Ok(redirect(&pending.fail, "OpenID verification failed!"))
        }
    }
}
