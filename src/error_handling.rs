use axum::{http::StatusCode, response::IntoResponse, Json};
use color_eyre::Report;
use serde::Serialize;
use tracing::error;

use crate::responses::redirect_with_notice;

impl From<Report> for ApiError {
    fn from(value: Report) -> Self {
        ApiError::UnknownError(value)
    }
}

/// Everything that stops a request before its action finishes
///
/// Most of the failures a visitor can cause are not errors in the HTTP
/// sense: the guard chain answers them with a redirect and a flash notice
/// that is shown on the next page.
#[derive(Debug)]
pub(crate) enum ApiError {
    /// Short-circuit the request, send the visitor to `to`
    Redirect {
        /// Target location
        to: String,
        /// Flash notice for the next rendered page
        notice: Option<String>,
    },
    /// The session layer was not installed in front of the handler
    MissingSession,
    /// Anything we did not expect, answered with a 500
    UnknownError(Report),
}

impl ApiError {
    /// Redirect with a flash notice, the guard chain's way of saying no
    pub(crate) fn redirect(to: impl Into<String>, notice: impl Into<String>) -> Self {
        ApiError::Redirect {
            to: to.into(),
            notice: Some(notice.into()),
        }
    }

    /// Redirect keeping whatever notice is already pending
    pub(crate) fn redirect_silently(to: impl Into<String>) -> Self {
        ApiError::Redirect {
            to: to.into(),
            notice: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorReturn {
    reason: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, reason) = match self {
            ApiError::Redirect { to, notice } => return redirect_with_notice(&to, notice),
            ApiError::MissingSession => {
                error!("Session layer is missing in front of a handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Session is not available".to_owned(),
                )
            }
            ApiError::UnknownError(r) => {
                let error = format!("{r:?}");

                error!("Error: {error}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal Server Error: {error}"),
                )
                    .into_response();
            }
        };

        (status, Json(ErrorReturn { reason })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        http::{header::LOCATION, StatusCode},
        response::IntoResponse,
    };
    use color_eyre::eyre::eyre;

    use super::ApiError;
    use crate::responses::Flash;

    #[test]
    fn redirect_carries_location_and_notice() {
        let response = ApiError::redirect("/users/login", "Signups are not allowed").into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/users/login");
        assert_eq!(
            response.extensions().get::<Flash>().map(|f| f.0.as_str()),
            Some("Signups are not allowed")
        );
    }

    #[test]
    fn silent_redirect_has_no_flash() {
        let response = ApiError::redirect_silently("/users/new").into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(response.extensions().get::<Flash>().is_none());
    }

    #[test]
    fn unknown_errors_are_500() {
        let response = ApiError::from(eyre!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
