//! Shapes of what the handlers send back
//!
//! A handler either renders a [Page] or redirects. Notices for the next
//! page travel as a [Flash] response extension, the session layer moves
//! them into the session.

use axum::{
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;

/// A notice meant for the next rendered page
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Flash(pub(crate) String);

/// A rendered page: the page data next to the notice to display
#[derive(Debug, Serialize)]
pub(crate) struct Page<T> {
    /// Either the flash notice of the previous request or a notice set
    /// for this page only
    pub(crate) notice: Option<String>,
    #[serde(flatten)]
    pub(crate) data: T,
}

impl<T> Page<T> {
    pub(crate) fn new(notice: Option<String>, data: T) -> Self {
        Self { notice, data }
    }
}

impl<T: Serialize> IntoResponse for Page<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// A single failed validation, keyed by the form field
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending form field, `base` if it concerns the record
    pub field: &'static str,
    /// Human readable reason
    pub message: String,
}

impl FieldError {
    pub(crate) fn new(field: &'static str, message: impl ToString) -> Self {
        Self {
            field,
            message: message.to_string(),
        }
    }
}

/// 303 to `to`, optionally leaving a notice for the next page
pub(crate) fn redirect_with_notice(to: &str, notice: Option<String>) -> Response {
    let mut response = Redirect::to(to).into_response();
    if let Some(notice) = notice {
        response.extensions_mut().insert(Flash(notice));
    }
    response
}

/// Shorthand for the common case of redirecting with a notice
pub(crate) fn redirect(to: &str, notice: impl Into<String>) -> Response {
    redirect_with_notice(to, Some(notice.into()))
}
