//! Request-body extraction with the service's error envelope.

use axum::extract::{FromRequest, Request};

use qazna_core::error::AppError;

/// JSON body extractor. Unknown fields, trailing data, and malformed
/// documents all surface as 400 with the uniform JSON error envelope
/// (axum's stock extractor answers 415/422 with a plain-text body).
pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    axum::Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Json(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}
