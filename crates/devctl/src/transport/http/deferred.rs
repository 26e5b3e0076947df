//! HTTP binding of the dispatch request lifecycle.
//!
//! The accept path parks on a oneshot receiver while a worker owns the
//! `DeferredHttpRequest`. Completing the handle sends whatever response the
//! handler stored; a handle completed without one sends a 500. A handle dropped
//! without completion closes the oneshot, which the accept path answers with
//! the same 500.

use std::borrow::Cow;

use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;

use crate::dispatch::{CompletionError, ExtendError, ExtendRequest, ExtendedRequest};
use crate::error::ApiError;
use crate::request::DeviceRequest;

pub type Responder = oneshot::Sender<Response>;

/// A buffered request still tied to its connection task.
pub struct PendingRequest {
    request: DeviceRequest,
    responder: Responder,
}

impl PendingRequest {
    pub fn new(request: DeviceRequest, responder: Responder) -> Self {
        Self { request, responder }
    }
}

impl ExtendRequest for PendingRequest {
    type Extended = DeferredHttpRequest;

    fn begin_extension(self) -> Result<DeferredHttpRequest, ExtendError> {
        if self.responder.is_closed() {
            return Err(ExtendError::ClientGone);
        }
        Ok(DeferredHttpRequest {
            request: self.request,
            responder: self.responder,
            response: None,
        })
    }
}

/// A request owned by a dispatch worker.
pub struct DeferredHttpRequest {
    request: DeviceRequest,
    responder: Responder,
    response: Option<Response>,
}

impl DeferredHttpRequest {
    pub fn request(&self) -> &DeviceRequest {
        &self.request
    }

    /// Store the response to send on completion. A later call replaces it.
    pub fn respond(&mut self, response: Response) {
        self.response = Some(response);
    }
}

fn missing_response() -> Response {
    ApiError::internal("Request completed without a response").into_response()
}

impl ExtendedRequest for DeferredHttpRequest {
    fn label(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{} {}", self.request.method, self.request.path))
    }

    fn complete(self) -> Result<(), CompletionError> {
        let response = self.response.unwrap_or_else(missing_response);
        self.responder
            .send(response)
            .map_err(|_| CompletionError::ClientGone)
    }
}
