use http::Response;

use crate::descriptor::RequestDescriptor;
use crate::http_client::HttpClientError;

/// What to do with the outcome of a transmitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Hand the outcome to the caller unchanged.
    Success,
    /// First unauthorized response for this descriptor: refresh credentials and replay it.
    RetryableAuthFailure,
    /// Surface the error to the caller, no retry.
    Fatal,
}

/// Only the first unauthorized response of a descriptor is recoverable. Every other failure,
/// including a second unauthorized response after a replay, is fatal.
pub fn classify(
    outcome: &Result<Response<Vec<u8>>, HttpClientError>,
    descriptor: &RequestDescriptor,
) -> Classification {
    match outcome {
        Ok(_) => Classification::Success,
        Err(err) if err.is_unauthorized() && !descriptor.is_retried() => {
            Classification::RetryableAuthFailure
        }
        Err(_) => Classification::Fatal,
    }
}
