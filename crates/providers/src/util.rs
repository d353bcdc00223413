use bp_domain::error::Error;

/// Map a reqwest error to the shared error type.
pub(crate) fn from_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::Upstream(err.to_string())
    }
}
