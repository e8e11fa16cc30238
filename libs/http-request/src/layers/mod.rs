//! Tower layers for the per-request stack
//!
//! - [`DefaultHeadersLayer`] - Adds `User-Agent` and `Accept-Encoding` unless the caller set them
//! - [`FollowPolicy`] - Redirect policy honoring the request's redirect options

mod default_headers;
mod redirect;

pub use default_headers::{
    ACCEPT_ENCODING_ADVANCED, ACCEPT_ENCODING_DEFAULT, DefaultHeadersLayer, DefaultHeadersService,
};
pub use redirect::FollowPolicy;
