#![allow(unreachable_pub)]

mod error;
mod request;
mod response;
mod route;

pub use error::ErrorKind;
pub use request::{MULTIPART_BOUNDARY, PayloadType, Request};
pub use response::Response;
pub use route::Route;

/// The drest `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
