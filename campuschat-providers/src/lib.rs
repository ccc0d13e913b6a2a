pub mod endpoints;
pub mod error;
pub mod multipart;
pub mod parse;
pub mod request;
pub mod runtime;
pub mod sse;

pub use error::TransportError;
pub use runtime::{ByteStream, HttpResponse, HttpRuntime};
pub use sse::StreamDecoder;
