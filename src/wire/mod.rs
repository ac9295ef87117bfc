//! The wire protocol: encoding a [`Request`](crate::request::Request) onto a
//! connection (§4.4) and decoding a response head off one (§4.5).

pub mod decode;
pub mod encode;

pub use decode::{decode_response_head, ResponseHead, DEFAULT_MAX_HEADER_BYTES};
pub use encode::encode_request;
