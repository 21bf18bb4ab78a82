pub mod request_context;
pub mod security_headers;

pub use request_context::{REQUEST_ID_HEADER, make_request_span, request_id_middleware};
pub use security_headers::security_headers_middleware;
