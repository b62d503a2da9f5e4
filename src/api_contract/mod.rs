pub mod envelope;
pub mod error_codes;

pub use envelope::GatewayResponse;
pub use error_codes::{ErrorClass, ErrorCode};
