pub mod dispatcher;
pub mod handler;
pub mod request;
pub mod validation;

pub use dispatcher::{DEFAULT_MAX_BODY_BYTES, Gateway};
pub use handler::{Endpoint, Handler, HandlerContext, HandlerError, HandlerRegistry};
pub use request::{BodyError, GatewayRequest, normalize_path};
pub use validation::{JsonObject, Validate, ValidationErrors};
