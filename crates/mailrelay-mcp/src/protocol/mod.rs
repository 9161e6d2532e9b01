//! Protocol layer: validation, version negotiation, method handlers and
//! the dispatcher.

pub mod dispatcher;
pub mod methods;
pub mod negotiation;
pub mod validator;

pub use dispatcher::{Dispatcher, Outcome};
pub use methods::{ErasedMethod, Method, MethodContext, MethodTable};
pub use negotiation::{negotiate_version, SUPPORTED_VERSIONS};
pub use validator::{check_protocol_version, validate_arguments, validate_message};
