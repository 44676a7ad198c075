//! JSON Wire Protocol plumbing shared by the on-device server and the
//! standalone coordinator.

pub mod capabilities;
pub mod error;
pub mod gesture;
pub mod http;
pub mod response;
pub mod router;
pub mod status;

pub use capabilities::Capabilities;
pub use error::{CommandError, CommandResult};
pub use response::Response;
pub use router::{CommandRouter, CommandState, Handler, RequestContext, Verb, handler};
pub use status::Status;
