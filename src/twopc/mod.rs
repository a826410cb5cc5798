pub(crate) mod coordinator;
pub mod handler;
pub mod participant;
pub mod rpc;
pub mod runtime;
pub mod state;

pub use participant::Participant;
pub use rpc::{Method, TwoPcRequest, DEFAULT_SERVICE_NAME};
pub use runtime::TwoPcRuntime;
pub use state::Phase;
