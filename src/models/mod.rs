pub mod request;
pub mod transport;

pub use request::*;
pub use transport::*;
