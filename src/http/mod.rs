pub mod domain;
pub mod request;
pub mod response;

pub use domain::primary_domain;
pub use request::Request;
pub use response::{Response, ResponseType};
