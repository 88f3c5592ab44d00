/// HTTP/JSON boundary built on axum
pub mod routes;
pub mod server;

pub use routes::ApiError;
pub use server::{router, serve};
