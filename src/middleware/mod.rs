pub mod main_middleware;
pub mod rate_limit;

pub use main_middleware::{auth, request_context, role_check, JWTAuthMiddleware};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
