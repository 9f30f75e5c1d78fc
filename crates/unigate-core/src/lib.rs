//! The request-dispatch and resilience engine: hot-swappable state,
//! the upstream HTTP client, the retry/translation dispatcher, and the
//! admission-control components (authenticator, rate limiter, validator,
//! metrics) the router wires into its middleware chain.

pub mod auth;
pub mod dispatch;
pub mod metrics;
pub mod ratelimit;
pub mod state;
pub mod upstream;
pub mod validate;

pub use auth::{AuthContext, Authenticator};
pub use dispatch::{ChatCall, ChatReply, Dispatcher};
pub use metrics::Metrics;
pub use ratelimit::{RateDecision, RateLimiter};
pub use state::{GatewayState, PoolRuntime};
pub use upstream::{UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse, WreqClient};
pub use validate::Validator;
