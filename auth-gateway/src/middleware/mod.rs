pub mod auth;
pub mod authorize;
pub mod chain;
pub mod csrf;
pub mod request;

pub use auth::{auth_middleware, AllowAnonymous, AuthContext, AuthUser};
pub use authorize::{authorize_middleware, AccessRequirement};
pub use chain::{
    AuthStrategy, Authenticated, AuthenticationChain, BasicStrategy, BearerStrategy,
    CookieStrategy, StrategyOutcome,
};
pub use csrf::{new_csrf_token, CsrfGuard};
pub use request::{authorization_credentials, RequestMeta};
