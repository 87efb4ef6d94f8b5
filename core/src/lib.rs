// llm-mux Core Library
//
// The request-routing and execution plane: model registry, credential
// manager, provider executors, dialect translation and OAuth orchestration.

pub mod auth;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod ir;
pub mod oauth;
pub mod registry;
pub mod translator;

pub use auth::{Auth, AuthManager, AuthStatus, AuthStore, Lease, LeaseOutcome};
pub use error::{Error, Result};
pub use executor::{EventStream, ExecutorSet, ProviderExecutor, RequestContext};
pub use gateway::Gateway;
pub use ir::{Request, Response, StreamEvent};
pub use oauth::OAuthService;
pub use registry::Registry;
pub use translator::Dialect;
