pub mod auth;
pub mod sink;

pub use auth::{AuthClient, AuthError};
pub use sink::{CloudError, CloudSink, Collection, LoggingCloudSink};
