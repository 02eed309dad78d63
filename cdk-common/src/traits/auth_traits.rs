use async_trait::async_trait;

use crate::error::Error;
use crate::models::caller::Caller;

/// Resolves a bearer credential to a caller. Session issuance lives
/// elsewhere; this only answers "who is this and what may they do".
#[async_trait]
pub trait CallerAuthenticator: Send + Sync {
    async fn authenticate(&self, credential: Option<&str>) -> Result<Caller, Error>;
}
