use crate::domain::entities::credential::TokenPair;
use crate::domain::errors::CredentialError;
use async_trait::async_trait;

/// Durable storage of the token pair for one external-account scope.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, scope: &str) -> Result<Option<TokenPair>, CredentialError>;

    async fn save(&self, scope: &str, tokens: &TokenPair) -> Result<(), CredentialError>;
}
