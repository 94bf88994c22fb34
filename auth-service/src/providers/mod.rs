pub mod credentials;
pub mod email;
pub mod oauth;

use serde::Serialize;

pub use credentials::{CredentialsBackend, CredentialsProvider, InMemoryCredentialsBackend};
pub use email::{
    AuthVerificationToken, EmailProvider, InMemoryVerificationTokenStore,
    TracingVerificationSender, VerificationSender, VerificationTokenStore,
};
pub use oauth::{OAuthProvider, OAuthProviderConfig, OidcProfileMapper, ProfileMapper, StateSigner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Credentials,
    Oauth,
    Email,
}

/// Closed set of authentication providers. Each variant implements a fixed
/// interface; dispatch happens over the tag, not over injected functions.
pub enum Provider {
    Credentials(CredentialsProvider),
    OAuth(OAuthProvider),
    Email(EmailProvider),
}

impl Provider {
    pub fn id(&self) -> &str {
        match self {
            Provider::Credentials(provider) => provider.id(),
            Provider::OAuth(provider) => provider.id(),
            Provider::Email(provider) => provider.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Provider::Credentials(provider) => provider.name(),
            Provider::OAuth(provider) => provider.name(),
            Provider::Email(provider) => provider.name(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Credentials(_) => ProviderKind::Credentials,
            Provider::OAuth(_) => ProviderKind::Oauth,
            Provider::Email(_) => ProviderKind::Email,
        }
    }
}

/// What `GET /auth/providers` reports.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
}

/// Registration-ordered provider set keyed by id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Provider) -> anyhow::Result<()> {
        if self.get(provider.id()).is_some() {
            anyhow::bail!("provider '{}' is already registered", provider.id());
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|provider| provider.id() == id)
    }

    pub fn describe(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .iter()
            .map(|provider| ProviderDescriptor {
                id: provider.id().to_string(),
                name: provider.name().to_string(),
                kind: provider.kind(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
