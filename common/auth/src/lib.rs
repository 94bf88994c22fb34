pub mod claims;
pub mod config;
pub mod error;
pub mod identity;
pub mod issuer;
pub mod jwks;
pub mod verifier;

pub use claims::JwtPayload;
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use identity::{AuthCredentials, AuthPrincipal, AuthUser};
pub use issuer::JwtIssuer;
pub use jwks::{JwksCache, JwksFetcher};
pub use verifier::{InMemoryKeyStore, JwtVerifier, JwtVerifierBuilder};
