use jsonwebtoken::Algorithm;

/// Runtime configuration shared by the JWT issuer and verifier.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Expected issuer claim (iss); unchecked when None.
    pub issuer: Option<String>,
    /// Expected audience claim (aud); unchecked when None.
    pub audience: Option<String>,
    /// Signature algorithms accepted during verification.
    pub algorithms: Vec<Algorithm>,
    /// Allowable clock skew in seconds when validating exp/nbf, applied in
    /// both directions.
    pub leeway_seconds: u32,
    /// Claims that must be present on every verified token.
    pub required_claims: Vec<String>,
}

impl JwtConfig {
    /// Construct config with sensible defaults (30 second leeway, HS256+RS256).
    pub fn new() -> Self {
        Self {
            issuer: None,
            audience: None,
            algorithms: vec![Algorithm::HS256, Algorithm::RS256],
            leeway_seconds: 30,
            required_claims: Vec::new(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn with_required_claim(mut self, claim: impl Into<String>) -> Self {
        self.required_claims.push(claim.into());
        self
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::new()
    }
}
