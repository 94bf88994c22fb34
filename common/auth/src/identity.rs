use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, AuthResult};

const ATTR_EMAIL: &str = "email";
const ATTR_NAME: &str = "name";
const ATTR_IMAGE: &str = "image";

/// Stable identity record produced by a provider on successful authorize or
/// register. Treated as immutable once handed to session construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> AuthResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AuthError::EmptyPrincipalId);
        }
        Ok(Self {
            id,
            email: None,
            name: None,
            image: None,
            roles: Vec::new(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|value| value == role)
    }

    /// Distill this user into the principal attached to a request. The
    /// profile fields fold into well-known attribute keys so the mapping is
    /// reversible via [`AuthPrincipal::into_user`].
    pub fn to_principal(&self) -> AuthPrincipal {
        let mut attributes = self.attributes.clone();
        if let Some(email) = &self.email {
            attributes.insert(ATTR_EMAIL.to_string(), Value::String(email.clone()));
        }
        if let Some(name) = &self.name {
            attributes.insert(ATTR_NAME.to_string(), Value::String(name.clone()));
        }
        if let Some(image) = &self.image {
            attributes.insert(ATTR_IMAGE.to_string(), Value::String(image.clone()));
        }
        AuthPrincipal {
            id: self.id.clone(),
            roles: self.roles.clone(),
            attributes,
        }
    }
}

/// The post-authentication identity attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPrincipal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl AuthPrincipal {
    pub fn new(id: impl Into<String>) -> AuthResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AuthError::EmptyPrincipalId);
        }
        Ok(Self {
            id,
            roles: Vec::new(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|value| value == role)
    }

    fn take_string_attribute(attributes: &mut BTreeMap<String, Value>, key: &str) -> Option<String> {
        match attributes.remove(key) {
            Some(Value::String(value)) => Some(value),
            Some(other) => {
                attributes.insert(key.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// Inverse of [`AuthUser::to_principal`].
    pub fn into_user(self) -> AuthUser {
        let mut attributes = self.attributes;
        let email = Self::take_string_attribute(&mut attributes, ATTR_EMAIL);
        let name = Self::take_string_attribute(&mut attributes, ATTR_NAME);
        let image = Self::take_string_attribute(&mut attributes, ATTR_IMAGE);
        AuthUser {
            id: self.id,
            email,
            name,
            image,
            roles: self.roles,
            attributes,
        }
    }
}

/// Raw untrusted sign-in input. Exists only for the duration of a sign-in or
/// register call; never stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthCredentials {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl AuthCredentials {
    /// The identifier a credentials backend should key its lookup on.
    pub fn identifier(&self) -> Option<&str> {
        self.email.as_deref().or(self.username.as_deref())
    }
}
