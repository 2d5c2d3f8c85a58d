use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token lifetime: 30 minutes from issue.
pub const TOKEN_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid username")]
    UnknownUser,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Missing username or password")]
    MissingCredentials,
}

/// Principal lookup capability, injected into the gateway so it stays
/// stateless and testable against a fake.
pub trait PrincipalLookup: Send + Sync {
    /// Stored bcrypt hash for a username, or None if unknown.
    fn find_principal(&self, username: &str) -> Option<String>;

    fn is_known(&self, username: &str) -> bool {
        self.find_principal(username).is_some()
    }
}

/// In-memory principal table seeded from configuration at startup.
/// Passwords are bcrypt-hashed on construction; plaintext is dropped.
pub struct StaticPrincipals {
    users: HashMap<String, String>,
}

impl StaticPrincipals {
    pub fn from_plaintext<'a, I>(pairs: I) -> Result<Self, bcrypt::BcryptError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut users = HashMap::new();
        for (username, password) in pairs {
            let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
            users.insert(username.to_string(), hashed);
        }
        Ok(Self { users })
    }
}

impl PrincipalLookup for StaticPrincipals {
    fn find_principal(&self, username: &str) -> Option<String> {
        self.users.get(username).cloned()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// The access gateway: authenticates login credentials, issues signed
/// bearer tokens and verifies them per request. Purely functional per
/// call; holds no session state.
pub struct Gateway<P: PrincipalLookup> {
    secret: String,
    principals: P,
}

impl<P: PrincipalLookup> Gateway<P> {
    pub fn new(secret: impl Into<String>, principals: P) -> Self {
        Self {
            secret: secret.into(),
            principals,
        }
    }

    /// Username/password login. On success returns a signed token valid
    /// for `TOKEN_TTL_SECS`. The username/password error distinction
    /// mirrors the service's documented behavior.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let hash = self
            .principals
            .find_principal(username)
            .ok_or(AuthError::UnknownUser)?;

        let ok = bcrypt::verify(password, &hash).map_err(|_| AuthError::InvalidPassword)?;
        if !ok {
            return Err(AuthError::InvalidPassword);
        }

        self.issue(username, unix_now())
    }

    /// Sign a token for `subject`, issued at `iat`.
    pub fn issue(&self, subject: &str, iat: u64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| AuthError::InvalidToken)
    }

    /// Authenticate a bearer token: signature, structure and expiry.
    /// Expiry is exact (zero leeway): a token dies at `iat + TTL`.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Claims, AuthError> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => return Err(AuthError::MissingToken),
        };

        // Tolerate an optional "Bearer " prefix; no scheme is enforced
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
    }

    /// Full gate: authenticate, then authorize the subject against the
    /// principal table. Returns the verified identity.
    pub fn authorize(&self, token: Option<&str>) -> Result<String, AuthError> {
        let claims = self.authenticate(token)?;
        if !self.principals.is_known(&claims.sub) {
            return Err(AuthError::Unauthorized);
        }
        Ok(claims.sub)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway<StaticPrincipals> {
        let principals =
            StaticPrincipals::from_plaintext([("user1", "password1"), ("user2", "password2")])
                .unwrap();
        Gateway::new("test_secret", principals)
    }

    #[test]
    fn login_issues_verifiable_token() {
        let gw = gateway();
        let token = gw.login("user1", "password1").unwrap();
        assert_eq!(gw.authorize(Some(&token)).unwrap(), "user1");
    }

    #[test]
    fn wrong_password_never_issues_a_token() {
        let gw = gateway();
        assert_eq!(
            gw.login("user1", "wrong").unwrap_err(),
            AuthError::InvalidPassword
        );
    }

    #[test]
    fn unknown_username_never_issues_a_token() {
        let gw = gateway();
        assert_eq!(
            gw.login("nobody", "password1").unwrap_err(),
            AuthError::UnknownUser
        );
    }

    #[test]
    fn empty_credentials_rejected() {
        let gw = gateway();
        assert_eq!(
            gw.login("", "password1").unwrap_err(),
            AuthError::MissingCredentials
        );
    }

    #[test]
    fn missing_token_rejected() {
        let gw = gateway();
        assert_eq!(gw.authenticate(None).unwrap_err(), AuthError::MissingToken);
        assert_eq!(
            gw.authenticate(Some("  ")).unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[test]
    fn garbage_token_rejected() {
        let gw = gateway();
        assert_eq!(
            gw.authenticate(Some("not.a.jwt")).unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[test]
    fn token_fresh_within_lifetime() {
        let gw = gateway();
        let token = gw.issue("user1", unix_now()).unwrap();
        assert!(gw.authenticate(Some(&token)).is_ok());
    }

    #[test]
    fn token_dead_at_expiry() {
        let gw = gateway();
        // Issued far enough back that iat + TTL is already past
        let iat = unix_now() - TOKEN_TTL_SECS - 5;
        let token = gw.issue("user1", iat).unwrap();
        assert_eq!(
            gw.authenticate(Some(&token)).unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[test]
    fn token_signed_with_other_secret_rejected() {
        let gw = gateway();
        let other = Gateway::new(
            "other_secret",
            StaticPrincipals::from_plaintext([("user1", "password1")]).unwrap(),
        );
        let token = other.issue("user1", unix_now()).unwrap();
        assert_eq!(
            gw.authenticate(Some(&token)).unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[test]
    fn valid_token_for_unknown_subject_is_forbidden() {
        let gw = gateway();
        // Signed with the right secret but the subject is not a principal
        let token = gw.issue("ghost", unix_now()).unwrap();
        assert_eq!(
            gw.authorize(Some(&token)).unwrap_err(),
            AuthError::Unauthorized
        );
    }

    #[test]
    fn bearer_prefix_is_tolerated() {
        let gw = gateway();
        let token = gw.issue("user2", unix_now()).unwrap();
        let prefixed = format!("Bearer {token}");
        assert_eq!(gw.authorize(Some(&prefixed)).unwrap(), "user2");
    }
}
