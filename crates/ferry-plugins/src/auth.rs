//! Handshake authentication.
//!
//! The dialing side ([`LaunchAuth`]) pushes a credential string on
//! [`AUTH_URI`] right after connecting and waits for the verdict on the same
//! route. The accepting side ([`VerifyAuth`]) reads exactly one message,
//! checks it with a caller-supplied verifier and answers with the outcome.
//! A rejected connection never becomes a session.

use async_trait::async_trait;
use ferry_types::Rerror;
use ferry_wire::{EarlyDispatch, Plugin, PostAcceptPlugin, PostDialPlugin, PreSession};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

/// Route the handshake messages travel on.
pub const AUTH_URI: &str = "/auth/verify";
pub const CODE_AUTH_FAIL: i32 = 403;
pub const TEXT_AUTH_FAIL: &str = "auth fail";
pub const DETAIL_AUTH_FAIL: &str = "auth fail detail";

/// The fixed rejection returned for any failed handshake.
pub fn auth_fail() -> Rerror {
    Rerror::new(CODE_AUTH_FAIL, TEXT_AUTH_FAIL, DETAIL_AUTH_FAIL)
}

type CredentialFn = Box<dyn Fn() -> String + Send + Sync>;
type VerifyFn = Box<dyn Fn(&str, &PreSession) -> Result<(), Rerror> + Send + Sync>;

/// Client side: sends a credential after dial.
pub struct LaunchAuth {
    credential: CredentialFn,
}

impl LaunchAuth {
    /// `credential` is invoked once per dial.
    pub fn new<F>(credential: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            credential: Box::new(credential),
        }
    }

    /// A fixed credential.
    pub fn with_credential(credential: impl Into<String>) -> Self {
        let credential = credential.into();
        Self::new(move || credential.clone())
    }

    pub fn credential(&self) -> String {
        (self.credential)()
    }
}

impl Plugin for LaunchAuth {
    fn name(&self) -> &str {
        "auth"
    }

    fn as_post_dial(&self) -> Option<&dyn PostDialPlugin> {
        Some(self)
    }
}

#[async_trait]
impl PostDialPlugin for LaunchAuth {
    async fn post_dial(&self, sess: &mut PreSession) -> Result<(), Rerror> {
        let credential = self.credential();
        sess.send(AUTH_URI, &credential, None).await?;
        let verdict = EarlyDispatch::new().route(AUTH_URI, |_: serde_json::Value| ());
        sess.receive(&verdict).await?;
        debug!(session = %sess.id(), "Authenticated");
        Ok(())
    }
}

/// Server side: checks the credential after accept.
pub struct VerifyAuth {
    verify: VerifyFn,
}

impl VerifyAuth {
    pub fn new<F>(verify: F) -> Self
    where
        F: Fn(&str, &PreSession) -> Result<(), Rerror> + Send + Sync + 'static,
    {
        Self {
            verify: Box::new(verify),
        }
    }

    pub fn verify(&self, credential: &str, sess: &PreSession) -> Result<(), Rerror> {
        (self.verify)(credential, sess)
    }
}

impl Plugin for VerifyAuth {
    fn name(&self) -> &str {
        "auth"
    }

    fn as_post_accept(&self) -> Option<&dyn PostAcceptPlugin> {
        Some(self)
    }
}

#[async_trait]
impl PostAcceptPlugin for VerifyAuth {
    async fn post_accept(&self, sess: &mut PreSession) -> Result<(), Rerror> {
        let dispatch = EarlyDispatch::new().route(AUTH_URI, |credential: String| credential);
        let outcome = match sess.receive(&dispatch).await {
            Ok(early) => self.verify(&early.body, sess),
            Err(e) => {
                debug!(session = %sess.id(), error = %e, "No usable credential");
                Err(auth_fail())
            }
        };
        match outcome {
            Ok(()) => sess.send(AUTH_URI, &(), None).await,
            Err(err) => {
                warn!(session = %sess.id(), remote = %sess.remote_addr(), "Authentication rejected");
                if let Err(e) = sess.send(AUTH_URI, &(), Some(err.clone())).await {
                    debug!(session = %sess.id(), error = %e, "Rejection not delivered");
                }
                Err(err)
            }
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sign(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    let expected = hmac_sign(secret, data);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// A matching launch/verify pair for a pre-shared secret.
///
/// The credential is `<nonce>:<hex HMAC-SHA256(secret, nonce)>` with a fresh
/// nonce per dial, so the secret itself never crosses the wire.
pub fn shared_secret(secret: impl Into<String>) -> (LaunchAuth, VerifyAuth) {
    let secret = secret.into();
    let signing = secret.clone();
    let launch = LaunchAuth::new(move || {
        let nonce = uuid::Uuid::new_v4().to_string();
        let signature = hmac_sign(&signing, nonce.as_bytes());
        format!("{nonce}:{signature}")
    });
    let verify = VerifyAuth::new(move |credential, _sess| {
        let (nonce, signature) = credential.split_once(':').ok_or_else(auth_fail)?;
        if nonce.is_empty() || !hmac_verify(&secret, nonce.as_bytes(), signature) {
            return Err(auth_fail());
        }
        Ok(())
    });
    (launch, verify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_wire::LengthPrefixed;
    use std::net::SocketAddr;

    fn pre_session() -> PreSession {
        let (a, _b) = tokio::io::duplex(64);
        let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        PreSession::new("test", false, addr, addr, Box::new(LengthPrefixed::new(Box::new(a))))
    }

    #[test]
    fn test_hmac_sign_verify() {
        let sig = hmac_sign("secret", b"nonce");
        assert!(hmac_verify("secret", b"nonce", &sig));
        assert!(!hmac_verify("other", b"nonce", &sig));
        assert!(!hmac_verify("secret", b"nonce2", &sig));
    }

    #[tokio::test]
    async fn test_shared_secret_pair_matches() {
        let sess = pre_session();
        let (launch, verify) = shared_secret("s3cret");
        let first = launch.credential();
        let second = launch.credential();
        assert_ne!(first, second);
        assert!(verify.verify(&first, &sess).is_ok());
        assert!(verify.verify(&second, &sess).is_ok());
    }

    #[tokio::test]
    async fn test_shared_secret_mismatch_is_auth_fail() {
        let sess = pre_session();
        let (launch, _) = shared_secret("alpha");
        let (_, verify) = shared_secret("beta");
        assert_eq!(verify.verify(&launch.credential(), &sess), Err(auth_fail()));
        assert_eq!(verify.verify("garbage", &sess), Err(auth_fail()));
        assert_eq!(verify.verify(":", &sess), Err(auth_fail()));
    }

    #[test]
    fn test_fixed_credential() {
        let launch = LaunchAuth::with_credential("client-auth-info-12345");
        assert_eq!(launch.credential(), "client-auth-info-12345");
        assert_eq!(launch.name(), "auth");
        assert!(launch.as_post_dial().is_some());
    }
}
