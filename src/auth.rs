use anyhow::{Result, bail};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Authenticator decides whether a username/password pair presented
/// during RFC 1929 sub-negotiation is accepted. Returning an error
/// rejects the credentials; the session answers with status 0xFF and
/// closes the connection.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str, peer: SocketAddr) -> Result<()>;
}

/// UserPass holds a single username/password pair as dictated
/// server-side
#[derive(Debug, Clone)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

#[async_trait]
impl Authenticator for UserPass {
    async fn authenticate(&self, username: &str, password: &str, _peer: SocketAddr) -> Result<()> {
        if username != self.username || password != self.password {
            bail!("invalid credentials");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn userpass_accepts_matching_credentials() {
        let auth = UserPass {
            username: "testuser".into(),
            password: "testpass".into(),
        };
        assert!(
            auth.authenticate("testuser", "testpass", peer())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn userpass_rejects_wrong_credentials() {
        let auth = UserPass {
            username: "testuser".into(),
            password: "testpass".into(),
        };
        assert!(
            auth.authenticate("wronguser", "wrongpass", peer())
                .await
                .is_err()
        );
        assert!(
            auth.authenticate("testuser", "wrongpass", peer())
                .await
                .is_err()
        );
        assert!(auth.authenticate("", "", peer()).await.is_err());
    }
}
