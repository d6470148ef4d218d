//! 身份解析
//!
//! 目录不签发也不保存凭证，只校验外部已签发的 Token 并得到操作者与角色。

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rulebook_shared::config::AuthConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::models::{Actor, Role};

/// 凭证 -> 操作者
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Actor>;
}

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub username: Option<String>,
    /// maker / checker
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// HS256 JWT 身份解析
#[derive(Clone)]
pub struct JwtIdentityProvider {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIdentityProvider {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            issuer: config.jwt_issuer.clone(),
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        }
    }

    /// 签发 Token，供联调与测试使用
    pub fn issue_token(&self, actor: &Actor, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: actor.username.clone(),
            username: Some(actor.username.clone()),
            role: actor.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: self.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| CatalogError::Internal(format!("JWT 生成失败: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    CatalogError::Authorization("Token 已过期".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    CatalogError::Authorization("无效的 Token".to_string())
                }
                _ => CatalogError::Authorization(format!("Token 验证失败: {e}")),
            }
        })?;
        Ok(data.claims)
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(&self, credential: &str) -> Result<Actor> {
        let token = credential
            .strip_prefix("Bearer ")
            .unwrap_or(credential)
            .trim();
        let claims = self.verify(token)?;

        let role = Role::parse(&claims.role)
            .ok_or_else(|| CatalogError::Authorization(format!("未知角色: {}", claims.role)))?;
        let username = claims
            .username
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(claims.sub);
        Ok(Actor::new(username, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> JwtIdentityProvider {
        JwtIdentityProvider::new(&AuthConfig::default())
    }

    #[tokio::test]
    async fn test_issue_and_resolve() {
        let provider = provider();
        let token = provider
            .issue_token(&Actor::checker("bob"), Duration::minutes(5))
            .unwrap();

        let actor = provider.resolve(&format!("Bearer {token}")).await.unwrap();
        assert_eq!(actor, Actor::checker("bob"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_and_foreign_tokens() {
        let provider = provider();
        assert!(matches!(
            provider.resolve("invalid.token.here").await,
            Err(CatalogError::Authorization(_))
        ));

        let other = JwtIdentityProvider::new(&AuthConfig {
            jwt_secret: "another-secret".to_string(),
            jwt_issuer: "rulebook".to_string(),
        });
        let token = other
            .issue_token(&Actor::maker("alice"), Duration::minutes(5))
            .unwrap();
        assert!(provider.resolve(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_role_is_forbidden() {
        let provider = provider();
        let now = Utc::now();
        let claims = Claims {
            sub: "carol".to_string(),
            username: None,
            role: "admin".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
            iss: "rulebook".to_string(),
        };
        let token = encode(&Header::default(), &claims, &provider.encoding_key).unwrap();

        let err = provider.resolve(&token).await.unwrap_err();
        assert!(matches!(err, CatalogError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_mock_provider() {
        let mut mock = MockIdentityProvider::new();
        mock.expect_resolve()
            .returning(|_| Ok(Actor::maker("alice")));

        let actor = mock.resolve("anything").await.unwrap();
        assert_eq!(actor.role, Role::Maker);
    }
}
