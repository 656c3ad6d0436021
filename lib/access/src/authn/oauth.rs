//! HTTP client for the identity provider, built on `oauth2` and `reqwest`.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use openidconnect::IssuerUrl;
use openidconnect::core::CoreProviderMetadata;
use rootcause::prelude::Report;
use serde_json::Value;
use tracing::{debug, instrument};

use super::oidc::{IdentityProviderClient, OidcConfig};
use crate::error::ProviderError;

/// Resolved provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

/// Talks OAuth2 to the configured provider.
pub struct OAuthClient {
    client_id: ClientId,
    client_secret: ClientSecret,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    userinfo_url: String,
    scopes: Vec<String>,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Builds a client, discovering endpoints from the issuer when the
    /// configuration does not list them.
    #[instrument(skip_all, fields(issuer = config.issuer_url().unwrap_or_default()))]
    pub async fn from_config(config: &OidcConfig) -> Result<Self, Report<ProviderError>> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Discovery {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        let endpoints = match (config.auth_url(), config.token_url(), config.userinfo_url()) {
            (Some(auth_url), Some(token_url), Some(userinfo_url)) => ProviderEndpoints {
                auth_url: auth_url.to_string(),
                token_url: token_url.to_string(),
                userinfo_url: userinfo_url.to_string(),
            },
            (auth_url, token_url, userinfo_url) => {
                let discovered = discover(config, &http).await?;
                ProviderEndpoints {
                    auth_url: auth_url.map_or(discovered.auth_url, str::to_string),
                    token_url: token_url.map_or(discovered.token_url, str::to_string),
                    userinfo_url: userinfo_url.map_or(discovered.userinfo_url, str::to_string),
                }
            }
        };
        debug!(?endpoints, "identity provider endpoints resolved");

        let invalid = |field: &str, e: oauth2::url::ParseError| ProviderError::Discovery {
            reason: format!("invalid {field}: {e}"),
        };
        Ok(Self {
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            auth_url: AuthUrl::new(endpoints.auth_url).map_err(|e| invalid("auth_url", e))?,
            token_url: TokenUrl::new(endpoints.token_url).map_err(|e| invalid("token_url", e))?,
            redirect_url: RedirectUrl::new(config.redirect_uri().to_string())
                .map_err(|e| invalid("redirect_uri", e))?,
            userinfo_url: endpoints.userinfo_url,
            scopes: config.scopes().into_iter().map(str::to_string).collect(),
            http,
        })
    }
}

async fn discover(
    config: &OidcConfig,
    http: &reqwest::Client,
) -> Result<ProviderEndpoints, Report<ProviderError>> {
    let issuer = config.issuer_url().ok_or_else(|| ProviderError::Discovery {
        reason: "no issuer_url to discover endpoints from".to_string(),
    })?;
    let issuer_url = IssuerUrl::new(issuer.to_string()).map_err(|e| ProviderError::Discovery {
        reason: format!("invalid issuer URL: {e}"),
    })?;

    let metadata = CoreProviderMetadata::discover_async(issuer_url, http)
        .await
        .map_err(|e| ProviderError::Discovery {
            reason: format!("failed to discover provider: {e}"),
        })?;

    let token_url = metadata
        .token_endpoint()
        .ok_or_else(|| ProviderError::Discovery {
            reason: "provider metadata has no token endpoint".to_string(),
        })?;
    let userinfo_url = metadata
        .userinfo_endpoint()
        .ok_or_else(|| ProviderError::Discovery {
            reason: "provider metadata has no userinfo endpoint".to_string(),
        })?;

    Ok(ProviderEndpoints {
        auth_url: metadata.authorization_endpoint().url().to_string(),
        token_url: token_url.url().to_string(),
        userinfo_url: userinfo_url.url().to_string(),
    })
}

#[async_trait]
impl IdentityProviderClient for OAuthClient {
    fn authorization_url(&self, state: &str) -> String {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let state = state.to_string();
        let mut request = client.authorize_url(move || CsrfToken::new(state));
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, _) = request.url();
        url.to_string()
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<String, Report<ProviderError>> {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::TokenExchange {
                reason: e.to_string(),
            })?;
        Ok(response.access_token().secret().clone())
    }

    #[instrument(skip_all)]
    async fn fetch_user_info(&self, access_token: &str) -> Result<Value, Report<ProviderError>> {
        let user_info_error = |e: reqwest::Error| ProviderError::UserInfo {
            reason: e.to_string(),
        };
        let document = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(user_info_error)?
            .error_for_status()
            .map_err(user_info_error)?
            .json::<Value>()
            .await
            .map_err(user_info_error)?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OidcConfig {
        OidcConfig::builder("docshelf", "secret", "https://docs.example.org/auth/oidc/callback")
            .endpoints(
                "https://idp.example.org/authorize",
                "https://idp.example.org/token",
                "https://idp.example.org/userinfo",
            )
            .add_scope("groups")
            .build()
    }

    #[tokio::test]
    async fn explicit_endpoints_skip_discovery() {
        let client = OAuthClient::from_config(&config()).await.expect("client");
        assert_eq!(client.userinfo_url, "https://idp.example.org/userinfo");
    }

    #[tokio::test]
    async fn authorization_url_carries_state_and_scopes() {
        let client = OAuthClient::from_config(&config()).await.expect("client");
        let url = client.authorization_url("state-123");

        assert!(url.starts_with("https://idp.example.org/authorize?"));
        assert!(url.contains("state=state-123"));
        assert!(url.contains("client_id=docshelf"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid+email+profile+groups"));
    }
}
