pub mod credentials;
pub mod http;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::credentials::{CredentialStore, StoreError};
use crate::auth::http::{ApiClient, HttpError, HttpRequest, HttpTransport};
use crate::models::driver::Driver;

pub const SESSION_TOKEN_KEY: &str = "sessionToken";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unexpected auth response: {0}")]
    InvalidResponse(String),

    #[error("no valid session and no login credentials configured")]
    MissingCredentials,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "sessionToken")]
    session_token: String,
    driver: Driver,
}

#[derive(Deserialize)]
struct SessionResponse {
    user: Driver,
}

/// Driver login state backed by the platform API and a credential store.
pub struct AuthSession {
    api: ApiClient,
    credentials: Arc<dyn CredentialStore>,
}

impl AuthSession {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            api: ApiClient::new(transport, credentials.clone()),
            credentials,
        }
    }

    pub async fn token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.credentials.get(SESSION_TOKEN_KEY).await?)
    }

    pub async fn login(&self, phone: &str, password: &str) -> Result<Driver, AuthError> {
        let body = self
            .api
            .request(HttpRequest::post_form(
                "/auth/driver/login",
                [("driver_phone", phone), ("password", password)],
            ))
            .await?;

        let response: LoginResponse = serde_json::from_value(body)
            .map_err(|err| AuthError::InvalidResponse(err.to_string()))?;

        self.credentials
            .set(SESSION_TOKEN_KEY, &response.session_token)
            .await?;

        info!(driver_id = response.driver.driver_id, "driver logged in");
        Ok(response.driver)
    }

    /// `Ok(None)` when the server does not recognise the session.
    pub async fn check_session(&self) -> Result<Option<Driver>, AuthError> {
        let body = match self.api.request(HttpRequest::get("/auth/driver")).await {
            Ok(body) => body,
            Err(HttpError::Status { status, message }) => {
                warn!(status, message = %message, "session check rejected");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(session_driver(body))
    }

    /// Resumes a stored session, clearing the token if it is no longer valid.
    pub async fn restore(&self) -> Result<Option<Driver>, AuthError> {
        if self.token().await?.is_none() {
            return Ok(None);
        }

        match self.check_session().await? {
            Some(driver) => {
                info!(driver_id = driver.driver_id, "session restored");
                Ok(Some(driver))
            }
            None => {
                self.logout().await?;
                Ok(None)
            }
        }
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.credentials.remove(SESSION_TOKEN_KEY).await?;
        info!("session cleared");
        Ok(())
    }
}

fn session_driver(body: Value) -> Option<Driver> {
    serde_json::from_value::<SessionResponse>(body)
        .ok()
        .map(|response| response.user)
        .filter(|driver| driver.driver_id != 0)
}
