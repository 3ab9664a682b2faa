use std::env;

use super::error::{CouchDaoError, CouchResult};

const BASE_URL_ENV: &str = "COUCH_BASE_URL";
const DATABASE_ENV: &str = "COUCH_DB";
const DEFAULT_DATABASE: &str = "quiz_duel";

/// Runtime configuration describing how to connect to CouchDB.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server URL, e.g. `http://localhost:5984`.
    pub base_url: String,
    /// Database holding every document.
    pub database: String,
    /// Basic auth user.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Attempts for read-modify-write cycles on profile documents.
    pub max_update_attempts: u32,
}

impl CouchConfig {
    /// Construct a configuration from explicit base URL and database name.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            username: None,
            password: None,
            max_update_attempts: 5,
        }
    }

    /// Attach basic-auth credentials to the configuration.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Whether the environment asks for a CouchDB backend at all.
    pub fn is_configured() -> bool {
        env::var_os(BASE_URL_ENV).is_some_and(|value| !value.is_empty())
    }

    /// Build a configuration by reading the expected environment variables.
    ///
    /// `COUCH_DB` defaults to `quiz_duel` when unset.
    pub fn from_env() -> CouchResult<Self> {
        let base_url = env::var(BASE_URL_ENV)
            .map_err(|_| CouchDaoError::MissingEnvVar { var: BASE_URL_ENV })?;
        let database = env::var(DATABASE_ENV).unwrap_or_else(|_| DEFAULT_DATABASE.into());

        let mut config = Self::new(base_url, database);

        if let (Some(username), Some(password)) = (
            env::var("COUCH_USERNAME").ok(),
            env::var("COUCH_PASSWORD").ok(),
        ) {
            config = config.with_credentials(username, password);
        }

        Ok(config)
    }
}
