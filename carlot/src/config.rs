//! Connection settings, taken from flags with environment fallbacks

use std::{fmt, path::PathBuf};

use carlot_auth::{keycloak::KeycloakConfig, Password, Username};
use url::Url;

/// Where to log in, which API to call, and as whom
#[derive(Clone, clap::Args)]
pub struct Config {
    /// Base URL of the Keycloak server
    #[arg(long, env = "CARLOT_ISSUER_URL", default_value = "http://localhost:14082/")]
    pub issuer_url: Url,

    /// The Keycloak realm to log in to
    #[arg(long, env = "CARLOT_REALM", default_value = "springboot-test")]
    pub realm: String,

    /// The client this application is registered as in the realm
    #[arg(long, env = "CARLOT_CLIENT_ID", default_value = "react-app")]
    pub client_id: String,

    /// Base URL of the cars API
    #[arg(long, env = "CARLOT_API_URL", default_value = "http://localhost:1291")]
    pub api_url: Url,

    /// The user to log in as; asked for when missing
    #[arg(short, long, env = "CARLOT_USERNAME")]
    pub username: Option<String>,

    /// The user's password; asked for when missing
    #[arg(long, env = "CARLOT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// A file in which to keep the session between runs
    #[arg(short = 'f', long, env = "CARLOT_SESSION_FILE")]
    pub session_file: Option<PathBuf>,
}

impl Config {
    /// The identity provider settings
    pub fn keycloak(&self) -> KeycloakConfig {
        KeycloakConfig::new(
            self.issuer_url.clone(),
            self.realm.as_str(),
            self.client_id.as_str(),
        )
    }

    /// The configured username, if any
    pub fn username(&self) -> Option<Username> {
        self.username.clone().map(Username::from)
    }

    /// The configured password, if any
    pub fn password(&self) -> Option<Password> {
        self.password.clone().map(Password::from)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("issuer_url", &self.issuer_url.as_str())
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("api_url", &self.api_url.as_str())
            .field("username", &self.username)
            .field("password", &self.password().as_deref())
            .field("session_file", &self.session_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        config: Config,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "carlot",
            "--issuer-url",
            "https://sso.example.com/auth/",
            "--realm",
            "dealers",
            "--api-url",
            "https://cars.example.com",
            "-u",
            "alice",
        ])
        .unwrap();

        let keycloak = cli.config.keycloak();
        assert_eq!(
            keycloak.token_endpoint().as_str(),
            "https://sso.example.com/auth/realms/dealers/protocol/openid-connect/token"
        );
        assert_eq!(cli.config.api_url.host_str(), Some("cars.example.com"));
        assert_eq!(cli.config.username().as_deref().map(|u| u.as_str()), Some("alice"));
    }

    #[test]
    fn rejects_malformed_urls() {
        let result = Cli::try_parse_from(["carlot", "--api-url", "not a url"]);
        assert!(result.is_err());
    }

    #[test]
    fn debug_output_hides_password() {
        let cli = Cli::try_parse_from(["carlot", "--password", "hunter2"]).unwrap();
        let debug = format!("{:?}", cli.config);
        assert!(!debug.contains("hunter2"));
    }
}
