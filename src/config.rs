//! Environment, server table, and credential configuration.
//!
//! Credentials are an explicit value handed to [`crate::rest::RestClient`];
//! nothing here is process-global.

use std::fmt;

use secrecy::SecretString;

/// Trading environment the client talks to.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Environment {
    /// Unauthenticated sandbox.
    Sandbox,
    /// fxTrade Practice (demo accounts).
    #[default]
    Practice,
    /// fxTrade (live accounts).
    Trade,
}

/// Logical server groups exposed by each environment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Server {
    Account,
    Rates,
    StreamingRates,
    StreamingEvents,
    Labs,
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Account => "account",
            Self::Rates => "rates",
            Self::StreamingRates => "streaming_rates",
            Self::StreamingEvents => "streaming_events",
            Self::Labs => "labs",
        };
        f.write_str(name)
    }
}

impl Environment {
    /// Returns the base URL for `server`, or `None` when this environment
    /// does not host it (the sandbox has no labs server).
    ///
    /// Every URL ends with a trailing `/` so paths can be appended directly.
    pub fn server_url(self, server: Server) -> Option<&'static str> {
        match (self, server) {
            (Self::Sandbox, Server::Account | Server::Rates) => {
                Some("http://api-sandbox.oanda.com/v1/")
            }
            (Self::Sandbox, Server::StreamingRates | Server::StreamingEvents) => {
                Some("http://stream-sandbox.oanda.com/v1/")
            }
            (Self::Sandbox, Server::Labs) => None,
            (Self::Practice, Server::Account | Server::Rates) => {
                Some("https://api-fxpractice.oanda.com/v1/")
            }
            (Self::Practice, Server::StreamingRates | Server::StreamingEvents) => {
                Some("https://stream-fxpractice.oanda.com/v1/")
            }
            (Self::Practice, Server::Labs) => Some("https://api-fxpractice.oanda.com/labs/v1/"),
            (Self::Trade, Server::Account | Server::Rates) => {
                Some("https://api-fxtrade.oanda.com/v1/")
            }
            (Self::Trade, Server::StreamingRates | Server::StreamingEvents) => {
                Some("https://stream-fxtrade.oanda.com/v1/")
            }
            (Self::Trade, Server::Labs) => Some("https://api-fxtrade.oanda.com/labs/v1/"),
        }
    }

    /// Returns whether this environment hosts `server`.
    pub fn has_server(self, server: Server) -> bool {
        self.server_url(server).is_some()
    }
}

/// Resolved credentials for one environment.
///
/// `Debug` output never contains the access token.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub environment: Environment,
    /// Sent as a bearer token; `None` for the sandbox.
    pub access_token: Option<SecretString>,
    /// Account used by callers that do not name one explicitly.
    pub default_account_id: Option<u64>,
}

impl Credentials {
    /// Credentials for an authenticated environment.
    pub fn new(environment: Environment, access_token: SecretString) -> Self {
        Self {
            environment,
            access_token: Some(access_token),
            default_account_id: None,
        }
    }

    /// Credentials for the unauthenticated sandbox.
    pub fn sandbox() -> Self {
        Self {
            environment: Environment::Sandbox,
            access_token: None,
            default_account_id: None,
        }
    }

    /// Sets [`Credentials::default_account_id`].
    pub fn with_default_account(mut self, account_id: u64) -> Self {
        self.default_account_id = Some(account_id);
        self
    }

    /// Shorthand for [`Environment::server_url`] on the configured
    /// environment.
    pub fn server_url(&self, server: Server) -> Option<&'static str> {
        self.environment.server_url(server)
    }
}
