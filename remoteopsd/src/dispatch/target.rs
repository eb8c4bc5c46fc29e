use std::fmt;

use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("account name must look like user@host: {0}")]
    AccountName(String),
    #[error("invalid server url: {0}")]
    ServerUrl(String),
}

/// A logged-in account on a server. Accounts are named `user@host[/path]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Account {
    name: String,
    user: String,
    server_url: Url,
}

/// Where an operation runs: an authenticated account or a bare server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Account(Account),
    Server(Url),
}

impl Account {
    /// Parses `user@host`, deriving `https://host` as the server url.
    pub fn parse(name: &str) -> Result<Self, TargetError> {
        Self::parse_with_server(name, None)
    }

    /// Parses an account name; an explicit `server_url` overrides the derived one.
    pub fn parse_with_server(name: &str, server_url: Option<&str>) -> Result<Self, TargetError> {
        let (user, host) = name
            .rsplit_once('@')
            .filter(|(user, host)| !user.is_empty() && !host.is_empty())
            .ok_or_else(|| TargetError::AccountName(name.to_string()))?;
        let server_url = match server_url {
            Some(url) => parse_server_url(url)?,
            None => parse_server_url(&format!("https://{host}"))?,
        };
        Ok(Self {
            name: name.to_string(),
            user: user.to_string(),
            server_url,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }
}

impl Target {
    pub fn server(url: &str) -> Result<Self, TargetError> {
        Ok(Target::Server(parse_server_url(url)?))
    }

    pub fn account(&self) -> Option<&Account> {
        match self {
            Target::Account(account) => Some(account),
            Target::Server(_) => None,
        }
    }

    pub fn server_url(&self) -> &Url {
        match self {
            Target::Account(account) => account.server_url(),
            Target::Server(url) => url,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Account(account) => write!(f, "{}", account.name),
            Target::Server(url) => write!(f, "{url}"),
        }
    }
}

fn parse_server_url(raw: &str) -> Result<Url, TargetError> {
    let url = Url::parse(raw).map_err(|_| TargetError::ServerUrl(raw.to_string()))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(TargetError::ServerUrl(raw.to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_account_name_into_user_and_server() {
        let account = Account::parse("alice@cloud.example.com/nextcloud").unwrap();
        assert_eq!(account.user(), "alice");
        assert_eq!(
            account.server_url().as_str(),
            "https://cloud.example.com/nextcloud"
        );
    }

    #[test]
    fn explicit_server_url_wins() {
        let account =
            Account::parse_with_server("bob@example.org", Some("http://127.0.0.1:8080")).unwrap();
        assert_eq!(account.server_url().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn user_names_may_contain_at_signs() {
        let account = Account::parse("bob@mail.org@cloud.example.com").unwrap();
        assert_eq!(account.user(), "bob@mail.org");
    }

    #[test]
    fn rejects_malformed_account_names() {
        assert!(Account::parse("nobody").is_err());
        assert!(Account::parse("@host").is_err());
        assert!(Account::parse("user@").is_err());
    }

    #[test]
    fn targets_compare_by_value() {
        let a = Target::Account(Account::parse("alice@cloud.example.com").unwrap());
        let b = Target::Account(Account::parse("alice@cloud.example.com").unwrap());
        let server = Target::server("https://cloud.example.com").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, server);
        assert!(Target::server("mailto:alice@example.com").is_err());
    }
}
