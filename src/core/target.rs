use crate::error::{Result, UpdaterError};
use url::{Host, Url};

pub const DEFAULT_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(user: U, password: P) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER, ANONYMOUS_PASSWORD)
    }
}

/// Where the distribution archive lives on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub host: String,
    pub port: u16,
    pub remote_directory: String,
    pub remote_file_name: String,
    pub credentials: Option<Credentials>,
}

impl TransferTarget {
    /// Builds a target from an `ftp://host[:port]/dir/` base URL.
    ///
    /// Explicit `credentials` win over a user embedded in the URL.
    pub fn from_url(
        base_url: &str,
        file_name: &str,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| UpdaterError::config_error(format!("invalid URL '{base_url}': {e}")))?;

        if url.scheme() != "ftp" {
            return Err(UpdaterError::config_error(format!(
                "unsupported URL scheme '{}' in '{base_url}', expected ftp",
                url.scheme()
            )));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(UpdaterError::config_error(format!(
                    "URL '{base_url}' has no host"
                )))
            }
        };

        if file_name.trim().is_empty() {
            return Err(UpdaterError::config_error("distribution file name is empty"));
        }

        let credentials = credentials.or_else(|| {
            (!url.username().is_empty())
                .then(|| Credentials::new(url.username(), url.password().unwrap_or_default()))
        });

        let remote_directory = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            remote_directory,
            remote_file_name: file_name.to_string(),
            credentials,
        })
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The user/password pair sent at login. Falls back to an anonymous
    /// login, and fills in the conventional anonymous password when empty.
    pub fn login(&self) -> Credentials {
        match &self.credentials {
            None => Credentials::anonymous(),
            Some(c) if c.user == ANONYMOUS_USER && (c.password.is_empty() || c.password == "-") => {
                Credentials::anonymous()
            }
            Some(c) => c.clone(),
        }
    }
}
