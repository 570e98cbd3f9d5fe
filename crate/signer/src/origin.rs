use tokensign_interfaces::{SignError, SignResult};
use url::Url;

/// The web origin a request comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebOrigin {
    origin: String,
    friendly: String,
}

impl WebOrigin {
    /// Accept secure origins only: `https`, local files, and `localhost`
    pub fn parse(origin: &str) -> SignResult<Self> {
        let url = Url::parse(origin)
            .map_err(|e| SignError::NotAllowed(format!("invalid origin {origin}: {e}")))?;
        let friendly = match (url.scheme(), url.host_str()) {
            ("file", _) => "localhost".to_owned(),
            ("https", Some(host)) | (_, Some(host @ "localhost")) => host.to_owned(),
            _ => {
                return Err(SignError::NotAllowed(format!(
                    "{origin} is not a secure origin"
                )));
            }
        };
        Ok(Self {
            origin: url.origin().ascii_serialization(),
            friendly,
        })
    }

    /// The origin as `scheme://host[:port]`
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.origin
    }

    /// The host, as shown to the user and bound into authentication tokens
    #[must_use]
    pub fn friendly(&self) -> &str {
        &self.friendly
    }
}
