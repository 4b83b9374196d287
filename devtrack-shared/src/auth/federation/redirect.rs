/// Post-login redirect allow-list
///
/// A candidate target is allowed when its scheme, host, port and path all
/// equal those of some configured entry. Host comparison is case-insensitive
/// (the `url` crate lower-cases hosts of special schemes while parsing); the
/// path must match exactly. Query strings on the candidate are kept. Targets
/// carrying userinfo or a fragment are refused.

use url::Url;

/// Error type for allow-list checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedirectError {
    /// Target does not match any entry
    #[error("Redirect target is not allowed")]
    NotAllowed,

    /// No target given and no default configured
    #[error("No redirect targets are configured")]
    Empty,
}

/// Configured redirect destinations
#[derive(Debug, Clone, Default)]
pub struct RedirectAllowList {
    targets: Vec<Url>,
}

impl RedirectAllowList {
    /// Parses the configured targets, in priority order
    pub fn new<I, S>(targets: I) -> Result<Self, url::ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .map(|raw| Url::parse(raw.as_ref().trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { targets })
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[Url] {
        &self.targets
    }

    /// Whether a parsed URL matches an entry
    pub fn is_allowed(&self, candidate: &Url) -> bool {
        if !candidate.username().is_empty()
            || candidate.password().is_some()
            || candidate.fragment().is_some()
        {
            return false;
        }

        self.targets.iter().any(|allowed| {
            allowed.scheme() == candidate.scheme()
                && host_eq(allowed, candidate)
                && allowed.port_or_known_default() == candidate.port_or_known_default()
                && allowed.path() == candidate.path()
        })
    }

    /// Resolves the requested target
    ///
    /// `None` resolves to the first configured entry.
    pub fn validate(&self, requested: Option<&str>) -> Result<Url, RedirectError> {
        let Some(raw) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
            return self.targets.first().cloned().ok_or(RedirectError::Empty);
        };

        let candidate = Url::parse(raw).map_err(|_| RedirectError::NotAllowed)?;
        if self.is_allowed(&candidate) {
            Ok(candidate)
        } else {
            Err(RedirectError::NotAllowed)
        }
    }
}

fn host_eq(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        (None, None) => true,
        _ => false,
    }
}
