/// Separator between the owner and the URL inside a stored value.
pub const DELIMITER: char = '@';

/// A URL together with the user that shortened it.
///
/// This is the typed form of a stored value. The store, the flat file and
/// the `urls` table all keep the joined string produced by [`join`], so the
/// struct exists to validate and carry the pair across the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedUrl {
    pub owner: String,
    pub url: String,
}

impl OwnedUrl {
    /// Build the pair, or `None` when the joined form would not split back
    /// into the same owner and URL.
    pub fn new(owner: impl Into<String>, url: impl Into<String>) -> Option<Self> {
        let owner = owner.into();
        let url = url.into();
        if owner.contains(DELIMITER) || url.contains(DELIMITER) {
            return None;
        }
        Some(Self { owner, url })
    }

    /// Decode a stored value. Malformed values yield `None`.
    pub fn decode(stored: &str) -> Option<Self> {
        let (owner, url) = split(stored);
        if owner.is_empty() && url.is_empty() {
            return None;
        }
        Some(Self {
            owner: owner.to_owned(),
            url: url.to_owned(),
        })
    }

    pub fn encode(&self) -> String {
        join(&self.owner, &self.url)
    }
}

/// `owner@url`
pub fn join(owner: &str, url: &str) -> String {
    format!("{owner}{DELIMITER}{url}")
}

/// Split a stored value into `(owner, url)`.
///
/// The value must contain exactly one delimiter. Anything else, including a
/// URL that itself carries an `@`, decodes to `("", "")`.
pub fn split(stored: &str) -> (&str, &str) {
    let mut parts = stored.split(DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(url), None) => (owner, url),
        _ => ("", ""),
    }
}

/// True when `stored` was written by `owner`.
///
/// Matches on the `owner@` prefix, the same test the database applies when
/// it marks rows deleted.
pub fn is_owned_by(stored: &str, owner: &str) -> bool {
    stored
        .strip_prefix(owner)
        .is_some_and(|rest| rest.starts_with(DELIMITER))
}
