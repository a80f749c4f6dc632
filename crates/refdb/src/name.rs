use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::error::RefError;

/// A validated reference name.
///
/// Enforces the rules from `git-check-ref-format(1)`:
/// - No double dots `..`
/// - No ASCII control characters or space, `~`, `^`, `:`, `?`, `*`, `[`, `\`
/// - Cannot begin or end with `/`, or contain `//`
/// - No component may begin with `.` or end with `.lock`
/// - Cannot end with `.`
/// - Cannot contain `@{`
/// - Cannot be the single character `@`
/// - Must be valid UTF-8 (names are compared and stored as paths)
///
/// Top-level pseudo-refs such as `HEAD` or `MERGE_HEAD` are valid: no rule
/// requires a `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(BString);

/// Characters forbidden anywhere in a ref name.
const FORBIDDEN_CHARS: &[u8] = b" ~^:?*[\\";

impl RefName {
    /// Create and validate a ref name according to git-check-ref-format rules.
    pub fn new(name: impl Into<BString>) -> Result<Self, RefError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (for internal use with known-good names).
    pub(crate) fn new_unchecked(name: impl Into<BString>) -> Self {
        Self(name.into())
    }

    /// Is this under `refs/heads/`?
    pub fn is_branch(&self) -> bool {
        self.0.starts_with(b"refs/heads/")
    }

    /// Is this under `refs/tags/`?
    pub fn is_tag(&self) -> bool {
        self.0.starts_with(b"refs/tags/")
    }

    /// Get the raw bytes of this ref name.
    pub fn as_bstr(&self) -> &BStr {
        self.0.as_bstr()
    }

    /// Get as a string slice (validation guarantees UTF-8).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("<invalid-utf8>")
    }
}

impl AsRef<BStr> for RefName {
    fn as_ref(&self) -> &BStr {
        self.0.as_bstr()
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a ref name per git-check-ref-format rules.
fn validate_ref_name(name: &[u8]) -> Result<(), RefError> {
    let name_str = || String::from_utf8_lossy(name).into_owned();

    if name.is_empty() {
        return Err(RefError::InvalidName("ref name is empty".into()));
    }

    if std::str::from_utf8(name).is_err() {
        return Err(RefError::InvalidName(format!(
            "'{}': not valid UTF-8",
            name_str()
        )));
    }

    if name == b"@" {
        return Err(RefError::InvalidName("'@' is not a valid ref name".into()));
    }

    for (i, &b) in name.iter().enumerate() {
        if b < 0x20 || b == 0x7f {
            return Err(RefError::InvalidName(format!(
                "'{}': contains control character at position {}",
                name_str(),
                i
            )));
        }
        if FORBIDDEN_CHARS.contains(&b) {
            return Err(RefError::InvalidName(format!(
                "'{}': contains forbidden character '{}' at position {}",
                name_str(),
                b as char,
                i
            )));
        }
    }

    if name.starts_with(b"/") || name.ends_with(b"/") {
        return Err(RefError::InvalidName(format!(
            "'{}': begins or ends with '/'",
            name_str()
        )));
    }

    if name.ends_with(b".") {
        return Err(RefError::InvalidName(format!(
            "'{}': ends with '.'",
            name_str()
        )));
    }

    if name.find(b"..").is_some() {
        return Err(RefError::InvalidName(format!(
            "'{}': contains '..'",
            name_str()
        )));
    }

    if name.find(b"//").is_some() {
        return Err(RefError::InvalidName(format!(
            "'{}': contains '//'",
            name_str()
        )));
    }

    if name.find(b"@{").is_some() {
        return Err(RefError::InvalidName(format!(
            "'{}': contains '@{{'",
            name_str()
        )));
    }

    for component in name.split_str(b"/") {
        if component.starts_with(b".") {
            return Err(RefError::InvalidName(format!(
                "'{}': component starts with '.'",
                name_str()
            )));
        }
        if component.ends_with(b".lock") {
            return Err(RefError::InvalidName(format!(
                "'{}': component ends with '.lock'",
                name_str()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ref_names() {
        assert!(RefName::new("refs/heads/main").is_ok());
        assert!(RefName::new("refs/tags/v1.0").is_ok());
        assert!(RefName::new("refs/remotes/origin/main").is_ok());
        assert!(RefName::new("HEAD").is_ok());
        assert!(RefName::new("MERGE_HEAD").is_ok());
        assert!(RefName::new("refs/heads/feature/sub-branch").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(RefName::new("").is_err());
        assert!(RefName::new("@").is_err());
        assert!(RefName::new("refs/heads/main..branch").is_err());
        assert!(RefName::new(b"refs/heads/\x01bad".to_vec()).is_err());
        assert!(RefName::new("refs/heads/bad name").is_err());
        assert!(RefName::new("refs/heads/bad~name").is_err());
        assert!(RefName::new("refs/heads/bad^name").is_err());
        assert!(RefName::new("refs/heads/bad:name").is_err());
        assert!(RefName::new("refs/heads/bad?name").is_err());
        assert!(RefName::new("refs/heads/bad*name").is_err());
        assert!(RefName::new("refs/heads/bad[name").is_err());
        assert!(RefName::new("refs/heads/bad\\name").is_err());
    }

    #[test]
    fn invalid_structure() {
        assert!(RefName::new("/refs/heads/main").is_err());
        assert!(RefName::new("refs/heads/main/").is_err());
        assert!(RefName::new("refs//heads/main").is_err());
        assert!(RefName::new("refs/heads/main.").is_err());
        assert!(RefName::new("refs/heads/main.lock").is_err());
        assert!(RefName::new("refs/heads/bad.lock/sub").is_err());
        assert!(RefName::new("refs/heads/.hidden").is_err());
        assert!(RefName::new(".refs/heads/main").is_err());
        assert!(RefName::new("refs/heads/main@{0}").is_err());
    }

    #[test]
    fn display() {
        let r = RefName::new("refs/heads/main").unwrap();
        assert_eq!(r.to_string(), "refs/heads/main");
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = RefName::new("refs/heads/a-b").unwrap();
        let b = RefName::new("refs/heads/a/c").unwrap();
        let c = RefName::new("refs/heads/a0").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn classification() {
        assert!(RefName::new("refs/heads/main").unwrap().is_branch());
        assert!(!RefName::new("refs/heads/main").unwrap().is_tag());
        assert!(RefName::new("refs/tags/v1.0").unwrap().is_tag());
    }
}
