//! Fully qualified service names

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Fully qualified service name: `namespace:name`
///
/// Unique per live service. The namespace and name parts are free-form
/// except that neither may be empty and neither may contain the `:`
/// separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FqName {
    namespace: String,
    name: String,
}

impl FqName {
    /// Create a fully qualified name from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, CoreError> {
        let namespace = namespace.into();
        let name = name.into();

        if namespace.is_empty() || name.is_empty() {
            return Err(CoreError::InvalidName(
                "namespace and name must be non-empty".to_string(),
            ));
        }
        if namespace.contains(':') || name.contains(':') {
            return Err(CoreError::InvalidName(format!(
                "name parts may not contain ':': {}:{}",
                namespace, name
            )));
        }

        Ok(Self { namespace, name })
    }

    /// Namespace part
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name part
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File stem form of the name part: lowercase, separator runs collapsed
    /// to a single underscore (`svc-a` becomes `svc_a`)
    pub fn snake_case(&self) -> String {
        case_fold(&self.name, '_')
    }

    /// Certificate common-name form of the name part: lowercase, separator
    /// runs collapsed to a single dot (`svc-a` becomes `svc.a`)
    pub fn dotted(&self) -> String {
        case_fold(&self.name, '.')
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl FromStr for FqName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, name)) => FqName::new(namespace, name),
            None => Err(CoreError::InvalidName(format!(
                "expected namespace:name, got {:?}",
                s
            ))),
        }
    }
}

/// Lowercase the input and collapse every run of non-alphanumeric
/// characters into a single separator.
fn case_fold(input: &str, separator: char) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push(separator);
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fq_name_display_round_trip() {
        let fq = FqName::new("mesh", "svc-a").unwrap();
        assert_eq!(fq.to_string(), "mesh:svc-a");

        let parsed: FqName = "mesh:svc-a".parse().unwrap();
        assert_eq!(parsed, fq);
    }

    #[test]
    fn test_fq_name_rejects_empty_parts() {
        assert!(FqName::new("", "svc").is_err());
        assert!(FqName::new("mesh", "").is_err());
        assert!("justaname".parse::<FqName>().is_err());
    }

    #[test]
    fn test_fq_name_rejects_separator_in_parts() {
        assert!(FqName::new("me:sh", "svc").is_err());
        assert!(FqName::new("mesh", "sv:c").is_err());
    }

    #[test]
    fn test_snake_case() {
        let fq = FqName::new("mesh", "svc-a").unwrap();
        assert_eq!(fq.snake_case(), "svc_a");

        let fq = FqName::new("mesh", "My Fancy  Service").unwrap();
        assert_eq!(fq.snake_case(), "my_fancy_service");
    }

    #[test]
    fn test_dotted() {
        let fq = FqName::new("mesh", "svc-a").unwrap();
        assert_eq!(fq.dotted(), "svc.a");

        let fq = FqName::new("mesh", "--edge--proxy--").unwrap();
        assert_eq!(fq.dotted(), "edge.proxy");
    }
}
