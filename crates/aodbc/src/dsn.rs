//! ODBC connection strings.
//!
//! A connection string is a `;`-separated list of `key=value` attributes.
//! Keys are matched case-insensitively; values may be wrapped in braces to
//! carry `;` or `=` (`PWD={a;b}`).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Parsed ODBC connection string.
///
/// Attribute order is preserved so the rendered string matches what the
/// caller wrote, with extra attributes appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    attrs: Vec<(String, String)>,
}

impl ConnectionString {
    /// Parse `dsn`.
    ///
    /// A string without any `=` is taken as a bare data source name and
    /// stored as `DSN=<value>`.
    pub fn parse(dsn: &str) -> Result<Self> {
        let trimmed = dsn.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        if !trimmed.contains('=') {
            return Ok(Self {
                attrs: vec![("DSN".to_string(), trimmed.to_string())],
            });
        }

        let mut attrs = Vec::new();
        let mut rest = trimmed;
        loop {
            rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
            if rest.is_empty() {
                break;
            }
            let Some(eq) = rest.find('=') else {
                return Err(Error::value(format!(
                    "malformed connection string attribute: {rest:?}"
                )));
            };
            let key = rest[..eq].trim();
            if key.is_empty() {
                return Err(Error::value("connection string attribute without a key"));
            }
            rest = &rest[eq + 1..];

            let value;
            if let Some(braced) = rest.strip_prefix('{') {
                let close = braced.find('}').ok_or_else(|| {
                    Error::value(format!("unterminated brace in value of {key:?}"))
                })?;
                value = braced[..close].to_string();
                rest = braced[close + 1..].trim_start();
                rest = rest.strip_prefix(';').unwrap_or(rest);
            } else {
                let end = rest.find(';').unwrap_or(rest.len());
                value = rest[..end].trim().to_string();
                rest = rest.get(end + 1..).unwrap_or("");
            }
            attrs.push((key.to_string(), value));
        }
        Ok(Self { attrs })
    }

    /// Parse `dsn` and append `extra` attributes, overriding duplicates.
    pub fn with_extra(dsn: &str, extra: &BTreeMap<String, String>) -> Result<Self> {
        let mut conn_str = Self::parse(dsn)?;
        for (key, value) in extra {
            conn_str.set(key, value);
        }
        Ok(conn_str)
    }

    /// Value of `key`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, replacing an existing attribute of the same name.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(slot) = self
            .attrs
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            slot.1 = value.to_string();
        } else {
            self.attrs.push((key.to_string(), value.to_string()));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.attrs {
            if value.contains([';', '{', '}']) || value.starts_with(' ') {
                write!(f, "{key}={{{value}}};")?;
            } else {
                write!(f, "{key}={value};")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let cs = ConnectionString::parse("Driver=SQLite3;Database=/tmp/a.db").unwrap();
        assert_eq!(cs.get("driver"), Some("SQLite3"));
        assert_eq!(cs.get("DATABASE"), Some("/tmp/a.db"));
        assert_eq!(cs.get("uid"), None);
    }

    #[test]
    fn test_parse_bare_dsn() {
        let cs = ConnectionString::parse("prod").unwrap();
        assert_eq!(cs.get("DSN"), Some("prod"));
    }

    #[test]
    fn test_parse_braced_value() {
        let cs = ConnectionString::parse("UID=sa;PWD={p;w=d};Server=db").unwrap();
        assert_eq!(cs.get("pwd"), Some("p;w=d"));
        assert_eq!(cs.get("server"), Some("db"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConnectionString::parse("a=1;junk").unwrap_err().is_value());
        assert!(ConnectionString::parse("=1").unwrap_err().is_value());
        assert!(ConnectionString::parse("PWD={open").unwrap_err().is_value());
    }

    #[test]
    fn test_parse_empty_and_trailing() {
        assert!(ConnectionString::parse("  ").unwrap().is_empty());
        let cs = ConnectionString::parse("A=1;;").unwrap();
        assert_eq!(cs.iter().count(), 1);
    }

    #[test]
    fn test_with_extra_overrides() {
        let mut extra = BTreeMap::new();
        extra.insert("uid".to_string(), "bob".to_string());
        extra.insert("Port".to_string(), "5000".to_string());

        let cs = ConnectionString::with_extra("UID=alice;Server=db", &extra).unwrap();
        assert_eq!(cs.get("UID"), Some("bob"));
        assert_eq!(cs.to_string(), "UID=bob;Server=db;Port=5000;");
    }

    #[test]
    fn test_display_braces_special_values() {
        let mut cs = ConnectionString::default();
        cs.set("PWD", "a;b");
        assert_eq!(cs.to_string(), "PWD={a;b};");
    }
}
