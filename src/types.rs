//! Plain data exchanged with the host application

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Metadata of the publication a reader session is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub title: String,
    pub identifier: Option<String>,
    /// Declared languages, most significant first
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Publication {
    pub fn new(title: impl Into<String>, identifier: Option<&str>, languages: Vec<String>) -> Self {
        Self {
            title: title.into(),
            identifier: identifier.map(str::to_string),
            languages,
        }
    }

    /// Key content channels sign in with: `title:identifier`
    pub fn book_key(&self) -> String {
        format!("{}:{}", self.title, self.identifier.as_deref().unwrap_or(""))
    }

    /// First declared language up to any `|` qualifier, or `default`
    pub fn primary_language(&self, default: &str) -> String {
        let raw = self.languages.first().map(String::as_str).unwrap_or(default);
        raw.split('|').next().unwrap_or("").trim().to_string()
    }
}

/// Learning settings as reported by the script side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub learning_language: String,
    pub native_language: String,
    pub level: String,
    pub email: String,
}

impl Settings {
    /// Parse either the comma-packed form `l2,l1,level,email` or a JSON object
    pub fn parse(payload: &str) -> Result<Self> {
        let trimmed = payload.trim();
        if trimmed.starts_with('{') {
            return Ok(serde_json::from_str(trimmed)?);
        }

        let mut fields = trimmed.splitn(4, ',');
        let mut next = |name: &str| {
            fields
                .next()
                .map(str::to_string)
                .ok_or_else(|| BridgeError::MalformedMessage(format!("settings missing {}", name)))
        };
        Ok(Settings {
            learning_language: next("learning language")?,
            native_language: next("native language")?,
            level: next("level")?,
            email: next("email")?,
        })
    }
}
