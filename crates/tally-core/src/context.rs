//! Evaluation contexts and private attribute redaction.
//!
//! A context is the subject a flag was evaluated for. Analytics payloads either
//! carry the whole context or only its key; when the whole context is sent,
//! attributes marked private are stripped first and their names reported so
//! the collector knows they existed.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attributes that live at the top level of a serialized context. Everything
/// else is nested under `custom`.
const BUILT_IN_ATTRIBUTES: &[&str] =
    &["secondary", "ip", "country", "email", "firstName", "lastName", "avatar", "name"];

/// Kind label the collector uses to tell anonymous contexts apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextKind {
    /// A regular, identified user.
    User,
    /// A user flagged as anonymous.
    AnonymousUser,
}

impl ContextKind {
    /// Returns the wire label for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::AnonymousUser => "anonymousUser",
        }
    }
}

/// Subject of a flag evaluation or tracking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    key: String,
    anonymous: bool,
    attributes: BTreeMap<String, Value>,
    private_attributes: BTreeSet<String>,
}

impl Context {
    /// Creates a context with only a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self::builder(key).build()
    }

    /// Starts building a context with the given key.
    pub fn builder(key: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            key: key.into(),
            anonymous: false,
            attributes: BTreeMap::new(),
            private_attributes: BTreeSet::new(),
        }
    }

    /// Returns the context key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns whether the context is anonymous.
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Returns the kind label for this context.
    pub fn kind(&self) -> ContextKind {
        if self.anonymous {
            ContextKind::AnonymousUser
        } else {
            ContextKind::User
        }
    }

    /// Looks up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Serializes the context with private attributes removed.
    ///
    /// An attribute is redacted when `all_private` is set, when its name is in
    /// `global_private`, or when the context itself marks it private. The key
    /// and the anonymous flag are never redacted. Redacted names are listed,
    /// sorted, under `privateAttrs`.
    pub fn redact(&self, all_private: bool, global_private: &HashSet<String>) -> Value {
        let mut out = Map::new();
        out.insert("key".to_string(), Value::String(self.key.clone()));
        if self.anonymous {
            out.insert("anonymous".to_string(), Value::Bool(true));
        }

        let mut custom = Map::new();
        let mut redacted = Vec::new();

        for (name, value) in &self.attributes {
            let private = all_private
                || global_private.contains(name)
                || self.private_attributes.contains(name);
            if private {
                redacted.push(Value::String(name.clone()));
                continue;
            }

            if BUILT_IN_ATTRIBUTES.contains(&name.as_str()) {
                out.insert(name.clone(), value.clone());
            } else {
                custom.insert(name.clone(), value.clone());
            }
        }

        if !custom.is_empty() {
            out.insert("custom".to_string(), Value::Object(custom));
        }
        if !redacted.is_empty() {
            out.insert("privateAttrs".to_string(), Value::Array(redacted));
        }

        Value::Object(out)
    }
}

/// Builder for [`Context`].
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    key: String,
    anonymous: bool,
    attributes: BTreeMap<String, Value>,
    private_attributes: BTreeSet<String>,
}

impl ContextBuilder {
    /// Marks the context anonymous.
    #[must_use]
    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    /// Sets the `name` attribute.
    #[must_use]
    pub fn name(self, name: impl Into<String>) -> Self {
        self.set("name", Value::String(name.into()))
    }

    /// Sets the `email` attribute.
    #[must_use]
    pub fn email(self, email: impl Into<String>) -> Self {
        self.set("email", Value::String(email.into()))
    }

    /// Sets an arbitrary attribute. The reserved names `key` and `anonymous`
    /// are ignored.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name != "key" && name != "anonymous" {
            self.attributes.insert(name, value.into());
        }
        self
    }

    /// Marks an attribute private for this context only.
    #[must_use]
    pub fn private(mut self, name: impl Into<String>) -> Self {
        self.private_attributes.insert(name.into());
        self
    }

    /// Finishes the context.
    pub fn build(self) -> Context {
        Context {
            key: self.key,
            anonymous: self.anonymous,
            attributes: self.attributes,
            private_attributes: self.private_attributes,
        }
    }
}
