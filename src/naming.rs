//! Identifier rules: kebab-case validation and target identifier derivation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SkyhookError;

/// What a declared name is used for; decides the target identifier style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Service,
    Function,
    Message,
    Type,
    Field,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Service,
        Role::Function,
        Role::Message,
        Role::Type,
        Role::Field,
    ];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Service => "service",
            Role::Function => "function",
            Role::Message => "message",
            Role::Type => "type",
            Role::Field => "field",
        };
        f.write_str(label)
    }
}

/// Reserved-word sets per role. The crate ships no keyword list of its own;
/// the code emitter supplies the words of its target language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierRules {
    reserved: BTreeMap<Role, BTreeSet<String>>,
}

impl IdentifierRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `words` to the reserved set of `role`.
    pub fn with_reserved<I, S>(mut self, role: Role, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved
            .entry(role)
            .or_default()
            .extend(words.into_iter().map(Into::into));
        self
    }

    /// Adds `words` to the reserved set of every role.
    pub fn with_reserved_everywhere<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        for role in Role::ALL {
            self = self.with_reserved(role, words.iter().cloned());
        }
        self
    }

    pub fn reserved(&self, role: Role) -> impl Iterator<Item = &str> {
        self.reserved
            .get(&role)
            .into_iter()
            .flat_map(|words| words.iter().map(String::as_str))
    }

    pub fn is_reserved(&self, role: Role, identifier: &str) -> bool {
        self.reserved
            .get(&role)
            .is_some_and(|words| words.contains(identifier))
    }

    /// Derives the target identifier for a kebab-case `name`.
    ///
    /// Callable and field roles join components with underscores, the type
    /// role concatenates capitalised components. A trailing `_` is appended
    /// until the result no longer collides with a reserved word.
    pub fn derive(&self, name: &str, role: Role) -> Result<String, SkyhookError> {
        check_kebab_case(name, role)?;
        let mut identifier = match role {
            Role::Type => to_pascal_case(name),
            Role::Service | Role::Function | Role::Message | Role::Field => to_snake_case(name),
        };
        while self.is_reserved(role, &identifier) {
            identifier.push('_');
        }
        Ok(identifier)
    }
}

/// Free-function form of [`IdentifierRules::derive`].
pub fn derive_identifier(
    name: &str,
    role: Role,
    rules: &IdentifierRules,
) -> Result<String, SkyhookError> {
    rules.derive(name, role)
}

/// Returns `true` for lowercase ASCII letters and digits separated by single dashes.
pub fn is_kebab_case(name: &str) -> bool {
    kebab_regex().is_match(name)
}

/// Fails with [`SkyhookError::Naming`] unless `name` is kebab-case.
pub fn check_kebab_case(name: &str, role: Role) -> Result<(), SkyhookError> {
    if is_kebab_case(name) {
        Ok(())
    } else {
        Err(SkyhookError::Naming(format!(
            "{role} name '{name}' must be lowercase letters and digits separated by single dashes"
        )))
    }
}

fn kebab_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid regex"))
}

fn to_snake_case(name: &str) -> String {
    name.split('-').collect::<Vec<_>>().join("_")
}

fn to_pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for component in name.split('-') {
        let mut chars = component.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    out
}
