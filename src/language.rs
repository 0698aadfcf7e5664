//! Supported languages and their remote execution bindings.
//!
//! The set of languages is closed: anything that does not parse into a
//! [`Language`] is unsupported, and [`Language::binding`] is an exhaustive
//! match so adding a variant forces a decision about how it runs.

use std::fmt;

/// A user-facing language the runner knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Runs in-process in the embedded JavaScript sandbox.
    JavaScript,
    Python,
    TypeScript,
    Cpp,
    Java,
}

/// The execution service's language/version pair for a [`Language`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageBinding {
    /// Language id understood by the execution service.
    pub id: &'static str,
    /// Runtime version pinned on the execution service.
    pub runtime_version: &'static str,
}

impl Language {
    /// Every supported language, in display order.
    pub const ALL: [Self; 5] = [
        Self::JavaScript,
        Self::Python,
        Self::TypeScript,
        Self::Cpp,
        Self::Java,
    ];

    /// Parse a user-facing identifier. Matching is exact.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "javascript" => Some(Self::JavaScript),
            "python" => Some(Self::Python),
            "typescript" => Some(Self::TypeScript),
            "cpp" => Some(Self::Cpp),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    /// The user-facing identifier.
    pub const fn id(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::Cpp => "cpp",
            Self::Java => "java",
        }
    }

    /// Whether this language runs in the local sandbox.
    pub const fn is_local(self) -> bool {
        matches!(self, Self::JavaScript)
    }

    /// Remote binding, or `None` for the locally executed language.
    pub const fn binding(self) -> Option<LanguageBinding> {
        let (id, runtime_version) = match self {
            Self::JavaScript => return None,
            Self::Python => ("python", "3.10.0"),
            Self::TypeScript => ("typescript", "5.0.3"),
            Self::Cpp => ("c++", "10.2.0"),
            Self::Java => ("java", "15.0.2"),
        };
        Some(LanguageBinding {
            id,
            runtime_version,
        })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for lang in Language::ALL {
            assert_eq!(Language::from_id(lang.id()), Some(lang));
        }
    }

    #[test]
    fn unknown_and_miscased_ids_are_unsupported() {
        assert_eq!(Language::from_id("rust"), None);
        assert_eq!(Language::from_id("Python"), None);
        assert_eq!(Language::from_id(""), None);
        assert_eq!(Language::from_id("c++"), None);
    }

    #[test]
    fn binding_table() {
        assert_eq!(Language::JavaScript.binding(), None);

        let cpp = Language::Cpp.binding().unwrap();
        assert_eq!(cpp.id, "c++");
        assert_eq!(cpp.runtime_version, "10.2.0");

        let python = Language::Python.binding().unwrap();
        assert_eq!((python.id, python.runtime_version), ("python", "3.10.0"));

        let ts = Language::TypeScript.binding().unwrap();
        assert_eq!((ts.id, ts.runtime_version), ("typescript", "5.0.3"));

        let java = Language::Java.binding().unwrap();
        assert_eq!((java.id, java.runtime_version), ("java", "15.0.2"));
    }

    #[test]
    fn only_javascript_is_local() {
        let local: Vec<_> = Language::ALL.into_iter().filter(|l| l.is_local()).collect();
        assert_eq!(local, vec![Language::JavaScript]);
    }
}
