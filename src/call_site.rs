//! Call-site identity
//!
//! A call site is supplied by the instrumentation layer: the module (or
//! source unit) it belongs to, the callable's qualified name and, when
//! known, where it is defined. Summaries are keyed by module and callable
//! only, so the same function reached through different source locations
//! merges into one row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Identity of a callable in the traced program
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    /// Module or source-unit name
    pub module: String,
    /// Callable name, qualified as the host sees fit (e.g. `Type::method`)
    pub name: String,
    /// Source file the callable is defined in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// First line of the callable's definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl CallSite {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            file: None,
            line: None,
        }
    }

    /// Build a call site whose module name is the file stem of `path`
    ///
    /// # Example
    /// ```
    /// use coprof::call_site::CallSite;
    ///
    /// let site = CallSite::from_path("/srv/app/handlers.py", "index", 12);
    /// assert_eq!(site.key(), "handlers.index");
    /// assert_eq!(site.line, Some(12));
    /// ```
    pub fn from_path(path: impl AsRef<Path>, name: impl Into<String>, line: u32) -> Self {
        let path = path.as_ref();
        let module = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            module,
            name: name.into(),
            file: Some(path.to_string_lossy().into_owned()),
            line: Some(line),
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Aggregation key: `module.name`
    pub fn key(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// True when module and callable name match, ignoring location
    pub fn is_callable(&self, module: &str, name: &str) -> bool {
        self.module == module && self.name == name
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}
