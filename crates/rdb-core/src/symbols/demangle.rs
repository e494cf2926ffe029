//! Symbol demangling utilities.
//!
//! Function names in `.symtab` are stored in linkage form. For display and
//! lookup the engine also accepts the demangled form:
//!
//! - **Rust**: legacy (`_ZN...E`) and v0 (`_R...`) mangling
//! - **C++**: Itanium mangling (`_Z...`), recognised but not demangled
//! - **C**: unmangled

use std::fmt;

use rustc_demangle::try_demangle;

/// Programming language inferred from a symbol's mangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLanguage
{
    /// Rust symbol (legacy or v0 mangling)
    Rust,
    /// C++ symbol (Itanium mangling without Rust extensions)
    Cpp,
    /// Unmangled name
    C,
}

impl fmt::Display for SymbolLanguage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            SymbolLanguage::Rust => "rust",
            SymbolLanguage::Cpp => "c++",
            SymbolLanguage::C => "c",
        };
        write!(f, "{label}")
    }
}

/// Demangle a Rust linkage name, without the trailing hash.
///
/// Returns `None` for names that are not Rust-mangled.
#[must_use]
pub fn demangle(raw: &str) -> Option<String>
{
    try_demangle(raw).ok().map(|name| format!("{name:#}"))
}

/// Classify a linkage name by its mangling pattern.
#[must_use]
pub fn language_of(raw: &str) -> SymbolLanguage
{
    if raw.starts_with("_R") || (raw.starts_with("_ZN") && try_demangle(raw).is_ok()) {
        SymbolLanguage::Rust
    } else if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else {
        SymbolLanguage::C
    }
}
