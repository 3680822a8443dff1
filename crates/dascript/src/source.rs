//! Source locations and the file-access collaborator.
//!
//! The lexer/parser front-end lives outside this crate. What lives here is the
//! surface it targets: source positions carried by every AST node, the
//! [`FileAccess`] trait the compile driver uses to resolve `require`
//! dependencies, and [`compile`], which orchestrates recursive unit parsing
//! through a host-supplied callback without owning any grammar itself.

use std::{fmt, fs, path::Path, rc::Rc};

use ahash::{AHashMap, AHashSet};

use crate::{
    errors::{CompilationError, Error},
    program::Program,
};

/// A position in a source unit. `line` and `column` are 1-based; a zeroed
/// location means "no position" (synthesized nodes, built-in declarations).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineInfo {
    pub line: u32,
    pub column: u32,
}

impl LineInfo {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for LineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One source unit as returned by a [`FileAccess`] implementation.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub source: Rc<str>,
}

impl FileInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Pluggable file access used only at compile time.
///
/// The evaluator never touches the filesystem; everything it runs was already
/// lowered into the [`crate::Context`].
pub trait FileAccess {
    /// Returns the source unit for `name`, or `None` if it does not exist.
    fn get_file_info(&self, name: &str) -> Option<FileInfo>;

    /// Resolves a `require <name>` found inside `base` to a unit name that
    /// [`Self::get_file_info`] will understand. The default joins the include
    /// onto the directory of `base`.
    fn resolve_include(&self, base: &str, include_name: &str) -> String {
        match base.rfind('/') {
            Some(pos) => format!("{}/{}", &base[..pos], include_name),
            None => include_name.to_owned(),
        }
    }
}

/// [`FileAccess`] over the real filesystem. Unit names are paths.
#[derive(Debug, Default)]
pub struct FsFileAccess;

impl FileAccess for FsFileAccess {
    fn get_file_info(&self, name: &str) -> Option<FileInfo> {
        if !Path::new(name).is_file() {
            return None;
        }
        let source = fs::read_to_string(name).ok()?;
        Some(FileInfo::new(name, source))
    }
}

/// In-memory [`FileAccess`] for tests and embedders that manage sources
/// themselves.
#[derive(Debug, Default)]
pub struct MemoryFileAccess {
    files: AHashMap<String, Rc<str>>,
}

impl MemoryFileAccess {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, source: impl Into<Rc<str>>) -> &mut Self {
        self.files.insert(name.into(), source.into());
        self
    }
}

impl FileAccess for MemoryFileAccess {
    fn get_file_info(&self, name: &str) -> Option<FileInfo> {
        self.files
            .get(name)
            .map(|source| FileInfo::new(name, Rc::clone(source)))
    }
}

/// The parse step supplied by the host.
///
/// Given one source unit, the callback populates `program` with the unit's
/// declarations and returns the names of units it `require`s. Parse failures
/// are reported through `Program::error` like any other diagnostic.
pub type ParseUnit<'a> = dyn FnMut(&FileInfo, &mut Program) -> Vec<String> + 'a;

/// Compiles `file_name` and, recursively, everything it requires.
///
/// Units are parsed once each, dependencies first, all into the same
/// [`Program`]. After parsing, inference runs unless any unit failed. The
/// returned program carries the accumulated diagnostics either way.
pub fn compile(file_name: &str, access: &dyn FileAccess, parse_unit: &mut ParseUnit<'_>) -> Program {
    let mut program = Program::new();
    let mut seen = AHashSet::new();
    compile_unit(file_name, access, parse_unit, &mut program, &mut seen);
    if !program.failed() {
        program.infer();
    }
    program.sort_errors();
    program
}

fn compile_unit(
    file_name: &str,
    access: &dyn FileAccess,
    parse_unit: &mut ParseUnit<'_>,
    program: &mut Program,
    seen: &mut AHashSet<String>,
) {
    if !seen.insert(file_name.to_owned()) {
        return;
    }
    let Some(info) = access.get_file_info(file_name) else {
        program.push_error(Error::new(
            format!("can't open {file_name}"),
            LineInfo::default(),
            CompilationError::ModuleNotFound,
        ));
        return;
    };
    let requires = parse_unit(&info, program);
    for req in requires {
        let resolved = access.resolve_include(file_name, &req);
        compile_unit(&resolved, access, parse_unit, program, seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_resolution_is_relative_to_base() {
        let access = MemoryFileAccess::new();
        assert_eq!(access.resolve_include("scripts/main.das", "util"), "scripts/util");
        assert_eq!(access.resolve_include("main.das", "util"), "util");
    }

    #[test]
    fn memory_access_round_trips() {
        let mut access = MemoryFileAccess::new();
        access.add("a.das", "let x = 1");
        let info = access.get_file_info("a.das").unwrap();
        assert_eq!(info.name, "a.das");
        assert_eq!(&*info.source, "let x = 1");
        assert!(access.get_file_info("b.das").is_none());
    }
}
