//! The program: one user module, the library of built-in modules, and the
//! accumulated diagnostics. Drives inference and simulation.

use std::rc::Rc;

use crate::{
    annotation::TypeAnnotation,
    errors::{CompilationError, Error},
    expressions::{Expression, ExprKind, Variable},
    infer,
    module::{Function, Module, ModuleLibrary, split_name},
    simulate,
    source::LineInfo,
    structure::{Enumeration, Structure},
    typedecl::TypeDecl,
    context::Context,
};

/// Index of the user module inside [`Program::library`]. The built-in module
/// always sits at 0; additional host modules append after the user module.
const USER_MODULE: usize = 1;

/// A compilation unit: declarations, diagnostics, and the pipeline driver.
#[derive(Debug)]
pub struct Program {
    pub library: ModuleLibrary,
    pub errors: Vec<Error>,
    failed: bool,
    pub(crate) total_functions: u32,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// A fresh program with the built-in module linked in.
    #[must_use]
    pub fn new() -> Self {
        let mut library = ModuleLibrary::default();
        library.add_module(crate::modules::builtin::make_module());
        library.add_module(Module::new(""));
        Self {
            library,
            errors: Vec::new(),
            failed: false,
            total_functions: 0,
        }
    }

    /// Links an additional (host or optional built-in) module.
    pub fn add_module(&mut self, module: Module) {
        self.library.add_module(module);
    }

    #[must_use]
    pub fn user_module(&self) -> &Module {
        self.library.module(USER_MODULE)
    }

    pub(crate) fn user_module_mut(&mut self) -> &mut Module {
        self.library.module_mut(USER_MODULE)
    }

    /// Records a diagnostic and marks the program failed.
    pub fn error(&mut self, what: impl Into<String>, at: LineInfo, cerr: CompilationError) {
        self.errors.push(Error::new(what, at, cerr));
        self.failed = true;
    }

    pub(crate) fn push_error(&mut self, err: Error) {
        self.errors.push(err);
        self.failed = true;
    }

    pub(crate) fn sort_errors(&mut self) {
        self.errors.sort();
    }

    /// True iff any diagnostic was recorded. `simulate` refuses to run on a
    /// failed program.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    // ---- declaration surface (what the parser calls) ----

    /// Declares a structure in the user module. The declaration must be
    /// complete; its layout is sealed here.
    pub fn add_structure(&mut self, mut st: Structure) -> Option<Rc<Structure>> {
        st.finalize_layout();
        let at = st.at;
        let name = st.name.clone();
        let rc = Rc::new(st);
        if self.user_module_mut().add_structure(Rc::clone(&rc)) {
            Some(rc)
        } else {
            self.error(
                format!("structure {name} is already declared"),
                at,
                CompilationError::StructureAlreadyDeclared,
            );
            None
        }
    }

    pub fn add_enumeration(&mut self, en: Enumeration) -> Option<Rc<Enumeration>> {
        let at = en.at;
        let name = en.name.clone();
        let rc = Rc::new(en);
        if self.user_module_mut().add_enumeration(Rc::clone(&rc)) {
            Some(rc)
        } else {
            self.error(
                format!("enumeration {name} is already declared"),
                at,
                CompilationError::EnumerationAlreadyDeclared,
            );
            None
        }
    }

    /// Declares a global in the user module.
    pub fn add_variable(&mut self, var: Variable) -> bool {
        let at = var.at;
        let name = var.name.clone();
        if self.user_module_mut().add_variable(var) {
            true
        } else {
            self.error(
                format!("global variable {name} is already declared"),
                at,
                CompilationError::GlobalVariableAlreadyDeclared,
            );
            false
        }
    }

    /// Declares a function in the user module; overloads are distinguished by
    /// mangled name.
    pub fn add_function(&mut self, func: Function) -> bool {
        let at = func.at;
        let name = func.name.clone();
        if self.user_module_mut().add_function(func) {
            true
        } else {
            self.error(
                format!("function {name} is already declared with the same argument types"),
                at,
                CompilationError::FunctionAlreadyDeclared,
            );
            false
        }
    }

    /// Registers a handle annotation in the user module.
    pub fn add_annotation(&mut self, ann: Rc<dyn TypeAnnotation>) -> bool {
        let name = ann.name().to_owned();
        if self.user_module_mut().add_annotation(ann) {
            true
        } else {
            self.error(
                format!("annotation {name} is already declared"),
                LineInfo::default(),
                CompilationError::InvalidAnnotation,
            );
            false
        }
    }

    // ---- name resolution helpers ----

    /// Resolves a global by name. Globals live in the user module only.
    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.user_module().find_variable(name)
    }

    /// Resolves a named type (structure, handle, or enumeration) into a
    /// `TypeDecl`, reporting ambiguity and not-found through the error plane.
    pub fn make_type_declaration(&mut self, at: LineInfo, name: &str) -> Option<TypeDecl> {
        let structs = self.library.find_structures(name);
        let handles = self.library.find_annotations(name);
        let enums = self.library.find_enumerations(name);
        let hits = structs.len() + handles.len() + enums.len();
        match hits {
            0 => {
                self.error(
                    format!("undefined type {name}"),
                    at,
                    CompilationError::TypeNotFound,
                );
                None
            }
            1 => {
                if let Some(st) = structs.into_iter().next() {
                    let mut t = TypeDecl::structure(st);
                    t.at = at;
                    Some(t)
                } else if let Some(ann) = handles.into_iter().next() {
                    let mut t = TypeDecl::handle(ann);
                    t.at = at;
                    Some(t)
                } else {
                    let mut t = TypeDecl::enumeration(enums.into_iter().next().unwrap());
                    t.at = at;
                    Some(t)
                }
            }
            _ => {
                self.error(
                    format!("too many options for type {name}"),
                    at,
                    CompilationError::TypeNotFound,
                );
                None
            }
        }
    }

    /// Creates the AST node for a call named `name`: one of the intrinsic
    /// factories (`assert`, `push`, ...) if a module registers it, otherwise
    /// a plain function call to be resolved by inference.
    pub fn make_call(&mut self, at: LineInfo, name: &str) -> Expression {
        let (module_name, short) = split_name(name);
        let mut factories = Vec::new();
        self.library.for_each_module(module_name, |m| {
            if let Some(factory) = m.call_factories.get(short) {
                factories.push(*factory);
            }
        });
        match factories.len() {
            1 => factories[0](at),
            0 => Expression::new(
                at,
                ExprKind::Call {
                    name: name.to_owned(),
                    args: Vec::new(),
                    resolved: None,
                },
            ),
            _ => {
                self.error(
                    format!("too many options for {name}"),
                    at,
                    CompilationError::FunctionNotFound,
                );
                Expression::new(
                    at,
                    ExprKind::Call {
                        name: name.to_owned(),
                        args: Vec::new(),
                        resolved: None,
                    },
                )
            }
        }
    }

    // ---- pipeline ----

    /// Runs the inference pass: assigns global and function indices, types
    /// every expression, resolves names and overloads, and inserts implicit
    /// dereferences. Idempotent; diagnostics accumulate in [`Self::errors`].
    pub fn infer(&mut self) {
        infer::infer_program(self);
        self.sort_errors();
    }

    /// Lowers the typed program into `context`: globals, functions, and init
    /// nodes, then runs the init script once. Returns false when the program
    /// has errors.
    pub fn simulate(&self, context: &mut Context) -> bool {
        if self.failed {
            return false;
        }
        simulate::simulate_program(self, context);
        context.restart();
        context.run_init_script();
        true
    }
}
