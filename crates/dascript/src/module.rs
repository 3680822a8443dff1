//! Modules and the module library.
//!
//! A module owns structures, enumerations, globals, functions (unique by
//! mangled name, grouped by short name for overload lookup), handle
//! annotations, and intrinsic call factories. The library is an ordered list
//! of modules searched in order; a name may be qualified `module::name` to
//! restrict lookup to one module.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    annotation::TypeAnnotation,
    expressions::{Expression, Variable},
    source::LineInfo,
    structure::{Enumeration, Structure},
    typedecl::{BaseType, TypeDecl},
    vm::{
        NativeFunction,
        policy::{Op1Kind, Op2Kind},
    },
};

/// How a built-in function is implemented.
#[derive(Debug, Clone)]
pub enum BuiltinImpl {
    /// Unary operator dispatched through the policy table.
    Policy1 { kind: Op1Kind, ty: BaseType },
    /// Binary operator dispatched through the policy table.
    Policy2 { kind: Op2Kind, ty: BaseType },
    /// Native adapter called directly, bypassing the prologue.
    Native(NativeFunction),
}

/// A function: user-defined (with a body to lower) or built-in (with a
/// [`BuiltinImpl`]). Overloads share `name` but never the mangled name.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<Variable>,
    pub result: TypeDecl,
    pub body: Option<Expression>,
    pub builtin: Option<BuiltinImpl>,
    /// Dense index among simulated functions; -1 for built-ins.
    pub index: i32,
    pub total_stack_size: u32,
    pub at: LineInfo,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<String>, result: TypeDecl, at: LineInfo) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            result,
            body: None,
            builtin: None,
            index: -1,
            total_stack_size: 0,
            at,
        }
    }

    #[must_use]
    pub fn with_argument(mut self, arg: Variable) -> Self {
        self.arguments.push(arg);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Expression) -> Self {
        self.body = Some(body);
        self
    }

    /// Marks this function built-in; hosts use this to register native
    /// adapters in their own modules.
    #[must_use]
    pub fn with_builtin(mut self, builtin: BuiltinImpl) -> Self {
        self.builtin = Some(builtin);
        self
    }

    /// `name` plus each argument's mangled type, space separated. The key
    /// overload tables are unique by.
    #[must_use]
    pub fn mangled_name(&self) -> String {
        let mut out = self.name.clone();
        for arg in &self.arguments {
            out.push(' ');
            out.push_str(&arg.type_.mangled_name());
        }
        out
    }

    #[must_use]
    pub fn find_argument(&self, name: &str) -> Option<&Variable> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Signature rendered for candidate listings in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = write!(out, "{}(", self.name);
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}: {}", arg.name, arg.type_);
        }
        let _ = write!(out, ") : {}", self.result);
        out
    }
}

/// Factory for expressions that look like calls but have dedicated AST nodes
/// (`assert`, `debug`, `push`, ...). Registered per module by name.
pub type CallFactory = fn(LineInfo) -> Expression;

/// One module's declarations.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    pub structures: IndexMap<String, Rc<Structure>>,
    pub enumerations: IndexMap<String, Rc<Enumeration>>,
    pub globals: IndexMap<String, Variable>,
    /// All functions, keyed by mangled name.
    pub functions: IndexMap<String, Function>,
    /// Mangled names of all overloads sharing a short name.
    pub functions_by_name: AHashMap<String, Vec<String>>,
    pub annotations: IndexMap<String, Rc<dyn TypeAnnotation>>,
    pub(crate) call_factories: AHashMap<&'static str, CallFactory>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a structure; false when the name is taken.
    pub fn add_structure(&mut self, st: Rc<Structure>) -> bool {
        if self.structures.contains_key(&st.name) {
            return false;
        }
        self.structures.insert(st.name.clone(), st);
        true
    }

    pub fn add_enumeration(&mut self, en: Rc<Enumeration>) -> bool {
        if self.enumerations.contains_key(&en.name) {
            return false;
        }
        self.enumerations.insert(en.name.clone(), en);
        true
    }

    pub fn add_variable(&mut self, var: Variable) -> bool {
        if self.globals.contains_key(&var.name) {
            return false;
        }
        self.globals.insert(var.name.clone(), var);
        true
    }

    /// Adds a function; false when an overload with the same mangled name
    /// already exists.
    pub fn add_function(&mut self, func: Function) -> bool {
        let mangled = func.mangled_name();
        if self.functions.contains_key(&mangled) {
            return false;
        }
        self.functions_by_name
            .entry(func.name.clone())
            .or_default()
            .push(mangled.clone());
        self.functions.insert(mangled, func);
        true
    }

    pub fn add_annotation(&mut self, ann: Rc<dyn TypeAnnotation>) -> bool {
        let name = ann.name().to_owned();
        if self.annotations.contains_key(&name) {
            return false;
        }
        self.annotations.insert(name, ann);
        true
    }

    pub(crate) fn add_call_factory(&mut self, name: &'static str, factory: CallFactory) {
        self.call_factories.insert(name, factory);
    }

    #[must_use]
    pub fn find_structure(&self, name: &str) -> Option<&Rc<Structure>> {
        self.structures.get(name)
    }

    #[must_use]
    pub fn find_enumeration(&self, name: &str) -> Option<&Rc<Enumeration>> {
        self.enumerations.get(name)
    }

    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.globals.get(name)
    }

    #[must_use]
    pub fn find_function(&self, mangled_name: &str) -> Option<&Function> {
        self.functions.get(mangled_name)
    }

    #[must_use]
    pub fn find_annotation(&self, name: &str) -> Option<&Rc<dyn TypeAnnotation>> {
        self.annotations.get(name)
    }
}

/// Splits an optionally qualified `module::name` into its parts.
#[must_use]
pub(crate) fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once("::") {
        Some((module, rest)) => (Some(module), rest),
        None => (None, name),
    }
}

/// Ordered set of modules, searched in order when resolving names.
#[derive(Debug, Default)]
pub struct ModuleLibrary {
    modules: Vec<Module>,
}

impl ModuleLibrary {
    pub fn add_module(&mut self, module: Module) -> usize {
        self.modules.push(module);
        self.modules.len() - 1
    }

    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    #[must_use]
    pub fn module(&self, index: usize) -> &Module {
        &self.modules[index]
    }

    pub(crate) fn module_mut(&mut self, index: usize) -> &mut Module {
        &mut self.modules[index]
    }

    /// Visits modules in order, honoring an optional `module::` restriction.
    pub fn for_each_module(&self, module_name: Option<&str>, mut f: impl FnMut(&Module)) {
        for module in &self.modules {
            if let Some(only) = module_name
                && module.name != only
            {
                continue;
            }
            f(module);
        }
    }

    /// All structures registered under `name` (any module, or the qualified
    /// one).
    #[must_use]
    pub fn find_structures(&self, name: &str) -> Vec<Rc<Structure>> {
        let (module_name, short) = split_name(name);
        let mut out = Vec::new();
        self.for_each_module(module_name, |m| {
            if let Some(st) = m.find_structure(short) {
                out.push(Rc::clone(st));
            }
        });
        out
    }

    #[must_use]
    pub fn find_enumerations(&self, name: &str) -> Vec<Rc<Enumeration>> {
        let (module_name, short) = split_name(name);
        let mut out = Vec::new();
        self.for_each_module(module_name, |m| {
            if let Some(en) = m.find_enumeration(short) {
                out.push(Rc::clone(en));
            }
        });
        out
    }

    #[must_use]
    pub fn find_annotations(&self, name: &str) -> Vec<Rc<dyn TypeAnnotation>> {
        let (module_name, short) = split_name(name);
        let mut out = Vec::new();
        self.for_each_module(module_name, |m| {
            if let Some(ann) = m.find_annotation(short) {
                out.push(Rc::clone(ann));
            }
        });
        out
    }

    /// Every overload visible under `name`, regardless of argument types.
    #[must_use]
    pub fn find_candidates(&self, name: &str) -> Vec<&Function> {
        let (module_name, short) = split_name(name);
        let mut result = Vec::new();
        for module in &self.modules {
            if let Some(only) = module_name
                && module.name != only
            {
                continue;
            }
            if let Some(mangled) = module.functions_by_name.get(short) {
                for mn in mangled {
                    if let Some(f) = module.functions.get(mn) {
                        result.push(f);
                    }
                }
            }
        }
        result
    }

    /// Overload resolution: candidates whose signature accepts the supplied
    /// argument types.
    ///
    /// A candidate matches when (1) its arity covers the call, (2) each
    /// supplied argument is the same type ignoring ref/const, (3) reference
    /// parameters receive references, (4) reference and pointer parameters
    /// only ever add const, and (5) unsupplied trailing parameters all have
    /// defaults. Exactly one match is required for a call to type.
    #[must_use]
    pub fn find_matching_functions(&self, name: &str, types: &[&TypeDecl]) -> Vec<&Function> {
        let mut result = Vec::new();
        for candidate in self.find_candidates(name) {
            if candidate.arguments.len() < types.len() {
                continue;
            }
            let mut compatible = true;
            for (arg, pass) in candidate.arguments.iter().zip(types.iter()) {
                let arg_type = &arg.type_;
                if (arg_type.is_ref() && !pass.is_ref()) || !arg_type.is_same(pass, false, false) {
                    compatible = false;
                    break;
                }
                // ref and pointer parameters may only add const, never drop it
                if arg_type.is_ref() && !arg_type.constant && pass.constant {
                    compatible = false;
                    break;
                }
                if arg_type.is_pointer() && !arg_type.constant && pass.constant {
                    compatible = false;
                    break;
                }
            }
            if !compatible {
                continue;
            }
            let tail_ok = candidate.arguments[types.len()..]
                .iter()
                .all(|arg| arg.init.is_some());
            if tail_ok {
                result.push(candidate);
            }
        }
        result
    }

    /// Formats a candidate list for "no matching" / "too many matching"
    /// diagnostics.
    #[must_use]
    pub fn describe_candidates(candidates: &[&Function]) -> String {
        let mut out = String::new();
        for c in candidates {
            out.push_str("\tcandidate: ");
            out.push_str(&c.describe());
            out.push('\n');
        }
        out
    }
}
