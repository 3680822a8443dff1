//! daScript core: the type-checked AST, the type-inference pass, and the
//! SimNode evaluator of a statically typed embeddable scripting language.
//!
//! The pipeline is parse -> AST -> infer -> simulate -> execute. Parsing is
//! an external collaborator: a front-end builds the AST through the
//! constructors in [`expressions`] and the declaration surface on
//! [`Program`], then [`Program::infer`] types the tree, and
//! [`Program::simulate`] lowers it into a [`Context`] that evaluates it.
//!
//! ```
//! use dascript::{BaseType, Context, Expression, Function, LineInfo, Operator, Program, TypeDecl};
//!
//! let at = LineInfo::new(1, 1);
//! let body = Expression::block(at, vec![Expression::ret(
//!     at,
//!     Some(Expression::op2(
//!         at,
//!         Operator::Add,
//!         Expression::const_int(at, 40),
//!         Expression::const_int(at, 2),
//!     )),
//! )]);
//! let mut program = Program::new();
//! program.add_function(
//!     Function::new("main", TypeDecl::new(BaseType::Int), at).with_body(body),
//! );
//! program.infer();
//! assert!(!program.failed());
//!
//! let mut context = Context::new();
//! assert!(program.simulate(&mut context));
//! let main = context.find_function("main").unwrap();
//! assert_eq!(context.eval(main, &[]).get::<i32>(), 42);
//! ```

mod annotation;
mod context;
mod debug_info;
mod errors;
mod expressions;
mod hash;
mod heap;
mod infer;
mod io;
mod module;
pub mod modules;
mod program;
mod register;
mod simulate;
mod source;
mod structure;
mod typedecl;
mod vm;

pub use crate::{
    annotation::{PlainAnnotation, TypeAnnotation},
    context::{
        Context, EvalFlags, DEFAULT_BIG_ALLOC_THRESHOLD, DEFAULT_HEAP_SIZE, DEFAULT_STACK_SIZE,
    },
    errors::{CompilationError, Error},
    expressions::{
        CallTarget, ExprKind, Expression, FieldRef, IterVar, Operator, VarRef, Variable,
        MAX_FOR_ITERATORS,
    },
    hash::{hash32, hash64},
    heap::{HeapAllocator, StackAllocator, STRING_HEADER_SIZE},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    module::{BuiltinImpl, Function, Module, ModuleLibrary},
    program::Program,
    register::{BlockVal, MemArea, MemPtr, RangeVal, RegValue, Register},
    source::{compile, FileAccess, FileInfo, FsFileAccess, LineInfo, MemoryFileAccess, ParseUnit},
    structure::{Enumeration, FieldDeclaration, Structure},
    typedecl::{BaseType, TypeDecl},
    vm::{
        policy::{Op1Kind, Op2Kind},
        NativeFunction, Vm,
    },
};
