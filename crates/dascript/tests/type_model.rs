//! Type model properties: mangling injectivity, size/alignment consistency,
//! structure layout, and the copy/move/pod predicates.

mod common;

use common::*;
use dascript::{BaseType, FieldDeclaration, Structure, TypeDecl};
use pretty_assertions::assert_eq;

/// A spread of structurally distinct types; every pair must disagree in
/// both `is_same` and mangled name.
fn sample_types() -> Vec<TypeDecl> {
    vec![
        TypeDecl::new(BaseType::Int),
        TypeDecl::new(BaseType::Int).with_ref(),
        TypeDecl::new(BaseType::Int).with_const(),
        TypeDecl::new(BaseType::Int).with_ref().with_const(),
        TypeDecl::new(BaseType::Int).with_dim(&[4]),
        TypeDecl::new(BaseType::Int).with_dim(&[4, 2]),
        TypeDecl::new(BaseType::UInt),
        TypeDecl::new(BaseType::Int64),
        TypeDecl::new(BaseType::Float),
        TypeDecl::new(BaseType::Float3),
        TypeDecl::new(BaseType::Bool),
        TypeDecl::new(BaseType::String),
        TypeDecl::new(BaseType::Range),
        // the untyped (void) pointer is deliberately absent: it compares
        // equal to every pointer so null literals type-check
        TypeDecl::pointer_to(TypeDecl::new(BaseType::Int)),
        TypeDecl::pointer_to(TypeDecl::new(BaseType::Float)),
        TypeDecl::array_of(TypeDecl::new(BaseType::Int)),
        TypeDecl::array_of(TypeDecl::new(BaseType::Float)),
        TypeDecl::array_of(TypeDecl::array_of(TypeDecl::new(BaseType::Int))),
        TypeDecl::table_of(TypeDecl::new(BaseType::String), TypeDecl::new(BaseType::Int)),
        TypeDecl::table_of(TypeDecl::new(BaseType::Int), TypeDecl::new(BaseType::Int)),
        TypeDecl::iterator_of(TypeDecl::new(BaseType::Int).with_ref()),
        TypeDecl::block_returning(TypeDecl::new(BaseType::Void)),
        TypeDecl::block_returning(TypeDecl::new(BaseType::Int)),
    ]
}

#[test]
fn mangling_is_injective_over_the_sample() {
    // property 1: mangle(a) == mangle(b) iff is_same(a, b, true, true)
    let types = sample_types();
    for (ia, a) in types.iter().enumerate() {
        for (ib, b) in types.iter().enumerate() {
            let same = a.is_same(b, true, true);
            let mangles_equal = a.mangled_name() == b.mangled_name();
            assert_eq!(
                same,
                mangles_equal,
                "{} vs {} ({ia},{ib})",
                a.mangled_name(),
                b.mangled_name()
            );
        }
    }
}

#[test]
fn sizes_are_multiples_of_alignment_across_the_sample() {
    // property 2, for every sample type
    for t in sample_types() {
        let size = t.size_of();
        let align = t.align_of();
        assert!(align > 0);
        assert_eq!(size % align, 0, "{t}");
    }
}

#[test]
fn structure_offsets_are_monotonic_and_aligned() {
    let st = Structure::with_fields(
        "Mixed",
        at(),
        vec![
            FieldDeclaration::new("flag", TypeDecl::new(BaseType::Bool), at()),
            FieldDeclaration::new("count", TypeDecl::new(BaseType::Int), at()),
            FieldDeclaration::new("big", TypeDecl::new(BaseType::Int64), at()),
            FieldDeclaration::new("tail", TypeDecl::new(BaseType::Bool), at()),
        ],
    );
    let mut previous = 0;
    for field in &st.fields {
        assert!(field.offset >= previous);
        assert_eq!(field.offset % field.type_.align_of(), 0, "{}", field.name);
        previous = field.offset;
    }
    assert_eq!(st.size_of() % st.align_of(), 0);
    // structure types answer size through the descriptor
    let as_type = TypeDecl::structure(st.into());
    assert_eq!(as_type.size_of(), as_type.base_size_of());
}

#[test]
fn structures_compare_by_identity_not_structure() {
    let make = || {
        Structure::with_fields(
            "Twin",
            at(),
            vec![FieldDeclaration::new("x", int(), at())],
        )
    };
    let a = TypeDecl::structure(make().into());
    let b = TypeDecl::structure(make().into());
    assert!(!a.is_same(&b, true, true), "identity, not structure");
    assert!(a.is_same(&a.clone(), true, true));
    assert!(!a.is_same(&b, false, false));
}

#[test]
fn stride_steps_rows_of_multi_dim_values() {
    let t = TypeDecl::new(BaseType::Float).with_dim(&[8, 3]);
    assert_eq!(t.size_of(), 4 * 24);
    assert_eq!(t.stride(), 4 * 8);
}

#[test]
fn predicates_follow_the_containment_rules() {
    let arr = TypeDecl::array_of(int());
    let tab = TypeDecl::table_of(string(), int());
    let blk = TypeDecl::block_returning(void());
    for t in [&arr, &tab] {
        assert!(!t.can_copy(), "{t}");
        assert!(t.can_move(), "{t}");
        assert!(!t.is_pod(), "{t}");
        assert!(t.is_ref(), "{t}");
    }
    assert!(!blk.can_copy());
    assert!(!blk.can_move());
    assert!(!TypeDecl::new(BaseType::String).is_pod());
    assert!(TypeDecl::new(BaseType::String).can_copy());

    // a structure with a table inside is neither pod nor copyable
    let holder = Structure::with_fields(
        "Holder",
        at(),
        vec![FieldDeclaration::new("t", tab, at())],
    );
    assert!(!holder.is_pod());
    assert!(!holder.can_copy());
    let nested = Structure::with_fields(
        "Nested",
        at(),
        vec![FieldDeclaration::new(
            "h",
            TypeDecl::structure(holder.into()),
            at(),
        )],
    );
    assert!(!nested.can_copy(), "non-copyability is transitive");
}

#[test]
fn pointers_to_different_pointees_differ() {
    let pi = TypeDecl::pointer_to(int());
    let pf = TypeDecl::pointer_to(float());
    assert!(!pi.is_same(&pf, false, false));
    // the untyped null pointer is compatible with both
    let null = TypeDecl::void_pointer();
    assert!(pi.is_same(&null, false, false));
    assert!(pf.is_same(&null, false, false));
}

#[test]
fn display_forms_read_like_declarations() {
    assert_eq!(TypeDecl::new(BaseType::Int).to_string(), "int");
    assert_eq!(
        TypeDecl::array_of(TypeDecl::new(BaseType::Float)).to_string(),
        "array<float>"
    );
    assert_eq!(
        TypeDecl::table_of(string(), int()).to_string(),
        "table<string,int>"
    );
    assert_eq!(TypeDecl::pointer_to(int()).to_string(), "int?");
    assert_eq!(int().with_ref().to_string(), "int&");
    assert_eq!(int().with_const().to_string(), "int const");
    assert_eq!(int().with_dim(&[3]).to_string(), "int[3]");
}
