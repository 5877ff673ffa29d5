//! Type System
//!
//! Representation of every C type the compiler understands: arithmetic
//! types, pointers, arrays, functions, structs/unions, and `void`, along
//! with layout (size/alignment), compatibility, composite formation, and
//! the implicit conversion rules.
//!
//! Types are interned in a [`TypePool`] arena. A [`Type`] handle is a small
//! copyable (id, qualifiers) pair, so structural equality of interned types
//! reduces to id equality, and struct/union identity is pool identity (the
//! defining declaration), never shape.

use std::collections::HashMap;
use std::fmt::Write as _;

use bitflags::bitflags;

bitflags! {
    /// Type qualifiers. Only `const` is tracked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Quals: u8 {
        /// The `const` qualifier.
        const CONST = 1;
    }
}

/// Index of an interned type in the [`TypePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

/// A C type: an interned id plus the qualifiers applied at this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    id: TypeId,
    /// Qualifiers applied to this use of the type.
    pub quals: Quals,
}

impl Type {
    /// Returns this type with the `const` qualifier added.
    pub fn qualified_const(self) -> Type {
        Type { id: self.id, quals: self.quals | Quals::CONST }
    }

    /// Returns this type with all qualifiers removed.
    pub fn unqualified(self) -> Type {
        Type { id: self.id, quals: Quals::empty() }
    }

    /// Returns `true` if this type carries the `const` qualifier.
    pub fn is_const(self) -> bool {
        self.quals.contains(Quals::CONST)
    }
}

/// Distinguishes the two record kinds sharing the tag namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// `struct` tag.
    Struct,
    /// `union` tag.
    Union,
}

impl RecordKind {
    /// Keyword spelling, for diagnostics.
    pub fn keyword(self) -> &'static str {
        match self {
            RecordKind::Struct => "struct",
            RecordKind::Union => "union",
        }
    }
}

/// A named member of a complete struct or union, with its byte offset.
#[derive(Debug, Clone)]
pub struct Member {
    /// Member name.
    pub name: String,
    /// Member type.
    pub ty: Type,
    /// Byte offset from the start of the record. Always 0 for unions.
    pub offset: u64,
}

/// The stored shape of an interned type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeKind {
    Void,
    Arith {
        signed: bool,
        width: u8,
        // `_Bool` is a distinct type whose stored values are only 0 or 1.
        is_bool: bool,
    },
    Pointer(Type),
    Array {
        elem: Type,
        // `None` means incomplete (unknown length).
        len: Option<u64>,
    },
    Function {
        ret: Type,
        // `None` means no prototype; `Some(vec![])` means `(void)`.
        params: Option<Vec<Type>>,
    },
    // Records are never interned by shape; `Record` ids are identity.
    Record {
        kind: RecordKind,
        tag: Option<String>,
        members: Option<Vec<MemberKey>>,
        size: u64,
        align: u64,
    },
}

// Hashable stand-in for `Member` so `TypeKind` can derive `Hash`; records
// are not interned, so the hash of this variant is never consulted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemberKey {
    name: String,
    ty: Type,
    offset: u64,
}

/// Result of classifying an implicit conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Types are compatible; no conversion needed.
    Identity,
    /// Integer promotion applies.
    IntegerPromotion,
    /// Both arithmetic; usual arithmetic conversions apply.
    UsualArithmetic,
    /// Object pointer to/from `void *`.
    PointerToVoid,
    /// Integer constant expression 0 (or such cast to `void *`) to pointer.
    NullPointerConstant,
    /// Pointers of incompatible type; allowed with a warning.
    IncompatiblePointerWarning,
    /// No implicit conversion exists.
    Forbidden,
}

/// Arena owning every type in a translation unit.
#[derive(Debug)]
pub struct TypePool {
    kinds: Vec<TypeKind>,
    // Derived types (pointer/array/function) interned by shape so repeated
    // construction returns the same id.
    interned: HashMap<TypeKind, TypeId>,
}

// Ids of the built-in types, fixed by construction order in `new`.
macro_rules! builtin {
    ($name:ident, $idx:expr) => {
        /// Built-in type handle.
        pub const $name: Type = Type {
            id: TypeId($idx),
            quals: Quals::empty(),
        };
    };
}

impl TypePool {
    builtin!(VOID, 0);
    builtin!(BOOL, 1);
    builtin!(CHAR, 2);
    builtin!(UCHAR, 3);
    builtin!(SHORT, 4);
    builtin!(USHORT, 5);
    builtin!(INT, 6);
    builtin!(UINT, 7);
    builtin!(LONG, 8);
    builtin!(ULONG, 9);

    /// Returns a pool seeded with the built-in types.
    pub fn new() -> Self {
        let kinds = vec![
            TypeKind::Void,
            TypeKind::Arith { signed: false, width: 1, is_bool: true },
            TypeKind::Arith { signed: true, width: 1, is_bool: false },
            TypeKind::Arith { signed: false, width: 1, is_bool: false },
            TypeKind::Arith { signed: true, width: 2, is_bool: false },
            TypeKind::Arith { signed: false, width: 2, is_bool: false },
            TypeKind::Arith { signed: true, width: 4, is_bool: false },
            TypeKind::Arith { signed: false, width: 4, is_bool: false },
            TypeKind::Arith { signed: true, width: 8, is_bool: false },
            TypeKind::Arith { signed: false, width: 8, is_bool: false },
        ];

        let mut interned = HashMap::new();
        for (i, kind) in kinds.iter().enumerate() {
            interned.insert(kind.clone(), TypeId(i as u32));
        }

        TypePool { kinds, interned }
    }

    fn kind(&self, ty: Type) -> &TypeKind {
        &self.kinds[ty.id.0 as usize]
    }

    fn intern(&mut self, kind: TypeKind) -> Type {
        if let Some(&id) = self.interned.get(&kind) {
            return Type { id, quals: Quals::empty() };
        }
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interned.insert(kind, id);
        Type { id, quals: Quals::empty() }
    }

    /// Returns the pointer type to `pointee`.
    pub fn pointer_to(&mut self, pointee: Type) -> Type {
        self.intern(TypeKind::Pointer(pointee))
    }

    /// Returns the array type of `len` elements of `elem`. `None` produces
    /// an incomplete array type.
    pub fn array_of(&mut self, elem: Type, len: Option<u64>) -> Type {
        self.intern(TypeKind::Array { elem, len })
    }

    /// Returns the function type with the given return and parameter types.
    pub fn function(&mut self, ret: Type, params: Option<Vec<Type>>) -> Type {
        self.intern(TypeKind::Function { ret, params })
    }

    /// Creates a new, incomplete struct or union type. Each call produces a
    /// distinct type; tag identity is the defining declaration.
    pub fn declare_record(&mut self, kind: RecordKind, tag: Option<&str>) -> Type {
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(TypeKind::Record {
            kind,
            tag: tag.map(str::to_owned),
            members: None,
            size: 0,
            align: 1,
        });
        Type { id, quals: Quals::empty() }
    }

    /// Completes a previously incomplete record with the given members,
    /// computing offsets and the total layout. Member types must be
    /// complete; the caller is responsible for diagnosing otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `ty` is not an incomplete record type.
    pub fn complete_record(&mut self, ty: Type, members: Vec<(String, Type)>) {
        let mut laid_out = Vec::with_capacity(members.len());
        let mut offset: u64 = 0;
        let mut align: u64 = 1;
        let mut max_size: u64 = 0;

        let is_union = matches!(
            self.kind(ty),
            TypeKind::Record { kind: RecordKind::Union, .. }
        );

        for (name, mty) in members {
            let msize = self.size(mty).expect("member type must be complete");
            let malign = self.align(mty).expect("member type must be complete");
            align = align.max(malign);

            let moffset = if is_union {
                0
            } else {
                offset = round_up(offset, malign);
                let at = offset;
                offset += msize;
                at
            };
            max_size = max_size.max(msize);

            laid_out.push(MemberKey { name, ty: mty, offset: moffset });
        }

        let total = if is_union {
            round_up(max_size, align)
        } else {
            round_up(offset, align)
        };

        match &mut self.kinds[ty.id.0 as usize] {
            TypeKind::Record { members, size, align: a, .. } => {
                assert!(members.is_none(), "record completed twice");
                *members = Some(laid_out);
                *size = total;
                *a = align;
            }
            _ => panic!("complete_record on non-record type"),
        }
    }

    /// Returns the size in bytes of a complete type, `None` otherwise.
    pub fn size(&self, ty: Type) -> Option<u64> {
        match self.kind(ty) {
            TypeKind::Void | TypeKind::Function { .. } => None,
            TypeKind::Arith { width, .. } => Some(u64::from(*width)),
            TypeKind::Pointer(_) => Some(8),
            TypeKind::Array { elem, len } => {
                let len = (*len)?;
                Some(len * self.size(*elem)?)
            }
            TypeKind::Record { members, size, .. } => {
                members.as_ref().map(|_| *size)
            }
        }
    }

    /// Returns the alignment in bytes of a complete type, `None` otherwise.
    pub fn align(&self, ty: Type) -> Option<u64> {
        match self.kind(ty) {
            TypeKind::Void | TypeKind::Function { .. } => None,
            TypeKind::Arith { width, .. } => Some(u64::from(*width)),
            TypeKind::Pointer(_) => Some(8),
            TypeKind::Array { elem, .. } => self.align(*elem),
            TypeKind::Record { members, align, .. } => {
                members.as_ref().map(|_| *align)
            }
        }
    }

    /// Returns `true` if objects of this type have a known size.
    pub fn is_complete(&self, ty: Type) -> bool {
        self.size(ty).is_some()
    }

    /// `true` for `void`.
    pub fn is_void(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Void)
    }

    /// `true` for every integer type, including `_Bool`.
    pub fn is_arith(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Arith { .. })
    }

    /// `true` for integer types. Identical to [`Self::is_arith`] here since
    /// floating point is unsupported.
    pub fn is_integral(&self, ty: Type) -> bool {
        self.is_arith(ty)
    }

    /// `true` for `_Bool`.
    pub fn is_bool(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Arith { is_bool: true, .. })
    }

    /// `true` for pointer types.
    pub fn is_pointer(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Pointer(_))
    }

    /// `true` for array types, complete or not.
    pub fn is_array(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Array { .. })
    }

    /// `true` for function types.
    pub fn is_function(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Function { .. })
    }

    /// `true` for struct and union types.
    pub fn is_record(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Record { .. })
    }

    /// `true` for object types (everything but functions and `void`).
    pub fn is_object(&self, ty: Type) -> bool {
        !matches!(self.kind(ty), TypeKind::Void | TypeKind::Function { .. })
    }

    /// `true` for arithmetic and pointer types.
    pub fn is_scalar(&self, ty: Type) -> bool {
        self.is_arith(ty) || self.is_pointer(ty)
    }

    /// Whether an arithmetic type is signed.
    pub fn is_signed(&self, ty: Type) -> bool {
        matches!(self.kind(ty), TypeKind::Arith { signed: true, .. })
    }

    /// The type pointed to by a pointer type.
    pub fn pointee(&self, ty: Type) -> Option<Type> {
        match self.kind(ty) {
            TypeKind::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    /// The element type of an array type.
    pub fn elem(&self, ty: Type) -> Option<Type> {
        match self.kind(ty) {
            TypeKind::Array { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// The length of a complete array type.
    pub fn array_len(&self, ty: Type) -> Option<u64> {
        match self.kind(ty) {
            TypeKind::Array { len, .. } => *len,
            _ => None,
        }
    }

    /// The return type of a function type.
    pub fn ret(&self, ty: Type) -> Option<Type> {
        match self.kind(ty) {
            TypeKind::Function { ret, .. } => Some(*ret),
            _ => None,
        }
    }

    /// The parameter list of a function type, `None` for no prototype.
    pub fn params(&self, ty: Type) -> Option<Option<&[Type]>> {
        match self.kind(ty) {
            TypeKind::Function { params, .. } => Some(params.as_deref()),
            _ => None,
        }
    }

    /// The record kind (struct vs. union), if `ty` is a record.
    pub fn record_kind(&self, ty: Type) -> Option<RecordKind> {
        match self.kind(ty) {
            TypeKind::Record { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Looks up a member of a complete record type by name.
    pub fn member(&self, ty: Type, name: &str) -> Option<Member> {
        match self.kind(ty) {
            TypeKind::Record { members: Some(ms), .. } => {
                ms.iter().find(|m| m.name == name).map(|m| Member {
                    name: m.name.clone(),
                    ty: m.ty,
                    offset: m.offset,
                })
            }
            _ => None,
        }
    }

    /// All members of a complete record type.
    pub fn members(&self, ty: Type) -> Option<Vec<Member>> {
        match self.kind(ty) {
            TypeKind::Record { members: Some(ms), .. } => Some(
                ms.iter()
                    .map(|m| Member {
                        name: m.name.clone(),
                        ty: m.ty,
                        offset: m.offset,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Converts an arithmetic type to its unsigned counterpart.
    pub fn to_unsigned(&self, ty: Type) -> Type {
        match *self.kind(ty) {
            TypeKind::Arith { width: 1, is_bool: false, .. } => Self::UCHAR,
            TypeKind::Arith { width: 2, .. } => Self::USHORT,
            TypeKind::Arith { width: 4, .. } => Self::UINT,
            TypeKind::Arith { width: 8, .. } => Self::ULONG,
            _ => ty,
        }
    }

    /// Integer promotion: every arithmetic type narrower than `int`
    /// becomes `int`. Applied to operands of arithmetic, unary `+`/`-`/`~`,
    /// shifts, and comparisons.
    pub fn promoted(&self, ty: Type) -> Type {
        match self.kind(ty) {
            // All sub-int types fit in int, so promotion is always to int.
            TypeKind::Arith { width, .. } if *width < 4 => Self::INT,
            _ => ty.unqualified(),
        }
    }

    /// Usual arithmetic conversions: the common type both operands of a
    /// binary arithmetic operator convert to.
    pub fn usual_arith(&self, a: Type, b: Type) -> Type {
        let a = self.promoted(a);
        let b = self.promoted(b);

        let ulong = |t: Type| t.id == Self::ULONG.id;
        let long = |t: Type| t.id == Self::LONG.id;
        let uint = |t: Type| t.id == Self::UINT.id;

        if ulong(a) || ulong(b) {
            Self::ULONG
        } else if long(a) || long(b) {
            // long can represent every unsigned int value on LP64, so
            // long + unsigned int lands on long.
            Self::LONG
        } else if uint(a) || uint(b) {
            Self::UINT
        } else {
            Self::INT
        }
    }

    /// Compatibility test, symmetric and reflexive.
    ///
    /// Top-level qualifiers are ignored; qualifiers participate only when
    /// comparing pointees.
    pub fn compatible(&self, a: Type, b: Type) -> bool {
        if a.id == b.id {
            return true;
        }

        match (self.kind(a), self.kind(b)) {
            (TypeKind::Pointer(pa), TypeKind::Pointer(pb)) => {
                pa.quals == pb.quals && self.compatible(*pa, *pb)
            }
            (
                TypeKind::Array { elem: ea, len: la },
                TypeKind::Array { elem: eb, len: lb },
            ) => {
                // A complete and an incomplete array of compatible element
                // type are compatible.
                self.compatible(*ea, *eb)
                    && match (la, lb) {
                        (Some(x), Some(y)) => x == y,
                        _ => true,
                    }
            }
            (
                TypeKind::Function { ret: ra, params: pa },
                TypeKind::Function { ret: rb, params: pb },
            ) => {
                if !self.compatible(*ra, *rb) {
                    return false;
                }
                match (pa, pb) {
                    (Some(xs), Some(ys)) => {
                        xs.len() == ys.len()
                            && xs
                                .iter()
                                .zip(ys.iter())
                                .all(|(&x, &y)| self.compatible(x, y))
                    }
                    // A prototyped and an unprototyped declaration are
                    // compatible iff every parameter type is unchanged by
                    // the default argument promotions.
                    (Some(xs), None) | (None, Some(xs)) => xs
                        .iter()
                        .all(|&x| self.compatible(x, self.promoted(x))),
                    (None, None) => true,
                }
            }
            // Records compare by identity, handled by the id check above.
            _ => false,
        }
    }

    /// Composite type of two compatible types: used to update a symbol on
    /// redeclaration. Commutative on compatible inputs.
    ///
    /// # Panics
    ///
    /// Panics if the types are not compatible; callers must check first.
    pub fn composite(&mut self, a: Type, b: Type) -> Type {
        assert!(self.compatible(a, b), "composite of incompatible types");

        if a.id == b.id {
            return a;
        }

        match (self.kind(a).clone(), self.kind(b).clone()) {
            (TypeKind::Pointer(pa), TypeKind::Pointer(pb)) => {
                let quals = pa.quals;
                let inner = self.composite(pa, pb);
                self.pointer_to(Type { id: inner.id, quals })
            }
            (
                TypeKind::Array { elem: ea, len: la },
                TypeKind::Array { elem: eb, len: lb },
            ) => {
                let elem = self.composite(ea, eb);
                self.array_of(elem, la.or(lb))
            }
            (
                TypeKind::Function { ret: ra, params: pa },
                TypeKind::Function { ret: rb, params: pb },
            ) => {
                let ret = self.composite(ra, rb);
                let params = match (pa, pb) {
                    (Some(xs), Some(ys)) => Some(
                        xs.iter()
                            .zip(ys.iter())
                            .map(|(&x, &y)| self.composite(x, y))
                            .collect(),
                    ),
                    (Some(xs), None) | (None, Some(xs)) => Some(xs),
                    (None, None) => None,
                };
                self.function(ret, params)
            }
            _ => a,
        }
    }

    /// Classifies the implicit conversion of a value of type `from` to type
    /// `to`. `from_is_null` indicates the value is an integer constant
    /// expression of value 0 (or such a constant cast to `void *`).
    pub fn classify_conversion(
        &self,
        from: Type,
        to: Type,
        from_is_null: bool,
    ) -> Conversion {
        if self.compatible(from, to) {
            return Conversion::Identity;
        }

        if self.is_arith(from) && self.is_arith(to) {
            let wider = self.promoted(from);
            return if self.compatible(wider, to) {
                Conversion::IntegerPromotion
            } else {
                Conversion::UsualArithmetic
            };
        }

        if self.is_pointer(from) && self.is_pointer(to) {
            let pf = self.pointee(from).unwrap();
            let pt = self.pointee(to).unwrap();

            // Qualifier rule: the destination pointee must carry every
            // qualifier of the source pointee.
            let quals_ok = pt.quals.contains(pf.quals);

            if self.compatible(pf, pt) && quals_ok {
                return Conversion::Identity;
            }
            if (self.is_void(pt) && self.is_object(pf) && quals_ok)
                || (self.is_object(pt) && self.is_void(pf) && quals_ok)
            {
                return Conversion::PointerToVoid;
            }
            return Conversion::IncompatiblePointerWarning;
        }

        if self.is_pointer(to) && from_is_null {
            return Conversion::NullPointerConstant;
        }

        // Any scalar converts to _Bool: 0 if it compares equal to 0.
        if self.is_bool(to) && self.is_scalar(from) {
            return Conversion::Identity;
        }

        Conversion::Forbidden
    }

    /// Pretty form of a type, for diagnostics.
    pub fn display(&self, ty: Type) -> String {
        let mut s = String::new();
        if ty.is_const() {
            s.push_str("const ");
        }
        match self.kind(ty) {
            TypeKind::Void => s.push_str("void"),
            TypeKind::Arith { is_bool: true, .. } => s.push_str("_Bool"),
            TypeKind::Arith { signed, width, .. } => {
                if !signed {
                    s.push_str("unsigned ");
                }
                s.push_str(match width {
                    1 => "char",
                    2 => "short",
                    4 => "int",
                    _ => "long",
                });
            }
            TypeKind::Pointer(p) => {
                let _ = write!(s, "{} *", self.display(*p));
            }
            TypeKind::Array { elem, len } => {
                let _ = match len {
                    Some(n) => write!(s, "{}[{}]", self.display(*elem), n),
                    None => write!(s, "{}[]", self.display(*elem)),
                };
            }
            TypeKind::Function { ret, .. } => {
                let _ = write!(s, "{}(...)", self.display(*ret));
            }
            TypeKind::Record { kind, tag, .. } => {
                let _ = match tag {
                    Some(t) => write!(s, "{} {}", kind.keyword(), t),
                    None => write!(s, "{} <anonymous>", kind.keyword()),
                };
            }
        }
        s
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounds `n` up to the next multiple of `align`.
pub fn round_up(n: u64, align: u64) -> u64 {
    if align == 0 {
        return n;
    }
    n.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizeof_builtin_types() {
        let pool = TypePool::new();
        assert_eq!(pool.size(TypePool::BOOL), Some(1));
        assert_eq!(pool.size(TypePool::CHAR), Some(1));
        assert_eq!(pool.size(TypePool::SHORT), Some(2));
        assert_eq!(pool.size(TypePool::INT), Some(4));
        assert_eq!(pool.size(TypePool::LONG), Some(8));
        assert_eq!(pool.size(TypePool::VOID), None);
    }

    #[test]
    fn sizeof_pointer_is_eight() {
        let mut pool = TypePool::new();
        let p = pool.pointer_to(TypePool::CHAR);
        assert_eq!(pool.size(p), Some(8));
        assert_eq!(pool.align(p), Some(8));
    }

    #[test]
    fn sizeof_array_multiplies() {
        let mut pool = TypePool::new();
        let a = pool.array_of(TypePool::INT, Some(5));
        assert_eq!(pool.size(a), Some(20));
        assert_eq!(pool.align(a), Some(4));

        let incomplete = pool.array_of(TypePool::INT, None);
        assert_eq!(pool.size(incomplete), None);
    }

    #[test]
    fn struct_layout_pads_and_rounds() {
        let mut pool = TypePool::new();
        // struct { char c; int i; char d; } -> offsets 0, 4, 8; size 12.
        let s = pool.declare_record(RecordKind::Struct, Some("s"));
        pool.complete_record(
            s,
            vec![
                ("c".into(), TypePool::CHAR),
                ("i".into(), TypePool::INT),
                ("d".into(), TypePool::CHAR),
            ],
        );
        assert_eq!(pool.size(s), Some(12));
        assert_eq!(pool.align(s), Some(4));
        assert_eq!(pool.member(s, "i").unwrap().offset, 4);
        assert_eq!(pool.member(s, "d").unwrap().offset, 8);
    }

    #[test]
    fn nested_struct_layout() {
        let mut pool = TypePool::new();
        // struct inner { long a; int b; };           size 16, align 8
        // struct outer { int x; struct inner in; long y; };
        //   x at 0, in at 8 (size 16), y at 24 -> total 32.
        let inner = pool.declare_record(RecordKind::Struct, Some("inner"));
        pool.complete_record(
            inner,
            vec![("a".into(), TypePool::LONG), ("b".into(), TypePool::INT)],
        );
        assert_eq!(pool.size(inner), Some(16));

        let outer = pool.declare_record(RecordKind::Struct, Some("outer"));
        pool.complete_record(
            outer,
            vec![
                ("x".into(), TypePool::INT),
                ("in".into(), inner),
                ("y".into(), TypePool::LONG),
            ],
        );
        assert_eq!(pool.size(outer), Some(32));
        assert_eq!(pool.member(outer, "in").unwrap().offset, 8);
        assert_eq!(pool.member(outer, "y").unwrap().offset, 24);
    }

    #[test]
    fn union_layout_is_max() {
        let mut pool = TypePool::new();
        let u = pool.declare_record(RecordKind::Union, Some("u"));
        pool.complete_record(
            u,
            vec![("c".into(), TypePool::CHAR), ("l".into(), TypePool::LONG)],
        );
        assert_eq!(pool.size(u), Some(8));
        assert_eq!(pool.align(u), Some(8));
        assert_eq!(pool.member(u, "l").unwrap().offset, 0);
    }

    #[test]
    fn compatibility_symmetric_and_reflexive() {
        let mut pool = TypePool::new();
        let p_int = pool.pointer_to(TypePool::INT);
        let arr = pool.array_of(TypePool::INT, Some(4));
        let arr_inc = pool.array_of(TypePool::INT, None);

        for &t in &[TypePool::INT, TypePool::ULONG, p_int, arr] {
            assert!(pool.compatible(t, t));
        }
        assert!(pool.compatible(arr, arr_inc));
        assert!(pool.compatible(arr_inc, arr));
        assert!(!pool.compatible(TypePool::INT, TypePool::UINT));
        assert!(!pool.compatible(p_int, TypePool::LONG));
    }

    #[test]
    fn record_identity_not_structural() {
        let mut pool = TypePool::new();
        let a = pool.declare_record(RecordKind::Struct, Some("t"));
        let b = pool.declare_record(RecordKind::Struct, Some("t"));
        pool.complete_record(a, vec![("x".into(), TypePool::INT)]);
        pool.complete_record(b, vec![("x".into(), TypePool::INT)]);
        assert!(pool.compatible(a, a));
        assert!(!pool.compatible(a, b));
    }

    #[test]
    fn composite_completes_array() {
        let mut pool = TypePool::new();
        let complete = pool.array_of(TypePool::INT, Some(8));
        let incomplete = pool.array_of(TypePool::INT, None);

        let c1 = pool.composite(complete, incomplete);
        let c2 = pool.composite(incomplete, complete);
        assert_eq!(pool.array_len(c1), Some(8));
        assert_eq!(c1, c2);
    }

    #[test]
    fn integer_promotion_to_int() {
        let pool = TypePool::new();
        assert_eq!(pool.promoted(TypePool::CHAR), TypePool::INT);
        assert_eq!(pool.promoted(TypePool::BOOL), TypePool::INT);
        assert_eq!(pool.promoted(TypePool::SHORT), TypePool::INT);
        assert_eq!(pool.promoted(TypePool::UINT), TypePool::UINT);
        assert_eq!(pool.promoted(TypePool::LONG), TypePool::LONG);
    }

    #[test]
    fn usual_arithmetic_ladder() {
        let pool = TypePool::new();
        assert_eq!(
            pool.usual_arith(TypePool::ULONG, TypePool::INT),
            TypePool::ULONG
        );
        assert_eq!(
            pool.usual_arith(TypePool::LONG, TypePool::UINT),
            TypePool::LONG
        );
        assert_eq!(
            pool.usual_arith(TypePool::LONG, TypePool::CHAR),
            TypePool::LONG
        );
        assert_eq!(
            pool.usual_arith(TypePool::UINT, TypePool::INT),
            TypePool::UINT
        );
        assert_eq!(
            pool.usual_arith(TypePool::SHORT, TypePool::CHAR),
            TypePool::INT
        );
    }

    #[test]
    fn conversion_classifier() {
        let mut pool = TypePool::new();
        let p_int = pool.pointer_to(TypePool::INT);
        let p_long = pool.pointer_to(TypePool::LONG);
        let p_void = pool.pointer_to(TypePool::VOID);

        assert_eq!(
            pool.classify_conversion(TypePool::INT, TypePool::INT, false),
            Conversion::Identity
        );
        assert_eq!(
            pool.classify_conversion(p_int, p_void, false),
            Conversion::PointerToVoid
        );
        assert_eq!(
            pool.classify_conversion(p_int, p_long, false),
            Conversion::IncompatiblePointerWarning
        );
        assert_eq!(
            pool.classify_conversion(TypePool::INT, p_int, true),
            Conversion::NullPointerConstant
        );
        assert_eq!(
            pool.classify_conversion(TypePool::INT, p_int, false),
            Conversion::Forbidden
        );
        assert_eq!(
            pool.classify_conversion(p_int, TypePool::VOID, false),
            Conversion::Forbidden
        );
    }

    #[test]
    fn qualifier_loss_through_pointer() {
        let mut pool = TypePool::new();
        let const_int = TypePool::INT.qualified_const();
        let p_cint = pool.pointer_to(const_int);
        let p_int = pool.pointer_to(TypePool::INT);

        // Adding const to the pointee is fine; dropping it is not.
        assert_eq!(
            pool.classify_conversion(p_int, p_cint, false),
            Conversion::Identity
        );
        assert_eq!(
            pool.classify_conversion(p_cint, p_int, false),
            Conversion::IncompatiblePointerWarning
        );
    }
}
