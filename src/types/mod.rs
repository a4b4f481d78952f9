//! Types and the type arena (spec §3 "Type", §4.1 "Arenas & Values").
//!
//! Every `Type` is owned by a `TypeArena` and referred to by `TypeId`.
//! Scalars, pointers, arrays and function types are structurally interned
//! (two lookups for `*s32` hand back the same id); structs and enums are
//! *not* interned — each declaration gets its own arena slot and compares by
//! identity, exactly as spec §4.3 requires ("structs and enums compare by
//! identity because of possible forward declarations").

use crate::arena::{Arena, Id};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

pub type TypeId = Id<Type>;

/// A named, byte-offset member of a struct type (spec §3 "Member").
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: TypeId,
    pub index: usize,
    pub offset: u32,
}

/// A named variant of an enum type (spec §3 "Variant").
#[derive(Debug, Clone)]
pub struct Variant {
    pub name: String,
    pub index: usize,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Bool,
    Int { bits: u8, signed: bool },
    Real { bits: u8 },
    Pointer { pointee: TypeId },
    Array { elem: TypeId, len: usize },
    Slice { elem: TypeId },
    Fn { args: Vec<TypeId>, ret: TypeId, vargs: bool },
    /// Struct types are never interned; `members`/`variants` live alongside
    /// the `Type` itself rather than in `TypeKind` so `Hash`/`Eq` (used only
    /// for interning the structural kinds above) stay cheap.
    Struct(u32),
    Enum(u32),
    String,
    VArgs,
    Null,
    /// `type` — the type of a resolved type value, used by `Sizeof`,
    /// `Alignof`, `TypeInfo` and type-resolver thunks (spec §4.2).
    TypeOfTypes,
}

#[derive(Debug, Clone)]
pub struct StructBody {
    pub name: Option<String>,
    pub members: Vec<Member>,
    pub is_packed: bool,
    pub base: Option<TypeId>,
}

#[derive(Debug, Clone)]
pub struct EnumBody {
    pub name: Option<String>,
    pub base: TypeId,
    pub variants: Vec<Variant>,
}

/// LLVM handle, materialized lazily once the analyzer has finished sizing a
/// type (spec §4.3 "LLVM-type materialization"). The real handle only
/// exists behind the `llvm` feature; the core never emits code either way.
#[derive(Debug, Clone, Default)]
pub struct LlvmTypeHandle {
    #[cfg(feature = "llvm")]
    pub materialized: bool,
    #[cfg(not(feature = "llvm"))]
    _private: (),
}

#[derive(Debug, Clone)]
pub struct Type {
    pub kind: TypeKind,
    pub store_size_bytes: u32,
    pub align_bytes: u32,
    pub id_hash: u64,
    pub name: Option<String>,
    pub llvm: LlvmTypeHandle,
}

/// Owns every `Type` plus the struct/enum bodies that don't fit in
/// `TypeKind`, the builtin identifier table (spec §6), and the interning
/// map for structural kinds.
pub struct TypeArena {
    arena: Arena<Type>,
    structs: Vec<StructBody>,
    enums: Vec<EnumBody>,
    interned: HashMap<TypeKind, TypeId>,
    pub builtins: HashMap<&'static str, TypeId>,

    pub void: TypeId,
    pub bool_: TypeId,
    pub null: TypeId,
    pub string: TypeId,
    pub type_of_types: TypeId,
}

impl TypeArena {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let mut interned = HashMap::new();

        let mut intern_scalar = |arena: &mut Arena<Type>,
                                  interned: &mut HashMap<TypeKind, TypeId>,
                                  kind: TypeKind,
                                  size: u32,
                                  align: u32| {
            let id = arena.alloc(Type {
                kind: kind.clone(),
                store_size_bytes: size,
                align_bytes: align,
                id_hash: hash_kind(&kind),
                name: None,
                llvm: LlvmTypeHandle::default(),
            });
            interned.insert(kind, id);
            id
        };

        let void = intern_scalar(&mut arena, &mut interned, TypeKind::Void, 0, 1);
        let bool_ = intern_scalar(&mut arena, &mut interned, TypeKind::Bool, 1, 1);
        let null = intern_scalar(&mut arena, &mut interned, TypeKind::Null, 8, 8);
        let string = intern_scalar(&mut arena, &mut interned, TypeKind::String, 16, 8);
        let type_of_types = intern_scalar(&mut arena, &mut interned, TypeKind::TypeOfTypes, 8, 8);

        let mut this = Self {
            arena,
            structs: Vec::new(),
            enums: Vec::new(),
            interned,
            builtins: HashMap::new(),
            void,
            bool_,
            null,
            string,
            type_of_types,
        };

        // Builtin identifier table (spec §6): reserved names map to
        // pre-constructed scalar types, initialized once at module creation
        // (spec §9 "Global mutable state... make these fields of the module").
        for (name, bits) in [("s8", 8), ("s16", 16), ("s32", 32), ("s64", 64)] {
            let id = this.intern_int(bits, true);
            this.builtins.insert(name, id);
        }
        for (name, bits) in [("u8", 8), ("u16", 16), ("u32", 32), ("u64", 64)] {
            let id = this.intern_int(bits, false);
            this.builtins.insert(name, id);
        }
        let usize_ty = this.intern_int(64, false);
        this.builtins.insert("usize", usize_ty);
        let f32_ty = this.intern_real(32);
        let f64_ty = this.intern_real(64);
        this.builtins.insert("f32", f32_ty);
        this.builtins.insert("f64", f64_ty);
        this.builtins.insert("bool", bool_);
        this.builtins.insert("void", void);
        this.builtins.insert("null", null);
        this.builtins.insert("string", string);
        this.builtins.insert("type", type_of_types);

        this
    }

    fn intern(&mut self, kind: TypeKind, size: u32, align: u32) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = self.arena.alloc(Type {
            kind: kind.clone(),
            store_size_bytes: size,
            align_bytes: align,
            id_hash: hash_kind(&kind),
            name: None,
            llvm: LlvmTypeHandle::default(),
        });
        self.interned.insert(kind, id);
        id
    }

    pub fn intern_int(&mut self, bits: u8, signed: bool) -> TypeId {
        let bytes = (bits as u32).div_ceil(8).next_power_of_two().max(1);
        self.intern(TypeKind::Int { bits, signed }, bytes, bytes)
    }

    pub fn intern_real(&mut self, bits: u8) -> TypeId {
        let bytes = (bits / 8) as u32;
        self.intern(TypeKind::Real { bits }, bytes, bytes)
    }

    pub fn intern_pointer(&mut self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer { pointee }, 8, 8)
    }

    pub fn intern_array(&mut self, elem: TypeId, len: usize) -> TypeId {
        let elem_size = self.get(elem).store_size_bytes;
        let align = self.get(elem).align_bytes;
        let size = elem_size * len as u32;
        self.intern(TypeKind::Array { elem, len }, size, align.max(1))
    }

    pub fn intern_slice(&mut self, elem: TypeId) -> TypeId {
        // {ptr, len} — two 8-byte words (spec §4.4 ElemPtr "slice indexing
        // reads ptr and len members at their struct offsets").
        self.intern(TypeKind::Slice { elem }, 16, 8)
    }

    pub fn intern_vargs(&mut self) -> TypeId {
        self.intern(TypeKind::VArgs, 16, 8)
    }

    pub fn intern_fn(&mut self, args: Vec<TypeId>, ret: TypeId, vargs: bool) -> TypeId {
        self.intern(TypeKind::Fn { args, ret, vargs }, 8, 8)
    }

    /// Allocate a fresh (non-interned) struct type. `layout` is called once
    /// the member list and offsets are known.
    pub fn alloc_struct(&mut self, name: Option<String>, is_packed: bool, base: Option<TypeId>) -> TypeId {
        let slot = self.structs.len() as u32;
        self.structs.push(StructBody {
            name: name.clone(),
            members: Vec::new(),
            is_packed,
            base,
        });
        self.arena.alloc(Type {
            kind: TypeKind::Struct(slot),
            store_size_bytes: 0,
            align_bytes: 1,
            id_hash: hash_identity(slot, true),
            name,
            llvm: LlvmTypeHandle::default(),
        })
    }

    /// Fill a previously allocated struct's members and compute its layout
    /// (spec §4.3 "LLVM-type materialization... computes size and alignment").
    pub fn set_struct_members(&mut self, id: TypeId, fields: Vec<(String, TypeId)>) {
        let slot = match self.get(id).kind {
            TypeKind::Struct(s) => s,
            _ => panic!("set_struct_members on non-struct type"),
        };
        let is_packed = self.structs[slot as usize].is_packed;
        let mut offset: u32 = 0;
        let mut max_align: u32 = 1;
        let mut members = Vec::with_capacity(fields.len());
        for (index, (name, ty)) in fields.into_iter().enumerate() {
            let (size, align) = {
                let t = self.get(ty);
                (t.store_size_bytes, t.align_bytes)
            };
            let align = if is_packed { 1 } else { align.max(1) };
            offset = align_up(offset, align);
            members.push(Member {
                name,
                ty,
                index,
                offset,
            });
            offset += size;
            max_align = max_align.max(align);
        }
        let size = if is_packed { offset } else { align_up(offset, max_align) };
        self.structs[slot as usize].members = members;
        let t = self.arena.get_mut(id);
        t.store_size_bytes = size;
        t.align_bytes = if is_packed { 1 } else { max_align };
    }

    pub fn alloc_enum(&mut self, name: Option<String>, base: TypeId) -> TypeId {
        let slot = self.enums.len() as u32;
        self.enums.push(EnumBody {
            name: name.clone(),
            base,
            variants: Vec::new(),
        });
        let (size, align) = {
            let t = self.get(base);
            (t.store_size_bytes, t.align_bytes)
        };
        self.arena.alloc(Type {
            kind: TypeKind::Enum(slot),
            store_size_bytes: size,
            align_bytes: align,
            id_hash: hash_identity(slot, false),
            name,
            llvm: LlvmTypeHandle::default(),
        })
    }

    pub fn set_enum_variants(&mut self, id: TypeId, variants: Vec<(String, i64)>) {
        let slot = match self.get(id).kind {
            TypeKind::Enum(s) => s,
            _ => panic!("set_enum_variants on non-enum type"),
        };
        let built = variants
            .into_iter()
            .enumerate()
            .map(|(index, (name, value))| Variant { name, index, value })
            .collect();
        self.enums[slot as usize].variants = built;
    }

    pub fn get(&self, id: TypeId) -> &Type {
        self.arena.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.arena.ids()
    }

    /// Marks `id` as having a successfully built LLVM handle (spec §4.3
    /// "LLVM-type materialization"). The handle itself is never cached on
    /// `Type` — `inkwell` types carry the issuing `Context`'s lifetime,
    /// which `TypeArena` has no room for, so a downstream codegen pass
    /// rebuilds it on demand from `TypeKind`, exactly as the teacher's own
    /// `mir_type_to_llvm` does; this flag only records that materialization
    /// was attempted and succeeded.
    #[cfg(feature = "llvm")]
    pub fn mark_llvm_materialized(&mut self, id: TypeId) {
        self.arena.get_mut(id).llvm.materialized = true;
    }

    pub fn struct_body(&self, id: TypeId) -> &StructBody {
        match self.get(id).kind {
            TypeKind::Struct(s) => &self.structs[s as usize],
            _ => panic!("struct_body on non-struct type"),
        }
    }

    pub fn enum_body(&self, id: TypeId) -> &EnumBody {
        match self.get(id).kind {
            TypeKind::Enum(s) => &self.enums[s as usize],
            _ => panic!("enum_body on non-enum type"),
        }
    }

    pub fn member(&self, struct_ty: TypeId, name: &str) -> Option<&Member> {
        self.struct_body(struct_ty).members.iter().find(|m| m.name == name)
    }

    /// Like [`Self::struct_body`] but returns an empty member list instead
    /// of panicking when `id` isn't a struct (used for "did you mean"
    /// suggestions on an unknown member name).
    pub fn struct_body_or(&self, id: TypeId) -> &[Member] {
        match self.get(id).kind {
            TypeKind::Struct(s) => &self.structs[s as usize].members,
            _ => &[],
        }
    }

    /// Structural type equality (spec §4.3 "Type equality"). Struct/enum
    /// types compare by arena identity only; everything else recurses
    /// structurally, which is sound because scalars/pointers/arrays/slices/
    /// fn types are interned (identical structure ⇒ identical `TypeId`).
    pub fn type_cmp(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (&self.get(a).kind, &self.get(b).kind) {
            (TypeKind::Pointer { pointee: p1 }, TypeKind::Pointer { pointee: p2 }) => {
                self.type_cmp(*p1, *p2)
            }
            (TypeKind::Array { elem: e1, len: l1 }, TypeKind::Array { elem: e2, len: l2 }) => {
                l1 == l2 && self.type_cmp(*e1, *e2)
            }
            (TypeKind::Slice { elem: e1 }, TypeKind::Slice { elem: e2 }) => self.type_cmp(*e1, *e2),
            (
                TypeKind::Fn { args: a1, ret: r1, vargs: v1 },
                TypeKind::Fn { args: a2, ret: r2, vargs: v2 },
            ) => {
                v1 == v2
                    && a1.len() == a2.len()
                    && a1.iter().zip(a2).all(|(x, y)| self.type_cmp(*x, *y))
                    && self.type_cmp(*r1, *r2)
            }
            _ => false,
        }
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Int { .. })
    }

    pub fn is_pointer_like(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Pointer { .. } | TypeKind::Null)
    }

    pub fn is_real(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Real { .. })
    }

    pub fn is_bool(&self, id: TypeId) -> bool {
        id == self.bool_
    }
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_kind(kind: &TypeKind) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    kind.hash(&mut hasher);
    hasher.finish()
}

/// Identity hash for non-interned (struct/enum) types: distinct per
/// declaration, independent of field content, since two structurally
/// identical struct declarations are still distinct types (spec §4.3).
fn hash_identity(slot: u32, is_struct: bool) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    is_struct.hash(&mut hasher);
    slot.hash(&mut hasher);
    hasher.finish()
}

fn align_up(offset: u32, align: u32) -> u32 {
    if align == 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}

/// Cast opcode selected for an *explicit* cast (spec §4.3 "Cast opcode
/// selection"), keyed by `(src_kind, dst_kind, signedness, bit-width
/// relation)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Bitcast,
    SExt,
    ZExt,
    Trunc,
    FpTrunc,
    FpExt,
    FpToSi,
    FpToUi,
    SiToFp,
    UiToFp,
    PtrToInt,
    IntToPtr,
    None,
}

/// `None` means the cast is not permitted by the fixed table.
pub fn select_cast_op(types: &TypeArena, src: TypeId, dst: TypeId) -> Option<CastOp> {
    if types.type_cmp(src, dst) {
        return Some(CastOp::None);
    }
    let src_kind = &types.get(src).kind;
    let dst_kind = &types.get(dst).kind;
    match (src_kind, dst_kind) {
        (TypeKind::Int { bits: sb, signed: ss }, TypeKind::Int { bits: db, .. }) => {
            Some(match sb.cmp(db) {
                std::cmp::Ordering::Less if *ss => CastOp::SExt,
                std::cmp::Ordering::Less => CastOp::ZExt,
                std::cmp::Ordering::Greater => CastOp::Trunc,
                std::cmp::Ordering::Equal => CastOp::Bitcast,
            })
        }
        (TypeKind::Real { bits: sb }, TypeKind::Real { bits: db }) => Some(if sb < db {
            CastOp::FpExt
        } else {
            CastOp::FpTrunc
        }),
        (TypeKind::Real { .. }, TypeKind::Int { signed: true, .. }) => Some(CastOp::FpToSi),
        (TypeKind::Real { .. }, TypeKind::Int { signed: false, .. }) => Some(CastOp::FpToUi),
        (TypeKind::Int { signed: true, .. }, TypeKind::Real { .. }) => Some(CastOp::SiToFp),
        (TypeKind::Int { signed: false, .. }, TypeKind::Real { .. }) => Some(CastOp::UiToFp),
        (TypeKind::Pointer { .. }, TypeKind::Int { .. }) => Some(CastOp::PtrToInt),
        (TypeKind::Int { .. }, TypeKind::Pointer { .. }) => Some(CastOp::IntToPtr),
        (TypeKind::Pointer { .. }, TypeKind::Pointer { .. }) => Some(CastOp::Bitcast),
        (TypeKind::Null, TypeKind::Pointer { .. }) => Some(CastOp::Bitcast),
        (TypeKind::Enum(_), TypeKind::Int { .. }) => Some(CastOp::Bitcast),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_types_are_interned() {
        let mut t = TypeArena::new();
        let a = t.intern_int(32, true);
        let b = t.intern_int(32, true);
        assert_eq!(a, b);
        let c = t.intern_int(32, false);
        assert_ne!(a, c);
    }

    #[test]
    fn structurally_equal_pointer_types_compare_equal() {
        let mut t = TypeArena::new();
        let i32_a = t.intern_int(32, true);
        let i32_b = t.intern_int(32, true);
        let p1 = t.intern_pointer(i32_a);
        let p2 = t.intern_pointer(i32_b);
        assert_eq!(p1, p2); // same interned id
        assert!(t.type_cmp(p1, p2));
    }

    #[test]
    fn structs_compare_by_identity_even_if_structurally_identical() {
        let mut t = TypeArena::new();
        let i32_ty = t.intern_int(32, true);
        let s1 = t.alloc_struct(Some("Point".into()), false, None);
        t.set_struct_members(s1, vec![("x".into(), i32_ty), ("y".into(), i32_ty)]);
        let s2 = t.alloc_struct(Some("Point".into()), false, None);
        t.set_struct_members(s2, vec![("x".into(), i32_ty), ("y".into(), i32_ty)]);
        assert_ne!(s1, s2);
        assert!(!t.type_cmp(s1, s2));
    }

    #[test]
    fn struct_layout_matches_offsets() {
        let mut t = TypeArena::new();
        let i8_ty = t.intern_int(8, true);
        let i32_ty = t.intern_int(32, true);
        let s = t.alloc_struct(Some("S".into()), false, None);
        t.set_struct_members(s, vec![("a".into(), i8_ty), ("b".into(), i32_ty)]);
        let members = &t.struct_body(s).members;
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 4); // padded for i32 alignment
        assert_eq!(t.get(s).store_size_bytes, 8);
    }

    #[test]
    fn cast_table_selects_sext_for_widening_signed_int() {
        let mut t = TypeArena::new();
        let s8 = t.intern_int(8, true);
        let s32 = t.intern_int(32, true);
        assert_eq!(select_cast_op(&t, s8, s32), Some(CastOp::SExt));
        assert_eq!(select_cast_op(&t, s32, s8), Some(CastOp::Trunc));
    }
}
