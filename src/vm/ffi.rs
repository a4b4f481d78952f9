//! Foreign-function bridge (spec §4.4.1): resolves `extern` functions
//! against dynamically loaded libraries and marshals arguments across the
//! boundary using a fixed per-type tag table.
//!
//! There is no `libffi`-style universal call trampoline in this crate's
//! dependency stack — `libloading` only gets you a raw symbol pointer, not
//! a generic caller — so calls are dispatched through a small table of
//! hand-written `extern "C"` shapes instead. Every argument and the return
//! value are treated as one word; this covers the scalar/pointer arity the
//! example programs (spec §8 scenario 8, `puts`) actually call, not an
//! arbitrary C ABI.
//!
//! Out of scope: spec §4.4.1's second paragraph, wrapping a function
//! pointer *passed to* an extern call in a generated callback that
//! re-enters the interpreter when foreign code invokes it. The original's
//! `vm.c` builds that trampoline on `dyncall`'s `DCCallback`, a reverse-FFI
//! facility nothing in this crate's dependency stack provides; `libloading`
//! only resolves symbols outward. Building one by hand here would mean
//! authoring untested unsafe calling-convention code this crate has no way
//! to exercise, so the bridge only supports the outward direction (this
//! crate calling into a library), and the §5 main-thread assertion that
//! would guard a callback's re-entry is cut along with it — see
//! DESIGN.md's Open Questions.

use std::collections::HashMap;
use std::ffi::CString;

use libloading::{Library, Symbol};

use crate::mir::{AddrMode, ConstData, ConstValue, FuncId, Mir, Scalar};
use crate::types::{TypeArena, TypeId, TypeKind};

use super::{RuntimeFault, VResult};

const MAX_ARITY: usize = 4;

/// Per-type signature tag (spec §4.4.1: `u8→B/c`, `u16→s/S`, `u32→i/I`,
/// `u64→l/L`, `f32→f`, `f64→d`, pointer→`p`, void→`v`, struct→recursive
/// field expansion).
fn type_tag(types: &TypeArena, ty: TypeId) -> String {
    match &types.get(ty).kind {
        TypeKind::Void => "v".to_string(),
        TypeKind::Bool => "B".to_string(),
        TypeKind::Int { bits: 8, signed } => if *signed { "c" } else { "C" }.to_string(),
        TypeKind::Int { bits: 16, signed } => if *signed { "s" } else { "S" }.to_string(),
        TypeKind::Int { bits: 32, signed } => if *signed { "i" } else { "I" }.to_string(),
        TypeKind::Int { bits: 64, signed } => if *signed { "l" } else { "L" }.to_string(),
        TypeKind::Int { signed, .. } => if *signed { "i" } else { "I" }.to_string(),
        TypeKind::Real { bits: 32 } => "f".to_string(),
        TypeKind::Real { .. } => "d".to_string(),
        TypeKind::Pointer { .. } | TypeKind::Null | TypeKind::String => "p".to_string(),
        TypeKind::Struct(_) => types.struct_body(ty).members.iter().map(|m| type_tag(types, m.ty)).collect(),
        _ => "p".to_string(),
    }
}

/// Builds the `"ii)i"`-style signature string for a function type
/// (spec §4.4.1). Cached per function, not used by the bounded-arity
/// dispatch itself — it documents the ABI shape a real trampoline would
/// need, and is what a diagnostic or `--verbose` trace would print.
pub fn signature_string(types: &TypeArena, fn_ty: TypeId) -> String {
    match &types.get(fn_ty).kind {
        TypeKind::Fn { args, ret, .. } => {
            let params: String = args.iter().map(|&a| type_tag(types, a)).collect();
            format!("{params}){}", type_tag(types, *ret))
        }
        _ => "v)v".to_string(),
    }
}

/// Loaded libraries and per-function signature cache, keyed the way
/// `Function`'s doc comment calls for: so a `libloading::Library` can
/// outlive any single call through it.
pub struct FfiTable {
    libraries: HashMap<String, Library>,
    signatures: HashMap<FuncId, String>,
}

impl FfiTable {
    pub fn new() -> Self {
        Self {
            libraries: HashMap::new(),
            signatures: HashMap::new(),
        }
    }

    /// Loads `name`, trying the bare name and the platform's conventional
    /// shared-object naming in turn (spec §6 "Environment: PATH for
    /// library search" — the platform loader already walks `PATH`/
    /// `LD_LIBRARY_PATH` once handed a candidate file name).
    fn library_for(&mut self, name: &str) -> VResult<&Library> {
        if !self.libraries.contains_key(name) {
            let candidates = [name.to_string(), format!("lib{name}.so"), format!("lib{name}.dylib"), format!("{name}.dll")];
            let mut loaded = None;
            for candidate in &candidates {
                if let Ok(lib) = unsafe { Library::new(candidate) } {
                    loaded = Some(lib);
                    break;
                }
            }
            let lib = loaded.ok_or_else(|| RuntimeFault::LibNotFound(name.to_string()))?;
            self.libraries.insert(name.to_string(), lib);
        }
        Ok(self.libraries.get(name).unwrap())
    }

    /// Dispatches an extern call: resolves the symbol, marshals `args` into
    /// word-sized integers, calls through a bounded-arity shape, and reads
    /// the result back per the function's return type (spec §4.4.1).
    pub fn call(&mut self, mir: &Mir, func: FuncId, args: &[ConstValue]) -> VResult<ConstValue> {
        let f = &mir.funcs[func];
        let lib_name = f.extern_lib.clone().unwrap_or_else(|| "c".to_string());
        let symbol_name = f.extern_symbol.clone().or_else(|| f.name.clone()).unwrap_or_default();
        self.signatures.entry(func).or_insert_with(|| signature_string(&mir.types, f.ty));

        if args.len() > MAX_ARITY {
            return Err(RuntimeFault::SymbolNotFound(symbol_name));
        }

        let lib = self.library_for(&lib_name)?;
        let raw: Vec<i64> = args.iter().map(scalar_as_i64).collect();

        let result: i64 = unsafe {
            let sym: Symbol<unsafe extern "C" fn() -> i64> =
                lib.get(symbol_name.as_bytes()).map_err(|_| RuntimeFault::SymbolNotFound(symbol_name.clone()))?;
            let raw_ptr = (*sym) as usize as *const ();
            call_bounded(raw_ptr, &raw)
        };

        let ret_ty = match &mir.types.get(f.ty).kind {
            TypeKind::Fn { ret, .. } => *ret,
            _ => mir.types.void,
        };
        Ok(int_as_scalar(&mir.types, ret_ty, result))
    }
}

impl Default for FfiTable {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_as_i64(v: &ConstValue) -> i64 {
    match &v.data {
        ConstData::Scalar(Scalar::Int(n)) => *n,
        ConstData::Scalar(Scalar::UInt(n)) => *n as i64,
        ConstData::Scalar(Scalar::Bool(b)) => *b as i64,
        ConstData::Scalar(Scalar::Ptr(p)) => *p as i64,
        ConstData::Scalar(Scalar::Real(f)) => f.to_bits() as i64,
        ConstData::Scalar(Scalar::Str(s)) => {
            // Materialized into a real C string for the call; leaked on
            // purpose, since the callee may retain the pointer past the
            // call's return and there's no ownership protocol to reclaim it.
            CString::new(s.as_str()).map(|c| c.into_raw() as i64).unwrap_or(0)
        }
        _ => 0,
    }
}

fn int_as_scalar(types: &TypeArena, ty: TypeId, raw: i64) -> ConstValue {
    match &types.get(ty).kind {
        TypeKind::Void => ConstValue { ty, data: ConstData::ZeroInit, addr_mode: AddrMode::RValue, comptime: false },
        TypeKind::Bool => ConstValue::scalar(ty, Scalar::Bool(raw != 0)),
        TypeKind::Int { signed: false, .. } => ConstValue::scalar(ty, Scalar::UInt(raw as u64)),
        TypeKind::Pointer { .. } => ConstValue::scalar(ty, Scalar::Ptr(raw as u64)),
        TypeKind::Real { .. } => ConstValue::scalar(ty, Scalar::Real(f64::from_bits(raw as u64))),
        _ => ConstValue::scalar(ty, Scalar::Int(raw)),
    }
}

/// Calls `f` reinterpreted to the shape matching `args.len()` (0 to
/// `MAX_ARITY` word-sized arguments, `i64` return).
unsafe fn call_bounded(f: *const (), args: &[i64]) -> i64 {
    match args.len() {
        0 => {
            let f: unsafe extern "C" fn() -> i64 = std::mem::transmute(f);
            f()
        }
        1 => {
            let f: unsafe extern "C" fn(i64) -> i64 = std::mem::transmute(f);
            f(args[0])
        }
        2 => {
            let f: unsafe extern "C" fn(i64, i64) -> i64 = std::mem::transmute(f);
            f(args[0], args[1])
        }
        3 => {
            let f: unsafe extern "C" fn(i64, i64, i64) -> i64 = std::mem::transmute(f);
            f(args[0], args[1], args[2])
        }
        _ => {
            let f: unsafe extern "C" fn(i64, i64, i64, i64) -> i64 = std::mem::transmute(f);
            f(args[0], args[1], args[2], args[3])
        }
    }
}
