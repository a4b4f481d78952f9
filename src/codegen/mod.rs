//! LLVM handle materialization.
//!
//! No codegen pass lives here — source parsing, LLVM IR emission, and
//! native linking are explicit non-goals. What this module does carry is
//! the `Module`'s LLVM context handle (spec §3): when the `llvm` feature is
//! enabled it is a real `inkwell::context::Context`; otherwise it's a unit
//! placeholder so `Mir::llvm_context` still type-checks with the feature
//! off.

#[cfg(feature = "llvm")]
pub use inkwell::context::Context as LlvmContext;

#[cfg(not(feature = "llvm"))]
#[derive(Debug, Default)]
pub struct LlvmContext;

#[cfg(not(feature = "llvm"))]
impl LlvmContext {
    pub fn create() -> Self {
        LlvmContext
    }
}
