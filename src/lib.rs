//! MIR subsystem and compile-time VM for an ahead-of-time systems language:
//! an arena-based instruction representation, a waiting-table analyzer that
//! resolves names and types over it, and a tree-walking virtual machine
//! that executes analyzed MIR directly (entry points, `#test` functions,
//! and FFI calls into dynamically loaded libraries).

pub mod analyzer;
pub mod arena;
pub mod ast;
pub mod codegen;
pub mod driver;
pub mod error;
pub mod mir;
pub mod types;
pub mod vm;

pub use ast::Span;
pub use error::{CompileError, Result};
