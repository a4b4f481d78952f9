//! Pipeline orchestration (AST → MIR → analyze → execute), mirroring the
//! teacher's `build/mod.rs` but over the core's actual scope: there is no
//! lexer/parser stage here (an `ast::Program` is the input), and no
//! codegen pass runs regardless of flags — the configuration bitset still
//! carries `emit-llvm`/`no-bin`/etc. because collaborators one layer out
//! (spec §6) expect to see them, but this core only ever analyzes and
//! (optionally) executes.

use std::path::PathBuf;

use bitflags::bitflags;
use thiserror::Error;

use crate::analyzer;
use crate::ast::Program;
use crate::error::{CompileError, ConsoleSink, DiagnosticSink};
use crate::mir::builder::lower_program;
use crate::mir::Mir;
use crate::vm::Vm;

bitflags! {
    /// Driver configuration bitset (spec §6 "Configuration flags").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverFlags: u32 {
        const LOAD_FROM_FILE   = 1 << 0;
        const PRINT_TOKENS     = 1 << 1;
        const PRINT_AST        = 1 << 2;
        const EMIT_LLVM        = 1 << 3;
        const EMIT_MIR         = 1 << 4;
        const NO_BIN           = 1 << 5;
        const NO_WARN          = 1 << 6;
        const VERBOSE          = 1 << 7;
        const NO_API           = 1 << 8;
        const FORCE_TEST_LLVM  = 1 << 9;
        const RUN              = 1 << 10;
        const RUN_TESTS        = 1 << 11;
        const SYNTAX_ONLY      = 1 << 12;
        const DEBUG_BUILD      = 1 << 13;
    }
}

impl Default for DriverFlags {
    fn default() -> Self {
        DriverFlags::empty()
    }
}

/// Optimization level (spec §6: "none | less | default | aggressive"). No
/// optimization pass runs over MIR — the level is carried through so a
/// downstream collaborator's codegen pass can read it back, as spec §3's
/// Module handle implies, but this core neither reads nor acts on it
/// itself (MIR optimization is a Non-goal, spec §1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptLevel {
    #[default]
    None,
    Less,
    Default,
    Aggressive,
}

/// Driver-level configuration for one compilation unit.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub source_name: String,
    pub flags: DriverFlags,
    pub opt_level: OptLevel,
}

impl DriverConfig {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            flags: DriverFlags::empty(),
            opt_level: OptLevel::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{count} error(s) during analysis")]
    AnalysisFailed { count: usize },
}

/// Outcome of running a compiled-and-analyzed program through the VM, for
/// collaborators (e.g. `main.rs`) that want the exit status without
/// re-deriving it from `DriverFlags`.
#[derive(Debug, Default)]
pub struct RunReport {
    pub ran: bool,
    pub succeeded: bool,
    pub test_results: Vec<(String, bool)>,
}

/// Deserializes an AST document (spec §6 "Inputs consumed from
/// collaborators": AST is a tree of tagged nodes) from a JSON file on
/// disk, the concrete external interface SPEC_FULL.md §A stands in for
/// source parsing.
pub fn load_ast_json(path: &PathBuf) -> Result<Program, DriverError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Lowers `program` to MIR, analyzes it against a fresh diagnostic sink,
/// and, if the analysis was clean and `config.flags` ask for it, executes
/// the entry point and/or the test suite (spec §4.4.2).
pub fn run(program: &Program, config: &DriverConfig) -> Result<(Mir, RunReport), DriverError> {
    let mut mir = Mir::new();
    let build_result = lower_program(&mut mir, program);

    let mut sink = ConsoleSink::new(config.source_name.clone(), String::new());
    sink.warnings_enabled = !config.flags.contains(DriverFlags::NO_WARN);
    sink.machine_readable = config.flags.contains(DriverFlags::NO_API);
    for error in build_result.errors {
        sink.error(error);
    }
    for warning in build_result.warnings {
        sink.warning(warning);
    }

    if config.flags.contains(DriverFlags::VERBOSE) {
        eprintln!("lowered {} global instruction(s)", mir.globals.len());
    }

    analyzer::analyze(&mut mir, &build_result.global_scope, &mut sink);

    if sink.error_count() > 0 {
        return Err(DriverError::AnalysisFailed { count: sink.error_count() });
    }

    if config.flags.contains(DriverFlags::EMIT_MIR) {
        print!("{}", dump_mir(&mir));
    }

    let mut report = RunReport::default();
    if config.flags.contains(DriverFlags::SYNTAX_ONLY) {
        return Ok((mir, report));
    }

    let mut vm = Vm::new();
    if config.flags.contains(DriverFlags::RUN) {
        report.ran = true;
        report.succeeded = vm.run_entry(&mut mir);
    }
    if config.flags.contains(DriverFlags::RUN_TESTS) {
        report.test_results = vm.run_tests(&mut mir);
    }

    Ok((mir, report))
}

/// Renders a textual MIR dump (spec §6 on-disk artifact "optional MIR dump
/// (`.blm`)"), one function per paragraph, walking each block's
/// `entry`/`next` instruction chain in source order.
pub fn dump_mir(mir: &Mir) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for func_id in mir.funcs.ids() {
        let func = &mir.funcs[func_id];
        let _ = writeln!(out, "fn {}:", func.name.as_deref().unwrap_or("<anonymous>"));
        for block_id in mir.blocks.ids() {
            let b = &mir.blocks[block_id];
            if b.owner_fn != Some(func_id) {
                continue;
            }
            let _ = writeln!(out, "  {}:", b.label.as_deref().unwrap_or("<block>"));
            let mut inst = b.entry;
            while let Some(inst_id) = inst {
                let instruction = &mir.instrs[inst_id];
                let _ = writeln!(out, "    {:?} = {:?}", inst_id, instruction.kind);
                inst = instruction.next;
            }
        }
    }
    out
}

/// Exit-code mapping for the command-line surface (spec §6 "Exit codes").
pub fn exit_code_for(error: &CompileError) -> i32 {
    match error {
        CompileError::UnknownSymbol { .. } => 1,
        CompileError::DuplicateSymbol { .. } => 2,
        CompileError::TypeMismatch { .. } => 3,
        CompileError::InvalidArgCount { .. } => 4,
        CompileError::MissingReturn { .. } => 5,
        CompileError::LibNotFound { .. } => 6,
        CompileError::SymbolNotFound { .. } => 7,
        CompileError::InvalidExpression { .. } => 8,
        CompileError::InvalidCast { .. } => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder as b;

    #[test]
    fn clean_program_runs_and_reports_success() {
        let program = b::program(vec![crate::ast::Item::FnDef(b::func(
            "main",
            vec![],
            crate::ast::TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::int(0)))]),
        ))]);
        let mut config = DriverConfig::new("inline");
        config.flags |= DriverFlags::RUN;
        let (_, report) = run(&program, &config).expect("analysis should succeed");
        assert!(report.ran);
        assert!(report.succeeded);
    }

    #[test]
    fn analysis_errors_abort_before_execution() {
        let program = b::program(vec![crate::ast::Item::FnDef(b::func(
            "main",
            vec![],
            crate::ast::TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::var("x")))]),
        ))]);
        let mut config = DriverConfig::new("inline");
        config.flags |= DriverFlags::RUN;
        let err = run(&program, &config).expect_err("undeclared reference should fail analysis");
        assert!(matches!(err, DriverError::AnalysisFailed { .. }));
    }
}
