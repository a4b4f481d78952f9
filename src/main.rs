//! mirc CLI

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use mirc::ast::{builder as b, BinOp, Item, Program, TypeExpr};
use mirc::driver::{self, DriverConfig, DriverFlags};

#[derive(Parser)]
#[command(name = "mirc", version, about = "MIR subsystem and compile-time VM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze and execute an AST loaded from a JSON document
    Run {
        file: PathBuf,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        no_warn: bool,
        #[arg(long)]
        emit_mir: bool,
    },
    /// Analyze only; do not execute the entry point
    Analyze {
        file: PathBuf,
        #[arg(long)]
        no_warn: bool,
        #[arg(long)]
        emit_mir: bool,
    },
    /// Analyze and run `#test`-attributed functions
    RunTests { file: PathBuf },
    /// Run one of the embedded demo programs (spec §8 scenarios)
    Demo {
        #[arg(value_enum)]
        name: DemoName,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DemoName {
    LiteralReturn,
    OperatorPrecedence,
    FunctionCall,
    LoopWithMutation,
    UndeclaredReference,
    TypeMismatch,
}

fn demo_program(name: DemoName) -> Program {
    match name {
        DemoName::LiteralReturn => b::program(vec![Item::FnDef(b::func(
            "main",
            vec![],
            TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::int(0)))]),
        ))]),
        DemoName::OperatorPrecedence => b::program(vec![Item::FnDef(b::func(
            "main",
            vec![],
            TypeExpr::s32(),
            b::block(vec![
                b::let_stmt("a", None, Some(b::bin(b::int(2), BinOp::Add, b::bin(b::int(3), BinOp::Mul, b::int(4))))),
                b::ret(Some(b::var("a"))),
            ]),
        ))]),
        DemoName::FunctionCall => b::program(vec![
            Item::FnDef(b::func(
                "add",
                vec![("a", TypeExpr::s32()), ("b", TypeExpr::s32())],
                TypeExpr::s32(),
                b::block(vec![b::ret(Some(b::bin(b::var("a"), BinOp::Add, b::var("b"))))]),
            )),
            Item::FnDef(b::func(
                "main",
                vec![],
                TypeExpr::s32(),
                b::block(vec![b::ret(Some(b::call("add", vec![b::int(2), b::int(3)])))]),
            )),
        ]),
        DemoName::LoopWithMutation => b::program(vec![Item::FnDef(b::func(
            "main",
            vec![],
            TypeExpr::s32(),
            b::block(vec![
                b::let_stmt("i", None, Some(b::int(0))),
                b::loop_stmt(
                    Some(b::bin(b::var("i"), BinOp::Lt, b::int(3))),
                    b::block(vec![b::assign(b::var("i"), b::bin(b::var("i"), BinOp::Add, b::int(1)))]),
                ),
                b::ret(Some(b::var("i"))),
            ]),
        ))]),
        DemoName::UndeclaredReference => b::program(vec![Item::FnDef(b::func(
            "main",
            vec![],
            TypeExpr::s32(),
            b::block(vec![b::ret(Some(b::var("x")))]),
        ))]),
        DemoName::TypeMismatch => b::program(vec![Item::FnDef(b::func(
            "main",
            vec![],
            TypeExpr::s32(),
            b::block(vec![b::ret(Some(mirc::ast::Expr::BoolLit(true)))]),
        ))]),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { file, verbose, no_warn, emit_mir } => {
            let program = match driver::load_ast_json(&file) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let mut config = DriverConfig::new(file.display().to_string());
            config.flags |= DriverFlags::RUN;
            if verbose {
                config.flags |= DriverFlags::VERBOSE;
            }
            if no_warn {
                config.flags |= DriverFlags::NO_WARN;
            }
            if emit_mir {
                config.flags |= DriverFlags::EMIT_MIR;
            }
            run_and_report(&program, &config)
        }
        Command::Analyze { file, no_warn, emit_mir } => {
            let program = match driver::load_ast_json(&file) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let mut config = DriverConfig::new(file.display().to_string());
            config.flags |= DriverFlags::SYNTAX_ONLY;
            if no_warn {
                config.flags |= DriverFlags::NO_WARN;
            }
            if emit_mir {
                config.flags |= DriverFlags::EMIT_MIR;
            }
            run_and_report(&program, &config)
        }
        Command::RunTests { file } => {
            let program = match driver::load_ast_json(&file) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let mut config = DriverConfig::new(file.display().to_string());
            config.flags |= DriverFlags::RUN_TESTS;
            run_and_report(&program, &config)
        }
        Command::Demo { name } => {
            let program = demo_program(name);
            let mut config = DriverConfig::new("<demo>");
            config.flags |= DriverFlags::RUN;
            run_and_report(&program, &config)
        }
    }
}

fn run_and_report(program: &Program, config: &DriverConfig) -> ExitCode {
    match driver::run(program, config) {
        Ok((_, report)) => {
            for (name, passed) in &report.test_results {
                println!("{} {name}", if *passed { "PASS" } else { "FAIL" });
            }
            if report.ran && !report.succeeded {
                return ExitCode::FAILURE;
            }
            if report.test_results.iter().any(|(_, passed)| !passed) {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
