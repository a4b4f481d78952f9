//! Fluent AST construction helpers.
//!
//! Stand-in for the parser this core doesn't implement (spec §1 Non-goals):
//! tests and the CLI's embedded demo programs build `Program` values through
//! this API the way a parser's reducer actions would.

use super::*;

pub fn program(items: Vec<Item>) -> Program {
    Program { items }
}

pub fn func(
    name: &str,
    params: Vec<(&str, TypeExpr)>,
    ret_ty: TypeExpr,
    body: Block,
) -> FnDef {
    FnDef {
        attributes: Vec::new(),
        name: spanned(name.to_string()),
        params: params
            .into_iter()
            .map(|(n, ty)| Param {
                name: spanned(n.to_string()),
                ty: spanned(ty),
            })
            .collect(),
        ret_ty: spanned(ret_ty),
        body,
        span: Span::synthetic(),
    }
}

pub fn test_func(name: &str, body: Block) -> FnDef {
    let mut f = func(name, Vec::new(), TypeExpr::Void, body);
    f.attributes.push(Attribute::Test);
    f
}

pub fn extern_fn(
    name: &str,
    params: Vec<(&str, TypeExpr)>,
    ret_ty: TypeExpr,
    vargs: bool,
    lib: Option<&str>,
) -> ExternFnDecl {
    ExternFnDecl {
        name: spanned(name.to_string()),
        params: params
            .into_iter()
            .map(|(n, ty)| Param {
                name: spanned(n.to_string()),
                ty: spanned(ty),
            })
            .collect(),
        ret_ty: spanned(ret_ty),
        vargs,
        lib: lib.map(str::to_string),
        span: Span::synthetic(),
    }
}

pub fn block(stmts: Vec<Stmt>) -> Block {
    Block { stmts }
}

pub fn let_stmt(name: &str, ty: Option<TypeExpr>, init: Option<Expr>) -> Stmt {
    Stmt::DeclVar {
        name: spanned(name.to_string()),
        ty: ty.map(spanned),
        init: init.map(spanned),
        mutable: true,
        span: Span::synthetic(),
    }
}

pub fn assign(target: Expr, value: Expr) -> Stmt {
    Stmt::Assign {
        target: spanned(target),
        value: spanned(value),
    }
}

pub fn ret(value: Option<Expr>) -> Stmt {
    Stmt::Return(value.map(spanned))
}

pub fn if_stmt(cond: Expr, then_block: Block, else_block: Option<Block>) -> Stmt {
    Stmt::If {
        cond: spanned(cond),
        then_block,
        else_block,
    }
}

pub fn loop_stmt(cond: Option<Expr>, body: Block) -> Stmt {
    Stmt::Loop {
        cond: cond.map(spanned),
        body,
    }
}

pub fn bin(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(spanned(left)),
        op,
        right: Box::new(spanned(right)),
    }
}

pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

pub fn call(callee: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: callee.to_string(),
        args: args.into_iter().map(spanned).collect(),
    }
}

pub fn int(n: i64) -> Expr {
    Expr::IntLit(n)
}
