//! Expression AST nodes.

use super::{Span, Spanned, TypeExpr};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StringLit(String),
    NullLit,

    /// Variable or function reference, resolved by the Analyzer against
    /// scope (spec §4.3).
    Var(String),

    Binary {
        left: Box<Spanned<Expr>>,
        op: BinOp,
        right: Box<Spanned<Expr>>,
    },

    Unary {
        op: UnOp,
        expr: Box<Spanned<Expr>>,
    },

    /// `&expr` — address-of (spec §4.2 `AddrOf`).
    AddrOf(Box<Spanned<Expr>>),

    /// `*expr` — pointer dereference (spec §4.2 `Load` via a pointer operand).
    Deref(Box<Spanned<Expr>>),

    /// `base[index]` — array/slice element access (spec §4.2 `ElemPtr`).
    Index {
        base: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },

    /// `base.field` — struct member / array `.len`/`.ptr` access
    /// (spec §4.2 `MemberPtr`).
    Member {
        base: Box<Spanned<Expr>>,
        field: String,
    },

    /// `name(args...)` function call.
    Call { callee: String, args: Vec<Spanned<Expr>> },

    /// Explicit cast `expr as ty`.
    Cast {
        expr: Box<Spanned<Expr>>,
        ty: Spanned<TypeExpr>,
    },

    /// Struct or array literal: `Point { x: 1, y: 2 }` / `[1, 2, 3]`.
    /// A bare positional literal has `None` field names (array); named
    /// fields make it a struct initializer.
    Compound {
        ty: Spanned<TypeExpr>,
        fields: Vec<(Option<String>, Spanned<Expr>)>,
    },

    /// `vargs(a, b, c)` — assembled into a `{ptr, len}` slice at the call
    /// site of a variadic parameter (spec §4.2 `VArgs`).
    VArgsLit(Vec<Spanned<Expr>>),

    Sizeof(Spanned<TypeExpr>),
    Alignof(Spanned<TypeExpr>),
    TypeInfo(Spanned<TypeExpr>),
    ToAny(Box<Spanned<Expr>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LAnd,
    LOr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::LAnd | BinOp::LOr)
    }

    pub fn is_bitwise_only(self) -> bool {
        matches!(self, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr)
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::LAnd => "&&",
            BinOp::LOr => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

impl std::fmt::Display for UnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
            UnOp::BitNot => "~",
        };
        write!(f, "{s}")
    }
}

/// Convenience constructor used throughout `ast::builder` and tests.
pub fn spanned<T>(node: T) -> Spanned<T> {
    Spanned::new(node, Span::synthetic())
}
