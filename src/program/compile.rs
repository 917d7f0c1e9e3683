//! Semantic pass: name resolution, static typing and lowering to the IR the
//! interpreter runs.

use super::ast::*;
use super::diagnostics::{Diagnostic, Span};
use super::types::{ScalarType, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub ty: ParamType,
    /// Local slot holding a scalar parameter's value.
    pub slot: Option<usize>,
    pub reads: bool,
    pub writes: bool,
}

impl ParamInfo {
    pub fn is_pointer(&self) -> bool {
        matches!(self.ty, ParamType::Pointer { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledKernel {
    pub name: String,
    pub span: Span,
    pub params: Vec<ParamInfo>,
    pub body: Vec<IStmt>,
    pub num_slots: usize,
    pub requires_fp64: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkItemFn {
    GlobalId,
    LocalId,
    GroupId,
    GlobalSize,
    LocalSize,
    NumGroups,
    GlobalOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MathFn {
    Min,
    Max,
    Clamp,
    Sqrt,
}

#[derive(Debug, Clone)]
pub(crate) enum Place {
    Local(usize),
    Elem {
        param: usize,
        elem: ScalarType,
        index: Box<IExpr>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum IExpr {
    Const(Value),
    Local(usize),
    Load {
        param: usize,
        elem: ScalarType,
        index: Box<IExpr>,
    },
    Convert {
        from: ScalarType,
        to: ScalarType,
        expr: Box<IExpr>,
    },
    /// `ty` is the operand type; the result has the same type except for `!`.
    Unary {
        op: UnOp,
        ty: ScalarType,
        expr: Box<IExpr>,
    },
    /// `ty` is the type both operands were converted to (for shifts, the
    /// left operand's type). Comparisons yield `int`.
    Binary {
        op: BinOp,
        ty: ScalarType,
        lhs: Box<IExpr>,
        rhs: Box<IExpr>,
    },
    Logical {
        op: LogicOp,
        lhs: Box<IExpr>,
        rhs: Box<IExpr>,
    },
    Ternary {
        cond: Box<IExpr>,
        then: Box<IExpr>,
        otherwise: Box<IExpr>,
    },
    /// Plain store when `op` is `None`. For compound stores the current value
    /// is converted to `op_ty`, combined with `value` and converted back.
    Assign {
        place: Place,
        ty: ScalarType,
        op: Option<(BinOp, ScalarType)>,
        value: Box<IExpr>,
    },
    IncDec {
        place: Place,
        ty: ScalarType,
        increment: bool,
        prefix: bool,
    },
    WorkItem(WorkItemFn, Box<IExpr>),
    WorkDim,
    Math {
        func: MathFn,
        ty: ScalarType,
        args: Vec<IExpr>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum IStmt {
    Expr(IExpr),
    Init {
        slot: usize,
        value: IExpr,
    },
    If {
        cond: IExpr,
        then: Vec<IStmt>,
        otherwise: Vec<IStmt>,
    },
    Loop {
        cond: Option<IExpr>,
        step: Option<IExpr>,
        body: Vec<IStmt>,
    },
    Block(Vec<IStmt>),
    Return,
    Break,
    Continue,
}

/// Lower every kernel of a parsed program. All diagnostics are collected.
pub(crate) fn compile(decls: &[KernelDecl]) -> Result<Vec<CompiledKernel>, Vec<Diagnostic>> {
    let mut kernels = Vec::with_capacity(decls.len());
    let mut diags = Vec::new();
    let mut seen: HashMap<&str, Span> = HashMap::new();

    for decl in decls {
        if seen.insert(decl.name.as_str(), decl.span.clone()).is_some() {
            diags.push(Diagnostic::new(
                format!("redefinition of kernel `{}`", decl.name),
                decl.span.clone(),
            ));
            continue;
        }
        let mut compiler = Compiler::new();
        match compiler.kernel(decl) {
            Some(kernel) if compiler.diags.is_empty() => kernels.push(kernel),
            _ => diags.append(&mut compiler.diags),
        }
    }

    if diags.is_empty() {
        Ok(kernels)
    } else {
        Err(diags)
    }
}

#[derive(Debug, Clone, Copy)]
enum Symbol {
    Local {
        slot: usize,
        ty: ScalarType,
        is_const: bool,
    },
    Buffer {
        param: usize,
        elem: ScalarType,
        is_const: bool,
    },
}

type Typed = (IExpr, ScalarType);
type CResult<T> = Result<T, Diagnostic>;

struct Compiler {
    scopes: Vec<HashMap<String, Symbol>>,
    params: Vec<ParamInfo>,
    num_slots: usize,
    loop_depth: usize,
    requires_fp64: bool,
    diags: Vec<Diagnostic>,
}

impl Compiler {
    fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            params: Vec::new(),
            num_slots: 0,
            loop_depth: 0,
            requires_fp64: false,
            diags: Vec::new(),
        }
    }

    fn kernel(&mut self, decl: &KernelDecl) -> Option<CompiledKernel> {
        for (index, param) in decl.params.iter().enumerate() {
            if self.scopes[0].contains_key(&param.name) {
                self.diags.push(Diagnostic::new(
                    format!("duplicate parameter `{}`", param.name),
                    param.span.clone(),
                ));
                continue;
            }

            let (symbol, slot) = match param.ty {
                ParamType::Scalar(ty) => {
                    self.note_type(ty);
                    let slot = self.alloc_slot();
                    (
                        Symbol::Local {
                            slot,
                            ty,
                            is_const: false,
                        },
                        Some(slot),
                    )
                }
                ParamType::Pointer { elem, is_const, .. } => {
                    self.note_type(elem);
                    (
                        Symbol::Buffer {
                            param: index,
                            elem,
                            is_const,
                        },
                        None,
                    )
                }
            };
            self.scopes[0].insert(param.name.clone(), symbol);
            self.params.push(ParamInfo {
                name: param.name.clone(),
                ty: param.ty,
                slot,
                reads: false,
                writes: false,
            });
        }

        if !self.diags.is_empty() {
            return None;
        }

        let body = self.block(&decl.body);
        Some(CompiledKernel {
            name: decl.name.clone(),
            span: decl.span.clone(),
            params: std::mem::take(&mut self.params),
            body,
            num_slots: self.num_slots,
            requires_fp64: self.requires_fp64,
        })
    }

    fn note_type(&mut self, ty: ScalarType) {
        if ty == ScalarType::Double {
            self.requires_fp64 = true;
        }
    }

    fn alloc_slot(&mut self) -> usize {
        let slot = self.num_slots;
        self.num_slots += 1;
        slot
    }

    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    // ---- statements ----

    fn block(&mut self, stmts: &[Stmt]) -> Vec<IStmt> {
        self.scopes.push(HashMap::new());
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            match self.stmt(stmt) {
                Ok(Some(s)) => out.push(s),
                Ok(None) => {}
                Err(diag) => self.diags.push(diag),
            }
        }
        self.scopes.pop();
        out
    }

    /// A nested statement that is not a block still gets its own scope.
    fn scoped(&mut self, stmt: &Stmt) -> Vec<IStmt> {
        match stmt {
            Stmt::Block(stmts) => self.block(stmts),
            other => self.block(std::slice::from_ref(other)),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> CResult<Option<IStmt>> {
        let lowered = match stmt {
            Stmt::Empty => return Ok(None),
            Stmt::Expr(expr) => IStmt::Expr(self.expr(expr)?.0),
            Stmt::Decl { ty, is_const, vars } => {
                self.note_type(*ty);
                let mut inits = Vec::with_capacity(vars.len());
                for var in vars {
                    if self.scopes.last().is_some_and(|s| s.contains_key(&var.name)) {
                        return Err(Diagnostic::new(
                            format!("redefinition of `{}`", var.name),
                            var.span.clone(),
                        ));
                    }
                    if ScalarType::from_name(&var.name).is_some() {
                        return Err(Diagnostic::new(
                            format!("`{}` is a type name", var.name),
                            var.span.clone(),
                        ));
                    }
                    let value = match &var.init {
                        Some(init) => {
                            let (value, from) = self.expr(init)?;
                            convert(value, from, *ty)
                        }
                        None => IExpr::Const(Value::zero(*ty)),
                    };
                    // Declared after the initializer so `int x = x;` sees any outer `x`.
                    let slot = self.alloc_slot();
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(
                            var.name.clone(),
                            Symbol::Local {
                                slot,
                                ty: *ty,
                                is_const: *is_const,
                            },
                        );
                    }
                    inits.push(IStmt::Init { slot, value });
                }
                match inits.len() {
                    1 => inits.remove(0),
                    _ => IStmt::Block(inits),
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.expr(cond)?.0;
                let then = self.scoped(then);
                let otherwise = match otherwise {
                    Some(stmt) => self.scoped(stmt),
                    None => Vec::new(),
                };
                IStmt::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(cond)?.0;
                self.loop_depth += 1;
                let body = self.scoped(body);
                self.loop_depth -= 1;
                IStmt::Loop {
                    cond: Some(cond),
                    step: None,
                    body,
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push(HashMap::new());
                let result = self.for_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body);
                self.scopes.pop();
                result?
            }
            Stmt::Block(stmts) => IStmt::Block(self.block(stmts)),
            Stmt::Return(_) => IStmt::Return,
            Stmt::Break(span) | Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    return Err(Diagnostic::new("`break`/`continue` outside of a loop", span.clone()));
                }
                if matches!(stmt, Stmt::Break(_)) {
                    IStmt::Break
                } else {
                    IStmt::Continue
                }
            }
        };
        Ok(Some(lowered))
    }

    fn for_loop(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> CResult<IStmt> {
        let init = match init {
            Some(stmt) => self.stmt(stmt)?,
            None => None,
        };
        let cond = cond.map(|c| self.expr(c)).transpose()?.map(|(e, _)| e);
        let step = step.map(|s| self.expr(s)).transpose()?.map(|(e, _)| e);

        self.loop_depth += 1;
        let body = self.scoped(body);
        self.loop_depth -= 1;

        let mut stmts: Vec<IStmt> = init.into_iter().collect();
        stmts.push(IStmt::Loop { cond, step, body });
        Ok(IStmt::Block(stmts))
    }

    // ---- expressions ----

    fn expr(&mut self, expr: &Expr) -> CResult<Typed> {
        match &expr.kind {
            ExprKind::Int(v, ty) => Ok((IExpr::Const(Value::Int(ty.wrap(*v as i64))), *ty)),
            ExprKind::Float(v, ty) => Ok((IExpr::Const(Value::Float(*v)), *ty)),
            ExprKind::Bool(b) => Ok((IExpr::Const(Value::Int(*b as i64)), ScalarType::Bool)),
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(Symbol::Local { slot, ty, .. }) => Ok((IExpr::Local(slot), ty)),
                Some(Symbol::Buffer { .. }) => Err(Diagnostic::new(
                    format!("pointer `{}` can only be used with `[]`", name),
                    expr.span.clone(),
                )),
                None => Err(undeclared(name, &expr.span)),
            },
            ExprKind::Unary(op, operand) => {
                let (value, ty) = self.expr(operand)?;
                match op {
                    UnOp::Not => Ok((
                        IExpr::Unary {
                            op: UnOp::Not,
                            ty,
                            expr: Box::new(value),
                        },
                        ScalarType::Int,
                    )),
                    UnOp::BitNot if ty.is_float() => Err(Diagnostic::new(
                        format!("invalid operand of type `{}` to `~`", ty),
                        expr.span.clone(),
                    )),
                    _ => {
                        let promoted = ty.promote();
                        Ok((
                            IExpr::Unary {
                                op: *op,
                                ty: promoted,
                                expr: Box::new(convert(value, ty, promoted)),
                            },
                            promoted,
                        ))
                    }
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                binary(*op, lhs, rhs, &expr.span)
            }
            ExprKind::Logical(op, lhs, rhs) => {
                let (lhs, _) = self.expr(lhs)?;
                let (rhs, _) = self.expr(rhs)?;
                Ok((
                    IExpr::Logical {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    ScalarType::Int,
                ))
            }
            ExprKind::Ternary(cond, then, otherwise) => {
                let (cond, _) = self.expr(cond)?;
                let (then, then_ty) = self.expr(then)?;
                let (otherwise, else_ty) = self.expr(otherwise)?;
                let ty = ScalarType::common(then_ty, else_ty);
                Ok((
                    IExpr::Ternary {
                        cond: Box::new(cond),
                        then: Box::new(convert(then, then_ty, ty)),
                        otherwise: Box::new(convert(otherwise, else_ty, ty)),
                    },
                    ty,
                ))
            }
            ExprKind::Assign { op, target, value } => {
                let (place, ty) = self.place(target, op.is_some())?;
                let (value, value_ty) = self.expr(value)?;
                let (op, value) = match op {
                    None => (None, convert(value, value_ty, ty)),
                    Some(op) => {
                        let op_ty = compound_type(*op, ty, value_ty, &expr.span)?;
                        let value = if matches!(op, BinOp::Shl | BinOp::Shr) {
                            convert(value, value_ty, value_ty.promote())
                        } else {
                            convert(value, value_ty, op_ty)
                        };
                        (Some((*op, op_ty)), value)
                    }
                };
                Ok((
                    IExpr::Assign {
                        place,
                        ty,
                        op,
                        value: Box::new(value),
                    },
                    ty,
                ))
            }
            ExprKind::IncDec {
                target,
                increment,
                prefix,
            } => {
                let (place, ty) = self.place(target, true)?;
                if ty == ScalarType::Bool {
                    return Err(Diagnostic::new("cannot increment a `bool`", expr.span.clone()));
                }
                Ok((
                    IExpr::IncDec {
                        place,
                        ty,
                        increment: *increment,
                        prefix: *prefix,
                    },
                    ty,
                ))
            }
            ExprKind::Index(..) => {
                let (param, elem, index) = self.element(expr, false)?;
                Ok((
                    IExpr::Load {
                        param,
                        elem,
                        index: Box::new(index),
                    },
                    elem,
                ))
            }
            ExprKind::Cast(to, operand) => {
                self.note_type(*to);
                let (value, from) = self.expr(operand)?;
                Ok((convert(value, from, *to), *to))
            }
            ExprKind::Call(name, args) => self.call(name, args, &expr.span),
        }
    }

    /// Resolve `base[index]`, recording the access on the parameter.
    fn element(&mut self, expr: &Expr, write: bool) -> CResult<(usize, ScalarType, IExpr)> {
        let ExprKind::Index(base, index) = &expr.kind else {
            return Err(Diagnostic::new("expression is not assignable", expr.span.clone()));
        };
        let ExprKind::Ident(name) = &base.kind else {
            return Err(Diagnostic::new(
                "only pointer parameters can be indexed",
                base.span.clone(),
            ));
        };
        let (param, elem, is_const) = match self.lookup(name) {
            Some(Symbol::Buffer {
                param,
                elem,
                is_const,
            }) => (param, elem, is_const),
            Some(Symbol::Local { ty, .. }) => {
                return Err(Diagnostic::new(
                    format!("subscripted value `{}` of type `{}` is not a pointer", name, ty),
                    base.span.clone(),
                ))
            }
            None => return Err(undeclared(name, &base.span)),
        };

        if write && is_const {
            return Err(Diagnostic::new(
                format!("cannot store through const pointer `{}`", name),
                expr.span.clone(),
            ));
        }

        let (index, index_ty) = self.expr(index)?;
        if index_ty.is_float() {
            return Err(Diagnostic::new(
                format!("array subscript of type `{}` is not an integer", index_ty),
                expr.span.clone(),
            ));
        }

        if let Some(info) = self.params.get_mut(param) {
            if write {
                info.writes = true;
            } else {
                info.reads = true;
            }
        }
        Ok((param, elem, convert(index, index_ty, ScalarType::ULong)))
    }

    /// Resolve an assignment target. `reads` marks targets whose current
    /// value is also loaded (compound assignment and `++`/`--`).
    fn place(&mut self, target: &Expr, reads: bool) -> CResult<(Place, ScalarType)> {
        match &target.kind {
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(Symbol::Local { slot, ty, is_const }) => {
                    if is_const {
                        return Err(Diagnostic::new(
                            format!("cannot assign to const variable `{}`", name),
                            target.span.clone(),
                        ));
                    }
                    Ok((Place::Local(slot), ty))
                }
                Some(Symbol::Buffer { .. }) => Err(Diagnostic::new(
                    format!("cannot assign to pointer parameter `{}`", name),
                    target.span.clone(),
                )),
                None => Err(undeclared(name, &target.span)),
            },
            ExprKind::Index(..) => {
                let (param, elem, index) = self.element(target, true)?;
                if reads {
                    if let Some(info) = self.params.get_mut(param) {
                        info.reads = true;
                    }
                }
                Ok((
                    Place::Elem {
                        param,
                        elem,
                        index: Box::new(index),
                    },
                    elem,
                ))
            }
            _ => Err(Diagnostic::new("expression is not assignable", target.span.clone())),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], span: &Span) -> CResult<Typed> {
        let work_item = match name {
            "get_global_id" => Some(WorkItemFn::GlobalId),
            "get_local_id" => Some(WorkItemFn::LocalId),
            "get_group_id" => Some(WorkItemFn::GroupId),
            "get_global_size" => Some(WorkItemFn::GlobalSize),
            "get_local_size" => Some(WorkItemFn::LocalSize),
            "get_num_groups" => Some(WorkItemFn::NumGroups),
            "get_global_offset" => Some(WorkItemFn::GlobalOffset),
            _ => None,
        };

        if let Some(func) = work_item {
            expect_arity(name, args, 1, span)?;
            let (dim, ty) = self.expr(&args[0])?;
            return Ok((
                IExpr::WorkItem(func, Box::new(convert(dim, ty, ScalarType::UInt))),
                ScalarType::ULong,
            ));
        }

        if name == "get_work_dim" {
            expect_arity(name, args, 0, span)?;
            return Ok((IExpr::WorkDim, ScalarType::UInt));
        }

        if matches!(
            name,
            "barrier" | "mem_fence" | "read_mem_fence" | "write_mem_fence" | "work_group_barrier"
        ) {
            return Err(Diagnostic::new(
                format!("`{}` is not supported: work-items of a group are not synchronized", name),
                span.clone(),
            ));
        }

        let (func, arity) = match name {
            "min" => (MathFn::Min, 2),
            "max" => (MathFn::Max, 2),
            "clamp" => (MathFn::Clamp, 3),
            "sqrt" => (MathFn::Sqrt, 1),
            _ => {
                return Err(Diagnostic::new(
                    format!("call to unknown function `{}`", name),
                    span.clone(),
                ))
            }
        };
        expect_arity(name, args, arity, span)?;

        let mut typed = Vec::with_capacity(args.len());
        for arg in args {
            typed.push(self.expr(arg)?);
        }

        let joined = typed
            .iter()
            .map(|(_, ty)| *ty)
            .fold(typed[0].1, ScalarType::common);

        let (operand_ty, result_ty) = match func {
            MathFn::Min | MathFn::Max | MathFn::Clamp => (joined, joined),
            MathFn::Sqrt => {
                let ty = if joined == ScalarType::Double {
                    ScalarType::Double
                } else {
                    ScalarType::Float
                };
                (ty, ty)
            }
        };

        let args = typed
            .into_iter()
            .map(|(value, ty)| convert(value, ty, operand_ty))
            .collect();
        Ok((
            IExpr::Math {
                func,
                ty: operand_ty,
                args,
            },
            result_ty,
        ))
    }
}

fn undeclared(name: &str, span: &Span) -> Diagnostic {
    Diagnostic::new(format!("use of undeclared identifier `{}`", name), span.clone())
}

fn expect_arity(name: &str, args: &[Expr], arity: usize, span: &Span) -> CResult<()> {
    if args.len() != arity {
        return Err(Diagnostic::new(
            format!("`{}` takes {} argument(s), {} given", name, arity, args.len()),
            span.clone(),
        ));
    }
    Ok(())
}

fn convert(expr: IExpr, from: ScalarType, to: ScalarType) -> IExpr {
    if from == to {
        return expr;
    }
    if let IExpr::Const(v) = expr {
        return IExpr::Const(v.convert(from, to));
    }
    IExpr::Convert {
        from,
        to,
        expr: Box::new(expr),
    }
}

fn compound_type(op: BinOp, target: ScalarType, value: ScalarType, span: &Span) -> CResult<ScalarType> {
    if op.is_bitwise() && (target.is_float() || value.is_float()) {
        return Err(invalid_operands(op, target, value, span));
    }
    Ok(match op {
        BinOp::Shl | BinOp::Shr => target.promote(),
        _ => ScalarType::common(target, value),
    })
}

fn invalid_operands(op: BinOp, lhs: ScalarType, rhs: ScalarType, span: &Span) -> Diagnostic {
    Diagnostic::new(
        format!("invalid operands to `{:?}` (`{}` and `{}`)", op, lhs, rhs),
        span.clone(),
    )
}

fn binary(op: BinOp, (lhs, lhs_ty): Typed, (rhs, rhs_ty): Typed, span: &Span) -> CResult<Typed> {
    if op.is_bitwise() && (lhs_ty.is_float() || rhs_ty.is_float()) {
        return Err(invalid_operands(op, lhs_ty, rhs_ty, span));
    }

    if matches!(op, BinOp::Shl | BinOp::Shr) {
        let ty = lhs_ty.promote();
        let amount_ty = rhs_ty.promote();
        return Ok((
            IExpr::Binary {
                op,
                ty,
                lhs: Box::new(convert(lhs, lhs_ty, ty)),
                rhs: Box::new(convert(rhs, rhs_ty, amount_ty)),
            },
            ty,
        ));
    }

    let ty = ScalarType::common(lhs_ty, rhs_ty);
    let result = if op.is_comparison() { ScalarType::Int } else { ty };
    Ok((
        IExpr::Binary {
            op,
            ty,
            lhs: Box::new(convert(lhs, lhs_ty, ty)),
            rhs: Box::new(convert(rhs, rhs_ty, ty)),
        },
        result,
    ))
}
