//! Recursive-descent parser for the kernel language.

use super::ast::*;
use super::diagnostics::{Diagnostic, Span};
use super::lexer::{Spanned, Token};
use super::types::ScalarType;

type PResult<T> = Result<T, Diagnostic>;

/// Deepest nesting of statements and expressions.
const MAX_NESTING: usize = 64;

pub fn parse(tokens: &[Spanned], source_len: usize) -> PResult<Vec<KernelDecl>> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        eof: source_len..source_len,
        depth: 0,
    };
    let mut kernels = Vec::new();
    while !parser.at_end() {
        kernels.push(parser.kernel()?);
    }
    Ok(kernels)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    eof: Span,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| self.eof.clone())
    }

    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, s)| s.end)
            .unwrap_or(0)
    }

    fn bump(&mut self) -> Option<&'a Spanned> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, tok: &Token) -> bool {
        self.peek() == Some(tok)
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.check(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        match self.peek() {
            Some(tok) => Diagnostic::new(
                format!("expected {}, found {}", expected, tok.describe()),
                self.span(),
            ),
            None => Diagnostic::new(format!("expected {}, found end of input", expected), self.span()),
        }
    }

    fn expect(&mut self, tok: &Token, expected: &str) -> PResult<Span> {
        if self.check(tok) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    /// Run `f` one nesting level deeper. Fails instead of recursing past
    /// `MAX_NESTING`.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(Diagnostic::new(
                format!("nesting exceeds the limit of {} levels", MAX_NESTING),
                self.span(),
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn ident(&mut self) -> PResult<(String, Span)> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let span = self.span();
                self.pos += 1;
                Ok((name.clone(), span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // ---- declarations ----

    fn kernel(&mut self) -> PResult<KernelDecl> {
        let start = self.span().start;
        if !self.eat(&Token::Kernel) {
            return Err(Diagnostic::new(
                "only `__kernel` functions are supported at file scope",
                self.span(),
            ));
        }
        self.expect(&Token::Void, "`void` return type for kernel")?;
        let (name, _) = self.ident()?;

        self.expect(&Token::LParen, "`(`")?;
        let mut params = Vec::new();
        if self.check(&Token::Void) && self.peek_at(1) == Some(&Token::RParen) {
            self.pos += 1;
        }
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "`)` after kernel parameters")?;

        let body = self.block()?;
        Ok(KernelDecl {
            name,
            params,
            body,
            span: start..self.prev_end(),
        })
    }

    fn is_type_start(&self) -> bool {
        match self.peek() {
            Some(Token::Const) | Some(Token::Unsigned) => true,
            Some(Token::Ident(name)) => ScalarType::from_name(name).is_some(),
            _ => false,
        }
    }

    fn scalar_type(&mut self) -> PResult<ScalarType> {
        if self.eat(&Token::Unsigned) {
            let ty = match self.peek() {
                Some(Token::Ident(name)) => match name.as_str() {
                    "char" => Some(ScalarType::UChar),
                    "short" => Some(ScalarType::UShort),
                    "int" => Some(ScalarType::UInt),
                    "long" => Some(ScalarType::ULong),
                    _ => None,
                },
                _ => None,
            };
            return match ty {
                Some(ty) => {
                    self.pos += 1;
                    Ok(ty)
                }
                None => Ok(ScalarType::UInt),
            };
        }

        match self.peek() {
            Some(Token::Ident(name)) => match ScalarType::from_name(name) {
                Some(ty) => {
                    self.pos += 1;
                    Ok(ty)
                }
                None => Err(Diagnostic::new(format!("unknown type name `{}`", name), self.span())),
            },
            _ => Err(self.unexpected("type name")),
        }
    }

    fn param(&mut self) -> PResult<Param> {
        let start = self.span().start;
        let mut space = None;
        let mut is_const = false;

        loop {
            match self.peek() {
                Some(Token::Global) => space = Some(AddressSpace::Global),
                Some(Token::Constant) => space = Some(AddressSpace::Constant),
                Some(Token::Local) => space = Some(AddressSpace::Local),
                Some(Token::Private) => space = Some(AddressSpace::Private),
                Some(Token::Const) => is_const = true,
                Some(Token::Restrict) => {}
                _ => break,
            }
            self.pos += 1;
        }

        let elem = self.scalar_type()?;
        while matches!(self.peek(), Some(Token::Const) | Some(Token::Restrict)) {
            if self.check(&Token::Const) {
                is_const = true;
            }
            self.pos += 1;
        }

        let is_pointer = self.eat(&Token::Star);
        // Qualifiers on the pointer itself do not change element access.
        while matches!(self.peek(), Some(Token::Const) | Some(Token::Restrict)) {
            self.pos += 1;
        }

        let (name, name_span) = self.ident()?;
        let span = start..name_span.end;

        if elem == ScalarType::Bool {
            return Err(Diagnostic::new(
                format!("kernel parameter `{}` cannot have type `bool`", name),
                span,
            ));
        }

        let ty = if is_pointer {
            match space {
                Some(AddressSpace::Global) => ParamType::Pointer {
                    elem,
                    space: AddressSpace::Global,
                    is_const,
                },
                Some(AddressSpace::Constant) => ParamType::Pointer {
                    elem,
                    space: AddressSpace::Constant,
                    is_const: true,
                },
                Some(AddressSpace::Local) => {
                    return Err(Diagnostic::new(
                        "`__local` kernel arguments are not supported",
                        span,
                    ))
                }
                _ => {
                    return Err(Diagnostic::new(
                        format!("pointer parameter `{}` must be `__global` or `__constant`", name),
                        span,
                    ))
                }
            }
        } else {
            if matches!(space, Some(AddressSpace::Global) | Some(AddressSpace::Constant)) {
                return Err(Diagnostic::new(
                    format!("scalar parameter `{}` cannot have an address space", name),
                    span,
                ));
            }
            ParamType::Scalar(elem)
        };

        Ok(Param { name, ty, span })
    }

    // ---- statements ----

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&Token::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.stmt()?);
        }
        self.pos += 1;
        Ok(stmts)
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        self.nested(Self::stmt_inner)
    }

    fn stmt_inner(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Some(Token::LBrace) => Ok(Stmt::Block(self.block()?)),
            Some(Token::Semi) => {
                self.pos += 1;
                Ok(Stmt::Empty)
            }
            Some(Token::If) => {
                self.pos += 1;
                self.expect(&Token::LParen, "`(` after `if`")?;
                let cond = self.expr()?;
                self.expect(&Token::RParen, "`)`")?;
                let then = Box::new(self.stmt()?);
                let otherwise = if self.eat(&Token::Else) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            Some(Token::While) => {
                self.pos += 1;
                self.expect(&Token::LParen, "`(` after `while`")?;
                let cond = self.expr()?;
                self.expect(&Token::RParen, "`)`")?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::While { cond, body })
            }
            Some(Token::For) => {
                self.pos += 1;
                self.expect(&Token::LParen, "`(` after `for`")?;
                let init = if self.check(&Token::Semi) {
                    None
                } else if self.is_type_start() {
                    Some(Box::new(self.decl()?))
                } else {
                    Some(Box::new(Stmt::Expr(self.expr()?)))
                };
                self.expect(&Token::Semi, "`;`")?;
                let cond = if self.check(&Token::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&Token::Semi, "`;`")?;
                let step = if self.check(&Token::RParen) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&Token::RParen, "`)`")?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::For {
                    init,
                    cond,
                    step,
                    body,
                })
            }
            Some(Token::Return) => {
                let span = self.span();
                self.pos += 1;
                if !self.check(&Token::Semi) {
                    return Err(Diagnostic::new("kernels cannot return a value", self.span()));
                }
                self.pos += 1;
                Ok(Stmt::Return(span))
            }
            Some(Token::Break) => {
                let span = self.span();
                self.pos += 1;
                self.expect(&Token::Semi, "`;`")?;
                Ok(Stmt::Break(span))
            }
            Some(Token::Continue) => {
                let span = self.span();
                self.pos += 1;
                self.expect(&Token::Semi, "`;`")?;
                Ok(Stmt::Continue(span))
            }
            Some(Token::Local) => Err(Diagnostic::new(
                "`__local` variables are not supported",
                self.span(),
            )),
            _ if self.is_type_start() => {
                let decl = self.decl()?;
                self.expect(&Token::Semi, "`;` after declaration")?;
                Ok(decl)
            }
            _ => {
                let expr = self.expr()?;
                self.expect(&Token::Semi, "`;` after expression")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn decl(&mut self) -> PResult<Stmt> {
        let mut is_const = self.eat(&Token::Const);
        let ty = self.scalar_type()?;
        is_const |= self.eat(&Token::Const);

        if self.check(&Token::Star) {
            return Err(Diagnostic::new("pointer variables are not supported", self.span()));
        }

        let mut vars = Vec::new();
        loop {
            let (name, span) = self.ident()?;
            if self.check(&Token::LBracket) {
                return Err(Diagnostic::new("array variables are not supported", self.span()));
            }
            let init = if self.eat(&Token::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            vars.push(VarDecl { name, span, init });
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(Stmt::Decl { ty, is_const, vars })
    }

    // ---- expressions ----

    fn expr(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let target = self.ternary()?;
        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::PlusAssign) => Some(BinOp::Add),
            Some(Token::MinusAssign) => Some(BinOp::Sub),
            Some(Token::StarAssign) => Some(BinOp::Mul),
            Some(Token::SlashAssign) => Some(BinOp::Div),
            Some(Token::PercentAssign) => Some(BinOp::Rem),
            Some(Token::AmpAssign) => Some(BinOp::BitAnd),
            Some(Token::PipeAssign) => Some(BinOp::BitOr),
            Some(Token::CaretAssign) => Some(BinOp::BitXor),
            Some(Token::ShlAssign) => Some(BinOp::Shl),
            Some(Token::ShrAssign) => Some(BinOp::Shr),
            _ => return Ok(target),
        };
        self.pos += 1;
        let value = self.nested(Self::assignment)?;
        let span = target.span.start..value.span.end;
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        })
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let cond = self.logical_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.expr()?;
        self.expect(&Token::Colon, "`:` in conditional expression")?;
        let otherwise = self.nested(Self::ternary)?;
        let span = cond.span.start..otherwise.span.end;
        Ok(Expr {
            kind: ExprKind::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
            span,
        })
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.logical_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.logical_and()?;
            lhs = logical(LogicOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.binary(0)?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.binary(0)?;
            lhs = logical(LogicOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    /// Binary operator levels from loosest (`|`, level 0) to tightest (`*`).
    fn binary(&mut self, level: usize) -> PResult<Expr> {
        if level > MAX_BINARY_LEVEL {
            return self.unary();
        }

        let mut lhs = self.binary(level + 1)?;
        while let Some(op) = self.peek().and_then(|tok| binary_op(level, tok)) {
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            let span = lhs.span.start..rhs.span.end;
            lhs = Expr {
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                span,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let start = self.span().start;
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnOp::Neg),
            Some(Token::Plus) => Some(UnOp::Plus),
            Some(Token::Bang) => Some(UnOp::Not),
            Some(Token::Tilde) => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary()?;
            let span = start..operand.span.end;
            return Ok(Expr {
                kind: ExprKind::Unary(op, Box::new(operand)),
                span,
            });
        }

        if matches!(self.peek(), Some(Token::PlusPlus) | Some(Token::MinusMinus)) {
            let increment = self.check(&Token::PlusPlus);
            self.pos += 1;
            let target = self.unary()?;
            let span = start..target.span.end;
            return Ok(Expr {
                kind: ExprKind::IncDec {
                    target: Box::new(target),
                    increment,
                    prefix: true,
                },
                span,
            });
        }

        if self.check(&Token::LParen) && self.cast_follows() {
            self.pos += 1;
            let ty = self.scalar_type()?;
            self.expect(&Token::RParen, "`)` after cast type")?;
            let operand = self.unary()?;
            let span = start..operand.span.end;
            return Ok(Expr {
                kind: ExprKind::Cast(ty, Box::new(operand)),
                span,
            });
        }

        self.postfix()
    }

    fn cast_follows(&self) -> bool {
        match self.peek_at(1) {
            Some(Token::Unsigned) => true,
            Some(Token::Ident(name)) => ScalarType::from_name(name).is_some(),
            _ => false,
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    let end = self.expect(&Token::RBracket, "`]`")?.end;
                    let span = expr.span.start..end;
                    expr = Expr {
                        kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                        span,
                    };
                }
                Some(Token::PlusPlus) | Some(Token::MinusMinus) => {
                    let increment = self.check(&Token::PlusPlus);
                    let end = self.span().end;
                    self.pos += 1;
                    let span = expr.span.start..end;
                    expr = Expr {
                        kind: ExprKind::IncDec {
                            target: Box::new(expr),
                            increment,
                            prefix: false,
                        },
                        span,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let span = self.span();
        let Some((tok, _)) = self.bump() else {
            return Err(self.unexpected("expression"));
        };

        let kind = match tok {
            Token::IntLit(text) => {
                let (value, ty) = parse_int(text)
                    .ok_or_else(|| Diagnostic::new(format!("invalid integer literal `{}`", text), span.clone()))?;
                ExprKind::Int(value, ty)
            }
            Token::FloatLit(text) => {
                let (value, ty) = parse_float(text)
                    .ok_or_else(|| Diagnostic::new(format!("invalid float literal `{}`", text), span.clone()))?;
                ExprKind::Float(value, ty)
            }
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.assignment()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    let end = self.expect(&Token::RParen, "`)` after call arguments")?.end;
                    return Ok(Expr {
                        kind: ExprKind::Call(name.clone(), args),
                        span: span.start..end,
                    });
                }
                ExprKind::Ident(name.clone())
            }
            Token::LParen => {
                let inner = self.expr()?;
                let end = self.expect(&Token::RParen, "`)`")?.end;
                return Ok(Expr {
                    kind: inner.kind,
                    span: span.start..end,
                });
            }
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("expression"));
            }
        };

        Ok(Expr { kind, span })
    }
}

const MAX_BINARY_LEVEL: usize = 7;

fn binary_op(level: usize, tok: &Token) -> Option<BinOp> {
    let op = match (level, tok) {
        (0, Token::Pipe) => BinOp::BitOr,
        (1, Token::Caret) => BinOp::BitXor,
        (2, Token::Amp) => BinOp::BitAnd,
        (3, Token::EqEq) => BinOp::Eq,
        (3, Token::NotEq) => BinOp::Ne,
        (4, Token::Lt) => BinOp::Lt,
        (4, Token::Gt) => BinOp::Gt,
        (4, Token::Le) => BinOp::Le,
        (4, Token::Ge) => BinOp::Ge,
        (5, Token::Shl) => BinOp::Shl,
        (5, Token::Shr) => BinOp::Shr,
        (6, Token::Plus) => BinOp::Add,
        (6, Token::Minus) => BinOp::Sub,
        (7, Token::Star) => BinOp::Mul,
        (7, Token::Slash) => BinOp::Div,
        (7, Token::Percent) => BinOp::Rem,
        _ => return None,
    };
    Some(op)
}

fn logical(op: LogicOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.start..rhs.span.end;
    Expr {
        kind: ExprKind::Logical(op, Box::new(lhs), Box::new(rhs)),
        span,
    }
}

fn parse_int(text: &str) -> Option<(u64, ScalarType)> {
    let digits = text.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let suffix = text[digits.len()..].to_ascii_lowercase();
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };

    let unsigned = suffix.contains('u');
    let long = suffix.contains('l');
    let ty = match (unsigned, long) {
        (true, true) => ScalarType::ULong,
        (false, true) => {
            if value <= i64::MAX as u64 {
                ScalarType::Long
            } else {
                ScalarType::ULong
            }
        }
        (true, false) => {
            if value <= u32::MAX as u64 {
                ScalarType::UInt
            } else {
                ScalarType::ULong
            }
        }
        (false, false) => {
            if value <= i32::MAX as u64 {
                ScalarType::Int
            } else if value <= i64::MAX as u64 {
                ScalarType::Long
            } else {
                ScalarType::ULong
            }
        }
    };
    Some((value, ty))
}

fn parse_float(text: &str) -> Option<(f64, ScalarType)> {
    match text.strip_suffix(['f', 'F']) {
        Some(body) => body.parse::<f64>().ok().map(|v| (v as f32 as f64, ScalarType::Float)),
        None => text.parse::<f64>().ok().map(|v| (v, ScalarType::Double)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::lexer::lex;

    fn parse_src(src: &str) -> PResult<Vec<KernelDecl>> {
        let tokens = lex(src, &[])?;
        parse(&tokens, src.len())
    }

    #[test]
    fn test_kernel_signature() {
        let kernels = parse_src(
            "__kernel void sub(__global const int *a, __global int *b, const uint n) { }",
        )
        .unwrap();
        assert_eq!(kernels.len(), 1);

        let k = &kernels[0];
        assert_eq!(k.name, "sub");
        assert_eq!(
            k.params[0].ty,
            ParamType::Pointer {
                elem: ScalarType::Int,
                space: AddressSpace::Global,
                is_const: true
            }
        );
        assert_eq!(k.params[2].ty, ParamType::Scalar(ScalarType::UInt));
    }

    #[test]
    fn test_precedence() {
        let kernels = parse_src("kernel void k() { int x = 1 + 2 * 3; }").unwrap();
        let Stmt::Decl { vars, .. } = &kernels[0].body[0] else {
            panic!("expected declaration");
        };
        let init = vars[0].init.as_ref().unwrap();
        match &init.kind {
            ExprKind::Binary(BinOp::Add, _, rhs) => {
                assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cast_and_postfix() {
        let kernels =
            parse_src("kernel void k(__global float *o) { int i = 0; o[i++] = (float)i; }").unwrap();
        let Stmt::Expr(expr) = &kernels[0].body[1] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { target, value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target.kind, ExprKind::Index(_, _)));
        assert!(matches!(value.kind, ExprKind::Cast(ScalarType::Float, _)));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse_src("kernel void k() { int x = 1 }").unwrap_err();
        assert!(err.message.contains("`;`"), "{}", err.message);
    }

    #[test]
    fn test_unqualified_pointer_rejected() {
        let err = parse_src("kernel void k(int *a) {}").unwrap_err();
        assert!(err.message.contains("__global"));
    }

    #[test]
    fn test_deep_nesting_is_a_diagnostic() {
        let depth = 20_000;
        let src = format!(
            "kernel void k(__global int *o) {{ o[0] = {}1{}; }}",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let err = parse_src(&src).unwrap_err();
        assert!(err.message.contains("nesting"), "{}", err.message);

        let blocks = format!("kernel void k() {{ {}{} }}", "{".repeat(depth), "}".repeat(depth));
        assert!(parse_src(&blocks).unwrap_err().message.contains("nesting"));

        let chain = format!("kernel void k() {{ int x; x{}; }}", " = x".repeat(depth));
        assert!(parse_src(&chain).unwrap_err().message.contains("nesting"));

        let shallow = format!("kernel void k(__global int *o) {{ o[0] = {}1{}; }}", "(".repeat(8), ")".repeat(8));
        assert!(parse_src(&shallow).is_ok());
    }

    #[test]
    fn test_bool_parameter_rejected() {
        let err = parse_src("kernel void k(bool flag) {}").unwrap_err();
        assert_eq!(err.message, "kernel parameter `flag` cannot have type `bool`");
        assert!(parse_src("kernel void k(__global bool *flags) {}").is_err());
        assert!(parse_src("kernel void k(__global int *o) { bool b = true; o[0] = b; }").is_ok());
    }

    #[test]
    fn test_int_literal_types() {
        assert_eq!(parse_int("7"), Some((7, ScalarType::Int)));
        assert_eq!(parse_int("7u"), Some((7, ScalarType::UInt)));
        assert_eq!(parse_int("0xFFul"), Some((255, ScalarType::ULong)));
        assert_eq!(parse_int("3000000000"), Some((3_000_000_000, ScalarType::Long)));
        assert_eq!(parse_float("0.5f"), Some((0.5, ScalarType::Float)));
    }
}
