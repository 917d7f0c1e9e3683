//! Work-item evaluator for compiled kernels.
//!
//! A launch runs one work-group at a time per call to [`run_group`]; the
//! dispatcher spreads groups over the device's compute pool. Faults (out of
//! bounds access, integer division by zero, unbound arguments) abort the
//! group and are reported as a message.

use super::ast::{BinOp, LogicOp, UnOp};
use super::compile::{CompiledKernel, IExpr, IStmt, MathFn, Place, WorkItemFn};
use super::types::{ScalarType, Value};
use crate::memory::Buffer;
use parking_lot::RwLock;

pub(crate) type Fault = String;
type Eval<T> = std::result::Result<T, Fault>;

/// Argument as seen by a running kernel.
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    Buffer(Buffer),
    Scalar(Value),
}

/// Index space of one launch. Unused dimensions have size 1 and offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkGeometry {
    pub dims: usize,
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub offset: [usize; 3],
}

impl WorkGeometry {
    pub fn num_groups(&self) -> [usize; 3] {
        [
            self.global[0] / self.local[0],
            self.global[1] / self.local[1],
            self.global[2] / self.local[2],
        ]
    }

    pub fn total_groups(&self) -> usize {
        self.num_groups().iter().product()
    }

    fn group_coords(&self, group: usize) -> [usize; 3] {
        let n = self.num_groups();
        [group % n[0], (group / n[0]) % n[1], group / (n[0] * n[1])]
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return,
}

#[derive(Clone, Copy)]
enum Loc {
    Local(usize),
    Elem {
        param: usize,
        elem: ScalarType,
        index: u64,
    },
}

struct WorkItem<'a> {
    kernel: &'a CompiledKernel,
    args: &'a [Binding],
    geometry: &'a WorkGeometry,
    group: [usize; 3],
    local_id: [usize; 3],
    slots: Vec<Value>,
}

/// Execute every work-item of the linear work-group `group`.
pub(crate) fn run_group(
    kernel: &CompiledKernel,
    args: &[Binding],
    geometry: &WorkGeometry,
    group: usize,
) -> Eval<()> {
    let mut item = WorkItem {
        kernel,
        args,
        geometry,
        group: geometry.group_coords(group),
        local_id: [0; 3],
        slots: vec![Value::Int(0); kernel.num_slots],
    };

    let [lx, ly, lz] = geometry.local;
    for z in 0..lz {
        for y in 0..ly {
            for x in 0..lx {
                item.local_id = [x, y, z];
                item.reset()?;
                item.block(&kernel.body)?;
            }
        }
    }
    Ok(())
}

impl<'a> WorkItem<'a> {
    fn reset(&mut self) -> Eval<()> {
        for (index, param) in self.kernel.params.iter().enumerate() {
            let Some(slot) = param.slot else { continue };
            match self.args.get(index) {
                Some(Binding::Scalar(value)) => self.slots[slot] = *value,
                _ => return Err(format!("argument `{}` is not bound to a scalar", param.name)),
            }
        }
        Ok(())
    }

    fn block(&mut self, stmts: &[IStmt]) -> Eval<Flow> {
        for stmt in stmts {
            match self.stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn stmt(&mut self, stmt: &IStmt) -> Eval<Flow> {
        match stmt {
            IStmt::Expr(expr) => {
                self.eval(expr)?;
            }
            IStmt::Init { slot, value } => {
                let value = self.eval(value)?;
                self.slots[*slot] = value;
            }
            IStmt::If {
                cond,
                then,
                otherwise,
            } => {
                return if self.eval(cond)?.truthy() {
                    self.block(then)
                } else {
                    self.block(otherwise)
                };
            }
            IStmt::Loop { cond, step, body } => loop {
                if let Some(cond) = cond {
                    if !self.eval(cond)?.truthy() {
                        break;
                    }
                }
                match self.block(body)? {
                    Flow::Break => break,
                    Flow::Return => return Ok(Flow::Return),
                    Flow::Normal | Flow::Continue => {}
                }
                if let Some(step) = step {
                    self.eval(step)?;
                }
            },
            IStmt::Block(stmts) => return self.block(stmts),
            IStmt::Return => return Ok(Flow::Return),
            IStmt::Break => return Ok(Flow::Break),
            IStmt::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expr: &IExpr) -> Eval<Value> {
        match expr {
            IExpr::Const(value) => Ok(*value),
            IExpr::Local(slot) => Ok(self.slots[*slot]),
            IExpr::Load { param, elem, index } => {
                let index = self.eval(index)?.as_i64() as u64;
                self.load(*param, *elem, index)
            }
            IExpr::Convert { from, to, expr } => Ok(self.eval(expr)?.convert(*from, *to)),
            IExpr::Unary { op, ty, expr } => {
                let value = self.eval(expr)?;
                Ok(unary(*op, *ty, value))
            }
            IExpr::Binary { op, ty, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, *ty, lhs, rhs)
            }
            IExpr::Logical { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?.truthy();
                let result = match op {
                    LogicOp::And => lhs && self.eval(rhs)?.truthy(),
                    LogicOp::Or => lhs || self.eval(rhs)?.truthy(),
                };
                Ok(Value::Int(result as i64))
            }
            IExpr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            IExpr::Assign {
                place,
                ty,
                op,
                value,
            } => {
                let loc = self.locate(place)?;
                let value = self.eval(value)?;
                let new = match op {
                    None => value,
                    Some((op, op_ty)) => {
                        let current = self.read(loc)?.convert(*ty, *op_ty);
                        binary(*op, *op_ty, current, value)?.convert(*op_ty, *ty)
                    }
                };
                self.write(loc, new)?;
                Ok(new)
            }
            IExpr::IncDec {
                place,
                ty,
                increment,
                prefix,
            } => {
                let loc = self.locate(place)?;
                let old = self.read(loc)?;
                let new = match old {
                    Value::Int(v) => {
                        let v = if *increment { v.wrapping_add(1) } else { v.wrapping_sub(1) };
                        Value::Int(ty.wrap(v))
                    }
                    Value::Float(f) => {
                        let f = if *increment { f + 1.0 } else { f - 1.0 };
                        Value::Float(f).convert(ScalarType::Double, *ty)
                    }
                };
                self.write(loc, new)?;
                Ok(if *prefix { new } else { old })
            }
            IExpr::WorkItem(func, dim) => {
                let dim = self.eval(dim)?.as_i64() as u64 as usize;
                Ok(Value::Int(self.work_item(*func, dim) as i64))
            }
            IExpr::WorkDim => Ok(Value::Int(self.geometry.dims as i64)),
            IExpr::Math { func, ty, args } => {
                let mut values = [Value::Int(0); 3];
                for (slot, arg) in values.iter_mut().zip(args) {
                    *slot = self.eval(arg)?;
                }
                Ok(math(*func, *ty, &values[..args.len()]))
            }
        }
    }

    fn work_item(&self, func: WorkItemFn, dim: usize) -> usize {
        let g = self.geometry;
        if dim >= g.dims {
            return match func {
                WorkItemFn::GlobalSize | WorkItemFn::LocalSize | WorkItemFn::NumGroups => 1,
                _ => 0,
            };
        }
        match func {
            WorkItemFn::GlobalId => g.offset[dim] + self.group[dim] * g.local[dim] + self.local_id[dim],
            WorkItemFn::LocalId => self.local_id[dim],
            WorkItemFn::GroupId => self.group[dim],
            WorkItemFn::GlobalSize => g.global[dim],
            WorkItemFn::LocalSize => g.local[dim],
            WorkItemFn::NumGroups => g.global[dim] / g.local[dim],
            WorkItemFn::GlobalOffset => g.offset[dim],
        }
    }

    fn locate(&mut self, place: &Place) -> Eval<Loc> {
        match place {
            Place::Local(slot) => Ok(Loc::Local(*slot)),
            Place::Elem { param, elem, index } => {
                let index = self.eval(index)?.as_i64() as u64;
                Ok(Loc::Elem {
                    param: *param,
                    elem: *elem,
                    index,
                })
            }
        }
    }

    fn read(&self, loc: Loc) -> Eval<Value> {
        match loc {
            Loc::Local(slot) => Ok(self.slots[slot]),
            Loc::Elem { param, elem, index } => self.load(param, elem, index),
        }
    }

    fn write(&mut self, loc: Loc, value: Value) -> Eval<()> {
        match loc {
            Loc::Local(slot) => {
                self.slots[slot] = value;
                Ok(())
            }
            Loc::Elem { param, elem, index } => self.store(param, elem, index, value),
        }
    }

    fn storage(&self, param: usize) -> Eval<&'a RwLock<Vec<u8>>> {
        match self.args.get(param) {
            Some(Binding::Buffer(buffer)) => buffer.host_storage().ok_or_else(|| {
                format!("argument `{}` is not in host memory", self.param_name(param))
            }),
            _ => Err(format!(
                "argument `{}` is not bound to a buffer",
                self.param_name(param)
            )),
        }
    }

    fn param_name(&self, param: usize) -> &str {
        self.kernel
            .params
            .get(param)
            .map(|p| p.name.as_str())
            .unwrap_or("?")
    }

    fn element_range(&self, param: usize, elem: ScalarType, index: u64, len: usize) -> Eval<std::ops::Range<usize>> {
        let size = elem.size();
        let range = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(size))
            .and_then(|start| Some(start..start.checked_add(size)?))
            .filter(|range| range.end <= len);
        match range {
            Some(range) => Ok(range),
            None => Err(format!(
                "out-of-bounds access `{}[{}]` ({} elements of `{}`)",
                self.param_name(param),
                index as i64,
                len / size,
                elem
            )),
        }
    }

    fn load(&self, param: usize, elem: ScalarType, index: u64) -> Eval<Value> {
        let data = self.storage(param)?.read();
        let range = self.element_range(param, elem, index, data.len())?;
        Ok(Value::decode(elem, &data[range]))
    }

    fn store(&self, param: usize, elem: ScalarType, index: u64, value: Value) -> Eval<()> {
        let mut data = self.storage(param)?.write();
        let range = self.element_range(param, elem, index, data.len())?;
        value.encode(elem, &mut data[range]);
        Ok(())
    }
}

fn unary(op: UnOp, ty: ScalarType, value: Value) -> Value {
    match (op, value) {
        (UnOp::Not, v) => Value::Int(!v.truthy() as i64),
        (UnOp::Plus, v) => v,
        (UnOp::Neg, Value::Int(v)) => Value::Int(ty.wrap(v.wrapping_neg())),
        (UnOp::Neg, Value::Float(f)) => Value::Float(-f),
        (UnOp::BitNot, Value::Int(v)) => Value::Int(ty.wrap(!v)),
        (UnOp::BitNot, v) => v,
    }
}

fn binary(op: BinOp, ty: ScalarType, lhs: Value, rhs: Value) -> Eval<Value> {
    match (lhs, rhs) {
        (Value::Float(a), Value::Float(b)) if ty.is_float() => Ok(float_binary(op, ty, a, b)),
        _ => int_binary(op, ty, lhs.as_i64(), rhs.as_i64()),
    }
}

fn float_binary(op: BinOp, ty: ScalarType, a: f64, b: f64) -> Value {
    let bool_value = |b: bool| Value::Int(b as i64);
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Eq => return bool_value(a == b),
        BinOp::Ne => return bool_value(a != b),
        BinOp::Lt => return bool_value(a < b),
        BinOp::Gt => return bool_value(a > b),
        BinOp::Le => return bool_value(a <= b),
        BinOp::Ge => return bool_value(a >= b),
        // Rejected by the compiler for floating point operands.
        _ => f64::NAN,
    };
    Value::Float(result).convert(ScalarType::Double, ty)
}

fn int_binary(op: BinOp, ty: ScalarType, a: i64, b: i64) -> Eval<Value> {
    let unsigned = ty.is_unsigned();
    let ordering = if unsigned {
        (a as u64).cmp(&(b as u64))
    } else {
        a.cmp(&b)
    };

    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => {
            return Err("integer division by zero".to_string());
        }
        BinOp::Div if unsigned => ((a as u64) / (b as u64)) as i64,
        BinOp::Div => a.wrapping_div(b),
        BinOp::Rem if unsigned => ((a as u64) % (b as u64)) as i64,
        BinOp::Rem => a.wrapping_rem(b),
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Shl => a.wrapping_shl((b as u32) & ty.shift_mask()),
        BinOp::Shr => {
            let n = (b as u32) & ty.shift_mask();
            if unsigned {
                ((a as u64) >> n) as i64
            } else {
                a >> n
            }
        }
        BinOp::Eq => return Ok(Value::Int(ordering.is_eq() as i64)),
        BinOp::Ne => return Ok(Value::Int(ordering.is_ne() as i64)),
        BinOp::Lt => return Ok(Value::Int(ordering.is_lt() as i64)),
        BinOp::Gt => return Ok(Value::Int(ordering.is_gt() as i64)),
        BinOp::Le => return Ok(Value::Int(ordering.is_le() as i64)),
        BinOp::Ge => return Ok(Value::Int(ordering.is_ge() as i64)),
    };
    Ok(Value::Int(ty.wrap(result)))
}

fn math(func: MathFn, ty: ScalarType, args: &[Value]) -> Value {
    if ty.is_integer() {
        let unsigned = ty.is_unsigned();
        let less = |a: i64, b: i64| if unsigned { (a as u64) < (b as u64) } else { a < b };
        let min = |a: i64, b: i64| if less(b, a) { b } else { a };
        let max = |a: i64, b: i64| if less(a, b) { b } else { a };
        let arg = |i: usize| args.get(i).map(|v| v.as_i64()).unwrap_or(0);

        let result = match func {
            MathFn::Min => min(arg(0), arg(1)),
            MathFn::Max => max(arg(0), arg(1)),
            MathFn::Clamp => min(max(arg(0), arg(1)), arg(2)),
            // sqrt always runs on float operands.
            MathFn::Sqrt => arg(0),
        };
        return Value::Int(result);
    }

    let arg = |i: usize| match args.get(i) {
        Some(Value::Float(f)) => *f,
        Some(Value::Int(v)) => *v as f64,
        None => 0.0,
    };
    let result = match func {
        MathFn::Min => arg(0).min(arg(1)),
        MathFn::Max => arg(0).max(arg(1)),
        MathFn::Clamp => arg(0).max(arg(1)).min(arg(2)),
        MathFn::Sqrt => arg(0).sqrt(),
    };
    Value::Float(result).convert(ScalarType::Double, ty)
}
