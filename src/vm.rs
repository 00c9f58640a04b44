// (C) 2020 Brandon Lewis
//
// The stack machine that runs compiled expressions.
//
// *Execution model*
//
// An expression is a flat instruction stream over a value stack.
// Load instructions push a clone of a constant, an argument, or
// another binding's value; apply instructions hand the top `arity`
// slots to a builtin as a block, which leaves its result in the
// first of them; call instructions run a user-defined function's
// own stream over the same stack, with the top `arity` slots as its
// argument frame.
//
// *Validity*
//
// A run of a validated expression grows the stack by exactly one
// slot. The end-of-run height check stays anyway: it is what turns a
// malformed hand-assembled stream into StackUnderflow/StackSurplus
// instead of undefined behavior.
//
// *Termination*
//
// Loading a binding recurses into that binding's expression. The
// namespace refuses definitions that would close a dependency loop,
// and bindings without expressions fail with NoExpr here, so the
// recursion is finite.
//
// *Caching*
//
// An arity-0 binding remembers its first outcome, value or error;
// later loads clone the remembered result. Functions are evaluated
// on every call.

use crate::builtin::{self, Kind};
use crate::bytecode::{Expr, Instr, STACK_LIMIT};
use crate::error::{Error, Result};
use crate::namespace::{Namespace, VarId};
use crate::value::Value;

// Push with a hard depth limit rather than growing without bound.
fn push(stack: &mut Vec<Value>, v: Value) -> Result<()> {
    if stack.len() >= STACK_LIMIT {
        return Err(Error::StackOverflow);
    }
    stack.push(v);
    Ok(())
}

/// Evaluate a binding and push its value, computing and caching the
/// outcome on first use. The binding must be a plain variable.
pub fn eval_binding(nmsp: &mut Namespace, id: VarId, stack: &mut Vec<Value>) -> Result<()> {
    if let Some(outcome) = nmsp.cached_outcome(id) {
        return push(stack, outcome?);
    }

    let expr = match nmsp.expr_of(id) {
        Some(expr) => expr,
        None => return Err(Error::NoExpr),
    };

    let start = stack.len();
    let result = eval_expr(nmsp, &expr, stack, None);
    let outcome = match result {
        Ok(()) => Ok(*stack.last().expect("evaluation left no result")),
        Err(err) => {
            stack.truncate(start);
            Err(err)
        }
    };
    nmsp.set_cached(id, outcome.clone());
    outcome.map(|_| ())
}

/* Run one instruction stream. `frame` is the stack index of the
 * first argument when executing a function body; LoadArg indexes
 * from there. On success exactly one value has been added above the
 * entry height; on error the stack is restored to it.
 */
pub fn eval_expr(
    nmsp: &mut Namespace,
    expr: &Expr,
    stack: &mut Vec<Value>,
    frame: Option<usize>,
) -> Result<()> {
    let start = stack.len();
    let result = exec(nmsp, expr, stack, frame, start);
    if result.is_err() {
        stack.truncate(start);
    }
    result
}

fn exec(
    nmsp: &mut Namespace,
    expr: &Expr,
    stack: &mut Vec<Value>,
    frame: Option<usize>,
    start: usize,
) -> Result<()> {
    for instr in &expr.code {
        if cfg!(test) {
            eprintln!("{:?} {:?}", instr, stack);
        }
        match *instr {
            Instr::LoadConst(at) => push(stack, *expr.const_at(at))?,

            Instr::LoadArg(at) => {
                let base = frame.ok_or(Error::NoArgs)?;
                let v = stack[base + at as usize];
                push(stack, v)?;
            }

            Instr::LoadVar(at) => {
                let id = expr.var_at(at);
                if nmsp.arity(id).unwrap_or(0) > 0 {
                    return Err(Error::VarNotFunc);
                }
                eval_binding(nmsp, id, stack)?;
            }

            Instr::Apply(id) => {
                let bltn = builtin::get(id);
                match bltn.kind {
                    Kind::Const(v) => push(stack, v)?,
                    _ => {
                        let arity = bltn.arity();
                        if stack.len() < arity {
                            return Err(Error::StackUnderflow);
                        }
                        let base = stack.len() - arity;
                        let func = bltn.func().expect("fixity builtin without function");
                        func(&mut stack[base..])?;
                        stack.truncate(base + 1);
                    }
                }
            }

            Instr::Call(at) => {
                let id = expr.var_at(at);
                let arity = match nmsp.arity(id) {
                    Some(arity) if arity > 0 => arity,
                    _ => return Err(Error::VarNotFunc),
                };
                if stack.len() < arity {
                    return Err(Error::StackUnderflow);
                }
                let callee = nmsp.expr_of(id).ok_or(Error::NoExpr)?;
                let base = stack.len() - arity;
                eval_expr(nmsp, &callee, stack, Some(base))?;
                // Move the result down over the argument frame
                let ret = stack.pop().expect("call left no result");
                stack.truncate(base);
                stack.push(ret);
            }
        }
    }

    // Exactly one value must have appeared
    if stack.len() <= start {
        Err(Error::StackUnderflow)
    } else if stack.len() > start + 1 {
        Err(Error::StackSurplus)
    } else {
        Ok(())
    }
}

// These tests drive the machine over hand-assembled expressions, so
// they pin down the execution semantics independently of the parser.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::lookup_oper;
    use crate::value::ArithError;

    fn op(name: &str, unary: bool) -> crate::builtin::BltnId {
        lookup_oper(name, unary).unwrap().0
    }

    // Run an expression with no argument frame against an empty
    // namespace and return the outcome.
    fn eval(expr: &Expr) -> Result<Value> {
        let mut nmsp = Namespace::new(false);
        let mut stack = Vec::new();
        eval_expr(&mut nmsp, expr, &mut stack, None)?;
        assert_eq!(stack.len(), 1);
        Ok(stack[0])
    }

    #[test]
    fn test_simple() {
        let mut e = Expr::new();
        e.load_const(Value::Int(1)).unwrap();
        e.load_const(Value::Int(2)).unwrap();
        e.apply(op("+", false));
        assert_eq!(eval(&e), Ok(Value::Int(3)));
    }

    #[test]
    fn test_apply_block_discipline() {
        // 10 - 2 * 3: the multiply consumes two slots and leaves one
        let mut e = Expr::new();
        e.load_const(Value::Int(10)).unwrap();
        e.load_const(Value::Int(2)).unwrap();
        e.load_const(Value::Int(3)).unwrap();
        e.apply(op("*", false));
        e.apply(op("-", false));
        assert_eq!(eval(&e), Ok(Value::Int(4)));
    }

    #[test]
    fn test_unary() {
        let mut e = Expr::new();
        e.load_const(Value::Float(1.5)).unwrap();
        e.apply(op("-", true));
        assert_eq!(eval(&e), Ok(Value::Float(-1.5)));
    }

    #[test]
    fn test_arith_error_propagates() {
        let mut e = Expr::new();
        e.load_const(Value::Int(1)).unwrap();
        e.load_const(Value::Int(0)).unwrap();
        e.apply(op("//", false));
        assert_eq!(eval(&e), Err(Error::Arith(ArithError::DivideByZero)));
    }

    #[test]
    fn test_stack_underflow_and_surplus() {
        let mut e = Expr::new();
        e.load_const(Value::Int(1)).unwrap();
        e.apply(op("+", false));
        assert_eq!(eval(&e), Err(Error::StackUnderflow));

        let mut e = Expr::new();
        e.load_const(Value::Int(1)).unwrap();
        e.load_const(Value::Int(2)).unwrap();
        assert_eq!(eval(&e), Err(Error::StackSurplus));

        assert_eq!(eval(&Expr::new()), Err(Error::StackUnderflow));
    }

    #[test]
    fn test_load_var_and_caching() {
        let mut nmsp = Namespace::new(false);
        nmsp.define("x: 20 + 22").0.unwrap();
        let x = nmsp.get("x").unwrap();

        let mut e = Expr::new();
        e.load_var(x).unwrap();
        e.load_var(x).unwrap();
        e.apply(op("*", false));
        let mut stack = Vec::new();
        eval_expr(&mut nmsp, &e, &mut stack, None).unwrap();
        assert_eq!(stack, vec![Value::Int(42 * 42)]);

        // A second evaluation hits the cache and agrees with a fresh one
        assert_eq!(nmsp.value(x), Ok(Value::Int(42)));
        assert!(nmsp.cached_outcome(x).is_some());
    }

    #[test]
    fn test_load_var_without_expression() {
        let mut nmsp = Namespace::new(false);
        let ghost = nmsp.put("ghost");
        let mut e = Expr::new();
        e.load_var(ghost).unwrap();
        let mut stack = Vec::new();
        assert_eq!(
            eval_expr(&mut nmsp, &e, &mut stack, None),
            Err(Error::NoExpr)
        );
        assert!(stack.is_empty());
    }

    #[test]
    fn test_load_var_rejects_functions() {
        let mut nmsp = Namespace::new(false);
        nmsp.define("f(n): n + 1").0.unwrap();
        let f = nmsp.get("f").unwrap();
        let mut e = Expr::new();
        e.load_var(f).unwrap();
        let mut stack = Vec::new();
        assert_eq!(
            eval_expr(&mut nmsp, &e, &mut stack, None),
            Err(Error::VarNotFunc)
        );
    }

    #[test]
    fn test_call_moves_result_over_frame() {
        let mut nmsp = Namespace::new(false);
        nmsp.define("sub2(a, b): a - b").0.unwrap();
        let sub2 = nmsp.get("sub2").unwrap();

        // 100 + sub2(7, 3)
        let mut e = Expr::new();
        e.load_const(Value::Int(100)).unwrap();
        e.load_const(Value::Int(7)).unwrap();
        e.load_const(Value::Int(3)).unwrap();
        e.call_var(sub2).unwrap();
        e.apply(op("+", false));
        let mut stack = Vec::new();
        eval_expr(&mut nmsp, &e, &mut stack, None).unwrap();
        assert_eq!(stack, vec![Value::Int(104)]);
    }

    #[test]
    fn test_call_without_args_on_stack() {
        let mut nmsp = Namespace::new(false);
        nmsp.define("f(n): n").0.unwrap();
        let f = nmsp.get("f").unwrap();
        let mut e = Expr::new();
        e.call_var(f).unwrap();
        let mut stack = Vec::new();
        assert_eq!(
            eval_expr(&mut nmsp, &e, &mut stack, None),
            Err(Error::StackUnderflow)
        );
    }

    #[test]
    fn test_load_arg_needs_frame() {
        let mut e = Expr::new();
        e.load_arg(0).unwrap();
        assert_eq!(eval(&e), Err(Error::NoArgs));
    }

    #[test]
    fn test_stack_overflow() {
        let mut nmsp = Namespace::new(false);
        let mut e = Expr::new();
        for _ in 0..STACK_LIMIT + 1 {
            e.load_const(Value::Int(1)).unwrap();
        }
        let mut stack = Vec::new();
        assert_eq!(
            eval_expr(&mut nmsp, &e, &mut stack, None),
            Err(Error::StackOverflow)
        );
        assert!(stack.is_empty());
    }

    #[test]
    fn test_error_cached_without_rerun() {
        let mut nmsp = Namespace::new(false);
        nmsp.define("bad: 1 % 0").0.unwrap();
        let bad = nmsp.get("bad").unwrap();
        let first = nmsp.value(bad);
        assert_eq!(first, Err(Error::Arith(ArithError::DivideByZero)));
        assert_eq!(nmsp.cached_outcome(bad), Some(first.clone()));
        assert_eq!(nmsp.value(bad), first);
    }
}
