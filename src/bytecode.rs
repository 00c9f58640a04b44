// The compiled form of an expression.
//
// An Expr is a flat instruction stream plus two side tables: the
// constants it embeds and the bindings it references. Instructions
// are one word each and carry u16 indices into those tables (or into
// the global builtin table), so iterating the stream stays cache
// friendly and the evaluator is a single match.
//
// Constants are deduplicated by value equality on insertion, with a
// use count per slot so the constant folder can pop a trailing load
// and know whether the constant itself is still referenced.

use crate::builtin::{self, BltnId};
use crate::error::{Error, Result};
use crate::namespace::VarId;
use crate::value::Value;

// Maximum values on the stack during evaluation. Expressions that
// would exceed it are rejected at validation time.
pub const STACK_LIMIT: usize = 256;

// The in-memory opcode format.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Instr {
    // Push a clone of a constant / argument / binding's value
    LoadConst(u16),
    LoadArg(u16),
    LoadVar(u16),
    // Run a builtin over the top `arity` slots
    Apply(BltnId),
    // Run a user-defined function over the top `arity` slots
    Call(u16),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expr {
    pub code: Vec<Instr>,
    consts: Vec<Value>,
    const_uses: Vec<u32>,
    vars: Vec<VarId>,
}

fn index16(len: usize) -> Result<u16> {
    if len > u16::max_value() as usize {
        Err(Error::TooDeep)
    } else {
        Ok(len as u16)
    }
}

impl Expr {
    pub fn new() -> Expr {
        Expr::default()
    }

    pub fn const_at(&self, idx: u16) -> &Value {
        &self.consts[idx as usize]
    }

    pub fn var_at(&self, idx: u16) -> VarId {
        self.vars[idx as usize]
    }

    /// Bindings this expression references (loads and calls alike).
    pub fn vars(&self) -> &[VarId] {
        &self.vars
    }

    // Intern `val`, returning the index of an equal constant if one
    // is already present.
    fn put_const(&mut self, val: Value) -> Result<u16> {
        if let Some(at) = self.consts.iter().position(|c| *c == val) {
            return Ok(at as u16);
        }
        let at = index16(self.consts.len())?;
        self.consts.push(val);
        self.const_uses.push(0);
        Ok(at)
    }

    fn put_var(&mut self, var: VarId) -> Result<u16> {
        if let Some(at) = self.vars.iter().position(|&v| v == var) {
            return Ok(at as u16);
        }
        let at = index16(self.vars.len())?;
        self.vars.push(var);
        Ok(at)
    }

    pub fn load_const(&mut self, val: Value) -> Result<()> {
        let at = self.put_const(val)?;
        self.const_uses[at as usize] += 1;
        self.code.push(Instr::LoadConst(at));
        Ok(())
    }

    pub fn load_arg(&mut self, arg: usize) -> Result<()> {
        self.code.push(Instr::LoadArg(index16(arg)?));
        Ok(())
    }

    pub fn load_var(&mut self, var: VarId) -> Result<()> {
        let at = self.put_var(var)?;
        self.code.push(Instr::LoadVar(at));
        Ok(())
    }

    pub fn call_var(&mut self, var: VarId) -> Result<()> {
        let at = self.put_var(var)?;
        self.code.push(Instr::Call(at));
        Ok(())
    }

    pub fn apply(&mut self, id: BltnId) {
        self.code.push(Instr::Apply(id));
    }

    /* Remove the trailing instruction if it is a constant load and
     * hand back its value. The constant slot itself is dropped only
     * once nothing else references it; otherwise the value is cloned
     * out and the slot stays for the instructions still using it.
     */
    pub fn pop_const_load(&mut self) -> Option<Value> {
        let at = match self.code.last() {
            Some(&Instr::LoadConst(at)) => at as usize,
            _ => return None,
        };
        self.code.pop();
        self.const_uses[at] -= 1;
        if self.const_uses[at] == 0 && at + 1 == self.consts.len() {
            self.const_uses.pop();
            self.consts.pop()
        } else {
            Some(self.consts[at])
        }
    }

    /* Simulate the stack effect of the instruction stream. A valid
     * expression ends with exactly one value and never dips below
     * zero; `var_arity` reports the declared arity of referenced
     * bindings for Call instructions.
     *
     * Returns the maximum stack height reached.
     */
    pub fn validate<F>(&self, var_arity: F) -> Result<usize>
    where
        F: Fn(VarId) -> usize,
    {
        let mut height = 0usize;
        let mut max = 0usize;
        for instr in &self.code {
            let arity = match *instr {
                Instr::LoadConst(_) | Instr::LoadArg(_) | Instr::LoadVar(_) => 0,
                Instr::Apply(id) => builtin::get(id).arity(),
                Instr::Call(at) => var_arity(self.var_at(at)),
            };
            if height < arity {
                return Err(Error::MissingValues);
            }
            height -= arity;
            height += 1;
            if height > max {
                max = height;
            }
        }

        if height == 0 {
            Err(Error::MissingValues)
        } else if height > 1 {
            Err(Error::MissingOpers)
        } else if max > STACK_LIMIT {
            Err(Error::TooDeep)
        } else {
            Ok(max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::lookup_oper;
    use crate::namespace::Namespace;

    fn add_id() -> BltnId {
        lookup_oper("+", false).unwrap().0
    }

    #[test]
    fn test_const_dedup() {
        let mut e = Expr::new();
        e.load_const(Value::Int(2)).unwrap();
        e.load_const(Value::Int(3)).unwrap();
        e.load_const(Value::Int(2)).unwrap();
        assert_eq!(e.code.len(), 3);
        assert_eq!(e.const_at(0), &Value::Int(2));
        assert_eq!(e.const_at(1), &Value::Int(3));
        assert_eq!(e.code[2], Instr::LoadConst(0));
        // Int and Float are distinct constants
        e.load_const(Value::Float(2.0)).unwrap();
        assert_eq!(e.code[3], Instr::LoadConst(2));
    }

    #[test]
    fn test_var_dedup() {
        let mut nmsp = Namespace::new(false);
        let x = nmsp.put("x");
        let y = nmsp.put("y");
        let mut e = Expr::new();
        e.load_var(x).unwrap();
        e.load_var(y).unwrap();
        e.call_var(x).unwrap();
        assert_eq!(e.vars().len(), 2);
        assert_eq!(e.code[2], Instr::Call(0));
    }

    #[test]
    fn test_pop_const_load_use_counts() {
        let mut e = Expr::new();
        e.load_const(Value::Int(7)).unwrap();
        e.load_const(Value::Int(7)).unwrap();
        // Two loads of one slot: popping the first leaves the slot
        assert_eq!(e.pop_const_load(), Some(Value::Int(7)));
        assert_eq!(e.const_at(0), &Value::Int(7));
        // Popping the last reference drops the slot too
        assert_eq!(e.pop_const_load(), Some(Value::Int(7)));
        assert_eq!(e.code.len(), 0);
        e.load_const(Value::Int(9)).unwrap();
        assert_eq!(e.code[0], Instr::LoadConst(0));
    }

    #[test]
    fn test_pop_const_load_only_pops_consts() {
        let mut nmsp = Namespace::new(false);
        let x = nmsp.put("x");
        let mut e = Expr::new();
        e.load_var(x).unwrap();
        assert_eq!(e.pop_const_load(), None);
        assert_eq!(e.code.len(), 1);
    }

    #[test]
    fn test_validate_heights() {
        let mut e = Expr::new();
        e.load_const(Value::Int(1)).unwrap();
        e.load_const(Value::Int(2)).unwrap();
        e.apply(add_id());
        assert_eq!(e.validate(|_| 0), Ok(2));

        // Two values, no operator
        let mut e = Expr::new();
        e.load_const(Value::Int(1)).unwrap();
        e.load_const(Value::Int(2)).unwrap();
        assert_eq!(e.validate(|_| 0), Err(Error::MissingOpers));

        // Operator missing a value
        let mut e = Expr::new();
        e.load_const(Value::Int(1)).unwrap();
        e.apply(add_id());
        assert_eq!(e.validate(|_| 0), Err(Error::MissingValues));

        // Empty stream yields nothing
        assert_eq!(Expr::new().validate(|_| 0), Err(Error::MissingValues));
    }
}
