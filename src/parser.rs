// (C) 2020 Brandon Lewis
//
// A single-pass shunting-yard parser that compiles an infix
// expression directly to bytecode.
//
// There is no token stream: the parser walks the source once,
// pushing load instructions as values appear and holding operators
// on a side stack until something with lower priority displaces
// them. Parenthesized groups and comma-separated argument lists are
// handled with sentinel entries on the same stack.
//
// The parser owns three decisions that shape the language:
//
//  - Operator identity depends on position. After a value, operator
//    characters are looked up in the binary tree; elsewhere in the
//    unary tree. So `-` is subtraction or negation by context.
//
//  - Unknown words become forward references. A name that is not an
//    argument, not a builtin, and not yet bound is declared on the
//    spot and may be defined by a later line.
//
//  - Constant folding happens at apply time. When every operand of
//    an operator is a literal, the operator runs immediately and the
//    result is interned as a single constant; arithmetic faults
//    abort the parse with exactly that error.

use regex::Regex;

use crate::builtin::{self, BltnId, Kind};
use crate::bytecode::Expr;
use crate::error::{Error, Result};
use crate::namespace::{Namespace, VarId};
use crate::value::Value;

/* Element of the operator stack. Sentinels (parentheses, commas)
 * cannot be displaced by operators; functions wait beneath their
 * parenthesis until the close finds them.
 */
#[derive(Copy, Clone)]
enum OpEntry {
    OpenParen,
    Comma,
    // Unary or binary operator with its displacement priority
    Fixity { id: BltnId, priority: u8, binary: bool },
    // Builtin function awaiting its argument list
    Func { id: BltnId },
    // User-defined function call awaiting its argument list
    Call { var: VarId },
}

lazy_static! {
    static ref WORD_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_]+").unwrap();
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\u{b}'
}

struct Parser<'n, 'a> {
    nmsp: &'n mut Namespace,
    // Argument names of the function body being parsed, if any
    args: &'n [&'n str],
    src: &'a str,
    expr: Expr,
    ops: Vec<OpEntry>,
    // Whether the previous token behaved as a value; disambiguates
    // unary from binary operators and catches missing tokens
    was_val: bool,
    depth: usize,
    fold: bool,
}

/* Parse the longest expression prefixing `src`, resolving names
 * against (and forward declaring into) `nmsp`. Returns the compiled
 * expression and the unconsumed remainder.
 */
pub fn parse<'a>(
    nmsp: &mut Namespace,
    src: &'a str,
    args: &[&str],
) -> (Result<Expr>, &'a str) {
    let fold = nmsp.eval_on_parse();
    let mut parser = Parser {
        nmsp,
        args,
        src,
        expr: Expr::new(),
        ops: Vec::new(),
        was_val: false,
        depth: 0,
        fold,
    };
    let result = parser.run();
    (result, parser.src)
}

impl<'n, 'a> Parser<'n, 'a> {
    fn run(&mut self) -> Result<Expr> {
        while self.step()? {}
        self.finish()?;

        let expr = std::mem::take(&mut self.expr);
        let nmsp = &*self.nmsp;
        expr.validate(|id| nmsp.arity(id).unwrap_or(0))?;
        Ok(expr)
    }

    // Inside parentheses newlines are whitespace; outside they end
    // the expression.
    fn skip_whitespace(&mut self) {
        let inside = self.depth > 0;
        self.src = self.src.trim_start_matches(|c| {
            if inside { is_space(c) } else { is_blank(c) }
        });
    }

    fn advance(&mut self, len: usize) {
        self.src = &self.src[len..];
    }

    /// Consume one token. Returns false when the expression is over,
    /// either at end of line or at the first unrecognizable token.
    fn step(&mut self) -> Result<bool> {
        self.skip_whitespace();
        let c = match self.src.chars().next() {
            Some(c) => c,
            None => return Ok(false),
        };
        if self.depth == 0 && c == '\n' {
            return Ok(false);
        }

        match c {
            '(' => {
                if self.was_val {
                    // A value followed by a group would be a call
                    return Err(Error::MissingOpers);
                }
                self.advance(1);
                self.depth += 1;
                self.ops.push(OpEntry::OpenParen);
                self.was_val = false;
                return Ok(true);
            }
            ',' => {
                if self.depth == 0 {
                    return Err(Error::BadComma);
                }
                if !self.was_val {
                    return Err(Error::MissingValues);
                }
                self.advance(1);
                self.displace(0)?;
                self.ops.push(OpEntry::Comma);
                self.was_val = false;
                return Ok(true);
            }
            ')' => {
                if !self.was_val {
                    return Err(Error::MissingValues);
                }
                self.advance(1);
                self.close_parenth()?;
                self.depth -= 1;
                self.was_val = true;
                return Ok(true);
            }
            _ => {}
        }

        // Operator, chosen by fixity from position
        if let Some((id, len)) = builtin::lookup_oper(self.src, !self.was_val) {
            self.advance(len);
            self.shunt_oper(id)?;
            return Ok(true);
        }

        // Numeric literal
        if let Some((val, rest)) = Value::parse_prefix(self.src) {
            self.check_value_like()?;
            self.src = rest;
            self.expr.load_const(val)?;
            self.was_val = true;
            return Ok(true);
        }

        // Word: argument, builtin, or binding
        let word = match WORD_REGEX.find(self.src) {
            Some(m) => m.as_str(),
            // Unknown token: the expression ends here
            None => return Ok(false),
        };
        let wordlen = word.len();

        if let Some(at) = self.args.iter().position(|a| *a == word) {
            self.check_value_like()?;
            self.advance(wordlen);
            self.expr.load_arg(at)?;
            self.was_val = true;
            return Ok(true);
        }

        if let Some(id) = builtin::lookup_word(word) {
            self.check_value_like()?;
            self.advance(wordlen);
            match builtin::get(id).kind {
                Kind::Const(v) => {
                    self.expr.load_const(v)?;
                    self.was_val = true;
                }
                _ => {
                    self.ops.push(OpEntry::Func { id });
                    self.was_val = false;
                }
            }
            return Ok(true);
        }

        self.check_value_like()?;
        self.advance(wordlen);
        let var = self.nmsp.put(word);
        if self.peek_open_paren() {
            // The binding is being called
            if self.nmsp.has_expr(var) && self.nmsp.arity(var) == Some(0) {
                return Err(Error::MissingOpers);
            }
            self.ops.push(OpEntry::Call { var });
            self.was_val = false;
        } else {
            // Plain load; pin an undetermined binding down to a variable
            match self.nmsp.arity(var) {
                Some(arity) if arity > 0 => return Err(Error::FuncNocall),
                Some(_) => {}
                None => self.nmsp.set_arity(var, 0),
            }
            self.expr.load_var(var)?;
            self.was_val = true;
        }
        Ok(true)
    }

    // A value-like token may not follow another value, nor a function
    // name that never got its parentheses.
    fn check_value_like(&self) -> Result<()> {
        match self.ops.last() {
            Some(OpEntry::Func { .. }) | Some(OpEntry::Call { .. }) => {
                return Err(Error::FuncNocall)
            }
            _ => {}
        }
        if self.was_val {
            return Err(Error::MissingOpers);
        }
        Ok(())
    }

    // Does a '(' follow, past whitespace?
    fn peek_open_paren(&self) -> bool {
        let inside = self.depth > 0;
        let ahead = self.src.trim_start_matches(|c| {
            if inside { is_space(c) } else { is_blank(c) }
        });
        ahead.starts_with('(')
    }

    fn shunt_oper(&mut self, id: BltnId) -> Result<()> {
        let bltn = builtin::get(id);
        let priority = bltn.priority();

        // An operator can never follow an uncalled function
        if let Some(OpEntry::Func { .. }) | Some(OpEntry::Call { .. }) = self.ops.last() {
            return Err(Error::FuncNocall);
        }

        match bltn.kind {
            Kind::Prefix { prec, .. } => {
                /* A unary operator displaces nothing, so a
                 * left-associative binary of precedence >= its own
                 * sitting on the stack could never be applied in the
                 * right order. Reject the combination outright.
                 */
                if let Some(&OpEntry::Fixity { priority: top, binary: true, .. }) =
                    self.ops.last()
                {
                    if top & 1 == 1 && (top >> 1) >= prec {
                        return Err(Error::LowprecUnary);
                    }
                }
                self.ops.push(OpEntry::Fixity { id, priority, binary: false });
            }
            Kind::Infix { prec, .. } => {
                if !self.was_val {
                    return Err(Error::MissingValues);
                }
                /* Displace every operator that should apply first:
                 * strictly higher precedence, or equal precedence
                 * when the displaced operator is left-associative.
                 */
                self.displace((prec << 1) | 1)?;
                self.ops.push(OpEntry::Fixity { id, priority, binary: true });
            }
            _ => unreachable!("word builtins are not shunted as operators"),
        }
        self.was_val = false;
        Ok(())
    }

    // Pop fixity operators with priority >= threshold, applying each
    // to the expression under construction.
    fn displace(&mut self, threshold: u8) -> Result<()> {
        while let Some(&OpEntry::Fixity { id, priority, .. }) = self.ops.last() {
            if priority < threshold {
                break;
            }
            self.ops.pop();
            self.apply_builtin(id)?;
        }
        Ok(())
    }

    /* Close a parenthesized group: displace the operators inside it,
     * count comma sentinels to learn the argument count, then decide
     * whether the group was a function's argument list or a plain
     * grouping.
     */
    fn close_parenth(&mut self) -> Result<()> {
        self.displace(0)?;

        let mut argc = 1usize;
        while let Some(OpEntry::Comma) = self.ops.last() {
            self.ops.pop();
            argc += 1;
        }

        match self.ops.pop() {
            Some(OpEntry::OpenParen) => {}
            _ => return Err(Error::ParenthMismatch),
        }

        match self.ops.last().copied() {
            Some(OpEntry::Func { id }) => {
                self.ops.pop();
                if builtin::get(id).arity() != argc {
                    return Err(Error::ArityMismatch);
                }
                self.apply_builtin(id)
            }
            Some(OpEntry::Call { var }) => {
                self.ops.pop();
                match self.nmsp.arity(var) {
                    // First sighting decides the arity
                    None => self.nmsp.set_arity(var, argc),
                    Some(arity) => {
                        if arity != argc {
                            return Err(Error::ArityMismatch);
                        }
                    }
                }
                self.expr.call_var(var)
            }
            _ => {
                // Plain grouping holds exactly one value
                if argc > 1 {
                    return Err(Error::BadComma);
                }
                Ok(())
            }
        }
    }

    /* Append an apply instruction for `id` — unless folding is on
     * and every operand is a literal, in which case the builtin runs
     * now and only its result is kept. A fold that faults
     * arithmetically kills the whole parse with that fault.
     */
    fn apply_builtin(&mut self, id: BltnId) -> Result<()> {
        let bltn = builtin::get(id);
        let arity = bltn.arity();

        if self.fold && arity > 0 && self.tail_is_const(arity) {
            let mut vals = vec![Value::Int(0); arity];
            for at in (0..arity).rev() {
                vals[at] = self.expr.pop_const_load().expect("checked constant load");
            }
            let func = bltn.func().expect("fixity builtin without function");
            func(&mut vals)?;
            return self.expr.load_const(vals[0]);
        }

        self.expr.apply(id);
        Ok(())
    }

    // Are the last `arity` instructions all constant loads?
    fn tail_is_const(&self, arity: usize) -> bool {
        let code = &self.expr.code;
        code.len() >= arity
            && code[code.len() - arity..].iter().all(|i| {
                matches!(i, crate::bytecode::Instr::LoadConst(_))
            })
    }

    // End of input: everything still on the operator stack applies
    // now, and nothing unclosed or uncalled may remain.
    fn finish(&mut self) -> Result<()> {
        while let Some(op) = self.ops.pop() {
            match op {
                OpEntry::OpenParen | OpEntry::Comma => return Err(Error::ParenthMismatch),
                OpEntry::Func { .. } | OpEntry::Call { .. } => return Err(Error::FuncNocall),
                OpEntry::Fixity { id, .. } => self.apply_builtin(id)?,
            }
        }
        Ok(())
    }
}
