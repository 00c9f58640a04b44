// The namespace: every binding a document declares, keyed by name.
//
// Bindings live in an arena and are addressed by VarId, so
// expressions can reference each other without ownership cycles:
// an Expr holds ids, the namespace holds the bindings, and the
// dependency graph is walked through the ids.
//
// A binding may exist before it is defined — the parser forward
// declares any name it does not recognize — and is completed when a
// labeled definition attaches an expression. Attaching runs cycle
// detection first; a definition that would close a loop is refused
// and the binding stays a forward reference.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use regex::Regex;

use crate::bytecode::Expr;
use crate::error::{Error, Result};
use crate::parser;
use crate::value::Value;
use crate::vm;

/// Stable handle for a binding within its namespace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) usize);

struct Binding {
    // None for the anonymous bindings of label-less lines
    name: Option<String>,
    /* Number of arguments the binding takes: 0 for a plain variable,
     * 1+ for a function, None while a forward reference has not yet
     * been pinned down by a use or a definition.
     */
    arity: Option<usize>,
    expr: Option<Rc<Expr>>,
    // Result of the first evaluation, value or error; arity-0 only
    cached: Option<Result<Value>>,
}

pub struct Namespace {
    vars: Vec<Binding>,
    names: HashMap<String, VarId>,
    // Diagnostic state from the last failed insertion
    redef: Option<VarId>,
    circle: Vec<VarId>,
    // Fold constant subexpressions while parsing
    eval_on_parse: bool,
}

lazy_static! {
    // label := ident [ '(' ident { ',' ident } ')' ] ':'
    // Newlines count as whitespace inside the argument parentheses.
    static ref LABEL_REGEX: Regex = Regex::new(
        r"^[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*(?:\((\s*[A-Za-z_][A-Za-z0-9_]*(?:\s*,\s*[A-Za-z_][A-Za-z0-9_]*)*\s*)\))?[ \t]*:"
    ).unwrap();
}

impl Namespace {
    pub fn new(eval_on_parse: bool) -> Namespace {
        Namespace {
            vars: Vec::new(),
            names: HashMap::new(),
            redef: None,
            circle: Vec::new(),
            eval_on_parse,
        }
    }

    pub fn eval_on_parse(&self) -> bool {
        self.eval_on_parse
    }

    /// Look up a binding by name.
    pub fn get(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    /// Find a binding by name, forward declaring it if absent.
    pub fn put(&mut self, name: &str) -> VarId {
        if let Some(id) = self.get(name) {
            return id;
        }
        let id = VarId(self.vars.len());
        self.vars.push(Binding {
            name: Some(name.to_string()),
            arity: None,
            expr: None,
            cached: None,
        });
        self.names.insert(name.to_string(), id);
        id
    }

    pub fn name_of(&self, id: VarId) -> &str {
        self.vars[id.0].name.as_deref().unwrap_or("<anonymous>")
    }

    pub(crate) fn arity(&self, id: VarId) -> Option<usize> {
        self.vars[id.0].arity
    }

    pub(crate) fn set_arity(&mut self, id: VarId, arity: usize) {
        self.vars[id.0].arity = Some(arity);
    }

    pub(crate) fn has_expr(&self, id: VarId) -> bool {
        self.vars[id.0].expr.is_some()
    }

    pub(crate) fn expr_of(&self, id: VarId) -> Option<Rc<Expr>> {
        self.vars[id.0].expr.clone()
    }

    pub(crate) fn cached_outcome(&self, id: VarId) -> Option<Result<Value>> {
        self.vars[id.0].cached.clone()
    }

    pub(crate) fn set_cached(&mut self, id: VarId, outcome: Result<Value>) {
        self.vars[id.0].cached = Some(outcome);
    }

    // Attaching a (new) expression invalidates any cached outcome.
    fn attach(&mut self, id: VarId, arity: usize, expr: Expr) {
        let b = &mut self.vars[id.0];
        b.arity = Some(arity);
        b.expr = Some(Rc::new(expr));
        b.cached = None;
    }

    /* Parse one definition from the front of `src`:
     * an optional label, then an expression. Returns the binding the
     * definition produced (anonymous when label-less) and the
     * unconsumed remainder of the input.
     *
     * On failure the namespace is untouched except that forward
     * references introduced while parsing remain declared; a later
     * definition may still satisfy them.
     */
    pub fn define<'a>(&mut self, src: &'a str) -> (Result<VarId>, &'a str) {
        let (label, body) = match LABEL_REGEX.captures(src) {
            Some(caps) => {
                let whole = caps.get(0).unwrap();
                let name = caps.get(1).unwrap().as_str();
                let args: Vec<&str> = match caps.get(2) {
                    Some(list) => list.as_str().split(',').map(|a| a.trim()).collect(),
                    None => Vec::new(),
                };
                (Some((name, args)), &src[whole.end()..])
            }
            None => (None, src),
        };
        let args = label.as_ref().map(|l| l.1.as_slice()).unwrap_or(&[]);

        let (parsed, rest) = parser::parse(self, body, args);
        let expr = match parsed {
            Ok(expr) => expr,
            Err(err) => return (Err(err), rest),
        };

        let (name, arity) = match label {
            Some((name, ref args)) => (name, args.len()),
            None => {
                // Label-less lines bind anonymously
                let id = VarId(self.vars.len());
                self.vars.push(Binding {
                    name: None,
                    arity: Some(0),
                    expr: Some(Rc::new(expr)),
                    cached: None,
                });
                return (Ok(id), rest);
            }
        };

        match self.get(name) {
            Some(id) => {
                if self.has_expr(id) {
                    self.redef = Some(id);
                    return (Err(Error::Redef), rest);
                }
                if let Some(a) = self.arity(id) {
                    // The forward uses pinned a different shape
                    if a != arity {
                        return (Err(Error::ArityMismatch), rest);
                    }
                }
                if let Some(chain) = self.find_circle(&expr, id) {
                    self.circle = chain;
                    return (Err(Error::Circular), rest);
                }
                self.attach(id, arity, expr);
                (Ok(id), rest)
            }
            None => {
                let id = self.put(name);
                self.attach(id, arity, expr);
                (Ok(id), rest)
            }
        }
    }

    /// Evaluate a binding, reusing its cached outcome where one exists.
    pub fn value(&mut self, id: VarId) -> Result<Value> {
        let mut stack = Vec::new();
        match self.arity(id) {
            Some(arity) if arity > 0 => {
                // Functions are never cached; with no argument frame
                // any LoadArg in the body reports NoArgs.
                let expr = self.expr_of(id).ok_or(Error::NoExpr)?;
                vm::eval_expr(self, &expr, &mut stack, None)?;
            }
            _ => vm::eval_binding(self, id, &mut stack)?,
        }
        Ok(stack.pop().expect("evaluation left no result"))
    }

    /* Breadth-first search from the expression's immediate
     * dependencies; if `target` is reachable the definition would be
     * circular. The traversal keeps its parent links in a side map so
     * bindings are untouched, and the discovered chain is returned
     * for diagnostics: chain[i+1] is the binding whose expression
     * uses chain[i].
     */
    fn find_circle(&self, start: &Expr, target: VarId) -> Option<Vec<VarId>> {
        let mut parent: HashMap<VarId, VarId> = HashMap::new();
        let mut queue: VecDeque<VarId> = VecDeque::new();

        for &dep in start.vars() {
            if !parent.contains_key(&dep) {
                parent.insert(dep, target);
                queue.push_back(dep);
            }
        }

        while let Some(vr) = queue.pop_front() {
            if vr == target {
                let mut chain = vec![target];
                let mut cur = parent[&target];
                while cur != target {
                    chain.push(cur);
                    cur = parent[&cur];
                }
                return Some(chain);
            }
            let expr = match &self.vars[vr.0].expr {
                Some(expr) => expr.clone(),
                None => continue,
            };
            for &dep in expr.vars() {
                if !parent.contains_key(&dep) {
                    parent.insert(dep, vr);
                    queue.push_back(dep);
                }
            }
        }
        None
    }

    /// Describe the dependency chain of the last circularity failure,
    /// closing back to the root: `root <- user <- ... <- root`.
    pub fn strcirc(&self) -> Option<String> {
        if self.circle.is_empty() {
            return None;
        }
        let mut out = String::new();
        for &id in &self.circle {
            out.push_str(self.name_of(id));
            out.push_str(" <- ");
        }
        out.push_str(self.name_of(self.circle[0]));
        Some(out)
    }

    /// Name of the binding the last failed insertion tried to redefine.
    pub fn strredef(&self) -> Option<&str> {
        self.redef.map(|id| self.name_of(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Declare each line in turn, panicking on unexpected failure.
    fn decl(nmsp: &mut Namespace, lines: &[&str]) {
        for line in lines {
            let (res, _) = nmsp.define(line);
            res.unwrap_or_else(|e| panic!("failed to define {:?}: {}", line, e));
        }
    }

    fn eval_str(nmsp: &mut Namespace, src: &str) -> Result<Value> {
        let (res, _) = nmsp.define(src);
        nmsp.value(res?)
    }

    fn assert_close(actual: Value, expect: f64) {
        let got = actual.as_float();
        assert!(
            (got - expect).abs() <= 1e-5 * expect.abs().max(1.0),
            "expected {} got {}",
            expect,
            got
        );
    }

    #[test]
    fn test_definition_and_lookup() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["x: 3 + 4"]);
        let x = nmsp.get("x").unwrap();
        assert_eq!(nmsp.value(x), Ok(Value::Int(7)));
        assert!(nmsp.get("y").is_none());
    }

    #[test]
    fn test_forward_reference_out_of_order() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["x :  \t-3.67", "y :1/ (x\n- z)", "z:1 /5.678- 2"]);
        let v = eval_str(&mut nmsp, "(- \n x) ^-(y\n+z)*   x %\ty \t/ (z// 0.03)").unwrap();
        assert_close(v, 0.0069547480181);
    }

    #[test]
    fn test_parser_leaves_trailing_content() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["x:5.32 * y", "foo_bar :y^3 - y^2-23", "y :  2.897 * 10^2"]);
        let (res, rest) = nmsp.define("x *(foo_bar*x//y\u{b})//  -0.654=&*");
        assert_eq!(rest, "=&*");
        let v = nmsp.value(res.unwrap()).unwrap();
        assert_close(v, -303764747679.0);
    }

    #[test]
    fn test_builtin_functions_and_constants() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &[
            "xray:sin(ln(3.45 * pi) - stuff / beta)",
            "beta: 2 - abs(2 + stuff )^-2",
            "stuff :-4.356 * pi * log(e + 1, e - 1)",
        ]);
        let v = eval_str(&mut nmsp, "xray*beta + beta*stuff -stuff*xray").unwrap();
        assert_close(v, -61.39002848156);
    }

    #[test]
    fn test_function_definitions() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &[
            "    my_Func(t):t - x  * 5*x",
            "\ttwoArg(x ,\n y) :x - y *y^ceil(x)",
            "x   : 4.5 - 3.2+31^2",
        ]);
        let v = eval_str(&mut nmsp, "   my_Func(twoArg(1.23, ln(5.12)))/cos(x) - tan(x * 5.6)").unwrap();
        assert_close(v, -8222343.424436592);
    }

    #[test]
    fn test_forward_function_arity_fixed_by_call() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["a: g(1, 2) + 1", "g(u, v): u * v"]);
        let a = nmsp.get("a").unwrap();
        assert_eq!(nmsp.value(a), Ok(Value::Int(3)));
    }

    #[test]
    fn test_forward_variable_rejects_function_definition() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["a: f + 1"]);
        // f was used as a plain variable; defining it as a function
        // contradicts that use
        let (res, _) = nmsp.define("f(x): x");
        assert_eq!(res, Err(Error::ArityMismatch));
    }

    #[test]
    fn test_call_arity_must_agree_across_uses() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["a: h(1, 2)"]);
        let (res, _) = nmsp.define("b: h(1, 2, 3)");
        assert_eq!(res, Err(Error::ArityMismatch));
    }

    #[test]
    fn test_undefined_forward_reference_fails_eval() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["a: ghost * 2"]);
        let a = nmsp.get("a").unwrap();
        assert_eq!(nmsp.value(a), Err(Error::NoExpr));
    }

    #[test]
    fn test_redefinition() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["x: 1"]);
        let (res, _) = nmsp.define("x: 2");
        assert_eq!(res, Err(Error::Redef));
        assert_eq!(nmsp.strredef(), Some("x"));
        // The original definition survives
        let x = nmsp.get("x").unwrap();
        assert_eq!(nmsp.value(x), Ok(Value::Int(1)));
    }

    #[test]
    fn test_simple_circle() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["a: b+1", "b: c*2"]);
        let (res, _) = nmsp.define("c: a-3");
        assert_eq!(res, Err(Error::Circular));
        assert_eq!(nmsp.strcirc().unwrap(), "c <- b <- a <- c");
        // The failed definition reverted; c is still a forward reference
        let c = nmsp.get("c").unwrap();
        assert_eq!(nmsp.value(c), Err(Error::NoExpr));
    }

    #[test]
    fn test_deep_circles_report_their_chain() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &[
            "xruje : yjug*yjug^-_5_*yjug+2",
            "__er34:3*xruje + ler*6",
            "gt56y : __er34 * yjug*4",
            "yjug : 23*9+two+7/6//3.65^7*8",
            "__23 : ( 1 \n+\n HEllo) / 34.56",
            "HEllo: __er34 + gt56y",
        ]);

        let (res, _) = nmsp.define("_5_:23//__23");
        assert_eq!(res, Err(Error::Circular));
        assert_eq!(
            nmsp.strcirc().unwrap(),
            "_5_ <- xruje <- __er34 <- HEllo <- __23 <- _5_"
        );

        let (res, _) = nmsp.define("ler:__er34-73");
        assert_eq!(res, Err(Error::Circular));
        assert_eq!(nmsp.strcirc().unwrap(), "ler <- __er34 <- ler");

        let (res, _) = nmsp.define("two:(1+(2*(HEllo%4)+3)/4)//5");
        assert_eq!(res, Err(Error::Circular));
        assert_eq!(nmsp.strcirc().unwrap(), "two <- yjug <- gt56y <- HEllo <- two");
    }

    #[test]
    fn test_self_recursion_is_circular() {
        let mut nmsp = Namespace::new(true);
        let (res, _) = nmsp.define("f(x): f(x - 1)");
        assert_eq!(res, Err(Error::Circular));
    }

    #[test]
    fn test_mutual_function_recursion_is_circular() {
        let mut nmsp = Namespace::new(true);
        decl(&mut nmsp, &["f(x): g(x)"]);
        let (res, _) = nmsp.define("g(x): f(x)");
        assert_eq!(res, Err(Error::Circular));
    }

    #[test]
    fn test_definition_order_invariance() {
        let docs: [&[&str]; 3] = [
            &["a: b + c", "b: 2 * c", "c: 10"],
            &["c: 10", "b: 2 * c", "a: b + c"],
            &["b: 2 * c", "a: b + c", "c: 10"],
        ];
        for lines in &docs {
            let mut nmsp = Namespace::new(true);
            decl(&mut nmsp, lines);
            let a = nmsp.get("a").unwrap();
            assert_eq!(nmsp.value(a), Ok(Value::Int(30)));
        }
    }

    #[test]
    fn test_anonymous_bindings_stay_unreachable() {
        let mut nmsp = Namespace::new(true);
        let (res, _) = nmsp.define("1 + 2");
        let id = res.unwrap();
        assert_eq!(nmsp.value(id), Ok(Value::Int(3)));
        assert_eq!(nmsp.name_of(id), "<anonymous>");
        assert!(nmsp.names.is_empty());
    }

    #[test]
    fn test_value_caches_errors() {
        // Folding is off so the division fault happens at evaluation
        let mut nmsp = Namespace::new(false);
        decl(&mut nmsp, &["q: 1 // 0 + zed", "zed: 4"]);
        let q = nmsp.get("q").unwrap();
        let first = nmsp.value(q);
        assert!(matches!(first, Err(Error::Arith(_))));
        assert_eq!(nmsp.value(q), first);
    }
}
