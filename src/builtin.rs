// The static table of everything the parser can recognize by name:
// operators, word-named functions, and constants. Ids are positions
// in the table and are what Apply instructions carry.
//
// Operator tokenization goes through two prefix trees (one per
// fixity) built lazily from this table and shared read-only for the
// life of the process, so `//` wins over `/` by longest match.

use crate::value::{ArithResult, Value};

pub const LEFT_ASSOC: bool = true;
pub const RIGHT_ASSOC: bool = false;

// Operation over a block of arguments; the result lands in slot 0.
pub type ArithFn = fn(&mut [Value]) -> ArithResult<()>;

pub type BltnId = u16;

#[derive(Copy, Clone)]
pub enum Kind {
    // Unary prefix operator
    Prefix { prec: u8, func: ArithFn },
    // Binary infix operator
    Infix { prec: u8, left_assoc: bool, func: ArithFn },
    // Word-named function
    Func { arity: usize, func: ArithFn },
    // Word-named constant
    Const(Value),
}

pub struct Builtin {
    pub name: &'static str,
    pub kind: Kind,
}

impl Builtin {
    pub fn arity(&self) -> usize {
        match self.kind {
            Kind::Prefix { .. } => 1,
            Kind::Infix { .. } => 2,
            Kind::Func { arity, .. } => arity,
            Kind::Const(_) => 0,
        }
    }

    // Word-named entries are tokenized as identifiers, operators by
    // the prefix trees.
    pub fn is_word(&self) -> bool {
        match self.kind {
            Kind::Func { .. } | Kind::Const(_) => true,
            _ => false,
        }
    }

    pub fn func(&self) -> Option<ArithFn> {
        match self.kind {
            Kind::Prefix { func, .. }
            | Kind::Infix { func, .. }
            | Kind::Func { func, .. } => Some(func),
            Kind::Const(_) => None,
        }
    }

    /* Priority of a fixity operator on the operator stack:
     * precedence in the high bits, associativity in the low bit. The
     * bit is set for left-associative binaries and for unaries, so a
     * displacement threshold of (prec << 1) | 1 pops equal-precedence
     * left-associative operators but leaves right-associative ones.
     */
    pub fn priority(&self) -> u8 {
        match self.kind {
            Kind::Prefix { prec, .. } => (prec << 1) | 1,
            Kind::Infix { prec, left_assoc, .. } => (prec << 1) | left_assoc as u8,
            _ => 0,
        }
    }
}

macro_rules! un_fn {
    ($name:ident, $method:ident) => {
        fn $name(args: &mut [Value]) -> ArithResult<()> {
            args[0] = args[0].$method()?;
            Ok(())
        }
    };
}

macro_rules! bin_fn {
    ($name:ident, $method:ident) => {
        fn $name(args: &mut [Value]) -> ArithResult<()> {
            let rhs = args[1];
            args[0] = args[0].$method(&rhs)?;
            Ok(())
        }
    };
}

un_fn!(neg, neg);
bin_fn!(add, add);
bin_fn!(sub, sub);
bin_fn!(mul, mul);
bin_fn!(div, div);
bin_fn!(flrdiv, flrdiv);
bin_fn!(modulo, modulo);
bin_fn!(pow, pow);
un_fn!(abs, abs);
un_fn!(floor, floor);
un_fn!(ceil, ceil);
un_fn!(sqrt, sqrt);
bin_fn!(log, log);
un_fn!(ln, ln);
un_fn!(sin, sin);
un_fn!(cos, cos);
un_fn!(tan, tan);

pub static BUILTINS: [Builtin; 19] = [
    Builtin { name: "-", kind: Kind::Prefix { prec: 100, func: neg } },
    Builtin { name: "+", kind: Kind::Infix { prec: 64, left_assoc: LEFT_ASSOC, func: add } },
    Builtin { name: "-", kind: Kind::Infix { prec: 64, left_assoc: LEFT_ASSOC, func: sub } },
    Builtin { name: "*", kind: Kind::Infix { prec: 96, left_assoc: LEFT_ASSOC, func: mul } },
    Builtin { name: "/", kind: Kind::Infix { prec: 96, left_assoc: LEFT_ASSOC, func: div } },
    Builtin { name: "//", kind: Kind::Infix { prec: 96, left_assoc: LEFT_ASSOC, func: flrdiv } },
    Builtin { name: "%", kind: Kind::Infix { prec: 96, left_assoc: LEFT_ASSOC, func: modulo } },
    Builtin { name: "^", kind: Kind::Infix { prec: 112, left_assoc: RIGHT_ASSOC, func: pow } },
    Builtin { name: "abs", kind: Kind::Func { arity: 1, func: abs } },
    Builtin { name: "floor", kind: Kind::Func { arity: 1, func: floor } },
    Builtin { name: "ceil", kind: Kind::Func { arity: 1, func: ceil } },
    Builtin { name: "sqrt", kind: Kind::Func { arity: 1, func: sqrt } },
    Builtin { name: "log", kind: Kind::Func { arity: 2, func: log } },
    Builtin { name: "ln", kind: Kind::Func { arity: 1, func: ln } },
    Builtin { name: "sin", kind: Kind::Func { arity: 1, func: sin } },
    Builtin { name: "cos", kind: Kind::Func { arity: 1, func: cos } },
    Builtin { name: "tan", kind: Kind::Func { arity: 1, func: tan } },
    Builtin { name: "pi", kind: Kind::Const(Value::Float(std::f64::consts::PI)) },
    Builtin { name: "e", kind: Kind::Const(Value::Float(std::f64::consts::E)) },
];

pub fn get(id: BltnId) -> &'static Builtin {
    &BUILTINS[id as usize]
}

/// Find a word-named builtin (function or constant).
pub fn lookup_word(name: &str) -> Option<BltnId> {
    BUILTINS
        .iter()
        .position(|b| b.is_word() && b.name == name)
        .map(|i| i as BltnId)
}

/// Find the longest operator of the requested fixity prefixing `src`.
/// Returns the id and the length of the matched name.
pub fn lookup_oper(src: &str, unary: bool) -> Option<(BltnId, usize)> {
    let tree: &PrefixTree = if unary { &UNARY_TREE } else { &BINARY_TREE };
    tree.get(src)
}

// Store a set of words and find the longest prefix match. Nodes live
// in one arena and point at each other by index.
struct Node {
    ch: u8,
    id: Option<BltnId>,
    children: Vec<usize>,
}

struct PrefixTree {
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

impl PrefixTree {
    fn new() -> PrefixTree {
        PrefixTree { nodes: Vec::new(), roots: Vec::new() }
    }

    fn put(&mut self, word: &str, id: BltnId) {
        let mut cur: Option<usize> = None;
        for &ch in word.as_bytes() {
            let level = match cur {
                None => &self.roots,
                Some(i) => &self.nodes[i].children,
            };
            let found = level.iter().copied().find(|&n| self.nodes[n].ch == ch);
            let next = match found {
                Some(n) => n,
                None => {
                    self.nodes.push(Node { ch, id: None, children: Vec::new() });
                    let n = self.nodes.len() - 1;
                    match cur {
                        None => self.roots.push(n),
                        Some(i) => self.nodes[i].children.push(n),
                    }
                    n
                }
            };
            cur = Some(next);
        }
        if let Some(i) = cur {
            self.nodes[i].id = Some(id);
        }
    }

    fn get(&self, src: &str) -> Option<(BltnId, usize)> {
        let mut level = &self.roots;
        let mut best = None;
        for (at, &ch) in src.as_bytes().iter().enumerate() {
            let node = match level.iter().find(|&&n| self.nodes[n].ch == ch) {
                Some(&n) => &self.nodes[n],
                None => break,
            };
            if let Some(id) = node.id {
                best = Some((id, at + 1));
            }
            level = &node.children;
        }
        best
    }
}

fn build_tree(unary: bool) -> PrefixTree {
    let mut tree = PrefixTree::new();
    for (id, bltn) in BUILTINS.iter().enumerate() {
        let fits = match bltn.kind {
            Kind::Prefix { .. } => unary,
            Kind::Infix { .. } => !unary,
            _ => false,
        };
        if fits {
            tree.put(bltn.name, id as BltnId);
        }
    }
    tree
}

lazy_static! {
    static ref UNARY_TREE: PrefixTree = build_tree(true);
    static ref BINARY_TREE: PrefixTree = build_tree(false);
}
