// The numeric backend: a two-kind scalar closed under promotion.
//
// Everything above this module treats Value as an opaque quantity
// with clone/equal/parse/print and a table of operations, so swapping
// in a different backend (ratios, bignums) means rewriting this file
// and nothing else.
//
// Integer operations are checked; the divide-by-zero and overflow
// conditions are the backend's error surface. Float operations follow
// IEEE and never fail.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ArithError {
    #[error("integer division by zero")]
    DivideByZero,
    #[error("integer overflow")]
    Overflow,
}

pub type ArithResult<T> = core::result::Result<T, ArithError>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
}

// Factors out the boiler plate in operator method implementations.
//
// Binary operators give an arm for the all-integer case; any mix of
// kinds falls through to the float arm with both operands promoted.
// Unary operators give one arm per kind.
macro_rules! operator {
    (bin $name:ident { int($a:ident, $b:ident) => $ie:expr, float($x:ident, $y:ident) => $fe:expr } ) => {
        pub fn $name (&self, other: &Value) -> ArithResult<Value> {
            match (*self, *other) {
                (Value::Int($a), Value::Int($b)) => $ie,
                (lhs, rhs) => {
                    let $x = lhs.as_float();
                    let $y = rhs.as_float();
                    $fe
                }
            }
        }
    };

    (un $name:ident { int($a:ident) => $ie:expr, float($x:ident) => $fe:expr } ) => {
        pub fn $name (&self) -> ArithResult<Value> {
            match *self {
                Value::Int($a) => $ie,
                Value::Float($x) => $fe,
            }
        }
    };

    // Operations that always land in the floats (sqrt, trig, logs).
    (flt $name:ident |$x:ident| $fe:expr) => {
        pub fn $name (&self) -> ArithResult<Value> {
            let $x = self.as_float();
            Ok(Value::Float($fe))
        }
    };
}

fn int(v: Option<i64>) -> ArithResult<Value> {
    v.map(Value::Int).ok_or(ArithError::Overflow)
}

impl Value {
    pub fn as_float(&self) -> f64 {
        match *self {
            Value::Int(i) => i as f64,
            Value::Float(f) => f,
        }
    }

    operator! { un neg {
        int(a)   => int(a.checked_neg()),
        float(x) => Ok(Value::Float(-x))
    } }

    operator! { un abs {
        int(a)   => int(a.checked_abs()),
        float(x) => Ok(Value::Float(x.abs()))
    } }

    operator! { un floor {
        int(a)   => Ok(Value::Int(a)),
        float(x) => Ok(Value::Float(x.floor()))
    } }

    operator! { un ceil {
        int(a)   => Ok(Value::Int(a)),
        float(x) => Ok(Value::Float(x.ceil()))
    } }

    operator! { bin add {
        int(a, b)   => int(a.checked_add(b)),
        float(x, y) => Ok(Value::Float(x + y))
    } }

    operator! { bin sub {
        int(a, b)   => int(a.checked_sub(b)),
        float(x, y) => Ok(Value::Float(x - y))
    } }

    operator! { bin mul {
        int(a, b)   => int(a.checked_mul(b)),
        float(x, y) => Ok(Value::Float(x * y))
    } }

    // True division; integers stay integers only when they divide evenly.
    operator! { bin div {
        int(a, b)   => if b == 0 {
            Err(ArithError::DivideByZero)
        } else {
            match a.checked_rem(b) {
                None => Err(ArithError::Overflow),
                Some(0) => int(a.checked_div(b)),
                Some(_) => Ok(Value::Float(a as f64 / b as f64)),
            }
        },
        float(x, y) => Ok(Value::Float(x / y))
    } }

    // Floor of the quotient. Note i64::div_euclid rounds the wrong way
    // for negative divisors, so the integer arm adjusts by hand.
    operator! { bin flrdiv {
        int(a, b)   => if b == 0 {
            Err(ArithError::DivideByZero)
        } else {
            let q = a.checked_div(b).ok_or(ArithError::Overflow)?;
            Ok(Value::Int(if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q }))
        },
        float(x, y) => Ok(Value::Float((x / y).floor()))
    } }

    // Truncated remainder, matching C fmod.
    operator! { bin modulo {
        int(a, b)   => if b == 0 {
            Err(ArithError::DivideByZero)
        } else {
            int(a.checked_rem(b))
        },
        float(x, y) => Ok(Value::Float(x % y))
    } }

    operator! { bin pow {
        int(a, b)   => if b >= 0 {
            if b <= u32::max_value() as i64 {
                int(a.checked_pow(b as u32))
            } else {
                Err(ArithError::Overflow)
            }
        } else {
            Ok(Value::Float((a as f64).powf(b as f64)))
        },
        float(x, y) => Ok(Value::Float(x.powf(y)))
    } }

    operator! { flt sqrt |x| x.sqrt() }
    operator! { flt ln   |x| x.ln() }
    operator! { flt sin  |x| x.sin() }
    operator! { flt cos  |x| x.cos() }
    operator! { flt tan  |x| x.tan() }

    // log(x, b) = ln x / ln b
    pub fn log(&self, base: &Value) -> ArithResult<Value> {
        Ok(Value::Float(self.as_float().ln() / base.as_float().ln()))
    }

    /// Consume the longest numeric literal prefix of `src`.
    ///
    /// Accepts `12`, `12.`, `12.5`, `.5` and an optional exponent;
    /// signs are left for the operator layer. Returns the value and
    /// the unconsumed rest, or None when no prefix is numeric.
    pub fn parse_prefix(src: &str) -> Option<(Value, &str)> {
        let bytes = src.as_bytes();
        let mut at = 0;

        while at < bytes.len() && bytes[at].is_ascii_digit() {
            at += 1;
        }
        let int_digits = at;

        let mut fractional = false;
        if at < bytes.len() && bytes[at] == b'.' {
            let mut frac = at + 1;
            while frac < bytes.len() && bytes[frac].is_ascii_digit() {
                frac += 1;
            }
            // A lone '.' with no digits on either side is not a number
            if int_digits > 0 || frac > at + 1 {
                fractional = true;
                at = frac;
            }
        }
        if int_digits == 0 && !fractional {
            return None;
        }

        let mut exponent = false;
        if at < bytes.len() && (bytes[at] == b'e' || bytes[at] == b'E') {
            let mut exp = at + 1;
            if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                exp += 1;
            }
            let exp_start = exp;
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            // Only consume the exponent if it has digits
            if exp > exp_start {
                exponent = true;
                at = exp;
            }
        }

        let text = &src[..at];
        let rest = &src[at..];
        if !fractional && !exponent {
            if let Ok(i) = text.parse::<i64>() {
                return Some((Value::Int(i), rest));
            }
            // Wider than i64; fall back to a float
        }
        text.parse::<f64>().ok().map(|f| (Value::Float(f), rest))
    }
}

impl fmt::Display for Value {
    // Floats print in shortest round-trip form, with a forced ".0" so
    // that reparsing the text yields a Float again rather than an Int.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => {
                if x.is_finite() && x == x.trunc() && x.abs() < 1e16 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
        }
    }
}
