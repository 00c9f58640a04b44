// The single error currency of the crate.
//
// The taxonomy mirrors how failures actually arise: arithmetic errors
// come out of the value backend (and abort parsing when constant
// folding trips them), evaluation errors come out of the stack
// machine, parsing errors out of the shunting yard, and insertion
// errors out of the namespace after a successful parse.

use crate::value::ArithError;
use thiserror::Error;

// The result of any operation
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Arithmetic: produced by the value backend, surfaced verbatim.
    #[error("{0}")]
    Arith(#[from] ArithError),

    // Evaluation
    #[error("value stack exceeded its capacity")]
    StackOverflow,
    #[error("values popped while stack empty")]
    StackUnderflow,
    #[error("values left on stack after execution")]
    StackSurplus,
    #[error("referenced name has no definition")]
    NoExpr,
    #[error("name is not usable in this position")]
    VarNotFunc,
    #[error("no argument list to load arguments from")]
    NoArgs,

    // Parsing
    #[error("missing open or close parenthesis")]
    ParenthMismatch,
    #[error("unary operator follows left-associative binary of higher precedence")]
    LowprecUnary,
    #[error("wrong number of arguments given to function")]
    ArityMismatch,
    #[error("comma in wrong location")]
    BadComma,
    #[error("function present but not called")]
    FuncNocall,
    #[error("expression nests too deeply")]
    TooDeep,
    #[error("operator is missing values")]
    MissingValues,
    #[error("multiple values without operator between")]
    MissingOpers,
    #[error("content remains after expression")]
    ExtraContent,

    // Insertion
    #[error("name already defined")]
    Redef,
    #[error("definition depends on itself")]
    Circular,
}
