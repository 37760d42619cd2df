//! Operations as data records with a closed registry.
//!
//! An [`Operation`] is a plain record: a name, an arity, an evaluator and a
//! printer. Two operations are the same operation exactly when their names
//! match; [`crate::Formula::add_computed`] relies on this for deduplication.
//!
//! Evaluators pull their inputs through an [`OperationArgs`] view rather
//! than receiving a value slice. This lets the caller observe *which* slots
//! an evaluation actually consulted, which is the information the context
//! cache needs for change-skipping.

use physalia_core::{Result, Value};

/// Argument view handed to an operation's evaluator.
///
/// `evaluate(slot)` may be called in any order, any number of times, and
/// need not be called for every slot.
pub trait OperationArgs {
    /// Number of argument slots.
    fn n_args(&self) -> usize;

    /// Evaluate the input bound to `slot`.
    fn evaluate(&mut self, slot: usize) -> Result<Value>;

    /// Evaluate `slot` and read it as a real number.
    fn evaluate_f64(&mut self, slot: usize) -> Result<f64> {
        self.evaluate(slot)?.as_f64()
    }
}

/// Evaluator signature for an operation.
pub type EvalFn = fn(&mut dyn OperationArgs) -> Result<Value>;

/// Printer signature: operation name plus printed arguments.
pub type PrettyFn = fn(&str, &[String]) -> String;

/// A pure operation on graph values.
#[derive(Debug)]
pub struct Operation {
    pub name: &'static str,
    pub arity: usize,
    pub eval: EvalFn,
    pub pretty: PrettyFn,
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Operation {}

/// Render `name(arg0, arg1, ...)`.
pub fn print_prefix(name: &str, args: &[String]) -> String {
    format!("{}({})", name, args.join(", "))
}

/// Render `(arg0 name arg1)`.
pub fn print_infix(name: &str, args: &[String]) -> String {
    format!("({})", args.join(&format!(" {name} ")))
}

fn eval_add(args: &mut dyn OperationArgs) -> Result<Value> {
    Ok(Value::Double(args.evaluate_f64(0)? + args.evaluate_f64(1)?))
}

fn eval_sub(args: &mut dyn OperationArgs) -> Result<Value> {
    Ok(Value::Double(args.evaluate_f64(0)? - args.evaluate_f64(1)?))
}

fn eval_mul(args: &mut dyn OperationArgs) -> Result<Value> {
    Ok(Value::Double(args.evaluate_f64(0)? * args.evaluate_f64(1)?))
}

fn eval_div(args: &mut dyn OperationArgs) -> Result<Value> {
    Ok(Value::Double(args.evaluate_f64(0)? / args.evaluate_f64(1)?))
}

fn eval_neg(args: &mut dyn OperationArgs) -> Result<Value> {
    Ok(Value::Double(-args.evaluate_f64(0)?))
}

fn eval_exp(args: &mut dyn OperationArgs) -> Result<Value> {
    Ok(Value::Double(args.evaluate_f64(0)?.exp()))
}

fn eval_log(args: &mut dyn OperationArgs) -> Result<Value> {
    Ok(Value::Double(args.evaluate_f64(0)?.ln()))
}

/// Conditional: consults slot 0, then exactly one of slots 1 and 2.
fn eval_if(args: &mut dyn OperationArgs) -> Result<Value> {
    if args.evaluate(0)?.as_bool()? {
        args.evaluate(1)
    } else {
        args.evaluate(2)
    }
}

pub static ADD: Operation = Operation {
    name: "+",
    arity: 2,
    eval: eval_add,
    pretty: print_infix,
};

pub static SUB: Operation = Operation {
    name: "-",
    arity: 2,
    eval: eval_sub,
    pretty: print_infix,
};

pub static MUL: Operation = Operation {
    name: "*",
    arity: 2,
    eval: eval_mul,
    pretty: print_infix,
};

pub static DIV: Operation = Operation {
    name: "/",
    arity: 2,
    eval: eval_div,
    pretty: print_infix,
};

pub static NEG: Operation = Operation {
    name: "neg",
    arity: 1,
    eval: eval_neg,
    pretty: print_prefix,
};

pub static EXP: Operation = Operation {
    name: "exp",
    arity: 1,
    eval: eval_exp,
    pretty: print_prefix,
};

pub static LOG: Operation = Operation {
    name: "log",
    arity: 1,
    eval: eval_log,
    pretty: print_prefix,
};

pub static IF: Operation = Operation {
    name: "if",
    arity: 3,
    eval: eval_if,
    pretty: print_prefix,
};

/// The built-in registry.
pub static BUILTINS: [&Operation; 8] = [&ADD, &SUB, &MUL, &DIV, &NEG, &EXP, &LOG, &IF];

/// Look up a built-in operation by name.
pub fn builtin(name: &str) -> Option<&'static Operation> {
    BUILTINS.iter().copied().find(|op| op.name == name)
}
