//! The term DAG: an append-only, topologically ordered formula.
//!
//! A [`Formula`] is a sequence of terms where every computed term's inputs
//! have strictly smaller indices, so the order itself is a topological
//! schedule and cycles cannot be expressed. The formula records adjacency in
//! both directions: each computed term lists its inputs, and each term lists
//! the `(consumer, slot)` pairs it feeds. Terms are never removed or
//! renumbered once added.

use physalia_core::{PhysaliaError, Result, Value};

use crate::expr::Expr;
use crate::ops::Operation;

/// What kind of term an index denotes.
#[derive(Debug, Clone)]
pub enum TermKind {
    /// A value fixed forever at construction.
    Constant(Value),
    /// A mutable input with an optional default value.
    State { default: Option<Value> },
    /// A pure computation over earlier terms.
    Computed(&'static Operation),
}

#[derive(Debug, Clone)]
pub(crate) struct Term {
    pub(crate) kind: TermKind,
    pub(crate) name: Option<String>,
    pub(crate) inputs: Vec<usize>,
    /// Reverse adjacency: `(consumer index, slot in consumer)`.
    pub(crate) affects: Vec<(usize, usize)>,
}

/// A topologically ordered DAG of terms.
#[derive(Debug, Clone, Default)]
pub struct Formula {
    terms: Vec<Term>,
}

impl Formula {
    pub fn new() -> Self {
        Formula::default()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Append a constant term. Duplicate values may coexist.
    pub fn add_constant(&mut self, name: Option<&str>, value: Value) -> Result<usize> {
        self.push_term(Term {
            kind: TermKind::Constant(value),
            name: name.map(str::to_string),
            inputs: Vec::new(),
            affects: Vec::new(),
        })
    }

    /// Append a mutable state term.
    pub fn add_state(&mut self, name: Option<&str>, default: Option<Value>) -> Result<usize> {
        self.push_term(Term {
            kind: TermKind::State { default },
            name: name.map(str::to_string),
            inputs: Vec::new(),
            affects: Vec::new(),
        })
    }

    /// Append a computed term, or return the index of a structurally
    /// identical one.
    ///
    /// Structural identity is the operation (by name) plus the exact input
    /// index list; term names are not consulted. Each input index must
    /// refer to an existing term, which keeps the order topological.
    pub fn add_computed(&mut self, op: &'static Operation, inputs: &[usize]) -> Result<usize> {
        if inputs.len() != op.arity {
            return Err(PhysaliaError::InvalidInput(format!(
                "operation '{}' takes {} inputs, got {}",
                op.name,
                op.arity,
                inputs.len()
            )));
        }
        for &i in inputs {
            if i >= self.terms.len() {
                return Err(PhysaliaError::index("term", i, self.terms.len()));
            }
        }

        if let Some(existing) = self.find_computation(op, inputs) {
            return Ok(existing);
        }

        let idx = self.push_term(Term {
            kind: TermKind::Computed(op),
            name: None,
            inputs: inputs.to_vec(),
            affects: Vec::new(),
        })?;
        for (slot, &input) in inputs.iter().enumerate() {
            self.terms[input].affects.push((idx, slot));
        }
        Ok(idx)
    }

    /// Lower an expression into the formula, returning the root term index.
    ///
    /// Constants become constant terms; parameter references resolve by
    /// name against existing terms; applications lower their arguments
    /// recursively and then dedup through [`Formula::add_computed`].
    /// Lambdas must have been beta-reduced away before lowering.
    pub fn add_expr(&mut self, expr: &Expr) -> Result<usize> {
        match expr {
            Expr::Constant(v) => self.add_constant(None, v.clone()),
            Expr::Term(i) => {
                if *i >= self.terms.len() {
                    return Err(PhysaliaError::index("term", *i, self.terms.len()));
                }
                Ok(*i)
            }
            Expr::Param(name) => self.find_term(name).ok_or_else(|| {
                PhysaliaError::InvalidInput(format!("no term named '{name}' to resolve"))
            }),
            Expr::Apply(op, args) => {
                let mut indices = Vec::with_capacity(args.len());
                for arg in args {
                    indices.push(self.add_expr(arg)?);
                }
                self.add_computed(op, &indices)
            }
            Expr::Lambda(..) | Expr::Dummy(_) => Err(PhysaliaError::InvalidInput(format!(
                "cannot lower unapplied lambda or free dummy '{expr}'"
            ))),
            Expr::ModelRef(_) => Err(PhysaliaError::InvalidInput(
                "model references are resolved by the model layer, not the formula".into(),
            )),
        }
    }

    pub fn kind(&self, index: usize) -> &TermKind {
        &self.terms[index].kind
    }

    pub fn is_constant(&self, index: usize) -> bool {
        matches!(self.terms[index].kind, TermKind::Constant(_))
    }

    pub fn is_state(&self, index: usize) -> bool {
        matches!(self.terms[index].kind, TermKind::State { .. })
    }

    pub fn is_computed(&self, index: usize) -> bool {
        matches!(self.terms[index].kind, TermKind::Computed(_))
    }

    pub fn operation(&self, index: usize) -> Option<&'static Operation> {
        match self.terms[index].kind {
            TermKind::Computed(op) => Some(op),
            _ => None,
        }
    }

    pub fn inputs(&self, index: usize) -> &[usize] {
        &self.terms[index].inputs
    }

    /// `(consumer, slot)` pairs fed by `index`.
    pub fn affected_slots(&self, index: usize) -> &[(usize, usize)] {
        &self.terms[index].affects
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.terms[index].name.as_deref()
    }

    /// A printable name: the given name, or a positional placeholder.
    pub fn name_for_index(&self, index: usize) -> String {
        match &self.terms[index].name {
            Some(n) => n.clone(),
            None => match &self.terms[index].kind {
                TermKind::Constant(v) => v.to_string(),
                _ => format!("%{index}"),
            },
        }
    }

    /// Find a term by its (unique) name.
    pub fn find_term(&self, name: &str) -> Option<usize> {
        self.terms
            .iter()
            .position(|t| t.name.as_deref() == Some(name))
    }

    /// Indices of all state terms.
    pub fn state_indices(&self) -> Vec<usize> {
        (0..self.terms.len())
            .filter(|&i| self.is_state(i))
            .collect()
    }

    /// Does `i` feed directly into `j`?
    pub fn directly_affects(&self, i: usize, j: usize) -> bool {
        self.terms[i].affects.iter().any(|&(c, _)| c == j)
    }

    /// Does `i` feed directly into slot `slot` of `j`?
    pub fn directly_affects_in_slot(&self, i: usize, j: usize, slot: usize) -> bool {
        self.terms[i].affects.contains(&(j, slot))
    }

    /// Could a change to `i` possibly change `j`?
    ///
    /// Forward reachability over the affects adjacency; `i` itself is not
    /// considered affected by itself.
    pub fn index_may_affect(&self, i: usize, j: usize) -> bool {
        self.reachable_from(i).contains(&j)
    }

    /// All indices forward-reachable from `i` (excluding `i`).
    pub(crate) fn reachable_from(&self, i: usize) -> Vec<usize> {
        let mut seen = vec![false; self.terms.len()];
        let mut stack: Vec<usize> = self.terms[i].affects.iter().map(|&(c, _)| c).collect();
        let mut out = Vec::new();
        while let Some(idx) = stack.pop() {
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            out.push(idx);
            stack.extend(self.terms[idx].affects.iter().map(|&(c, _)| c));
        }
        out
    }

    fn find_computation(&self, op: &Operation, inputs: &[usize]) -> Option<usize> {
        self.terms.iter().position(|t| {
            matches!(t.kind, TermKind::Computed(existing) if existing == op)
                && t.inputs == inputs
        })
    }

    fn push_term(&mut self, term: Term) -> Result<usize> {
        if let Some(name) = &term.name {
            if self.find_term(name).is_some() {
                return Err(PhysaliaError::NameCollision(name.clone()));
            }
        }
        self.terms.push(term);
        Ok(self.terms.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ADD, MUL};
    use std::sync::Arc;

    #[test]
    fn inputs_precede_consumers() {
        let mut f = Formula::new();
        let c = f.add_constant(None, Value::Double(3.0)).unwrap();
        let s = f.add_state(Some("x"), None).unwrap();
        let a = f.add_computed(&ADD, &[c, s]).unwrap();
        assert!(c < a && s < a);
        assert_eq!(f.inputs(a), &[c, s]);
    }

    #[test]
    fn affects_lists_mirror_inputs() {
        let mut f = Formula::new();
        let c = f.add_constant(None, Value::Double(3.0)).unwrap();
        let s = f.add_state(Some("x"), None).unwrap();
        let a = f.add_computed(&ADD, &[c, s]).unwrap();

        assert!(f.directly_affects_in_slot(c, a, 0));
        assert!(f.directly_affects_in_slot(s, a, 1));
        assert!(f.directly_affects(s, a));
        assert!(!f.directly_affects(a, s));

        // Both directions agree on every edge.
        for i in 0..f.len() {
            for (slot, &input) in f.inputs(i).iter().enumerate() {
                assert!(f.affected_slots(input).contains(&(i, slot)));
            }
            for &(consumer, slot) in f.affected_slots(i) {
                assert_eq!(f.inputs(consumer)[slot], i);
            }
        }
    }

    #[test]
    fn add_computed_rejects_out_of_range() {
        let mut f = Formula::new();
        let c = f.add_constant(None, Value::Double(1.0)).unwrap();
        assert!(f.add_computed(&ADD, &[c, 99]).is_err());
    }

    #[test]
    fn add_computed_checks_arity() {
        let mut f = Formula::new();
        let c = f.add_constant(None, Value::Double(1.0)).unwrap();
        assert!(f.add_computed(&ADD, &[c]).is_err());
    }

    #[test]
    fn identical_computations_dedup() {
        let mut f = Formula::new();
        let c = f.add_constant(None, Value::Double(1.0)).unwrap();
        let s = f.add_state(Some("x"), None).unwrap();
        let a1 = f.add_computed(&ADD, &[c, s]).unwrap();
        let a2 = f.add_computed(&ADD, &[c, s]).unwrap();
        assert_eq!(a1, a2);
        // Different op or inputs gets its own term.
        let m = f.add_computed(&MUL, &[c, s]).unwrap();
        assert_ne!(a1, m);
        let a3 = f.add_computed(&ADD, &[s, c]).unwrap();
        assert_ne!(a1, a3);
    }

    #[test]
    fn duplicate_constants_coexist() {
        let mut f = Formula::new();
        let c1 = f.add_constant(None, Value::Double(1.0)).unwrap();
        let c2 = f.add_constant(None, Value::Double(1.0)).unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn nonempty_names_are_unique() {
        let mut f = Formula::new();
        f.add_state(Some("x"), None).unwrap();
        assert!(matches!(
            f.add_state(Some("x"), None),
            Err(PhysaliaError::NameCollision(_))
        ));
        // Unnamed terms never collide.
        f.add_state(None, None).unwrap();
        f.add_state(None, None).unwrap();
    }

    #[test]
    fn transitive_affects() {
        let mut f = Formula::new();
        let s = f.add_state(Some("x"), None).unwrap();
        let c = f.add_constant(None, Value::Double(2.0)).unwrap();
        let a = f.add_computed(&ADD, &[s, c]).unwrap();
        let m = f.add_computed(&MUL, &[a, a]).unwrap();
        let lone = f.add_state(Some("y"), None).unwrap();

        assert!(f.index_may_affect(s, a));
        assert!(f.index_may_affect(s, m));
        assert!(!f.index_may_affect(s, lone));
        assert!(!f.index_may_affect(m, s));
    }

    #[test]
    fn expression_lowering() {
        let mut f = Formula::new();
        f.add_state(Some("x"), None).unwrap();

        // (x + 2) * x
        let e = Expr::apply(
            &MUL,
            vec![
                Expr::apply(&ADD, vec![Expr::param("x"), Expr::constant(2.0)]).unwrap(),
                Expr::param("x"),
            ],
        )
        .unwrap();

        let root = f.add_expr(&e).unwrap();
        assert!(f.is_computed(root));
        assert_eq!(f.operation(root).unwrap().name, "*");

        // A constant-free expression lowers to exactly the same terms on
        // a second pass: the whole spine dedups.
        let square = Expr::apply(&MUL, vec![Expr::param("x"), Expr::param("x")]).unwrap();
        let s1 = f.add_expr(&square).unwrap();
        let before = f.len();
        let s2 = f.add_expr(&square).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(f.len(), before);
    }

    #[test]
    fn lowering_beta_reduced_lambda() {
        let mut f = Formula::new();
        f.add_state(Some("x"), None).unwrap();

        // ((lambda #0. #0 + 1) x) lowers after reduction.
        let body = Expr::apply(&ADD, vec![Arc::new(Expr::Dummy(0)), Expr::constant(1.0)]).unwrap();
        let lam = Arc::new(Expr::Lambda(0, body));
        let reduced = lam.beta_reduce(&Expr::param("x")).unwrap();
        let idx = f.add_expr(&reduced).unwrap();
        assert!(f.is_computed(idx));

        // An unreduced lambda cannot be lowered.
        assert!(f.add_expr(&Expr::Lambda(0, Expr::constant(1.0))).is_err());
    }

    #[test]
    fn name_for_index_falls_back() {
        let mut f = Formula::new();
        let c = f.add_constant(None, Value::Double(7.0)).unwrap();
        let s = f.add_state(Some("mu"), None).unwrap();
        assert_eq!(f.name_for_index(c), "7");
        assert_eq!(f.name_for_index(s), "mu");
    }
}
