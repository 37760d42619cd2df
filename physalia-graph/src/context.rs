//! A context is one valuation of a formula.
//!
//! Each term index owns a cell `{computed, computation, result}`. The
//! `computation` records which slots the last evaluation actually consulted
//! and the values it read from them, which enables *change-skipping*: after
//! an invalidation, if every consulted input still compares equal, the
//! cached result is revalidated without re-running the operation. A
//! three-valued [`Comparison`] keeps this safe: a `Maybe` verdict forces
//! the re-run rather than trusting a possibly stale value.
//!
//! The formula is held through a copy-on-write handle and is never mutated
//! through a context; cells are individually copy-on-write so cloning a
//! context is cheap and mutating the clone leaves the original intact.

use physalia_core::{Comparison, CowPtr, PhysaliaError, Result, Value};

use crate::formula::{Formula, TermKind};
use crate::ops::{Operation, OperationArgs};

/// Record of one completed evaluation: which slots were consulted, in what
/// order, and what values they produced.
#[derive(Debug, Clone)]
pub struct Computation {
    /// Slots in the order they were first consulted.
    pub slots_used_order: Vec<usize>,
    /// Value read from each slot; `None` for slots never consulted.
    pub used_values: Vec<Option<Value>>,
}

impl Computation {
    fn new(n_inputs: usize) -> Self {
        Computation {
            slots_used_order: Vec::new(),
            used_values: vec![None; n_inputs],
        }
    }
}

#[derive(Debug, Clone)]
struct Cell {
    /// Is the result both available and known to be current?
    computed: bool,
    computation: Option<Computation>,
    result: Option<Value>,
}

impl Cell {
    fn empty() -> Self {
        Cell {
            computed: false,
            computation: None,
            result: None,
        }
    }
}

/// A valuation of a [`Formula`]: per-term cached results with
/// change-tracking.
#[derive(Debug, Clone)]
pub struct Context {
    formula: CowPtr<Formula>,
    cells: Vec<CowPtr<Cell>>,
}

/// Argument view that evaluates inputs through the context and records
/// every slot access into a fresh [`Computation`].
struct ContextArgs<'a> {
    ctx: &'a mut Context,
    inputs: Vec<usize>,
    computation: Computation,
}

impl OperationArgs for ContextArgs<'_> {
    fn n_args(&self) -> usize {
        self.inputs.len()
    }

    fn evaluate(&mut self, slot: usize) -> Result<Value> {
        let index = *self
            .inputs
            .get(slot)
            .ok_or_else(|| PhysaliaError::index("slot", slot, self.inputs.len()))?;
        let value = self.ctx.evaluate(index)?;
        if self.computation.used_values[slot].is_none() {
            self.computation.slots_used_order.push(slot);
        }
        self.computation.used_values[slot] = Some(value.clone());
        Ok(value)
    }
}

enum Plan {
    Constant(Value),
    State,
    Computed {
        op: &'static Operation,
        inputs: Vec<usize>,
    },
}

impl Context {
    /// Create a fresh valuation. Constant terms start computed; state terms
    /// start with their default value, if any.
    pub fn new(formula: CowPtr<Formula>) -> Self {
        let cells = (0..formula.len())
            .map(|i| {
                let cell = match formula.kind(i) {
                    TermKind::Constant(v) => Cell {
                        computed: true,
                        computation: None,
                        result: Some(v.clone()),
                    },
                    TermKind::State { default } => Cell {
                        computed: false,
                        computation: None,
                        result: default.clone(),
                    },
                    TermKind::Computed(_) => Cell::empty(),
                };
                CowPtr::new(cell)
            })
            .collect();
        Context { formula, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The shared formula this context valuates.
    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// Is the cached result for `index` currently marked valid?
    pub fn is_cached(&self, index: usize) -> bool {
        self.cells[index].computed
    }

    /// The cached result for `index`, valid or not.
    pub fn cached_result(&self, index: usize) -> Option<&Value> {
        self.cells[index].result.as_ref()
    }

    /// Return the value of `index`, computing it if necessary.
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange` for a bad index; `UnsetState` for a state term
    /// that has no value.
    pub fn evaluate(&mut self, index: usize) -> Result<Value> {
        if index >= self.cells.len() {
            return Err(PhysaliaError::index("term", index, self.cells.len()));
        }

        let plan = match self.formula.kind(index) {
            TermKind::Constant(v) => Plan::Constant(v.clone()),
            TermKind::State { .. } => Plan::State,
            &TermKind::Computed(op) => Plan::Computed {
                op,
                inputs: self.formula.inputs(index).to_vec(),
            },
        };

        match plan {
            Plan::Constant(v) => Ok(v),
            Plan::State => self.cells[index].result.clone().ok_or_else(|| {
                PhysaliaError::UnsetState(self.formula.name_for_index(index))
            }),
            Plan::Computed { op, inputs } => {
                if self.cells[index].computed {
                    return self.stored_result(index);
                }

                // Change-skipping: if every slot the last run consulted
                // still compares definitely equal, revalidate the cache.
                let prior = self.cells[index].computation.clone();
                if let Some(comp) = prior {
                    if self.inputs_unchanged(&comp, &inputs)? {
                        self.cells[index].make_mut().computed = true;
                        return self.stored_result(index);
                    }
                }

                let mut args = ContextArgs {
                    ctx: self,
                    inputs,
                    computation: Computation::new(op.arity),
                };
                let result = (op.eval)(&mut args)?;
                let computation = args.computation;

                let cell = self.cells[index].make_mut();
                cell.computed = true;
                cell.computation = Some(computation);
                cell.result = Some(result.clone());
                Ok(result)
            }
        }
    }

    /// Update a state term and invalidate everything downstream of it.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `index` names a constant or computed term.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        if index >= self.cells.len() {
            return Err(PhysaliaError::index("term", index, self.cells.len()));
        }
        if !self.formula.is_state(index) {
            return Err(PhysaliaError::InvalidInput(format!(
                "term {} ({}) is not a state term",
                index,
                self.formula.name_for_index(index)
            )));
        }

        let cell = self.cells[index].make_mut();
        cell.result = Some(value);
        cell.computed = false;

        let downstream = self.formula.reachable_from(index);
        for j in downstream {
            self.cells[j].make_mut().computed = false;
        }
        Ok(())
    }

    fn inputs_unchanged(&mut self, comp: &Computation, inputs: &[usize]) -> Result<bool> {
        for &slot in &comp.slots_used_order {
            let recorded = match &comp.used_values[slot] {
                Some(v) => v.clone(),
                None => {
                    return Err(PhysaliaError::Structure(
                        "computation lists a consulted slot without a value".into(),
                    ))
                }
            };
            let current = self.evaluate(inputs[slot])?;
            if recorded.compare(&current) != Comparison::Yes {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn stored_result(&self, index: usize) -> Result<Value> {
        self.cells[index].result.clone().ok_or_else(|| {
            PhysaliaError::Structure(format!("term {index} marked computed without a result"))
        })
    }
}
