//! Models whose root is an operation over bound argument slots.
//!
//! An [`OpModel`] is built from an [`Expr::Apply`] expression: each argument
//! slot binds to a named parameter, a constant, or a child model (through
//! [`Expr::ModelRef`] handles resolved against a caller-supplied child
//! table). Evaluation resolves the slots and runs the operation; child
//! parameters whose names match a parent parameter stay synchronized on
//! every write, exactly as in [`crate::SuperModel`].

use physalia_core::{PhysaliaError, Result, Value};
use physalia_graph::ops::{Operation, OperationArgs};
use physalia_graph::Expr;

use physalia_core::ExtReal;

use crate::model::{Model, ParamTable, Parameter};
use crate::super_model::{ArgBinding, ModelSlot};

/// A model computing `op(slot_0, ..., slot_{n-1})`.
pub struct OpModel {
    table: ParamTable,
    op: &'static Operation,
    bindings: Vec<ArgBinding>,
    children: Vec<Box<dyn Model>>,
    users: Vec<Vec<ModelSlot>>,
}

struct OpModelArgs<'a> {
    bindings: &'a [ArgBinding],
    table: &'a ParamTable,
    children: &'a mut [Box<dyn Model>],
}

impl OperationArgs for OpModelArgs<'_> {
    fn n_args(&self) -> usize {
        self.bindings.len()
    }

    fn evaluate(&mut self, slot: usize) -> Result<Value> {
        let binding = self
            .bindings
            .get(slot)
            .ok_or_else(|| PhysaliaError::index("slot", slot, self.bindings.len()))?;
        match binding {
            ArgBinding::Parent(i) => Ok(self.table.value(*i)?.clone()),
            ArgBinding::Const(v) => Ok(v.clone()),
            ArgBinding::SubModel(k) => self.children[*k].evaluate(),
        }
    }
}

impl OpModel {
    /// Build from an applied operation expression plus the child models its
    /// `ModelRef` handles refer to.
    ///
    /// Named parameters in the expression become model parameters; a child
    /// parameter with the same name as a parent parameter is kept in sync
    /// through writes, and donates its value and bounds when the parent has
    /// none. Nested applications must be lowered to their own `OpModel`
    /// before being passed in as children.
    pub fn from_expr(expr: &Expr, children: Vec<Box<dyn Model>>) -> Result<OpModel> {
        let Expr::Apply(op, args) = expr else {
            return Err(PhysaliaError::InvalidInput(format!(
                "OpModel requires an applied operation, got '{expr}'"
            )));
        };

        let mut table = ParamTable::new();
        let mut users: Vec<Vec<ModelSlot>> = Vec::new();
        let mut bindings = Vec::with_capacity(args.len());

        for arg in args {
            let binding = match &**arg {
                Expr::Param(name) => {
                    let existing = table.iter().position(|p| p.name == *name);
                    let index = match existing {
                        Some(i) => i,
                        None => {
                            let i = table.add(Parameter::new(name))?;
                            users.push(Vec::new());
                            i
                        }
                    };
                    ArgBinding::Parent(index)
                }
                Expr::Constant(v) => ArgBinding::Const(v.clone()),
                Expr::ModelRef(k) => {
                    if *k >= children.len() {
                        return Err(PhysaliaError::index("child model", *k, children.len()));
                    }
                    ArgBinding::SubModel(*k)
                }
                other => {
                    return Err(PhysaliaError::InvalidInput(format!(
                        "cannot bind slot to '{other}': lower nested expressions first"
                    )));
                }
            };
            bindings.push(binding);
        }

        let mut model = OpModel {
            table,
            op,
            bindings,
            children,
            users,
        };
        model.link_children_by_name()?;
        Ok(model)
    }

    /// Connect child parameters to same-named parent parameters.
    fn link_children_by_name(&mut self) -> Result<()> {
        for (m, child) in self.children.iter().enumerate() {
            for (slot, p) in child.table().iter().enumerate() {
                let Some(index) = self.table.iter().position(|q| q.name == p.name) else {
                    continue;
                };
                self.users[index].push(ModelSlot {
                    child: Some(m),
                    slot,
                });
                // The child donates defaults the parent lacks.
                let parent = self.table.get_mut(index)?;
                if parent.value.is_none() {
                    parent.value = p.value.clone();
                    parent.bounds = p.bounds;
                }
            }
        }
        Ok(())
    }

    pub fn n_children(&self) -> usize {
        self.children.len()
    }
}

impl Model for OpModel {
    fn table(&self) -> &ParamTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut ParamTable {
        &mut self.table
    }

    fn name(&self) -> String {
        let args: Vec<String> = self
            .bindings
            .iter()
            .map(|b| match b {
                ArgBinding::Parent(i) => self
                    .table
                    .name(*i)
                    .unwrap_or("?")
                    .to_string(),
                ArgBinding::Const(v) => v.to_string(),
                ArgBinding::SubModel(k) => format!("@model{k}"),
            })
            .collect();
        (self.op.pretty)(self.op.name, &args)
    }

    fn write_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.table.write(index, value.clone())?;
        let slots = self
            .users
            .get(index)
            .cloned()
            .ok_or_else(|| PhysaliaError::index("parameter", index, self.users.len()))?;
        for ms in slots {
            if let Some(child) = ms.child {
                self.children[child].write_value(ms.slot, value.clone())?;
            }
        }
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.update()?;
        }
        if self.table.is_valid() {
            return Ok(());
        }
        let changed = self.table.modified_indices();
        self.recalc(&changed)?;
        self.table.validate();
        Ok(())
    }

    /// Children's priors only; the top-level operation carries none.
    fn prior(&self) -> ExtReal {
        self.children
            .iter()
            .map(|c| c.prior())
            .product()
    }

    fn evaluate(&mut self) -> Result<Value> {
        self.update()?;
        let mut args = OpModelArgs {
            bindings: &self.bindings,
            table: &self.table,
            children: &mut self.children,
        };
        (self.op.eval)(&mut args)
    }
}
