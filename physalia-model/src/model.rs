//! The core model contract: named parameters, dirty tracking, lazy update.
//!
//! A model's life cycle is construct, write parameter values, `update`,
//! then query `prior`/`evaluate`. Writes mark individual parameters dirty
//! and drop the validity flag; `update` is a no-op while valid and
//! otherwise hands exactly the dirty index set to `recalc` before clearing
//! it. Nothing downstream of a model may read it between a write and the
//! next `update`.

use physalia_core::{ExtReal, PhysaliaError, Result, Value};

use crate::bounds::Bounds;

/// One named model parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: Option<Value>,
    pub bounds: Bounds,
    pub fixed: bool,
    /// Possibly different from the last value `recalc` saw.
    pub changed: bool,
}

impl Parameter {
    pub fn new(name: &str) -> Self {
        Parameter {
            name: name.to_string(),
            value: None,
            bounds: Bounds::none(),
            fixed: false,
            changed: true,
        }
    }

    pub fn with_value(name: &str, value: impl Into<Value>) -> Self {
        Parameter {
            value: Some(value.into()),
            ..Parameter::new(name)
        }
    }

    pub fn bounded(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }
}

/// The parameter vector plus validity flag every model carries.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    params: Vec<Parameter>,
    valid: bool,
}

impl ParamTable {
    pub fn new() -> Self {
        ParamTable::default()
    }

    /// Append a parameter. Names must be unique.
    pub fn add(&mut self, p: Parameter) -> Result<usize> {
        if self.params.iter().any(|q| q.name == p.name) {
            return Err(PhysaliaError::NameCollision(p.name));
        }
        self.params.push(p);
        self.valid = false;
        Ok(self.params.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Parameter> {
        self.params
            .get(index)
            .ok_or_else(|| PhysaliaError::index("parameter", index, self.params.len()))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Parameter> {
        let len = self.params.len();
        self.params
            .get_mut(index)
            .ok_or_else(|| PhysaliaError::index("parameter", index, len))
    }

    pub fn name(&self, index: usize) -> Result<&str> {
        Ok(&self.get(index)?.name)
    }

    /// The parameter's current value.
    ///
    /// # Errors
    ///
    /// `UnsetState` when no value has been assigned yet.
    pub fn value(&self, index: usize) -> Result<&Value> {
        let p = self.get(index)?;
        p.value
            .as_ref()
            .ok_or_else(|| PhysaliaError::UnsetState(p.name.clone()))
    }

    pub fn value_f64(&self, index: usize) -> Result<f64> {
        self.value(index)?.as_f64()
    }

    /// Write a value, marking the parameter dirty and the table invalid.
    pub fn write(&mut self, index: usize, value: Value) -> Result<()> {
        let p = self.get_mut(index)?;
        p.value = Some(value);
        p.changed = true;
        self.valid = false;
        Ok(())
    }

    pub fn is_fixed(&self, index: usize) -> Result<bool> {
        Ok(self.get(index)?.fixed)
    }

    pub fn set_fixed(&mut self, index: usize, fixed: bool) -> Result<()> {
        self.get_mut(index)?.fixed = fixed;
        Ok(())
    }

    pub fn bounds(&self, index: usize) -> Result<Bounds> {
        Ok(self.get(index)?.bounds)
    }

    pub fn set_bounds(&mut self, index: usize, bounds: Bounds) -> Result<()> {
        self.get_mut(index)?.bounds = bounds;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Clear every dirty flag and mark the table valid.
    pub fn validate(&mut self) {
        for p in &mut self.params {
            p.changed = false;
        }
        self.valid = true;
    }

    /// Indices of parameters written since the last `validate`.
    pub fn modified_indices(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.changed)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }
}

/// An object that depends on named parameters and updates itself lazily
/// when they change.
pub trait Model {
    /// The parameter table backing this model.
    fn table(&self) -> &ParamTable;

    fn table_mut(&mut self) -> &mut ParamTable;

    /// The model's name.
    fn name(&self) -> String;

    /// Recalculate internal data from the parameters that changed.
    fn recalc(&mut self, _changed: &[usize]) -> Result<()> {
        Ok(())
    }

    /// Store one parameter value down into this model. Composite models
    /// override this to also push the value into child models.
    fn write_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.table_mut().write(index, value)
    }

    /// Write a single parameter and bring the model up to date.
    fn set_parameter_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.write_value(index, value)?;
        self.update()
    }

    /// Write several parameters, then update once.
    fn set_parameter_values(&mut self, indices: &[usize], values: &[Value]) -> Result<()> {
        if indices.len() != values.len() {
            return Err(PhysaliaError::InvalidInput(format!(
                "{} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        for (&i, v) in indices.iter().zip(values) {
            self.write_value(i, v.clone())?;
        }
        self.update()
    }

    /// Bring the model up to date: no-op while valid, otherwise `recalc`
    /// on the dirty set, then clear it.
    fn update(&mut self) -> Result<()> {
        if self.table().is_valid() {
            return Ok(());
        }
        let changed = self.table().modified_indices();
        self.recalc(&changed)?;
        self.table_mut().validate();
        Ok(())
    }

    /// The prior for the model, on the same scale as proposal densities.
    fn prior(&self) -> ExtReal {
        ExtReal::one()
    }

    /// Update, then produce the model's value.
    fn evaluate(&mut self) -> Result<Value> {
        self.update()?;
        Err(PhysaliaError::InvalidInput(format!(
            "model '{}' does not produce a value",
            self.name()
        )))
    }
}

/// Find a parameter index by exact name.
pub fn find_parameter(model: &dyn Model, name: &str) -> Option<usize> {
    model.table().iter().position(|p| p.name == name)
}

/// Does the model have a parameter with this exact name?
pub fn has_parameter(model: &dyn Model, name: &str) -> bool {
    find_parameter(model, name).is_some()
}

/// All parameter names, in index order.
pub fn parameter_names(model: &dyn Model) -> Vec<String> {
    model.table().iter().map(|p| p.name.clone()).collect()
}
