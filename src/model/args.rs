use super::Model;
use crate::core::{FactoryError, Result, Value};
use std::collections::BTreeMap;

/// One factory argument: a scalar or another model instance.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Model(Model),
}

impl<T: Into<Value>> From<T> for Arg {
    fn from(value: T) -> Self {
        Self::Value(value.into())
    }
}

impl From<&Model> for Arg {
    fn from(model: &Model) -> Self {
        Self::Model(model.clone())
    }
}

/// Positional and named arguments passed through to a factory.
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Arg>,
    named: BTreeMap<String, Arg>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, arg: impl Into<Arg>) -> Self {
        self.positional.push(arg.into());
        self
    }

    pub fn model(self, model: &Model) -> Self {
        self.push(model)
    }

    pub fn named(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.named.insert(name.into(), arg.into());
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.positional.get(index)
    }

    pub fn get_named(&self, name: &str) -> Option<&Arg> {
        self.named.get(name)
    }

    pub fn value(&self, index: usize) -> Result<Value> {
        match self.get(index) {
            Some(Arg::Value(value)) => Ok(value.clone()),
            Some(Arg::Model(_)) => Err(FactoryError::Argument(format!(
                "argument {} is a model, expected a value",
                index
            ))),
            None => Err(missing_positional(index)),
        }
    }

    pub fn i64(&self, index: usize) -> Result<i64> {
        self.value(index)?
            .as_i64()
            .ok_or_else(|| FactoryError::Argument(format!("argument {} is not an integer", index)))
    }

    pub fn text(&self, index: usize) -> Result<String> {
        match self.value(index)? {
            Value::Text(text) => Ok(text),
            other => Err(FactoryError::Argument(format!(
                "argument {} is {}, expected TEXT",
                index,
                other.type_name()
            ))),
        }
    }

    pub fn model_at(&self, index: usize) -> Result<Model> {
        match self.get(index) {
            Some(Arg::Model(model)) => Ok(model.clone()),
            Some(Arg::Value(value)) => Err(FactoryError::Argument(format!(
                "argument {} is {}, expected a model",
                index,
                value.type_name()
            ))),
            None => Err(missing_positional(index)),
        }
    }

    /// Named scalar, `None` when absent.
    pub fn named_value(&self, name: &str) -> Result<Option<Value>> {
        match self.get_named(name) {
            Some(Arg::Value(value)) => Ok(Some(value.clone())),
            Some(Arg::Model(_)) => Err(FactoryError::Argument(format!(
                "argument '{}' is a model, expected a value",
                name
            ))),
            None => Ok(None),
        }
    }

    pub fn named_model(&self, name: &str) -> Result<Option<Model>> {
        match self.get_named(name) {
            Some(Arg::Model(model)) => Ok(Some(model.clone())),
            Some(Arg::Value(value)) => Err(FactoryError::Argument(format!(
                "argument '{}' is {}, expected a model",
                name,
                value.type_name()
            ))),
            None => Ok(None),
        }
    }
}

fn missing_positional(index: usize) -> FactoryError {
    FactoryError::Argument(format!("missing positional argument {}", index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let bar = Model::new("bar");
        let args = Args::new().push(5).push("x").model(&bar).named("flag", true);

        assert_eq!(args.i64(0).unwrap(), 5);
        assert_eq!(args.text(1).unwrap(), "x");
        assert!(args.model_at(2).unwrap().same_instance(&bar));
        assert_eq!(args.named_value("flag").unwrap(), Some(Value::Boolean(true)));
        assert_eq!(args.named_value("missing").unwrap(), None);
    }

    #[test]
    fn test_wrong_kind_is_argument_error() {
        let args = Args::new().push(5);
        assert!(matches!(args.model_at(0), Err(FactoryError::Argument(_))));
        assert!(matches!(args.i64(3), Err(FactoryError::Argument(msg)) if msg.contains("missing")));
    }
}
