//! Calculator engine - the target object managed by the lifecycle engine.
//!
//! Operation slots are filled and emptied by the descriptor's bind/unbind
//! callbacks; `evaluate` only ever sees the currently bound providers.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{Addition, Calculator, CalculatorError, ExtendedOperation, Subtraction};

#[derive(Default)]
pub struct CalculatorEngine {
    label: RwLock<String>,
    addition: RwLock<Option<Arc<dyn Addition>>>,
    subtraction: RwLock<Option<Arc<dyn Subtraction>>>,
    extended: RwLock<BTreeMap<String, Arc<dyn ExtendedOperation>>>,
}

impl CalculatorEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.write() = label.into();
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.label.read().clone()
    }

    pub fn set_addition(&self, provider: Option<Arc<dyn Addition>>) {
        *self.addition.write() = provider;
    }

    pub fn set_subtraction(&self, provider: Option<Arc<dyn Subtraction>>) {
        *self.subtraction.write() = provider;
    }

    pub fn add_extended(&self, provider: Arc<dyn ExtendedOperation>) {
        let symbol = provider.symbol().to_owned();
        tracing::debug!(label = %self.label(), symbol = %symbol, "Extended operation available");
        self.extended.write().insert(symbol, provider);
    }

    pub fn remove_extended(&self, symbol: &str) {
        tracing::debug!(label = %self.label(), symbol = %symbol, "Extended operation withdrawn");
        self.extended.write().remove(symbol);
    }

    #[must_use]
    pub fn extended_count(&self) -> usize {
        self.extended.read().len()
    }
}

impl Calculator for CalculatorEngine {
    fn evaluate(&self, operation: &str, a: i64, b: i64) -> Result<i64, CalculatorError> {
        match operation {
            "add" => self
                .addition
                .read()
                .as_ref()
                .map(|op| op.add(a, b))
                .ok_or_else(|| CalculatorError::Unavailable {
                    operation: operation.to_owned(),
                }),
            "sub" => self
                .subtraction
                .read()
                .as_ref()
                .map(|op| op.subtract(a, b))
                .ok_or_else(|| CalculatorError::Unavailable {
                    operation: operation.to_owned(),
                }),
            other => {
                let provider = self.extended.read().get(other).cloned();
                provider
                    .ok_or_else(|| CalculatorError::Unavailable {
                        operation: other.to_owned(),
                    })?
                    .apply(a, b)
            }
        }
    }
}
