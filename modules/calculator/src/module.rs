//! Calculator module definition: descriptor wiring and factory setup.
//!
//! The descriptor declares two required inject points (addition,
//! subtraction), one optional track point for extended operations, a
//! `label` configure point, and exposes the [`Calculator`] capability.

use std::sync::Arc;

use wirekit::{
    CapabilityInstance, CapabilityTypeId, ConfigSource, ConfigurePoint, DependencyPoint,
    ExposePoint, ModuleDescriptor, ObjectManagerFactory, Provider, RegistryAdapter, ValueKind,
};

use crate::api::{Addition, Calculator, ExtendedOperation, Subtraction};
use crate::engine::CalculatorEngine;

pub const MODULE_TYPE: &str = "calculator";

fn engine_of(target: &CapabilityInstance) -> anyhow::Result<Arc<CalculatorEngine>> {
    target
        .downcast::<CalculatorEngine>()
        .ok_or_else(|| anyhow::anyhow!("target is not a CalculatorEngine"))
}

fn extended_of(provider: &Provider) -> anyhow::Result<Arc<dyn ExtendedOperation>> {
    provider
        .instance
        .downcast::<dyn ExtendedOperation>()
        .ok_or_else(|| anyhow::anyhow!("provider is not an ExtendedOperation"))
}

/// Build the descriptor for one calculator instance.
#[must_use]
pub fn descriptor(name: impl Into<String>) -> ModuleDescriptor {
    ModuleDescriptor::new(MODULE_TYPE, name)
        .with_configure(ConfigurePoint::new("label", ValueKind::String))
        .on_configure(|target, values| {
            let engine = engine_of(target)?;
            if let Some(label) = values.get("label").and_then(serde_json::Value::as_str) {
                engine.set_label(label);
            }
            Ok(())
        })
        .with_dependency(
            DependencyPoint::inject("addition", CapabilityTypeId::of::<dyn Addition>())
                .on_bind(|target, provider| {
                    let addition = provider
                        .instance
                        .downcast::<dyn Addition>()
                        .ok_or_else(|| anyhow::anyhow!("provider is not an Addition"))?;
                    engine_of(target)?.set_addition(Some(addition));
                    Ok(())
                })
                .on_unbind(|target, _provider| {
                    engine_of(target)?.set_addition(None);
                    Ok(())
                }),
        )
        .with_dependency(
            DependencyPoint::inject("subtraction", CapabilityTypeId::of::<dyn Subtraction>())
                .on_bind(|target, provider| {
                    let subtraction = provider
                        .instance
                        .downcast::<dyn Subtraction>()
                        .ok_or_else(|| anyhow::anyhow!("provider is not a Subtraction"))?;
                    engine_of(target)?.set_subtraction(Some(subtraction));
                    Ok(())
                })
                .on_unbind(|target, _provider| {
                    engine_of(target)?.set_subtraction(None);
                    Ok(())
                }),
        )
        .with_dependency(
            DependencyPoint::track("extended", CapabilityTypeId::of::<dyn ExtendedOperation>())
                .on_bind(|target, provider| {
                    engine_of(target)?.add_extended(extended_of(provider)?);
                    Ok(())
                })
                .on_unbind(|target, provider| {
                    let operation = extended_of(provider)?;
                    engine_of(target)?.remove_extended(operation.symbol());
                    Ok(())
                }),
        )
        .with_expose(ExposePoint::new(
            "calculator",
            CapabilityTypeId::of::<dyn Calculator>(),
            |target| Ok(CapabilityInstance::new(engine_of(target)? as Arc<dyn Calculator>)),
        ))
        .on_activate(|target| {
            let engine = engine_of(target)?;
            tracing::info!(label = %engine.label(), "Calculator active");
            Ok(())
        })
        .on_deactivate(|target| {
            let engine = engine_of(target)?;
            tracing::info!(label = %engine.label(), "Calculator deactivated");
            Ok(())
        })
}

/// Build the factory for calculator instances.
#[must_use]
pub fn factory(
    adapter: Arc<dyn RegistryAdapter>,
    config: Arc<dyn ConfigSource>,
) -> ObjectManagerFactory {
    ObjectManagerFactory::new(MODULE_TYPE, adapter, config, |_descriptor| {
        Ok(CapabilityInstance::of(CalculatorEngine::new()))
    })
}
