//! Binds callable logic to method nodes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{UaError, UaResult};
use crate::node::{Argument, describe_data_type, value_matches};
use crate::types::{NodeId, Variant};

/// Method logic: receives the object the method was called on and the
/// validated inputs, returns the outputs.
pub type MethodCallback =
    Arc<dyn Fn(&NodeId, &[Variant]) -> anyhow::Result<Vec<Variant>> + Send + Sync>;

struct RegisteredMethod {
    inputs: Vec<Argument>,
    outputs: Vec<Argument>,
    callback: MethodCallback,
}

/// Registry of method callables keyed by method NodeId.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<NodeId, Arc<RegisteredMethod>>>,
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods = self.methods.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MethodRegistry")
            .field("registered", &methods.len())
            .finish()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `callback` to `method_id`. A method can be bound once.
    pub fn register<F>(
        &self,
        method_id: NodeId,
        inputs: Vec<Argument>,
        outputs: Vec<Argument>,
        callback: F,
    ) -> UaResult<()>
    where
        F: Fn(&NodeId, &[Variant]) -> anyhow::Result<Vec<Variant>> + Send + Sync + 'static,
    {
        let mut methods = self.methods.write().unwrap_or_else(PoisonError::into_inner);
        if methods.contains_key(&method_id) {
            return Err(UaError::DuplicateRegistration(method_id));
        }
        tracing::debug!(method = %method_id, inputs = inputs.len(), outputs = outputs.len(), "method registered");
        methods.insert(
            method_id,
            Arc::new(RegisteredMethod {
                inputs,
                outputs,
                callback: Arc::new(callback),
            }),
        );
        Ok(())
    }

    /// Drops the binding of a method; returns whether one existed.
    pub fn unregister(&self, method_id: &NodeId) -> bool {
        self.methods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(method_id)
            .is_some()
    }

    pub fn is_registered(&self, method_id: &NodeId) -> bool {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(method_id)
    }

    /// Validates `inputs` against the signature and runs the callable on the
    /// caller's thread.
    pub fn invoke(
        &self,
        method_id: &NodeId,
        object_id: &NodeId,
        inputs: &[Variant],
    ) -> UaResult<Vec<Variant>> {
        // Clone the entry out so the lock is not held across user code.
        let method = self
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method_id)
            .cloned()
            .ok_or_else(|| UaError::MethodNotFound(method_id.clone()))?;

        if inputs.len() != method.inputs.len() {
            return Err(UaError::ArgumentCountMismatch {
                expected: method.inputs.len(),
                actual: inputs.len(),
            });
        }
        for (index, (value, argument)) in inputs.iter().zip(&method.inputs).enumerate() {
            if !value_matches(value, &argument.data_type, argument.value_rank) {
                return Err(UaError::ArgumentTypeMismatch {
                    index,
                    expected: describe_data_type(&argument.data_type, argument.value_rank),
                    actual: value.type_tag(),
                });
            }
        }

        let outputs = (method.callback)(object_id, inputs).map_err(|source| {
            UaError::MethodExecutionFailed {
                method: method_id.clone(),
                source,
            }
        })?;

        if outputs.len() != method.outputs.len() {
            return Err(UaError::MethodExecutionFailed {
                method: method_id.clone(),
                source: anyhow::anyhow!(
                    "returned {} outputs, signature declares {}",
                    outputs.len(),
                    method.outputs.len()
                ),
            });
        }
        if let Some((index, (value, argument))) = outputs
            .iter()
            .zip(&method.outputs)
            .enumerate()
            .find(|(_, (v, a))| !value_matches(v, &a.data_type, a.value_rank))
        {
            return Err(UaError::MethodExecutionFailed {
                method: method_id.clone(),
                source: anyhow::anyhow!(
                    "output {index} ({}) is {}, expected {}",
                    argument.name,
                    value.type_tag(),
                    describe_data_type(&argument.data_type, argument.value_rank)
                ),
            });
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::ids::data_type_ids;

    fn counting_registry() -> (MethodRegistry, NodeId, Arc<AtomicUsize>) {
        let registry = MethodRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let method = NodeId::numeric(2, 100);
        registry
            .register(
                method.clone(),
                vec![Argument::new("Input", data_type_ids::BYTE)],
                vec![Argument::new("Output", data_type_ids::BYTE)],
                move |_, inputs| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![inputs[0].clone()])
                },
            )
            .unwrap();
        (registry, method, calls)
    }

    #[test]
    fn test_invoke_echo() {
        let (registry, method, calls) = counting_registry();
        let out = registry
            .invoke(&method, &NodeId::numeric(2, 99), &[Variant::Byte(3)])
            .unwrap();
        assert_eq!(out, vec![Variant::Byte(3)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_argument_has_no_side_effect() {
        let (registry, method, calls) = counting_registry();
        let err = registry
            .invoke(&method, &NodeId::numeric(2, 99), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            UaError::ArgumentCountMismatch {
                expected: 1,
                actual: 0
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_argument_type_mismatch_reports_index() {
        let (registry, method, calls) = counting_registry();
        let err = registry
            .invoke(&method, &NodeId::numeric(2, 99), &[Variant::from("x")])
            .unwrap_err();
        assert!(matches!(err, UaError::ArgumentTypeMismatch { index: 0, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let (registry, method, _) = counting_registry();
        let dup = registry.register(method.clone(), vec![], vec![], |_, _| Ok(vec![]));
        assert!(matches!(dup, Err(UaError::DuplicateRegistration(_))));

        let unknown = NodeId::numeric(2, 555);
        assert!(matches!(
            registry.invoke(&unknown, &NodeId::null(), &[]),
            Err(UaError::MethodNotFound(_))
        ));

        assert!(registry.unregister(&method));
        assert!(!registry.is_registered(&method));
        assert!(!registry.unregister(&method));
    }

    #[test]
    fn test_callable_failure_wraps_cause() {
        let registry = MethodRegistry::new();
        let method = NodeId::numeric(2, 1);
        registry
            .register(method.clone(), vec![], vec![], |_, _| {
                anyhow::bail!("valve stuck")
            })
            .unwrap();
        let err = registry.invoke(&method, &NodeId::null(), &[]).unwrap_err();
        match err {
            UaError::MethodExecutionFailed { method: m, source } => {
                assert_eq!(m, method);
                assert_eq!(source.to_string(), "valve stuck");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_output_is_execution_failure() {
        let registry = MethodRegistry::new();
        let method = NodeId::numeric(2, 2);
        registry
            .register(
                method.clone(),
                vec![],
                vec![Argument::new("Out", data_type_ids::BYTE)],
                |_, _| Ok(vec![Variant::Int32(0)]),
            )
            .unwrap();
        assert!(matches!(
            registry.invoke(&method, &NodeId::null(), &[]),
            Err(UaError::MethodExecutionFailed { .. })
        ));
    }
}
