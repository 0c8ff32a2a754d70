//! Runtime-modifiable parameters.
//!
//! Stages that expose parameters implement [`Controllable`] and are
//! registered into a [`ControllableRegistry`] created at build time
//! and threaded through construction. The remote-control plane (out
//! of scope here) talks to the registry; stages share live values
//! with their DSP side through atomics or small mutexes, so `set`
//! takes `&self`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::ParameterError;

/// Description of one exported parameter.
#[derive(Debug, Clone, Copy)]
pub struct Parameter {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait Controllable: Send + Sync {
    /// Registry key, e.g. "tii", "sdr", "tist".
    fn rc_name(&self) -> &str;

    fn parameters(&self) -> Vec<Parameter>;

    fn get_parameter(&self, name: &str) -> Result<String, ParameterError>;

    fn set_parameter(&self, name: &str, value: &str) -> Result<(), ParameterError>;
}

/// Context object owning every registered controllable.
#[derive(Clone, Default)]
pub struct ControllableRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<dyn Controllable>>>>,
}

impl ControllableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, controllable: Arc<dyn Controllable>) {
        let name = controllable.rc_name().to_string();
        self.inner.lock().unwrap().insert(name, controllable);
    }

    pub fn list(&self) -> Vec<(String, Vec<Parameter>)> {
        let map = self.inner.lock().unwrap();
        let mut out: Vec<_> = map
            .iter()
            .map(|(name, c)| (name.clone(), c.parameters()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn get(&self, controllable: &str, param: &str) -> Result<String, ParameterError> {
        let map = self.inner.lock().unwrap();
        let c = map
            .get(controllable)
            .ok_or_else(|| ParameterError::NoSuchControllable(controllable.to_string()))?;
        c.get_parameter(param)
    }

    pub fn set(&self, controllable: &str, param: &str, value: &str) -> Result<(), ParameterError> {
        let map = self.inner.lock().unwrap();
        let c = map
            .get(controllable)
            .ok_or_else(|| ParameterError::NoSuchControllable(controllable.to_string()))?;
        c.set_parameter(param, value)
    }
}

/// Parse helper for `set_parameter` implementations.
pub(crate) fn parse_value<T: std::str::FromStr>(
    name: &'static str,
    value: &str,
) -> Result<T, ParameterError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ParameterError::InvalidValue {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Dummy {
        value: AtomicU32,
    }

    impl Controllable for Dummy {
        fn rc_name(&self) -> &str {
            "dummy"
        }

        fn parameters(&self) -> Vec<Parameter> {
            vec![Parameter {
                name: "value",
                description: "a test value",
            }]
        }

        fn get_parameter(&self, name: &str) -> Result<String, ParameterError> {
            match name {
                "value" => Ok(self.value.load(Ordering::Relaxed).to_string()),
                _ => Err(ParameterError::NotFound {
                    controllable: "dummy".into(),
                    name: name.into(),
                }),
            }
        }

        fn set_parameter(&self, name: &str, value: &str) -> Result<(), ParameterError> {
            match name {
                "value" => {
                    self.value
                        .store(parse_value::<u32>("value", value)?, Ordering::Relaxed);
                    Ok(())
                }
                _ => Err(ParameterError::NotFound {
                    controllable: "dummy".into(),
                    name: name.into(),
                }),
            }
        }
    }

    #[test]
    fn test_registry_set_get() {
        let registry = ControllableRegistry::new();
        registry.register(Arc::new(Dummy {
            value: AtomicU32::new(7),
        }));
        assert_eq!(registry.get("dummy", "value").unwrap(), "7");
        registry.set("dummy", "value", "42").unwrap();
        assert_eq!(registry.get("dummy", "value").unwrap(), "42");
    }

    #[test]
    fn test_unknown_controllable() {
        let registry = ControllableRegistry::new();
        assert!(matches!(
            registry.get("nope", "x"),
            Err(ParameterError::NoSuchControllable(_))
        ));
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let registry = ControllableRegistry::new();
        registry.register(Arc::new(Dummy {
            value: AtomicU32::new(0),
        }));
        assert!(matches!(
            registry.set("dummy", "value", "abc"),
            Err(ParameterError::InvalidValue { .. })
        ));
    }
}
