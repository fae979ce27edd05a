use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Per-build administration context.
///
/// Carries the product installation the admin tooling runs from and the
/// environment passed to every command issued through it.
#[derive(Debug)]
pub struct Context {
    installation: PathBuf,
    environment: RwLock<BTreeMap<String, String>>,
}

impl Context {
    /// Creates a context for the product installed at `installation`.
    #[must_use]
    pub fn new(installation: impl Into<PathBuf>) -> Self {
        Self {
            installation: installation.into(),
            environment: RwLock::new(BTreeMap::new()),
        }
    }

    /// The product installation.
    #[must_use]
    pub fn installation(&self) -> &Path {
        &self.installation
    }

    /// Forgets every environment variable.
    pub fn clear_environment(&self) {
        self.environment.write().clear();
    }

    /// Adds `environment`, replacing variables that are already set.
    pub fn with_environment(&self, environment: &BTreeMap<String, String>) -> &Self {
        self.environment.write().extend(
            environment
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        self
    }

    /// Replaces the whole environment with `environment` in one step, so a
    /// concurrent snapshot sees either the old or the new environment.
    pub fn set_environment(&self, environment: &BTreeMap<String, String>) {
        let mut current = self.environment.write();
        current.clone_from(environment);
    }

    /// A snapshot of the environment.
    #[must_use]
    pub fn environment(&self) -> BTreeMap<String, String> {
        self.environment.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn test_environment_scoping() {
        let context = Context::new("/opt/product");
        let first = BTreeMap::from([("A".to_string(), "1".to_string())]);
        let second = BTreeMap::from([("B".to_string(), "2".to_string())]);

        context.with_environment(&first).with_environment(&second);
        assert_eq!(context.environment().len(), 2);

        context.clear_environment();
        context.with_environment(&second);
        assert_eq!(context.environment(), second);
        assert_eq!(context.installation(), Path::new("/opt/product"));
    }

    #[test]
    fn test_set_environment_is_never_observed_partially() {
        let context = Arc::new(Context::new("/opt/product"));
        let environment: BTreeMap<String, String> = (0..200)
            .map(|i| (format!("VAR_{i}"), i.to_string()))
            .collect();
        context.set_environment(&environment);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let context = context.clone();
                let environment = environment.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        context.set_environment(&environment);
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            assert_eq!(context.environment(), environment);
        }

        for writer in writers {
            writer.join().unwrap();
        }
    }
}
