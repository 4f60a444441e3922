use indexmap::IndexMap;
use strata_core::Value;

/// Named argument values bound to `:name` placeholders at render time.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: IndexMap<String, Value>,
}

impl Args {
    pub fn new() -> Args {
        Args::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Args {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Args {
        Args {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
