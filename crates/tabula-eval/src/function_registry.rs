use crate::function::Function;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::{Arc, Once};

static REG: Lazy<DashMap<&'static str, Arc<dyn Function>>> = Lazy::new(DashMap::new);
static BUILTINS: Once = Once::new();

pub fn register(f: Arc<dyn Function>) {
    REG.insert(f.name(), f);
}

/// Look up a function by name, case-insensitively.
pub fn get(name: &str) -> Option<Arc<dyn Function>> {
    BUILTINS.call_once(crate::builtins::load_builtins);
    let upper = name.to_ascii_uppercase();
    REG.get(upper.as_str()).map(|v| Arc::clone(v.value()))
}
