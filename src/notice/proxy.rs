use std::any::Any;

use super::facade::Facade;

/// Long-lived, named data or service object looked up by handlers.
pub trait Proxy: Any + Send + Sync {
    /// Registration name. `None` registers under the type name.
    fn name(&self) -> Option<String> {
        None
    }

    fn on_register(&self, _facade: &Facade) {}

    fn on_remove(&self) {}
}
