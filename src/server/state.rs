use crate::Engine;

/// Shared state handed to every handler. The engine is the single owned
/// instance for the process; its components guard themselves.
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
