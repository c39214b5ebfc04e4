// Shared application state injected into every axum handler, adapted
// from the teacher's `AppState` — a `Broker` handle there, a `Hub`
// handle plus the store and validator capabilities here.
use crate::hub::Hub;
use crate::store::ChangeStreamSource;
use crate::validator::Validator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub store: Arc<dyn ChangeStreamSource>,
    pub validator: Arc<Validator>,
}

impl AppState {
    pub fn new(hub: Hub, store: Arc<dyn ChangeStreamSource>, validator: Arc<Validator>) -> Self {
        Self {
            hub,
            store,
            validator,
        }
    }
}
