use std::sync::Arc;

use virtkit_manager::{Datastore, VmManager};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<VmManager>,
    pub store: Arc<dyn Datastore>,
}

impl AppState {
    pub fn new(manager: Arc<VmManager>, store: Arc<dyn Datastore>) -> Arc<Self> {
        Arc::new(Self { manager, store })
    }
}
