use std::sync::Arc;

use crate::daemon::Daemon;

#[derive(Clone)]
pub struct AppState {
    pub daemon: Arc<Daemon>,
}

impl AppState {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self { daemon }
    }
}
