use std::sync::Arc;

use crate::detect::engine::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}
