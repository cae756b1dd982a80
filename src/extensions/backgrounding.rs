use std::sync::Arc;

use crate::attacher::{ClassBuilder, Extension};
use crate::background::{BackgroundDispatch, Dispatch, Scheduler};

/// Run promotion and deletion through a background scheduler instead of
/// inline. `assign` stays synchronous with the caller; `promote`, `replace`
/// and `destroy` return once their work is enqueued.
pub struct Backgrounding {
    scheduler: Arc<Scheduler>,
}

impl Backgrounding {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

impl Extension for Backgrounding {
    fn install(self, builder: ClassBuilder) -> ClassBuilder {
        let dispatch: Arc<dyn Dispatch> = Arc::new(BackgroundDispatch::new(self.scheduler));
        builder
            .promote_dispatch(dispatch.clone())
            .delete_dispatch(dispatch)
    }
}
