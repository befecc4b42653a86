use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::LinkSignal;

/// State shared by the daemon's tasks.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub link: LinkSignal,
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            link: LinkSignal::new(),
            cancel: CancellationToken::new(),
        }
    }
}
