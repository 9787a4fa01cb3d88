use std::{ops::Deref, sync::Arc};

use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;
use tokio::sync::mpsc::Sender;

use crate::security::{PolicyStore, SecurityEngine, SweepRequest};

/// Shared state handed to commands and gateway handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("tracked_windows", &self.engine.tracker().len())
            .field("sweeper_running", &!self.sweeper.is_closed())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Data around an engine whose sweep task listens on `sweeper`
    #[must_use]
    pub fn with_sweeper(engine: Arc<SecurityEngine>, sweeper: Sender<SweepRequest>) -> Self {
        Self(Arc::new(DataInner {
            engine,
            sweeper,
            started_at: Utc::now(),
        }))
    }

    /// The policy store behind the engine
    #[must_use]
    pub fn policies(&self) -> &Arc<dyn PolicyStore> {
        self.engine.store()
    }

    /// Ask the sweep task to stop
    pub async fn shutdown(&self) {
        // The task may already be gone
        let _ = self.sweeper.send(SweepRequest::Shutdown).await;
    }
}

pub struct DataInner {
    pub engine: Arc<SecurityEngine>,
    /// Request channel of the tracker sweep task
    pub sweeper: Sender<SweepRequest>,
    pub started_at: DateTime<Utc>,
}
