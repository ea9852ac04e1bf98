//! Dashboard view sessions.
//!
//! A department dashboard mounts a view when it opens and unmounts it when
//! it closes. Each view owns its own inbox, sound channel and feed
//! subscription; nothing is shared between views.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;
use crate::db::ScopeFilter;
use crate::services::audio::{AudioAlerts, SoundChannel};
use crate::services::inbox::Inbox;
use crate::services::listener::{self, Subscription};
use crate::services::store::NotificationStore;

const SOUND_CHANNEL_CAPACITY: usize = 16;

pub struct DashboardView {
    pub id: Uuid,
    pub filter: ScopeFilter,
    pub mounted_at: DateTime<Utc>,
    pub inbox: Arc<Inbox>,
    pub sounds: Arc<SoundChannel>,
    subscription: Subscription,
}

impl DashboardView {
    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }
}

#[derive(Default)]
pub struct ViewRegistry {
    views: RwLock<HashMap<Uuid, Arc<DashboardView>>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mount(
        &self,
        store: Arc<dyn NotificationStore>,
        filter: ScopeFilter,
        config: &Config,
    ) -> Arc<DashboardView> {
        let sounds = Arc::new(SoundChannel::new(SOUND_CHANNEL_CAPACITY));
        let audio = AudioAlerts::new(
            sounds.clone(),
            config.audio.alert_url.clone(),
            config.audio.unlock_url.clone(),
        );
        let inbox = Arc::new(Inbox::new(store.clone(), audio, config.feed.notice_capacity));
        let subscription = listener::subscribe(store, filter.clone(), inbox.clone());

        let view = Arc::new(DashboardView {
            id: Uuid::new_v4(),
            filter,
            mounted_at: Utc::now(),
            inbox,
            sounds,
            subscription,
        });

        self.views.write().await.insert(view.id, view.clone());
        tracing::info!("Mounted view {} (scope={})", view.id, view.filter);
        view
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<DashboardView>> {
        self.views.read().await.get(id).cloned()
    }

    /// Tear a view down. Returns `false` if no such view was mounted.
    pub async fn unmount(&self, id: &Uuid) -> bool {
        let removed = self.views.write().await.remove(id);
        match removed {
            Some(view) => {
                view.subscription.unsubscribe();
                tracing::info!("Unmounted view {} (scope={})", view.id, view.filter);
                true
            }
            None => false,
        }
    }

    pub async fn unmount_all(&self) -> usize {
        let views: Vec<_> = self.views.write().await.drain().map(|(_, v)| v).collect();
        for view in &views {
            view.subscription.unsubscribe();
        }
        views.len()
    }

    pub async fn len(&self) -> usize {
        self.views.read().await.len()
    }
}
