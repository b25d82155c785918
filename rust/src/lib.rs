mod actions;
mod core;
mod logging;
mod state;
mod transport;
mod updates;
pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use crate::core::api::{ChatApi, HttpChatApi, UnavailableChatApi};
pub use crate::core::bus::{BusError, EventBus, PushEvent, PushEventKind, PushHandler, Subscription};
pub use crate::core::config::{load_app_config, AppConfig};
pub use crate::core::engine::{ConversationEngine, EngineError, Mutation, OutgoingMessage, Phase};
pub use crate::core::normalize::{normalize_conversation, normalize_message, normalize_messages};
pub use crate::core::pagination::{
    fetch_page, HistoryPage, MergeMode, PageRequest, PaginationController,
};
pub use crate::core::reactions::aggregate_reactions;
pub use actions::AppAction;
pub use state::*;
pub use transport::*;
pub use updates::*;

/// Return the default `convo_config.json` payload used when no config file exists.
#[uniffi::export]
pub fn default_config_json() -> String {
    crate::core::config::default_app_config_json()
}

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    bus: Arc<EventBus>,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String, transport: Box<dyn PushTransport>) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "FfiApp::new() starting");

        let config = load_app_config(&data_dir);
        let base_url = config.api_base_url();
        let api: Arc<dyn ChatApi> =
            match HttpChatApi::new(&base_url, config.api_token(), config.request_timeout()) {
                Ok(api) => Arc::new(api),
                Err(e) => {
                    tracing::error!(err = %format!("{e:#}"), %base_url, "api client unavailable");
                    Arc::new(UnavailableChatApi::new(format!("{e:#}")))
                }
            };
        let bus = Arc::new(EventBus::new(Arc::from(transport)));
        Self::with_collaborators(config, api, bus)
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Hand a raw realtime frame (`event_name` plus its JSON payload) to the
    /// event bus. Unknown names and undecodable payloads are logged and dropped.
    pub fn ingest_push_frame(&self, event_name: String, payload_json: String) {
        self.bus.dispatch_frame(&event_name, &payload_json);
    }
}

impl FfiApp {
    /// Build the app around caller-supplied collaborators. Used by `new` and by
    /// tests that stand in for the REST API and the realtime transport.
    pub fn with_collaborators(
        config: AppConfig,
        api: Arc<dyn ChatApi>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let bus_for_core = bus.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                config,
                shared_for_core,
                api,
                bus_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                let stop = matches!(msg, CoreMsg::Shutdown);
                core.handle_message(msg);
                if stop {
                    break;
                }
            }
            tracing::debug!("app actor stopped");
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            bus,
        })
    }
}

impl Drop for FfiApp {
    fn drop(&mut self) {
        let _ = self.core_tx.send(CoreMsg::Shutdown);
    }
}
