use std::sync::Arc;

use photozip_core::{
    AdmissionController, AuditHandle, AuditStore, Config, FsObjectStore, JobStatusStore,
    MessageDispatcher, Publisher, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    status: Arc<JobStatusStore>,
    publisher: Arc<dyn Publisher>,
    admission: Arc<AdmissionController>,
    /// Present when archives are stored on local disk and served by us.
    artifacts: Option<Arc<FsObjectStore>>,
    dispatcher: Option<Arc<MessageDispatcher>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        status: Arc<JobStatusStore>,
        publisher: Arc<dyn Publisher>,
        admission: Arc<AdmissionController>,
        artifacts: Option<Arc<FsObjectStore>>,
        dispatcher: Option<Arc<MessageDispatcher>>,
    ) -> Self {
        Self {
            config,
            audit,
            audit_store,
            status,
            publisher,
            admission,
            artifacts,
            dispatcher,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn status(&self) -> &JobStatusStore {
        self.status.as_ref()
    }

    pub fn publisher(&self) -> &dyn Publisher {
        self.publisher.as_ref()
    }

    pub fn admission(&self) -> &AdmissionController {
        self.admission.as_ref()
    }

    pub fn artifacts(&self) -> Option<&FsObjectStore> {
        self.artifacts.as_deref()
    }

    pub fn dispatcher(&self) -> Option<&MessageDispatcher> {
        self.dispatcher.as_deref()
    }
}
