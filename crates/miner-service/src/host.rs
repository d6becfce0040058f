//! Adapter between host component callbacks and the lifecycle controller.
//!
//! Hosts drive the service through create / start / destroy hooks. The
//! adapter maps those onto [`MiningService::start`] and
//! [`MiningService::stop`], resolving the pool parameter from the start
//! intent.

use crate::{MiningService, ServiceConfig, ServiceError};

/// Extras delivered with a start request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StartIntent {
    pub pool_url: Option<String>,
}

impl StartIntent {
    pub fn with_pool(pool_url: impl Into<String>) -> Self {
        Self {
            pool_url: Some(pool_url.into()),
        }
    }
}

/// What the host should do if it kills the service.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartDirective {
    /// Recreate the service and redeliver the last intent.
    Sticky,
}

/// Direct call surface handed out on bind. This service has none.
#[derive(Debug)]
pub struct Binder;

/// Host-side component lifecycle.
pub trait HostService {
    fn on_create(&mut self);

    fn on_start_command(&mut self, intent: Option<StartIntent>) -> StartDirective;

    fn on_destroy(&mut self);

    fn on_bind(&mut self) -> Option<Binder>;
}

/// A [`MiningService`] plus the base configuration start requests are
/// layered onto.
pub struct ServiceHost {
    service: MiningService,
    base_config: ServiceConfig,
    last_intent: Option<StartIntent>,
}

impl ServiceHost {
    pub fn new(service: MiningService, base_config: ServiceConfig) -> Self {
        Self {
            service,
            base_config,
            last_intent: None,
        }
    }

    pub fn service(&self) -> &MiningService {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut MiningService {
        &mut self.service
    }

    /// The intent the host should redeliver after a restart.
    pub fn last_intent(&self) -> Option<&StartIntent> {
        self.last_intent.as_ref()
    }

    /// Layer the intent onto the base configuration. Without a pool in the
    /// intent the base pool is kept.
    fn config_for(&self, intent: Option<&StartIntent>) -> ServiceConfig {
        let pool_url = intent
            .and_then(|i| i.pool_url.clone())
            .unwrap_or_else(|| self.base_config.pool_url.clone());
        ServiceConfig {
            pool_url,
            ..self.base_config.clone()
        }
    }
}

impl HostService for ServiceHost {
    fn on_create(&mut self) {
        self.service.prepare();
        log::debug!("service created");
    }

    fn on_start_command(&mut self, intent: Option<StartIntent>) -> StartDirective {
        let config = self.config_for(intent.as_ref());
        match self.service.start(config) {
            Ok(()) => self.last_intent = intent,
            Err(e @ ServiceError::AlreadyActive { .. }) => {
                log::warn!("ignoring start request: {e}");
            }
        }
        StartDirective::Sticky
    }

    fn on_destroy(&mut self) {
        self.service.stop();
        log::debug!("service destroyed");
    }

    fn on_bind(&mut self) -> Option<Binder> {
        None
    }
}
