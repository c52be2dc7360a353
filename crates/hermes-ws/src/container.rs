//! Server container.
//!
//! The container owns every deployed endpoint and resolves handshake paths
//! to them. Annotated classes are validated before deployment; a class with
//! any violation is rejected with all of them at once.

use std::sync::Arc;

use hermes_router::{EndpointRouter, Params};
use parking_lot::RwLock;
use tracing::info;

use crate::annotated::{validate, AnnotatedEndpoint, EndpointClass, ErrorCollector};
use crate::config::{EndpointConfig, SessionConfig};
use crate::endpoint::EndpointFactory;
use crate::error::{CloseCode, CloseReason, WsResult};
use crate::monitor::EndpointStatsSnapshot;
use crate::wrapper::EndpointWrapper;

/// Deployed endpoints and their shared session defaults.
#[derive(Debug)]
pub struct ServerContainer {
    defaults: SessionConfig,
    router: RwLock<EndpointRouter<Arc<EndpointWrapper>>>,
    endpoints: RwLock<Vec<Arc<EndpointWrapper>>>,
}

impl Default for ServerContainer {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl ServerContainer {
    /// Create an empty container.
    pub fn new(defaults: SessionConfig) -> Self {
        Self {
            defaults,
            router: RwLock::new(EndpointRouter::new()),
            endpoints: RwLock::new(Vec::new()),
        }
    }

    /// Session defaults applied to every endpoint.
    pub fn session_defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    /// Deploy a programmatic endpoint.
    ///
    /// Fails when the path is malformed or equivalent to a deployed one.
    pub fn deploy(&self, config: EndpointConfig, factory: EndpointFactory) -> WsResult<Arc<EndpointWrapper>> {
        let wrapper = Arc::new(EndpointWrapper::new(config, factory, self.defaults.clone()));
        self.router
            .write()
            .insert(wrapper.path(), Arc::clone(&wrapper))?;
        self.endpoints.write().push(Arc::clone(&wrapper));
        info!(endpoint = %wrapper.path(), "Endpoint deployed");
        Ok(wrapper)
    }

    /// Validate, compile and deploy an annotated endpoint class.
    pub fn deploy_annotated<T: Send + Sync + 'static>(
        &self,
        class: EndpointClass<T>,
    ) -> WsResult<Arc<EndpointWrapper>> {
        let collector = ErrorCollector::new();
        validate(&class, &collector);
        if let Some(error) = collector.compose(class.config().path()) {
            return Err(error.into());
        }

        let model = Arc::new(AnnotatedEndpoint::compile(class, self.defaults.incoming_buffer_size));
        let config = model.config().clone();
        self.deploy(config, model.factory())
    }

    /// Resolve a request path, exact templates first.
    pub fn match_path(&self, path: &str) -> Option<(Arc<EndpointWrapper>, Params)> {
        let router = self.router.read();
        let matched = router.match_path(path)?;
        Some((Arc::clone(matched.value), matched.params))
    }

    /// Deployed endpoints, in deployment order.
    pub fn endpoints(&self) -> Vec<Arc<EndpointWrapper>> {
        self.endpoints.read().clone()
    }

    /// Statistics of every endpoint.
    pub fn stats(&self) -> Vec<EndpointStatsSnapshot> {
        self.endpoints
            .read()
            .iter()
            .map(|e| e.stats().snapshot())
            .collect()
    }

    /// Close every open session with 1001.
    pub fn shutdown(&self) {
        let reason = CloseReason::standard(CloseCode::GoingAway);
        for endpoint in self.endpoints.read().iter() {
            endpoint.close_all(&reason);
        }
        info!("Container shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotated::{MethodDecl, ParamType};
    use crate::endpoint::{factory, Endpoint};
    use crate::error::WsError;
    use crate::session::Session;
    use crate::types::ValueType;

    struct Quiet;

    impl Endpoint for Quiet {
        fn on_open(&self, _session: &Session, _config: &EndpointConfig) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_deploy_and_match() {
        let container = ServerContainer::default();
        container
            .deploy(EndpointConfig::builder("/chat/{room}").build(), factory(|| Ok(Quiet)))
            .unwrap();
        container
            .deploy(EndpointConfig::builder("/chat/lobby").build(), factory(|| Ok(Quiet)))
            .unwrap();

        let (exact, params) = container.match_path("/chat/lobby").unwrap();
        assert_eq!(exact.path(), "/chat/lobby");
        assert!(params.is_empty());

        let (templated, params) = container.match_path("/chat/rust").unwrap();
        assert_eq!(templated.path(), "/chat/{room}");
        assert_eq!(params.get("room"), Some("rust"));

        assert!(container.match_path("/nope").is_none());
        assert_eq!(container.endpoints().len(), 2);
    }

    #[test]
    fn test_equivalent_paths_rejected() {
        let container = ServerContainer::default();
        container
            .deploy(EndpointConfig::builder("/a/{x}").build(), factory(|| Ok(Quiet)))
            .unwrap();
        let err = container
            .deploy(EndpointConfig::builder("/a/{y}").build(), factory(|| Ok(Quiet)))
            .unwrap_err();
        assert!(matches!(err, WsError::Route(_)));
        assert_eq!(container.endpoints().len(), 1);
    }

    #[test]
    fn test_invalid_annotated_class_rejected_with_all_violations() {
        struct Bad;
        let class = EndpointClass::new("Bad", EndpointConfig::builder("/bad").build(), || Ok(Bad))
            .method(MethodDecl::on_error("error", [ParamType::Session], |_: &Bad, _| Ok(())))
            .method(MethodDecl::on_close("close", [ParamType::Throwable], |_: &Bad, _| Ok(())));
        let container = ServerContainer::default();
        match container.deploy_annotated(class).unwrap_err() {
            WsError::Deployment(e) => {
                assert_eq!(e.endpoint, "/bad");
                assert_eq!(e.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(container.endpoints().is_empty());
    }

    #[test]
    fn test_annotated_class_deploys() {
        struct Good;
        let class = EndpointClass::new("Good", EndpointConfig::builder("/good").build(), || Ok(Good))
            .method(MethodDecl::on_message(
                "m",
                [ParamType::Value(ValueType::String)],
                |_: &Good, _| Ok(None),
            ));
        let container = ServerContainer::default();
        let wrapper = container.deploy_annotated(class).unwrap();
        assert_eq!(wrapper.path(), "/good");
        assert_eq!(container.stats()[0].endpoint, "/good");
    }
}
