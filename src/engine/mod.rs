//! In-process routing engine
//!
//! Routes consume `direct:` endpoints and may forward to `direct:` or `log:`
//! endpoints. The engine counts in-flight exchanges; after `stop()` it only
//! reports stopped once the last in-flight exchange has finished.

pub mod exchange;

use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{debug, info};

pub use exchange::Exchange;

use crate::{
    config::EngineConfig,
    core::{EngineFactory, RouteRegistry, RoutingEngine, RunnerError, RunnerResult},
    engine_error,
    pipeline::{Endpoint, RouteDefinition, Step},
};

const DIRECT_SCHEME: &str = "direct";
const LOG_SCHEME: &str = "log";
const ROUTE_LOG_TARGET: &str = "routerunner::route";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineStatus {
    Stopped = 0,
    Started = 1,
    Stopping = 2,
}

impl EngineStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineStatus::Started,
            2 => EngineStatus::Stopping,
            _ => EngineStatus::Stopped,
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            EngineStatus::Stopped => "stopped",
            EngineStatus::Started => "started",
            EngineStatus::Stopping => "stopping",
        };
        f.write_str(status)
    }
}

pub struct RouteEngine {
    config: EngineConfig,
    registry: RouteRegistry,
    status: AtomicU8,
    inflight: AtomicUsize,
    next_route: AtomicUsize,
}

impl RouteEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: RouteRegistry::new(),
            status: AtomicU8::new(EngineStatus::Stopped as u8),
            inflight: AtomicUsize::new(0),
            next_route: AtomicUsize::new(0),
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Number of exchanges currently being processed
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    fn admit(&self) -> RunnerResult<InflightGuard<'_>> {
        // Count first, then check status: pairs with the store-then-load in stop()
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let guard = InflightGuard { engine: self };

        match self.status() {
            EngineStatus::Started => Ok(guard),
            status => Err(engine_error!(
                "Engine '{}' is not accepting exchanges ({})",
                self.config.name,
                status
            )),
        }
    }

    fn complete_stop(&self) {
        if self
            .status
            .compare_exchange(
                EngineStatus::Stopping as u8,
                EngineStatus::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!("Engine '{}' stopped", self.config.name);
        }
    }

    fn dispatch(&self, uri: &str, exchange: Exchange, hops: u32) -> RunnerResult<Exchange> {
        if hops > self.config.max_hops {
            return Err(engine_error!(
                "Exchange {} exceeded {} hops at '{}'",
                exchange.id,
                self.config.max_hops,
                uri
            ));
        }

        let route = self
            .registry
            .route_for_endpoint(uri)
            .ok_or_else(|| RunnerError::NotFound(format!("No consumer on endpoint '{uri}'")))?;

        self.process(&route, exchange, hops)
    }

    fn process(
        &self,
        route: &RouteDefinition,
        mut exchange: Exchange,
        hops: u32,
    ) -> RunnerResult<Exchange> {
        let route_id = route.id.as_deref().unwrap_or(&route.from);

        for step in &route.steps {
            if self.config.trace {
                info!(target: ROUTE_LOG_TARGET, "[{route_id}] {step:?} on {}", exchange.id);
            }

            match step {
                Step::Log(template) => {
                    info!(
                        target: ROUTE_LOG_TARGET,
                        "[{route_id}] {}",
                        exchange.render(template)
                    );
                }
                Step::SetHeader { name, value } => {
                    let value = exchange.render(value);
                    exchange.headers.insert(name.clone(), value);
                }
                Step::RemoveHeader(name) => {
                    exchange.headers.remove(name);
                }
                Step::SetBody(template) => {
                    exchange.body = exchange.render(template);
                }
                Step::Filter { header, equals } => {
                    let pass = match (exchange.header(header), equals) {
                        (Some(actual), Some(expected)) => actual == expected,
                        (Some(_), None) => true,
                        (None, _) => false,
                    };
                    if !pass {
                        debug!("[{route_id}] exchange {} filtered out", exchange.id);
                        return Ok(exchange);
                    }
                }
                Step::Delay(millis) => thread::sleep(Duration::from_millis(*millis)),
                Step::To(uri) => {
                    exchange = self.forward(uri, exchange, hops)?;
                }
            }
        }

        Ok(exchange)
    }

    fn forward(&self, uri: &str, exchange: Exchange, hops: u32) -> RunnerResult<Exchange> {
        let endpoint: Endpoint = uri.parse().map_err(RunnerError::Internal)?;
        match endpoint.scheme.as_str() {
            LOG_SCHEME => {
                info!(target: ROUTE_LOG_TARGET, "[{}] {exchange}", endpoint.name);
                Ok(exchange)
            }
            DIRECT_SCHEME => self.dispatch(uri, exchange, hops + 1),
            other => Err(engine_error!("Unsupported endpoint scheme '{}'", other)),
        }
    }

    fn next_route_id(&self) -> String {
        loop {
            let n = self.next_route.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("route{n}");
            if !self.registry.contains_route(&id) {
                return id;
            }
        }
    }

    fn check_endpoints(definition: &RouteDefinition, label: &str) -> RunnerResult<()> {
        let registration_error = |reason: String| RunnerError::Registration {
            route: label.to_string(),
            reason,
        };

        let from = definition
            .endpoint()
            .ok_or_else(|| registration_error(format!("invalid endpoint '{}'", definition.from)))?;
        if from.scheme != DIRECT_SCHEME {
            return Err(registration_error(format!(
                "can't consume from '{from}', only {DIRECT_SCHEME}: endpoints are supported"
            )));
        }

        for step in &definition.steps {
            if let Step::To(uri) = step {
                let to: Endpoint = uri.parse().map_err(registration_error)?;
                if to.scheme != DIRECT_SCHEME && to.scheme != LOG_SCHEME {
                    return Err(registration_error(format!(
                        "unsupported endpoint scheme '{}'",
                        to.scheme
                    )));
                }
            }
        }

        Ok(())
    }
}

struct InflightGuard<'a> {
    engine: &'a RouteEngine,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.engine.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.engine.complete_stop();
        }
    }
}

impl RoutingEngine for RouteEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn add_route(&self, mut definition: RouteDefinition) -> RunnerResult<String> {
        let label = definition
            .id
            .clone()
            .unwrap_or_else(|| definition.source.display().to_string());
        Self::check_endpoints(&definition, &label)?;

        let id = match definition.id.clone() {
            Some(id) => id,
            None => self.next_route_id(),
        };
        definition.id = Some(id.clone());
        let from = definition.from.clone();

        self.registry.insert_route(id.clone(), Arc::new(definition))?;
        info!("Route '{id}' added, consuming {from}");
        Ok(id)
    }

    fn remove_route(&self, id: &str) -> RunnerResult<()> {
        if self.status() == EngineStatus::Started {
            return Err(engine_error!(
                "Route '{}' can't be removed while engine '{}' is started",
                id,
                self.config.name
            ));
        }

        match self.registry.remove_route(id) {
            Some(_) => {
                info!("Route '{id}' removed");
                Ok(())
            }
            None => Err(RunnerError::NotFound(format!("route '{id}'"))),
        }
    }

    fn start(&self) -> RunnerResult<()> {
        match self.status.compare_exchange(
            EngineStatus::Stopped as u8,
            EngineStatus::Started as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                info!(
                    "Engine '{}' started with {} routes",
                    self.config.name,
                    self.registry.get_stats().route_count
                );
                Ok(())
            }
            Err(current) => match EngineStatus::from_u8(current) {
                EngineStatus::Started => Ok(()),
                status => Err(engine_error!(
                    "Engine '{}' can't start while {}",
                    self.config.name,
                    status
                )),
            },
        }
    }

    fn stop(&self) -> RunnerResult<()> {
        if self
            .status
            .compare_exchange(
                EngineStatus::Started as u8,
                EngineStatus::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // Already stopped or stopping
            return Ok(());
        }

        let inflight = self.inflight();
        info!(
            "Engine '{}' stopping, {inflight} exchanges in flight",
            self.config.name
        );
        if inflight == 0 {
            self.complete_stop();
        }
        Ok(())
    }

    fn is_stopped(&self) -> RunnerResult<bool> {
        Ok(self.status() == EngineStatus::Stopped)
    }

    fn list_routes(&self) -> Vec<String> {
        self.registry.list_route_ids()
    }

    /// Runs the exchange to completion on the calling thread.
    fn send(&self, endpoint: &str, exchange: Exchange) -> RunnerResult<Exchange> {
        let _guard = self.admit()?;
        self.dispatch(endpoint, exchange, 0)
    }
}

/// Builds a [`RouteEngine`] per start.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteEngineFactory;

impl EngineFactory for RouteEngineFactory {
    fn create(&self, config: &EngineConfig) -> RunnerResult<Arc<dyn RoutingEngine>> {
        debug!("Creating engine '{}'", config.name);
        Ok(Arc::new(RouteEngine::new(config.clone())))
    }
}
