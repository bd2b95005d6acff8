//! Server configuration

use std::net::SocketAddr;

use crate::session::SessionOptions;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Region used when a client request names none
    pub default_region: String,

    /// Further regions whose streams can be listed and subscribed
    pub extra_regions: Vec<String>,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Messages queued per client before the session's producers wait
    pub outbound_capacity: usize,

    /// Records buffered per subscription before new ones are dropped
    pub delivery_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            default_region: "us-west-2".to_string(),
            extra_regions: Vec::new(),
            max_connections: 0, // Unlimited
            outbound_capacity: 100,
            delivery_capacity: 50,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the default region
    pub fn default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    /// Add a region besides the default one
    pub fn extra_region(mut self, region: impl Into<String>) -> Self {
        let region = region.into();
        if region != self.default_region && !self.extra_regions.contains(&region) {
            self.extra_regions.push(region);
        }
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-client outbound queue capacity
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Set the per-subscription delivery channel capacity
    pub fn delivery_capacity(mut self, capacity: usize) -> Self {
        self.delivery_capacity = capacity.max(1);
        self
    }

    /// Every region the server talks to, default first
    pub fn regions(&self) -> Vec<String> {
        std::iter::once(self.default_region.clone())
            .chain(self.extra_regions.iter().cloned())
            .collect()
    }

    pub(crate) fn session_options(&self) -> SessionOptions {
        SessionOptions {
            default_region: self.default_region.clone(),
            delivery_capacity: self.delivery_capacity,
        }
    }
}
