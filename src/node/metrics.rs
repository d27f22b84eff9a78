//! Node agent metrics
//!
//! Created unregistered with every agent; the binary registers them with
//! the process registry served on `/metrics`.

use prometheus::{IntCounter, IntGauge, Registry};

#[derive(Debug, Clone)]
pub struct NodeMetrics {
    /// Devices seen by the last probe
    pub devices_probed: IntGauge,
    pub drives_initialized: IntCounter,
    pub init_failures: IntCounter,
    pub refresh_requests: IntCounter,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeMetrics {
    pub fn new() -> Self {
        // Names and help strings are static and valid; construction cannot fail
        let gauge = |name: &str, help: &str| {
            IntGauge::new(name, help).unwrap_or_else(|_| unreachable!("invalid metric {}", name))
        };
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).unwrap_or_else(|_| unreachable!("invalid metric {}", name))
        };
        Self {
            devices_probed: gauge("directpv_node_devices_probed", "Devices seen by the last probe"),
            drives_initialized: counter(
                "directpv_node_drives_initialized_total",
                "Devices initialized into drives",
            ),
            init_failures: counter(
                "directpv_node_init_failures_total",
                "Device initializations that failed",
            ),
            refresh_requests: counter(
                "directpv_node_refresh_requests_total",
                "Node refresh requests served",
            ),
        }
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.devices_probed.clone()))?;
        registry.register(Box::new(self.drives_initialized.clone()))?;
        registry.register(Box::new(self.init_failures.clone()))?;
        registry.register(Box::new(self.refresh_requests.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        let metrics = NodeMetrics::new();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        metrics.drives_initialized.inc();
        metrics.devices_probed.set(3);

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"directpv_node_drives_initialized_total"));
        assert!(names.contains(&"directpv_node_devices_probed"));

        // Registering the same metrics twice fails
        assert!(metrics.register(&registry).is_err());
    }
}
