//! Start-up summary.

use core::fmt;

use crate::address::EndpointAddress;

#[derive(Debug, Clone)]
pub struct StartupSummary {
    pub endpoint: EndpointAddress,
    pub transport_medium: &'static str,
    pub pipelines: Vec<(&'static str, Vec<String>)>,
    pub items: Vec<String>,
}

impl fmt::Display for StartupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "endpoint: {} via {}", self.endpoint, self.transport_medium)?;
        for (pipeline, steps) in &self.pipelines {
            writeln!(f, "{pipeline}: {}", steps.join(" -> "))?;
        }
        for item in &self.items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}
