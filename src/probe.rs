//! Probe entry point: dispatches a device target to the right normalizer.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::cisco::{self, CiscoReport};
use crate::error::ProbeError;
use crate::model::Credentials;
use crate::panos::{self, PanosClient, PanosReport};
use crate::session::REGISTRY;

/// Which normalizer a target device speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Cisco,
    Panos,
}

/// Normalized output of one probe, tagged by module kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "module", content = "report", rename_all = "lowercase")]
pub enum ProbeReport {
    Cisco(CiscoReport),
    Panos(PanosReport),
}

impl ProbeReport {
    /// Renders the report as pretty-printed JSON for sinks and debugging.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Probes one device and returns its normalized report.
///
/// CLI devices go through the process-wide session registry and reuse
/// their connection across probes; API devices get a fresh single-use
/// client that is dropped when this function returns.
pub async fn probe(
    target: Ipv4Addr,
    credentials: Credentials,
    module: ModuleKind,
) -> Result<ProbeReport, ProbeError> {
    match module {
        ModuleKind::Cisco => {
            let session = REGISTRY.acquire(target, &credentials).await?;
            Ok(ProbeReport::Cisco(cisco::collect(&session).await?))
        }
        ModuleKind::Panos => {
            let client = PanosClient::connect(target, &credentials).await?;
            Ok(ProbeReport::Panos(panos::collect(&client).await?))
        }
    }
}
