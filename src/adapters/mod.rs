use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::share::{LeaseProvider, ShareConnector};

pub mod dhcp;
pub mod oishare;
pub mod simulated;

pub fn lease_provider(config: &AppConfig) -> Arc<dyn LeaseProvider> {
    if config.simulation {
        return Arc::new(simulated::SimulatedLease::default());
    }

    Arc::new(dhcp::DhcpClient::new(
        config.dhcp.command.clone(),
        config.interface.clone(),
        config.dhcp.script.clone(),
    ))
}

pub fn share_connector(config: &AppConfig) -> Arc<dyn ShareConnector> {
    let share = &config.share;
    Arc::new(oishare::OiShareConnector::new(
        &share.address,
        share.port,
        share.connect_timeout(),
        share.chunk_size,
    ))
}
