use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::models::AccommodationRegistry;
use crate::services::admission::AdmissionQueue;
use crate::services::channel::ChannelManager;
use crate::services::notify::Notifier;
use crate::services::payments::PaymentProvider;

/// One admission queue per operation class, created once at startup.
pub struct AdmissionQueues {
    pub booking: AdmissionQueue,
    pub payment: AdmissionQueue,
    pub general: AdmissionQueue,
}

impl AdmissionQueues {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            booking: AdmissionQueue::new("booking", &config.booking_class),
            payment: AdmissionQueue::new("payment", &config.payment_class),
            general: AdmissionQueue::new("general", &config.general_class),
        }
    }
}

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub accommodations: AccommodationRegistry,
    pub payments: Box<dyn PaymentProvider>,
    pub channel: Box<dyn ChannelManager>,
    pub notifier: Box<dyn Notifier>,
    pub admission: AdmissionQueues,
}
