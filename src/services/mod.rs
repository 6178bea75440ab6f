//! 业务逻辑层（Service）

mod alert_service;
mod device_service;
mod email_service;
mod notification_service;
mod publish_service;
mod sampling_service;
mod store_service;

pub use alert_service::{AlertEngine, AlertRule, AlertStateView};
pub use device_service::{DeviceService, RetryPolicy};
pub use email_service::{build_transport, MailSink};
pub use notification_service::{AlertAction, AlertSink, PrintSink};
pub use publish_service::{
    build_messages, join_topic, MqttMessage, MqttPublisher, MqttTransport, PublishQueue,
};
pub use sampling_service::{CycleReport, Scheduler};
pub use store_service::{
    RestoreReport, SeriesQuery, SeriesStore, COLUMNS_TAG, LOG_TAG, LOG_VERSION,
};
