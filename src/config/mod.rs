//! 配置管理模块

mod cli;
mod settings;

pub use cli::Cli;
pub use settings::{
	Settings,
	BleSettings,
	HttpSettings,
	StorageSettings,
	DecimationSettings,
	OneOrMany,
	AlertSettings,
	TriggerSettings,
	ActionSettings,
	MailActionSettings,
	PrintActionSettings,
	SmtpSecurity,
	SmtpSettings,
	MqttAuth,
	MqttSettings,
	LoggingSettings,
};
