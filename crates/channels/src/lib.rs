// Notification Channels
//
// Delivery of presence notifications to external platforms (Discord), and
// the manager that rebuilds them when the notification config changes.

pub mod manager;
pub mod platforms;
pub mod service;

pub use manager::{PlatformBuilder, ServiceBuilder, ServiceManager};
pub use platforms::discord::DiscordNotifier;
pub use service::{ChannelError, NotificationService, ServiceListener};
